//! End-to-end write/read scenarios over files and buffers

use pretty_assertions::assert_eq;

use hipo::record::header::HEADER_SIZE_BYTES;
use hipo::{Codec, Endian, FileHeader, FileKind, FileReader, FileWriter, RecordHeader, WriterOptions};

fn options(codec: Codec, order: Endian) -> WriterOptions {
    WriterOptions {
        order,
        codec,
        ..WriterOptions::default()
    }
}

#[test]
fn empty_file_has_header_and_trailer_only() {
    let mut writer = FileWriter::to_buffer(WriterOptions::default()).unwrap();
    writer.close().unwrap();
    let bytes = writer.into_buffer();

    assert_eq!(bytes.len(), 2 * HEADER_SIZE_BYTES);
    let header = FileHeader::parse(&bytes, 0).unwrap();
    assert_eq!(header.record_count(), 0);
    // Trailer right after the file header block
    assert_eq!(header.trailer_position(), header.length() as u64);

    let trailer = RecordHeader::parse(&bytes, HEADER_SIZE_BYTES).unwrap();
    assert!(trailer.is_last_record());
    assert_eq!(trailer.event_count(), 0);

    let reader = FileReader::from_buffer(bytes).unwrap();
    assert_eq!(reader.event_count(), 0);
    assert_eq!(reader.record_count(), 0);
}

#[test]
fn single_event_uncompressed() {
    let order = Endian::Little;
    // A minimal bank: tag 1, num 0, type 0x0B (i32), two data words
    let mut event = Vec::new();
    for word in [0x0000_0003u32, 0x0001_0B00, 0x0A0B_0C0D, 0x1122_3344] {
        event.extend_from_slice(&word.to_le_bytes());
    }

    let mut writer = FileWriter::to_buffer(options(Codec::None, order)).unwrap();
    writer.add_event(&event).unwrap();
    writer.close().unwrap();

    let mut reader = FileReader::from_buffer(writer.into_buffer()).unwrap();
    assert_eq!(reader.event_count(), 1);
    assert_eq!(reader.get_event(0).unwrap(), &event[..]);
}

#[test]
fn two_records_under_lz4_with_trailer_index() {
    let mut opts = options(Codec::Lz4, Endian::Little);
    opts.max_payload_bytes = 8000;
    let events: Vec<Vec<u8>> = (0..100u8).map(|i| vec![i; 128]).collect();

    let mut writer = FileWriter::to_buffer(opts).unwrap();
    for ev in &events {
        writer.add_event(ev).unwrap();
    }
    writer.close().unwrap();
    assert_eq!(writer.record_count(), 2);
    let bytes = writer.into_buffer();

    let header = FileHeader::parse(&bytes, 0).unwrap();
    assert_eq!(header.record_count(), 2);
    assert!(header.has_trailer_with_index());

    // The trailer index entries plus framing account for the whole file
    let trailer_at = header.trailer_position() as usize;
    let trailer = RecordHeader::parse(&bytes, trailer_at).unwrap();
    assert_eq!(trailer.index_length(), 16);
    let order = header.byte_order();
    let len0 = order.read_u32(&bytes[trailer_at + 56..]) as usize;
    let count0 = order.read_u32(&bytes[trailer_at + 60..]);
    let len1 = order.read_u32(&bytes[trailer_at + 64..]) as usize;
    let count1 = order.read_u32(&bytes[trailer_at + 68..]);
    assert_eq!(count0 + count1, 100);
    assert_eq!(
        header.length() as usize + len0 + len1 + trailer.length() as usize,
        bytes.len()
    );

    let mut reader = FileReader::from_buffer(bytes).unwrap();
    assert_eq!(reader.event_count(), 100);
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(reader.get_event(i as u64).unwrap(), &ev[..]);
    }
}

#[test]
fn endianness_round_trips_both_ways() {
    let events: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i.wrapping_mul(7); 44]).collect();
    for (write_order, codec) in [
        (Endian::Big, Codec::None),
        (Endian::Big, Codec::Gzip),
        (Endian::Little, Codec::Lz4),
    ] {
        let mut writer = FileWriter::to_buffer(options(codec, write_order)).unwrap();
        for ev in &events {
            writer.add_event(ev).unwrap();
        }
        writer.close().unwrap();

        // The reader detects the order; the host order never enters it
        let mut reader = FileReader::from_buffer(writer.into_buffer()).unwrap();
        assert_eq!(reader.byte_order(), write_order);
        for (i, ev) in events.iter().enumerate() {
            assert_eq!(reader.get_event(i as u64).unwrap(), &ev[..]);
        }
    }
}

#[test]
fn trailerless_random_access_equals_sequential() {
    let mut opts = options(Codec::None, Endian::Little);
    opts.trailer = false;
    opts.trailer_index = false;
    opts.max_payload_bytes = 600;
    let events: Vec<Vec<u8>> = (0..60u8).map(|i| vec![i; 36]).collect();

    let mut writer = FileWriter::to_buffer(opts).unwrap();
    for ev in &events {
        writer.add_event(ev).unwrap();
    }
    writer.close().unwrap();
    let bytes = writer.into_buffer();

    let header = FileHeader::parse(&bytes, 0).unwrap();
    assert!(!header.has_trailer_with_index());
    assert_eq!(header.trailer_position(), 0);

    // Random access against a linear scan
    let mut random = FileReader::from_buffer(bytes.clone()).unwrap();
    let direct = random.get_event(42).unwrap().to_vec();

    let mut sequential = FileReader::from_buffer(bytes).unwrap();
    let mut last = None;
    for _ in 0..43 {
        last = sequential.next_event().unwrap().map(<[u8]>::to_vec);
    }
    assert_eq!(Some(direct), last);
}

#[test]
fn file_sink_carries_dictionary_and_first_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.hipo");

    let dictionary = "<xmldict><bank name=\"hits\" tag=\"1\"/></xmldict>";
    let first_event = vec![0x10u8; 16];
    let opts = WriterOptions {
        kind: FileKind::Evio,
        dictionary_xml: Some(dictionary.to_string()),
        first_event: Some(first_event.clone()),
        ..WriterOptions::default()
    };

    let mut writer = FileWriter::create(&path, opts).unwrap();
    writer.add_event(&[7u8; 40]).unwrap();
    writer.add_event(&[8u8; 40]).unwrap();
    writer.close().unwrap();

    let mut reader = FileReader::open(&path).unwrap();
    let header = reader.file_header().unwrap();
    assert_eq!(header.kind(), FileKind::Evio);
    assert!(header.has_dictionary());
    assert!(header.has_first_event());
    assert!(header.user_header_length() > 0);

    assert_eq!(reader.dictionary_xml(), Some(dictionary));
    assert_eq!(reader.first_event(), Some(&first_event[..]));
    assert_eq!(reader.event_count(), 2);
    assert_eq!(reader.get_event(1).unwrap(), &[8u8; 40]);
}

#[test]
fn buffer_sink_puts_dictionary_in_first_record() {
    let opts = WriterOptions {
        dictionary_xml: Some("<dict/>".to_string()),
        ..WriterOptions::default()
    };
    let mut writer = FileWriter::to_buffer(opts).unwrap();
    writer.add_event(&[1u8; 8]).unwrap();
    writer.close().unwrap();
    let bytes = writer.into_buffer();

    let header = FileHeader::parse(&bytes, 0).unwrap();
    assert!(header.has_dictionary());
    // The record, not the file header, carries the payload
    assert_eq!(header.user_header_length(), 0);
    let record = RecordHeader::parse(&bytes, header.length() as usize).unwrap();
    assert!(record.has_dictionary());
    assert!(record.user_header_length() > 0);

    let mut reader = FileReader::from_buffer(bytes).unwrap();
    assert_eq!(reader.dictionary_xml(), Some("<dict/>"));
    assert_eq!(reader.get_event(0).unwrap(), &[1u8; 8]);
}

#[test]
fn oversize_event_spans_its_own_record() {
    let mut opts = options(Codec::None, Endian::Little);
    opts.max_payload_bytes = 512;
    let big = vec![0x5au8; 4096];

    let mut writer = FileWriter::to_buffer(opts).unwrap();
    writer.add_event(&[1u8; 64]).unwrap();
    // Refused by the 512-byte record, so the first record closes and the
    // builder grows to take it
    writer.add_event(&big).unwrap();
    writer.add_event(&[2u8; 64]).unwrap();
    writer.close().unwrap();
    assert_eq!(writer.record_count(), 2);

    let mut reader = FileReader::from_buffer(writer.into_buffer()).unwrap();
    assert_eq!(reader.event_count(), 3);
    assert_eq!(reader.get_event(1).unwrap(), &big[..]);
    assert_eq!(reader.get_event(2).unwrap(), &[2u8; 64]);
}
