//! In-place editing scenarios over record buffers

use pretty_assertions::assert_eq;

use evio_compact::{CompactBuffer, DataType, NodeRef, StructKind, StructureBuilder};
use hipo::record::header::RecordHeader;
use hipo::{Codec, Endian, RecordBuilder};

fn leaf_bank(order: Endian, tag: u16, num: u8, values: &[i32]) -> Vec<u8> {
    let mut b = StructureBuilder::bank(order, tag, num, DataType::Int32);
    b.append_i32(values).unwrap();
    b.build().unwrap()
}

fn bank_of_banks(order: Endian, tag: u16, children: &[Vec<u8>]) -> Vec<u8> {
    let mut b = StructureBuilder::bank(order, tag, 0, DataType::Bank);
    for child in children {
        b.append_child(child).unwrap();
    }
    b.build().unwrap()
}

fn record_buffer(order: Endian, events: &[Vec<u8>]) -> Vec<u8> {
    let mut record = RecordBuilder::new(order, Codec::None);
    for ev in events {
        assert!(record.add_event(ev).unwrap().is_added());
    }
    record.build().unwrap().to_vec()
}

/// Every live node's length word in the buffer must match its arena
/// value, per the packing of its kind.
fn assert_length_words(buffer: &CompactBuffer) {
    let bytes = buffer.as_bytes();
    let order = buffer.byte_order();
    for event in 0..buffer.event_count() {
        for (_, node) in buffer.tree(event).unwrap().live_nodes() {
            let stored = match node.kind() {
                StructKind::Bank => order.read_u32(&bytes[node.position()..]),
                StructKind::Segment | StructKind::TagSegment => {
                    let at = match order {
                        Endian::Big => node.position() + 2,
                        Endian::Little => node.position(),
                    };
                    u32::from(order.read_u16(&bytes[at..]))
                }
            };
            assert_eq!(stored, node.length_word(), "length word at {}", node.position());
        }
    }
}

#[test]
fn remove_first_event_of_three() {
    let order = Endian::Little;
    let events = [
        leaf_bank(order, 1, 0, &[10, 11, 12]),
        leaf_bank(order, 2, 0, &[20]),
        leaf_bank(order, 3, 0, &[30, 31]),
    ];
    let removed_bytes = events[0].len();
    let mut buffer = CompactBuffer::from_buffer(record_buffer(order, &events)).unwrap();
    let old_pos_1 = buffer.tree(1).unwrap().root().position();
    let old_pos_2 = buffer.tree(2).unwrap().root().position();

    buffer.remove_structure(NodeRef::root_of(0)).unwrap();

    assert_eq!(buffer.event_count(), 2);
    // The former event 1 now owns the slot event 0 used to hold,
    // shifted back by the event bytes plus its index entry
    assert_eq!(
        buffer.tree(0).unwrap().root().position(),
        old_pos_1 - removed_bytes - 4
    );
    assert_eq!(
        buffer.tree(1).unwrap().root().position(),
        old_pos_2 - removed_bytes - 4
    );
    assert_eq!(buffer.event_bytes(0).unwrap(), &events[1][..]);
    assert_eq!(buffer.event_bytes(1).unwrap(), &events[2][..]);
    assert_length_words(&buffer);

    // The record header agrees
    let bytes = buffer.as_bytes().to_vec();
    let header = RecordHeader::parse(&bytes, 0).unwrap();
    assert_eq!(header.event_count(), 2);
    assert_eq!(header.index_length(), 8);
    assert_eq!(
        header.data_length() as usize,
        events[1].len() + events[2].len()
    );

    // And a fresh scan sees the same two events
    let rescanned = CompactBuffer::from_buffer(bytes).unwrap();
    assert_eq!(rescanned.event_count(), 2);
    assert_eq!(rescanned.event_bytes(0).unwrap(), &events[1][..]);
}

#[test]
fn insert_into_bank_of_banks() {
    let order = Endian::Little;
    let b1 = leaf_bank(order, 11, 1, &[1, 2]);
    let b2 = leaf_bank(order, 12, 2, &[3]);
    let outer = bank_of_banks(order, 10, &[b1.clone(), b2.clone()]);
    let tail_event = leaf_bank(order, 99, 0, &[9]);

    let mut buffer =
        CompactBuffer::from_buffer(record_buffer(order, &[outer.clone(), tail_event.clone()]))
            .unwrap();
    let old_root_len = buffer.tree(0).unwrap().root().length_word();
    let old_tail_pos = buffer.tree(1).unwrap().root().position();

    let new_bank = leaf_bank(order, 13, 3, &[7, 8, 9]);
    let new_words = (new_bank.len() / 4) as u32;
    let inserted = buffer
        .insert_structure(NodeRef::root_of(0), &new_bank)
        .unwrap();

    // Parent length grew by the inserted words
    let root = buffer.tree(0).unwrap().root();
    assert_eq!(root.length_word(), old_root_len + new_words);
    // Children in order: B1, B2, then the new bank
    assert_eq!(root.children().len(), 3);
    let last = buffer.node(inserted).unwrap();
    assert_eq!(last.tag(), 13);
    assert_eq!(last.num(), 3);
    assert_eq!(buffer.node_bytes(inserted).unwrap(), &new_bank[..]);
    // Everything physically past the insertion point moved right
    assert_eq!(
        buffer.tree(1).unwrap().root().position(),
        old_tail_pos + new_bank.len()
    );
    assert_eq!(buffer.event_bytes(1).unwrap(), &tail_event[..]);
    assert_length_words(&buffer);

    // A fresh scan agrees with the in-place bookkeeping
    let rescanned = CompactBuffer::from_buffer(buffer.as_bytes().to_vec()).unwrap();
    let root = rescanned.tree(0).unwrap().root();
    assert_eq!(root.children().len(), 3);
    let grown: Vec<u8> = rescanned.event_bytes(0).unwrap().to_vec();
    assert_eq!(grown.len(), outer.len() + new_bank.len());
    assert_eq!(&grown[grown.len() - new_bank.len()..], &new_bank[..]);
}

#[test]
fn insert_then_remove_restores_buffer_exactly() {
    let order = Endian::Big;
    let b1 = leaf_bank(order, 1, 0, &[5, 6]);
    let outer = bank_of_banks(order, 2, &[b1]);
    let original = record_buffer(order, &[outer, leaf_bank(order, 3, 0, &[1])]);

    let mut buffer = CompactBuffer::from_buffer(original.clone()).unwrap();
    let extra = leaf_bank(order, 7, 7, &[42, 43, 44, 45]);
    let inserted = buffer
        .insert_structure(NodeRef::root_of(0), &extra)
        .unwrap();
    assert_ne!(buffer.as_bytes(), &original[..]);

    buffer.remove_structure(inserted).unwrap();
    assert_eq!(buffer.as_bytes(), &original[..]);
    assert_length_words(&buffer);
}

#[test]
fn remove_inner_structure_updates_ancestors_and_index() {
    let order = Endian::Little;
    let inner_a = leaf_bank(order, 21, 0, &[1, 2, 3]);
    let inner_b = leaf_bank(order, 22, 0, &[4]);
    let middle = bank_of_banks(order, 20, &[inner_a.clone(), inner_b.clone()]);
    let outer = bank_of_banks(order, 19, &[middle]);

    let mut buffer = CompactBuffer::from_buffer(record_buffer(order, &[outer.clone()])).unwrap();
    // outer -> middle -> [a, b]; remove a
    let middle_id = buffer.tree(0).unwrap().root().children()[0];
    let a_id = buffer.tree(0).unwrap().get(middle_id).unwrap().children()[0];
    let a_ref = NodeRef { event: 0, node: a_id };
    let delta_words = (inner_a.len() / 4) as u32;

    let old_outer_len = buffer.tree(0).unwrap().root().length_word();
    let old_middle_len = buffer.tree(0).unwrap().get(middle_id).unwrap().length_word();

    buffer.remove_structure(a_ref).unwrap();

    let tree = buffer.tree(0).unwrap();
    assert_eq!(tree.root().length_word(), old_outer_len - delta_words);
    let middle_node = tree.get(middle_id).unwrap();
    assert_eq!(middle_node.length_word(), old_middle_len - delta_words);
    assert_eq!(middle_node.children().len(), 1);
    assert_length_words(&buffer);

    // The record's event index entry shrank to the new event size
    let bytes = buffer.as_bytes().to_vec();
    let header = RecordHeader::parse(&bytes, 0).unwrap();
    assert_eq!(
        order.read_u32(&bytes[56..]) as usize,
        outer.len() - inner_a.len()
    );
    assert_eq!(header.data_length() as usize, outer.len() - inner_a.len());

    // Only b is left under middle
    let rescanned = CompactBuffer::from_buffer(bytes).unwrap();
    let found = rescanned.search(0, 22, 0).unwrap();
    assert_eq!(found.len(), 1);
    assert!(rescanned.search(0, 21, 0).unwrap().is_empty());
}

#[test]
fn obsolete_nodes_fail_loudly() {
    let order = Endian::Little;
    let inner = leaf_bank(order, 5, 0, &[1]);
    let outer = bank_of_banks(order, 4, &[inner]);
    let mut buffer = CompactBuffer::from_buffer(record_buffer(order, &[outer])).unwrap();

    let child_id = buffer.tree(0).unwrap().root().children()[0];
    let child = NodeRef {
        event: 0,
        node: child_id,
    };
    buffer.remove_structure(child).unwrap();

    assert!(matches!(
        buffer.node(child),
        Err(evio_compact::Error::InvalidState(_))
    ));
    assert!(matches!(
        buffer.remove_structure(child),
        Err(evio_compact::Error::InvalidState(_))
    ));
    // The tree itself still lists the slot, marked obsolete
    assert!(buffer.tree(0).unwrap().get(child_id).unwrap().is_obsolete());
}

#[test]
fn edits_across_multiple_records() {
    let order = Endian::Little;
    let rec0_events = [
        leaf_bank(order, 1, 0, &[1, 1]),
        leaf_bank(order, 2, 0, &[2, 2, 2]),
    ];
    let rec1_events = [leaf_bank(order, 3, 0, &[3])];
    let mut joined = record_buffer(order, &rec0_events);
    joined.extend_from_slice(&record_buffer(order, &rec1_events));

    let mut buffer = CompactBuffer::from_buffer(joined).unwrap();
    assert_eq!(buffer.record_count(), 2);
    assert_eq!(buffer.event_count(), 3);
    let old_rec1_root = buffer.tree(2).unwrap().root().position();

    buffer.remove_structure(NodeRef::root_of(0)).unwrap();

    assert_eq!(buffer.event_count(), 2);
    // The second record's event shifted with its whole record
    let shrink = rec0_events[0].len() + 4;
    assert_eq!(
        buffer.tree(1).unwrap().root().position(),
        old_rec1_root - shrink
    );
    assert_eq!(buffer.event_bytes(1).unwrap(), &rec1_events[0][..]);
    assert_length_words(&buffer);

    // Both records still parse from scratch
    let bytes = buffer.into_buffer();
    let first = RecordHeader::parse(&bytes, 0).unwrap();
    assert_eq!(first.event_count(), 1);
    let second = RecordHeader::parse(&bytes, first.length() as usize).unwrap();
    assert_eq!(second.event_count(), 1);
}

#[test]
fn rescan_drops_obsolete_slots() {
    let order = Endian::Little;
    let inner = leaf_bank(order, 5, 0, &[1]);
    let outer = bank_of_banks(order, 4, &[inner]);
    let mut buffer = CompactBuffer::from_buffer(record_buffer(order, &[outer])).unwrap();

    let child = NodeRef {
        event: 0,
        node: buffer.tree(0).unwrap().root().children()[0],
    };
    buffer.remove_structure(child).unwrap();
    assert_eq!(buffer.tree(0).unwrap().len(), 2);

    buffer.rescan().unwrap();
    assert_eq!(buffer.tree(0).unwrap().len(), 1);
    assert!(buffer.tree(0).unwrap().root().children().is_empty());
    assert_length_words(&buffer);
}

#[test]
fn search_finds_nodes_by_tag_and_num() {
    let order = Endian::Little;
    let b1 = leaf_bank(order, 7, 1, &[1]);
    let b2 = leaf_bank(order, 7, 2, &[2]);
    let b3 = leaf_bank(order, 8, 1, &[3]);
    let outer = bank_of_banks(order, 7, &[b1, b2, b3]);
    let buffer = CompactBuffer::from_buffer(record_buffer(order, &[outer])).unwrap();

    assert_eq!(buffer.search(0, 7, 1).unwrap().len(), 1);
    assert_eq!(buffer.search(0, 7, 0).unwrap().len(), 1); // the outer bank
    assert_eq!(buffer.search(0, 8, 1).unwrap().len(), 1);
    assert!(buffer.search(0, 9, 0).unwrap().is_empty());

    let hit = buffer.search(0, 7, 2).unwrap()[0];
    assert_eq!(buffer.data_bytes(hit).unwrap(), &2i32.to_le_bytes()[..]);
}

#[test]
fn whole_file_images_can_be_edited() {
    use hipo::{FileHeader, FileReader, FileWriter, WriterOptions};

    let order = Endian::Little;
    let events = [
        leaf_bank(order, 1, 0, &[1]),
        leaf_bank(order, 2, 0, &[2, 2]),
        leaf_bank(order, 3, 0, &[3, 3, 3]),
    ];
    let mut writer = FileWriter::to_buffer(WriterOptions::default()).unwrap();
    for ev in &events {
        writer.add_event(ev).unwrap();
    }
    writer.close().unwrap();

    let mut buffer = CompactBuffer::from_buffer(writer.into_buffer()).unwrap();
    assert_eq!(buffer.event_count(), 3);
    buffer.remove_structure(NodeRef::root_of(1)).unwrap();
    assert_length_words(&buffer);
    let edited = buffer.into_buffer();

    // The stale trailer is gone and the file header no longer points at one
    let header = FileHeader::parse(&edited, 0).unwrap();
    assert_eq!(header.trailer_position(), 0);
    assert!(!header.has_trailer_with_index());

    // A reader falls back to a linear scan and sees the surviving events
    let mut reader = FileReader::from_buffer(edited).unwrap();
    assert_eq!(reader.event_count(), 2);
    assert_eq!(reader.get_event(0).unwrap(), &events[0][..]);
    assert_eq!(reader.get_event(1).unwrap(), &events[2][..]);
}

#[test]
fn compressed_buffers_are_rejected() {
    let order = Endian::Little;
    let mut record = RecordBuilder::new(order, Codec::Lz4);
    record.add_event(&leaf_bank(order, 1, 0, &[1, 2, 3])).unwrap();
    let bytes = record.build().unwrap().to_vec();

    assert!(matches!(
        CompactBuffer::from_buffer(bytes),
        Err(evio_compact::Error::Compressed)
    ));
}
