//! In-place structure editing over a buffer of uncompressed records
//!
//! `CompactBuffer` owns a byte buffer holding a sequence of records,
//! scans every event into node trees, and can splice structures out of or
//! into the buffer while keeping all node positions, ancestor length
//! words and record header words consistent. Edited-away nodes are marked
//! obsolete rather than dropped, so stale references fail loudly.

use hipo::cursor::{ByteCursor, Endian};
use hipo::file::header::{
    BIT_INFO_OFFSET, FileHeader, TRAILER_POSITION_OFFSET,
};
use hipo::record::header::{
    EVENT_COUNT_OFFSET, HEADER_SIZE_BYTES, INDEX_LENGTH_OFFSET, RECORD_LENGTH_OFFSET,
    RecordHeader, UNCOMPRESSED_LENGTH_OFFSET, pad_to_word,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::node::{EventTree, Node, NodeId};
use crate::scanner::{scan_event, scan_structure};
use crate::types::StructKind;

/// Reference to one node: the event's index in the buffer plus the
/// node's id in that event's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub event: usize,
    pub node: NodeId,
}

impl NodeRef {
    pub fn root_of(event: usize) -> Self {
        Self {
            event,
            node: NodeId::ROOT,
        }
    }

    pub fn is_event_root(self) -> bool {
        self.node == NodeId::ROOT
    }
}

/// One record's framing inside the buffer.
#[derive(Debug, Clone, Copy)]
struct RecordSlot {
    /// Record header position.
    position: usize,
    /// Event-length index position (right after the header).
    index_pos: usize,
    index_length: u32,
    /// First event byte (past index and padded user header).
    data_pos: usize,
    /// Whole record length in bytes.
    length: u32,
    event_count: u32,
    /// Global index of the record's first event.
    first_event: usize,
}

#[derive(Debug)]
struct EventSlot {
    record: usize,
    tree: EventTree,
}

/// Editable view over a buffer of uncompressed records.
#[derive(Debug)]
pub struct CompactBuffer {
    cursor: ByteCursor<Vec<u8>>,
    records: Vec<RecordSlot>,
    events: Vec<EventSlot>,
}

impl CompactBuffer {
    /// Adopt a buffer holding uncompressed records and scan every record
    /// and event in it.
    ///
    /// The buffer may be a bare record sequence or a whole file image
    /// with a file header. Editing invalidates any trailer index, so a
    /// trailer is dropped up front and the file header's trailer words
    /// are cleared; re-running the events through a writer restores one.
    pub fn from_buffer(mut buf: Vec<u8>) -> Result<Self> {
        if buf.len() < HEADER_SIZE_BYTES {
            return Err(Error::Malformed(format!(
                "{} bytes is too short for a record",
                buf.len()
            )));
        }

        // A leading file header moves the first record past its block;
        // anything else is read as records from offset 0.
        let mut order = Endian::Little;
        let start = match FileHeader::parse(&buf, 0) {
            Ok(file_header) => {
                order = file_header.byte_order();
                let trailer_at = file_header.trailer_position() as usize;
                if trailer_at >= file_header.length() as usize && trailer_at <= buf.len() {
                    buf.truncate(trailer_at);
                }
                if file_header.trailer_position() != 0 {
                    let mut patched = file_header.clone();
                    patched.set_trailer_position(0).set_trailer_with_index(false);
                    order.write_u64(&mut buf[TRAILER_POSITION_OFFSET..], 0);
                    order.write_u32(&mut buf[BIT_INFO_OFFSET..], patched.bit_info());
                }
                file_header.length() as usize
            }
            Err(hipo::Error::BadFileType(_)) => 0,
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut events = Vec::new();

        let mut pos = start;
        while pos + HEADER_SIZE_BYTES <= buf.len() {
            let header = RecordHeader::parse(&buf, pos)?;
            if header.codec().is_compressed() {
                return Err(Error::Compressed);
            }
            if pos == start {
                order = header.byte_order();
            }
            let length = header.length() as usize;
            if pos + length > buf.len() {
                return Err(Error::Malformed(format!(
                    "record at {pos} with length {length} overruns the buffer"
                )));
            }
            if header.header_type().is_trailer()
                || (header.is_last_record() && header.event_count() == 0)
            {
                // An unannounced trailer; its bytes would go stale under
                // edits, so it goes too.
                buf.truncate(pos);
                break;
            }

            let index_pos = pos + header.header_length() as usize;
            let data_pos = index_pos
                + header.index_length() as usize
                + pad_to_word(header.user_header_length()) as usize;
            if data_pos + pad_to_word(header.data_length()) as usize > pos + length {
                return Err(Error::Malformed(format!(
                    "record at {pos} declares more index/user/data than its length"
                )));
            }
            let slot = RecordSlot {
                position: pos,
                index_pos,
                index_length: header.index_length(),
                data_pos,
                length: length as u32,
                event_count: header.event_count(),
                first_event: events.len(),
            };

            let mut ev_pos = data_pos;
            for i in 0..header.event_count() {
                let ev_len = order.read_u32(&buf[index_pos + 4 * i as usize..]) as usize;
                if ev_len < 8 || ev_len % 4 != 0 {
                    return Err(Error::Malformed(format!(
                        "index entry {i} of record at {pos} holds {ev_len}"
                    )));
                }
                let tree = scan_event(&buf, order, ev_pos, events.len())?;
                if tree.root().total_bytes() != ev_len {
                    return Err(Error::Malformed(format!(
                        "event at {ev_pos} spans {} bytes, index entry says {ev_len}",
                        tree.root().total_bytes()
                    )));
                }
                events.push(EventSlot {
                    record: records.len(),
                    tree,
                });
                ev_pos += ev_len;
            }
            if ev_pos - data_pos != header.data_length() as usize {
                return Err(Error::Malformed(format!(
                    "events span {} bytes, record declares {}",
                    ev_pos - data_pos,
                    header.data_length()
                )));
            }

            records.push(slot);
            pos += length;
            if header.is_last_record() {
                break;
            }
        }

        debug!(
            "scanned {} records, {} events for editing",
            records.len(),
            events.len()
        );
        Ok(Self {
            cursor: ByteCursor::new(buf, order),
            records,
            events,
        })
    }

    pub fn byte_order(&self) -> Endian {
        self.cursor.order()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// The buffer in its current edited state.
    pub fn as_bytes(&self) -> &[u8] {
        self.cursor.as_slice()
    }

    pub fn into_buffer(self) -> Vec<u8> {
        let limit = self.cursor.limit();
        let mut buf = self.cursor.into_inner();
        buf.truncate(limit);
        buf
    }

    /// The node arena of event `event`.
    pub fn tree(&self, event: usize) -> Result<&EventTree> {
        self.events
            .get(event)
            .map(|slot| &slot.tree)
            .ok_or(Error::InvalidArgument("event index out of range"))
    }

    /// Look up a node. Obsolete nodes are an error.
    pub fn node(&self, at: NodeRef) -> Result<&Node> {
        self.tree(at.event)?.get_live(at.node)
    }

    /// The full bytes (header + data) of a structure.
    pub fn node_bytes(&self, at: NodeRef) -> Result<&[u8]> {
        let node = self.node(at)?;
        Ok(self.cursor.slice(node.position(), node.end())?)
    }

    /// The logical data bytes of a leaf, padding stripped.
    pub fn data_bytes(&self, at: NodeRef) -> Result<&[u8]> {
        let node = self.node(at)?;
        let from = node.data_position();
        Ok(self.cursor.slice(from, from + node.data_length_bytes())?)
    }

    /// An event's full bytes.
    pub fn event_bytes(&self, event: usize) -> Result<&[u8]> {
        self.node_bytes(NodeRef::root_of(event))
    }

    /// All live nodes of an event matching tag and num, in scan order.
    /// Segments and tagsegments carry num 0.
    pub fn search(&self, event: usize, tag: u16, num: u8) -> Result<Vec<NodeRef>> {
        let tree = self.tree(event)?;
        Ok(tree
            .live_nodes()
            .filter(|(_, n)| n.tag() == tag && n.num() == num)
            .map(|(id, _)| NodeRef { event, node: id })
            .collect())
    }

    //--- editing -----------------------------------------------------------

    /// Remove a structure from the buffer.
    ///
    /// The node and its descendants become obsolete; every following node
    /// shifts left; ancestor length words, the record's header words and
    /// (for whole events) the event index all stay consistent.
    pub fn remove_structure(&mut self, at: NodeRef) -> Result<()> {
        let rec_idx = self
            .events
            .get(at.event)
            .ok_or(Error::InvalidArgument("event index out of range"))?
            .record;
        let (start, end, delta, parent_id) = {
            let node = self.events[at.event].tree.get_live(at.node)?;
            (
                node.position(),
                node.end(),
                node.total_bytes(),
                node.parent(),
            )
        };
        let rec = self.records[rec_idx];
        let local = at.event - rec.first_event;

        self.events[at.event].tree.mark_obsolete(at.node);
        self.cursor.remove_range(start, end)?;

        if at.is_event_root() {
            // Whole-event removal also drops the 4-byte index entry.
            let entry_pos = rec.index_pos + 4 * local;
            self.cursor.remove_range(entry_pos, entry_pos + 4)?;
            let shrink = delta + 4;

            for (i, slot) in self.events.iter_mut().enumerate() {
                if slot.record == rec_idx {
                    if i < at.event {
                        // Only the index entry moved out from under these
                        slot.tree.shift_all(-4);
                    } else if i > at.event {
                        slot.tree.shift_all(-(shrink as isize));
                        slot.tree.place -= 1;
                    }
                } else if slot.record > rec_idx {
                    slot.tree.shift_all(-(shrink as isize));
                    slot.tree.place -= 1;
                }
            }

            let record = &mut self.records[rec_idx];
            record.length -= shrink as u32;
            record.event_count -= 1;
            record.index_length -= 4;
            record.data_pos -= 4;
            let (position, length, event_count, index_length) = (
                record.position,
                record.length,
                record.event_count,
                record.index_length,
            );
            for later in &mut self.records[rec_idx + 1..] {
                later.position -= shrink;
                later.index_pos -= shrink;
                later.data_pos -= shrink;
                later.first_event -= 1;
            }

            self.cursor
                .put_u32(position + RECORD_LENGTH_OFFSET, length / 4)?;
            self.cursor
                .put_u32(position + EVENT_COUNT_OFFSET, event_count)?;
            self.cursor
                .put_u32(position + INDEX_LENGTH_OFFSET, index_length)?;
            let data_len = self.cursor.get_u32(position + UNCOMPRESSED_LENGTH_OFFSET)?;
            self.cursor.put_u32(
                position + UNCOMPRESSED_LENGTH_OFFSET,
                data_len - delta as u32,
            )?;

            self.events.remove(at.event);
            debug!("removed event {} ({delta} bytes)", at.event);
            return Ok(());
        }

        // Inner structure: shift everything past the removed range.
        for (i, slot) in self.events.iter_mut().enumerate() {
            if slot.record == rec_idx && i >= at.event {
                slot.tree.shift_from(end, -(delta as isize));
            } else if slot.record > rec_idx {
                slot.tree.shift_all(-(delta as isize));
            }
        }

        // Walk ancestors, shrinking their length words in arena and buffer.
        let words = (delta / 4) as u32;
        let mut ancestor = parent_id;
        while let Some(id) = ancestor {
            let tree = &mut self.events[at.event].tree;
            let node = tree.get_mut(id);
            node.len -= words;
            node.data_len -= words;
            let (kind, pos, len) = (node.kind, node.pos, node.len);
            ancestor = node.parent;
            write_length_word(&mut self.cursor, kind, pos, len)?;
        }
        self.events[at.event]
            .tree
            .get_mut(parent_id.unwrap_or(NodeId::ROOT))
            .children
            .retain(|&c| c != at.node);

        // The owning event's index entry shrinks by the removed bytes.
        let entry_pos = rec.index_pos + 4 * local;
        let entry = self.cursor.get_u32(entry_pos)?;
        self.cursor.put_u32(entry_pos, entry - delta as u32)?;

        // And the record's own framing words.
        let record = &mut self.records[rec_idx];
        record.length -= delta as u32;
        let (position, length) = (record.position, record.length);
        for later in &mut self.records[rec_idx + 1..] {
            later.position -= delta;
            later.index_pos -= delta;
            later.data_pos -= delta;
        }
        self.cursor
            .put_u32(position + RECORD_LENGTH_OFFSET, length / 4)?;
        let data_len = self.cursor.get_u32(position + UNCOMPRESSED_LENGTH_OFFSET)?;
        self.cursor.put_u32(
            position + UNCOMPRESSED_LENGTH_OFFSET,
            data_len - delta as u32,
        )?;

        debug!("removed structure at {start} ({delta} bytes)");
        Ok(())
    }

    /// Splice a well-formed structure in as the last child of `parent`.
    ///
    /// The structure's kind must match the parent's data type and its
    /// byte order the buffer's. Returns a reference to the new child's
    /// root node.
    pub fn insert_structure(&mut self, parent: NodeRef, bytes: &[u8]) -> Result<NodeRef> {
        if bytes.len() < 4 || bytes.len() % 4 != 0 {
            return Err(Error::InvalidArgument(
                "structure must be a non-empty whole number of words",
            ));
        }
        let rec_idx = self
            .events
            .get(parent.event)
            .ok_or(Error::InvalidArgument("event index out of range"))?
            .record;
        let order = self.cursor.order();

        let (ins, kind) = {
            let node = self.events[parent.event].tree.get_live(parent.node)?;
            let kind = node
                .data_type()
                .child_kind()
                .ok_or(Error::NotAContainer(node.data_type().code()))?;
            (
                node.data_position() + 4 * node.data_length_words() as usize,
                kind,
            )
        };

        // The new structure must scan cleanly as a single child of the
        // parent's declared kind.
        let sub = scan_structure(bytes, order, 0, kind, 0)?;
        if sub.root().total_bytes() != bytes.len() {
            return Err(Error::Malformed(format!(
                "structure occupies {} of {} bytes",
                sub.root().total_bytes(),
                bytes.len()
            )));
        }
        let delta = bytes.len();

        self.cursor.insert_at(ins, bytes)?;

        // Shift every node at or past the insertion point.
        for slot in &mut self.events {
            if slot.record == rec_idx {
                slot.tree.shift_from(ins, delta as isize);
            } else if slot.record > rec_idx {
                slot.tree.shift_all(delta as isize);
            }
        }

        // Grow every ancestor, the insertion parent included.
        let words = (delta / 4) as u32;
        let mut ancestor = Some(parent.node);
        while let Some(id) = ancestor {
            let tree = &mut self.events[parent.event].tree;
            let node = tree.get_mut(id);
            node.len += words;
            node.data_len += words;
            let (kind, pos, len) = (node.kind, node.pos, node.len);
            ancestor = node.parent;
            write_length_word(&mut self.cursor, kind, pos, len)?;
        }

        // Owning event's index entry and the record's framing words.
        let rec = self.records[rec_idx];
        let local = parent.event - rec.first_event;
        let entry_pos = rec.index_pos + 4 * local;
        let entry = self.cursor.get_u32(entry_pos)?;
        self.cursor.put_u32(entry_pos, entry + delta as u32)?;

        let record = &mut self.records[rec_idx];
        record.length += delta as u32;
        let (position, length) = (record.position, record.length);
        for later in &mut self.records[rec_idx + 1..] {
            later.position += delta;
            later.index_pos += delta;
            later.data_pos += delta;
        }
        self.cursor
            .put_u32(position + RECORD_LENGTH_OFFSET, length / 4)?;
        let data_len = self.cursor.get_u32(position + UNCOMPRESSED_LENGTH_OFFSET)?;
        self.cursor.put_u32(
            position + UNCOMPRESSED_LENGTH_OFFSET,
            data_len + delta as u32,
        )?;

        // Graft the scanned subtree into the event's arena, rebased to
        // its spliced position. Appending keeps existing ids stable; the
        // arena is no longer strictly pre-order until a rescan.
        let tree = &mut self.events[parent.event].tree;
        let base = tree.len() as u32;
        for mut node in sub.nodes {
            node.pos += ins;
            node.data_pos += ins;
            node.parent = match node.parent {
                Some(p) => Some(NodeId(p.0 + base)),
                None => Some(parent.node),
            };
            for child in &mut node.children {
                *child = NodeId(child.0 + base);
            }
            tree.push(node);
        }
        let new_root = NodeId(base);
        tree.get_mut(parent.node).children.push(new_root);

        debug!("inserted {delta} bytes at {ins}");
        Ok(NodeRef {
            event: parent.event,
            node: new_root,
        })
    }

    /// Rebuild every arena from the current buffer, dropping obsolete
    /// slots and restoring pre-order arenas. Outstanding `NodeRef`s are
    /// invalidated.
    pub fn rescan(&mut self) -> Result<()> {
        let limit = self.cursor.limit();
        let mut buf = std::mem::replace(&mut self.cursor, ByteCursor::new(Vec::new(), Endian::Little))
            .into_inner();
        buf.truncate(limit);
        *self = Self::from_buffer(buf)?;
        Ok(())
    }
}

/// Rewrite a structure's length word in the buffer: banks use the full
/// 32-bit word 0, segments and tagsegments the 16-bit low half.
fn write_length_word(
    cursor: &mut ByteCursor<Vec<u8>>,
    kind: StructKind,
    pos: usize,
    len: u32,
) -> Result<()> {
    match kind {
        StructKind::Bank => cursor.put_u32(pos, len)?,
        StructKind::Segment | StructKind::TagSegment => {
            let at = match cursor.order() {
                Endian::Big => pos + 2,
                Endian::Little => pos,
            };
            cursor.put_u16(at, len as u16)?;
        }
    }
    Ok(())
}
