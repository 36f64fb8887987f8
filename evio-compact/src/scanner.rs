//! Recursive structure scanning
//!
//! Populates an `EventTree` arena from raw bytes using absolute reads
//! only, so scanning never disturbs any cursor position. Recursion
//! follows the container's data type: banks carry 2-word child headers,
//! segments and tagsegments 1-word headers.

use hipo::Endian;
use tracing::trace;

use crate::error::{Error, Result};
use crate::node::{EventTree, Node, NodeId};
use crate::types::{DataType, StructKind};

const MAX_DEPTH: u32 = 200;

/// Scan a top-level event (always a bank) at `offset`, producing its
/// node tree. `place` is the event's index among the buffer's events.
pub fn scan_event(buf: &[u8], order: Endian, offset: usize, place: usize) -> Result<EventTree> {
    scan_structure(buf, order, offset, StructKind::Bank, place)
}

/// Scan a single structure of a known kind at `offset`.
pub fn scan_structure(
    buf: &[u8],
    order: Endian,
    offset: usize,
    kind: StructKind,
    place: usize,
) -> Result<EventTree> {
    let root = parse_header(buf, order, offset, kind)?;
    if root.end() > buf.len() {
        return Err(Error::Malformed(format!(
            "structure at {offset} runs to {} in a {}-byte buffer",
            root.end(),
            buf.len()
        )));
    }

    let mut tree = EventTree::new(place);
    let root_id = tree.push(root);
    scan_children(&mut tree, root_id, buf, order, 1)?;
    trace!(
        "scanned {} at {offset}: {} nodes",
        kind.name(),
        tree.len()
    );
    Ok(tree)
}

/// Parse one structure header, leaving children unscanned.
fn parse_header(buf: &[u8], order: Endian, pos: usize, kind: StructKind) -> Result<Node> {
    let header_bytes = 4 * kind.header_words() as usize;
    if pos + header_bytes > buf.len() {
        return Err(Error::Malformed(format!(
            "truncated {} header at {pos}",
            kind.name()
        )));
    }

    let word0 = order.read_u32(&buf[pos..]);
    let (tag, num, pad, data_type, len, data_pos, data_len) = match kind {
        StructKind::Bank => {
            let len = word0;
            if len == 0 {
                return Err(Error::Malformed(format!("bank at {pos} with zero length")));
            }
            let word1 = order.read_u32(&buf[pos + 4..]);
            let tag = (word1 >> 16) as u16;
            let dt = ((word1 >> 8) & 0xff) as u8;
            let num = (word1 & 0xff) as u8;
            (
                tag,
                num,
                dt >> 6,
                DataType::from_code(dt & 0x3f)?,
                len,
                pos + 8,
                len - 1,
            )
        }
        StructKind::Segment => {
            let tag = ((word0 >> 24) & 0xff) as u16;
            let dt = ((word0 >> 16) & 0xff) as u8;
            let len = word0 & 0xffff;
            (
                tag,
                0,
                dt >> 6,
                DataType::from_code(dt & 0x3f)?,
                len,
                pos + 4,
                len,
            )
        }
        StructKind::TagSegment => {
            let tag = ((word0 >> 20) & 0xfff) as u16;
            let dt = ((word0 >> 16) & 0xf) as u8;
            let len = word0 & 0xffff;
            (tag, 0, 0, DataType::from_code(dt)?, len, pos + 4, len)
        }
    };

    Ok(Node {
        kind,
        data_type,
        tag,
        num,
        pad,
        pos,
        len,
        data_pos,
        data_len,
        parent: None,
        children: Vec::new(),
        obsolete: false,
    })
}

/// Recurse over a container's data region, appending child nodes in scan
/// order.
fn scan_children(
    tree: &mut EventTree,
    parent_id: NodeId,
    buf: &[u8],
    order: Endian,
    depth: u32,
) -> Result<()> {
    let (data_type, data_pos, data_len) = {
        let parent = tree.get(parent_id)?;
        (parent.data_type, parent.data_pos, parent.data_len)
    };
    let Some(kind) = data_type.child_kind() else {
        return Ok(());
    };
    if depth > MAX_DEPTH {
        return Err(Error::Malformed("structure nesting too deep".into()));
    }

    let end = data_pos + 4 * data_len as usize;
    let header_bytes = 4 * kind.header_words() as usize;
    let mut pos = data_pos;
    while pos + header_bytes <= end {
        let mut child = parse_header(buf, order, pos, kind)?;
        if child.end() > end {
            return Err(Error::Malformed(format!(
                "{} at {pos} overruns its parent (ends {} > {end})",
                kind.name(),
                child.end()
            )));
        }
        child.parent = Some(parent_id);
        let child_end = child.end();
        let child_is_container = child.data_type.is_container();

        let child_id = tree.push(child);
        tree.get_mut(parent_id).children.push(child_id);

        if child_is_container {
            scan_children(tree, child_id, buf, order, depth + 1)?;
        }
        pos = child_end;
    }
    Ok(())
}
