//! Typed views of b-tree page images.
//!
//! A leaf holds `(key, payload)` cells sorted by key; an interior node
//! holds `(key, child)` cells plus a rightmost child pointer.  The
//! routing invariant: `child(i)` holds keys strictly less than
//! `cells[i].key`, and `right_child` holds the rest, so a separator is
//! the smallest key of the subtree to its right.
//!
//! On-page layouts (numeric fields little-endian):
//!
//! * leaf:      `[type u8][ncells u16]` then per cell
//!              `[key_len u16][payload_len u32][overflow u32][key][inline]`
//! * interior:  `[type u8][ncells u16][right_child u32]` then per cell
//!              `[key_len u16][child u32][key]`
//! * overflow:  `[type u8][next u32][len u16][data]`
//!
//! The inline part of a leaf payload is `min(payload_len,
//! MAX_INLINE_PAYLOAD)` bytes; the rest lives in an overflow chain.

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::{Error, Result};
use crate::pager::{
    PageNum, PAGE_SIZE, PT_INDEX_INTERIOR, PT_INDEX_LEAF, PT_OVERFLOW, PT_TABLE_INTERIOR,
    PT_TABLE_LEAF,
};

/// Caps the encoded key length.  Together with `MAX_INLINE_PAYLOAD` this
/// bounds the worst-case cell so at least four cells fit on a page.
pub const MAX_KEY_LEN: usize = 256;
pub const MAX_INLINE_PAYLOAD: usize = 700;

pub const OVERFLOW_HEADER: usize = 7;
pub const OVERFLOW_CAPACITY: usize = PAGE_SIZE - OVERFLOW_HEADER;

const LEAF_HEADER: usize = 3;
const INTERIOR_HEADER: usize = 7;
const LEAF_CELL_HEADER: usize = 10;
const INTERIOR_CELL_HEADER: usize = 6;

/// A node under half-page occupancy is rebalanced (the root excepted).
pub const UNDERFLOW_THRESHOLD: usize = PAGE_SIZE / 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Table,
    Index,
}

impl TreeKind {
    fn leaf_type(self) -> u8 {
        match self {
            TreeKind::Table => PT_TABLE_LEAF,
            TreeKind::Index => PT_INDEX_LEAF,
        }
    }
    fn interior_type(self) -> u8 {
        match self {
            TreeKind::Table => PT_TABLE_INTERIOR,
            TreeKind::Index => PT_INDEX_INTERIOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafCell {
    pub key: Vec<u8>,
    /// Inline payload prefix; the whole payload when `overflow == 0`.
    pub inline: Vec<u8>,
    /// Total payload length including any overflowed suffix.
    pub payload_len: u32,
    /// First page of the overflow chain, 0 = none.
    pub overflow: PageNum,
}

impl LeafCell {
    pub fn size(&self) -> usize {
        LEAF_CELL_HEADER + self.key.len() + self.inline.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteriorCell {
    pub key: Vec<u8>,
    pub child: PageNum,
}

impl InteriorCell {
    pub fn size(&self) -> usize {
        INTERIOR_CELL_HEADER + self.key.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        kind: TreeKind,
        cells: Vec<LeafCell>,
    },
    Interior {
        kind: TreeKind,
        cells: Vec<InteriorCell>,
        right_child: PageNum,
    },
}

impl Node {
    pub fn empty_leaf(kind: TreeKind) -> Node {
        Node::Leaf { kind, cells: vec![] }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn kind(&self) -> TreeKind {
        match self {
            Node::Leaf { kind, .. } => *kind,
            Node::Interior { kind, .. } => *kind,
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Node::Leaf { cells, .. } => {
                LEAF_HEADER + cells.iter().map(LeafCell::size).sum::<usize>()
            }
            Node::Interior { cells, .. } => {
                INTERIOR_HEADER + cells.iter().map(InteriorCell::size).sum::<usize>()
            }
        }
    }

    pub fn fits(&self) -> bool {
        self.encoded_size() <= PAGE_SIZE
    }

    pub fn is_underfull(&self) -> bool {
        self.encoded_size() < UNDERFLOW_THRESHOLD
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.fits() {
            return Err(Error::internal("node too large for one page"));
        }
        let mut page = vec![0_u8; PAGE_SIZE];
        match self {
            Node::Leaf { kind, cells } => {
                page[0] = kind.leaf_type();
                LittleEndian::write_u16(&mut page[1..3], cells.len() as u16);
                let mut pos = LEAF_HEADER;
                for c in cells {
                    LittleEndian::write_u16(&mut page[pos..], c.key.len() as u16);
                    LittleEndian::write_u32(&mut page[pos + 2..], c.payload_len);
                    LittleEndian::write_u32(&mut page[pos + 6..], c.overflow);
                    pos += LEAF_CELL_HEADER;
                    page[pos..pos + c.key.len()].copy_from_slice(&c.key);
                    pos += c.key.len();
                    page[pos..pos + c.inline.len()].copy_from_slice(&c.inline);
                    pos += c.inline.len();
                }
            }
            Node::Interior {
                kind,
                cells,
                right_child,
            } => {
                page[0] = kind.interior_type();
                LittleEndian::write_u16(&mut page[1..3], cells.len() as u16);
                LittleEndian::write_u32(&mut page[3..7], *right_child);
                let mut pos = INTERIOR_HEADER;
                for c in cells {
                    LittleEndian::write_u16(&mut page[pos..], c.key.len() as u16);
                    LittleEndian::write_u32(&mut page[pos + 2..], c.child);
                    pos += INTERIOR_CELL_HEADER;
                    page[pos..pos + c.key.len()].copy_from_slice(&c.key);
                    pos += c.key.len();
                }
            }
        }
        Ok(page)
    }

    pub fn decode(page: &[u8]) -> Result<Node> {
        if page.len() != PAGE_SIZE {
            return Err(Error::corrupt("page image has wrong size"));
        }
        let (kind, leaf) = match page[0] {
            PT_TABLE_LEAF => (TreeKind::Table, true),
            PT_INDEX_LEAF => (TreeKind::Index, true),
            PT_TABLE_INTERIOR => (TreeKind::Table, false),
            PT_INDEX_INTERIOR => (TreeKind::Index, false),
            t => {
                return Err(Error::corrupt(format!(
                    "expected a btree page, found type 0x{:02x}",
                    t
                )))
            }
        };
        let ncells = LittleEndian::read_u16(&page[1..3]) as usize;
        if leaf {
            let mut cells = Vec::with_capacity(ncells);
            let mut pos = LEAF_HEADER;
            for _ in 0..ncells {
                if pos + LEAF_CELL_HEADER > PAGE_SIZE {
                    return Err(Error::corrupt("leaf cell header out of bounds"));
                }
                let key_len = LittleEndian::read_u16(&page[pos..]) as usize;
                let payload_len = LittleEndian::read_u32(&page[pos + 2..]);
                let overflow = LittleEndian::read_u32(&page[pos + 6..]);
                pos += LEAF_CELL_HEADER;
                let inline_len = (payload_len as usize).min(MAX_INLINE_PAYLOAD);
                if pos + key_len + inline_len > PAGE_SIZE {
                    return Err(Error::corrupt("leaf cell body out of bounds"));
                }
                let key = page[pos..pos + key_len].to_vec();
                pos += key_len;
                let inline = page[pos..pos + inline_len].to_vec();
                pos += inline_len;
                cells.push(LeafCell {
                    key,
                    inline,
                    payload_len,
                    overflow,
                });
            }
            Ok(Node::Leaf { kind, cells })
        } else {
            let right_child = LittleEndian::read_u32(&page[3..7]);
            let mut cells = Vec::with_capacity(ncells);
            let mut pos = INTERIOR_HEADER;
            for _ in 0..ncells {
                if pos + INTERIOR_CELL_HEADER > PAGE_SIZE {
                    return Err(Error::corrupt("interior cell header out of bounds"));
                }
                let key_len = LittleEndian::read_u16(&page[pos..]) as usize;
                let child = LittleEndian::read_u32(&page[pos + 2..]);
                pos += INTERIOR_CELL_HEADER;
                if pos + key_len > PAGE_SIZE {
                    return Err(Error::corrupt("interior cell key out of bounds"));
                }
                cells.push(InteriorCell {
                    key: page[pos..pos + key_len].to_vec(),
                    child,
                });
                pos += key_len;
            }
            Ok(Node::Interior {
                kind,
                cells,
                right_child,
            })
        }
    }
}

/// Encodes an overflow page holding `data` (at most `OVERFLOW_CAPACITY`
/// bytes) and pointing at `next`.
pub fn encode_overflow(next: PageNum, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= OVERFLOW_CAPACITY);
    let mut page = vec![0_u8; PAGE_SIZE];
    page[0] = PT_OVERFLOW;
    LittleEndian::write_u32(&mut page[1..5], next);
    LittleEndian::write_u16(&mut page[5..7], data.len() as u16);
    page[OVERFLOW_HEADER..OVERFLOW_HEADER + data.len()].copy_from_slice(data);
    page
}

/// Decodes an overflow page into `(next, data)`.
pub fn decode_overflow(page: &[u8]) -> Result<(PageNum, &[u8])> {
    if page.len() != PAGE_SIZE || page[0] != PT_OVERFLOW {
        return Err(Error::corrupt("expected an overflow page"));
    }
    let next = LittleEndian::read_u32(&page[1..5]);
    let len = LittleEndian::read_u16(&page[5..7]) as usize;
    if len > OVERFLOW_CAPACITY {
        return Err(Error::corrupt("overflow page length out of bounds"));
    }
    Ok((next, &page[OVERFLOW_HEADER..OVERFLOW_HEADER + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() {
        let node = Node::Leaf {
            kind: TreeKind::Table,
            cells: vec![
                LeafCell {
                    key: vec![1, 2, 3],
                    inline: vec![9; 10],
                    payload_len: 10,
                    overflow: 0,
                },
                LeafCell {
                    key: vec![4],
                    inline: vec![7; MAX_INLINE_PAYLOAD],
                    payload_len: 5000,
                    overflow: 42,
                },
            ],
        };
        assert_eq!(Node::decode(&node.encode().unwrap()).unwrap(), node);
    }

    #[test]
    fn test_interior_roundtrip() {
        let node = Node::Interior {
            kind: TreeKind::Index,
            cells: vec![
                InteriorCell {
                    key: b"alpha".to_vec(),
                    child: 3,
                },
                InteriorCell {
                    key: b"beta".to_vec(),
                    child: 5,
                },
            ],
            right_child: 8,
        };
        assert_eq!(Node::decode(&node.encode().unwrap()).unwrap(), node);
    }

    #[test]
    fn test_overflow_roundtrip() {
        let data = vec![0xab_u8; 100];
        let page = encode_overflow(17, &data);
        let (next, got) = decode_overflow(&page).unwrap();
        assert_eq!(next, 17);
        assert_eq!(got, &data[..]);
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let page = vec![0_u8; PAGE_SIZE]; // PT_FREE
        assert!(Node::decode(&page).is_err());
        assert!(decode_overflow(&page).is_err());
    }

    #[test]
    fn test_worst_case_cell_leaves_room_for_four() {
        let cell = LeafCell {
            key: vec![0; MAX_KEY_LEN],
            inline: vec![0; MAX_INLINE_PAYLOAD],
            payload_len: u32::MAX,
            overflow: 1,
        };
        assert!(LEAF_HEADER + 4 * cell.size() <= PAGE_SIZE);
    }
}
