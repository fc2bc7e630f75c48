//! A position within a b-tree: a root-to-leaf path plus an index within
//! the leaf.
//!
//! `next_entry` advances within the leaf or ascends and redescends.  A
//! cursor is invalidated by any structural modification of its tree
//! within the same transaction; callers that mutate while scanning must
//! buffer the keys first and re-seek.

use std::ops::Bound;

use crate::errors::{Error, Result};
use crate::pager::{PageNum, Pager};

use super::node::{LeafCell, Node, TreeKind};

pub struct Cursor<'p> {
    pager: &'p Pager,
    kind: TreeKind,
    /// Interior pages on the path, each with the child slot currently
    /// descended into (`cells.len()` means the rightmost child).
    path: Vec<(PageNum, usize)>,
    /// The decoded leaf currently scanned and the next cell index in it.
    leaf: Vec<LeafCell>,
    leaf_idx: usize,
    hi: Bound<Vec<u8>>,
    exhausted: bool,
}

impl<'p> Cursor<'p> {
    /// Descends from `root` to the first entry at or after `lo`.
    pub fn seek(
        pager: &'p Pager,
        root: PageNum,
        kind: TreeKind,
        lo: Bound<Vec<u8>>,
        hi: Bound<Vec<u8>>,
    ) -> Result<Cursor<'p>> {
        let mut cursor = Cursor {
            pager,
            kind,
            path: vec![],
            leaf: vec![],
            leaf_idx: 0,
            hi,
            exhausted: false,
        };
        let mut pn = root;
        loop {
            match cursor.load(pn)? {
                Node::Interior {
                    cells, right_child, ..
                } => {
                    let slot = match &lo {
                        Bound::Unbounded => 0,
                        Bound::Included(k) | Bound::Excluded(k) => {
                            cells.partition_point(|c| c.key.as_slice() <= k.as_slice())
                        }
                    };
                    let child = if slot < cells.len() {
                        cells[slot].child
                    } else {
                        right_child
                    };
                    cursor.path.push((pn, slot));
                    pn = child;
                }
                Node::Leaf { cells, .. } => {
                    cursor.leaf_idx = match &lo {
                        Bound::Unbounded => 0,
                        Bound::Included(k) => {
                            cells.partition_point(|c| c.key.as_slice() < k.as_slice())
                        }
                        Bound::Excluded(k) => {
                            cells.partition_point(|c| c.key.as_slice() <= k.as_slice())
                        }
                    };
                    cursor.leaf = cells;
                    break;
                }
            }
        }
        Ok(cursor)
    }

    fn load(&self, pn: PageNum) -> Result<Node> {
        let node = Node::decode(&self.pager.get_page(pn)?)?;
        if node.kind() != self.kind {
            return Err(Error::corrupt(format!(
                "page {} belongs to a different tree kind",
                pn
            )));
        }
        Ok(node)
    }

    /// Returns the next `(key, payload)` in ascending key order, or `None`
    /// past the upper bound or the end of the tree.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            if self.leaf_idx < self.leaf.len() {
                let cell = &self.leaf[self.leaf_idx];
                let past_bound = match &self.hi {
                    Bound::Unbounded => false,
                    Bound::Included(k) => cell.key.as_slice() > k.as_slice(),
                    Bound::Excluded(k) => cell.key.as_slice() >= k.as_slice(),
                };
                if past_bound {
                    self.exhausted = true;
                    return Ok(None);
                }
                let key = cell.key.clone();
                let payload = payload_of_cell(self.pager, cell)?;
                self.leaf_idx += 1;
                return Ok(Some((key, payload)));
            }
            if !self.advance_leaf()? {
                self.exhausted = true;
                return Ok(None);
            }
        }
    }

    /// Ascends to the nearest ancestor with an unvisited child and
    /// descends to the leftmost leaf below it.  Returns false at the end
    /// of the tree.
    fn advance_leaf(&mut self) -> Result<bool> {
        loop {
            let Some((pn, slot)) = self.path.pop() else {
                return Ok(false);
            };
            let Node::Interior {
                cells, right_child, ..
            } = self.load(pn)?
            else {
                return Err(Error::corrupt("cursor path entry is not interior"));
            };
            let next_slot = slot + 1;
            if next_slot > cells.len() {
                continue;
            }
            let child = if next_slot < cells.len() {
                cells[next_slot].child
            } else {
                right_child
            };
            self.path.push((pn, next_slot));
            return self.descend_leftmost(child);
        }
    }

    fn descend_leftmost(&mut self, mut pn: PageNum) -> Result<bool> {
        loop {
            match self.load(pn)? {
                Node::Interior {
                    cells, right_child, ..
                } => {
                    let child = if !cells.is_empty() {
                        cells[0].child
                    } else {
                        right_child
                    };
                    self.path.push((pn, 0));
                    pn = child;
                }
                Node::Leaf { cells, .. } => {
                    self.leaf = cells;
                    self.leaf_idx = 0;
                    return Ok(true);
                }
            }
        }
    }
}

/// Assembles a leaf cell's full payload, walking its overflow chain.
pub fn payload_of_cell(pager: &Pager, cell: &LeafCell) -> Result<Vec<u8>> {
    let mut payload = cell.inline.clone();
    let mut pn = cell.overflow;
    while pn != 0 {
        let page = pager.get_page(pn)?;
        let (next, data) = super::node::decode_overflow(&page)?;
        payload.extend_from_slice(data);
        pn = next;
    }
    if payload.len() != cell.payload_len as usize {
        return Err(Error::corrupt(format!(
            "payload length {} does not match cell header {}",
            payload.len(),
            cell.payload_len
        )));
    }
    Ok(payload)
}
