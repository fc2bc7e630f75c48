//! Mutation discipline for one b-tree.
//!
//! Splits promote the smallest key of the new right node.  Underflowing
//! nodes are rebalanced with an adjacent sibling under the same parent:
//! merged when both fit one page, otherwise the cells are redistributed
//! at the byte midpoint and the separator updated.  The root is rewritten
//! in place on split and collapse, so a tree's root page number never
//! changes once created.

use crate::errors::{Error, Result};
use crate::pager::{PageNum, Pager};

use super::cursor::Cursor;
use super::node::{
    decode_overflow, encode_overflow, InteriorCell, LeafCell, Node, TreeKind, MAX_INLINE_PAYLOAD,
    MAX_KEY_LEN, OVERFLOW_CAPACITY,
};

pub struct BTree<'p> {
    pager: &'p Pager,
    root: PageNum,
    kind: TreeKind,
}

/// What the recursion reports upward after an insert into a child.
type SplitInfo = Option<(Vec<u8>, PageNum)>; // (separator, new right page)

impl<'p> BTree<'p> {
    pub fn open(pager: &'p Pager, root: PageNum, kind: TreeKind) -> BTree<'p> {
        BTree { pager, root, kind }
    }

    /// Allocates a fresh tree (an empty leaf) and returns its root page.
    pub fn create(pager: &Pager, kind: TreeKind) -> Result<PageNum> {
        let root = pager.allocate()?;
        pager.write_page(root, Node::empty_leaf(kind).encode()?)?;
        Ok(root)
    }

    pub fn root(&self) -> PageNum {
        self.root
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

    fn store(&self, pn: PageNum, node: &Node) -> Result<()> {
        self.pager.write_page(pn, node.encode()?)
    }

    // ----- lookup -----

    /// Returns the payload stored under `key`, if any.
    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut pn = self.root;
        loop {
            match self.load(pn)? {
                Node::Interior {
                    cells, right_child, ..
                } => {
                    pn = route(&cells, right_child, key);
                }
                Node::Leaf { cells, .. } => {
                    return match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
                        Ok(i) => Ok(Some(self.assemble_payload(&cells[i])?)),
                        Err(_) => Ok(None),
                    };
                }
            }
        }
    }

    /// Scans entries with keys in `[lo, hi]` (bounds per `std::ops::Bound`)
    /// in ascending key order.
    pub fn scan(
        &self,
        lo: std::ops::Bound<Vec<u8>>,
        hi: std::ops::Bound<Vec<u8>>,
    ) -> Result<Cursor<'p>> {
        Cursor::seek(self.pager, self.root, self.kind, lo, hi)
    }

    pub fn assemble_payload(&self, cell: &LeafCell) -> Result<Vec<u8>> {
        super::cursor::payload_of_cell(self.pager, cell)
    }

    // ----- insert -----

    /// Inserts `(key, payload)`.  A duplicate key is a constraint
    /// violation; the tree is unchanged.
    pub fn insert(&self, key: &[u8], payload: &[u8]) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(Error::constraint("key too long"));
        }
        if let Some((sep, right)) = self.insert_rec(self.root, key, payload)? {
            // Root split: the old root image moves to a fresh page and the
            // root page is rewritten as an interior node over the two
            // halves.  The root page number is part of the catalog and
            // must not move.
            let left = self.pager.allocate()?;
            let old_root = self.pager.get_page(self.root)?;
            self.pager.write_page(left, old_root)?;
            let new_root = Node::Interior {
                kind: self.kind,
                cells: vec![InteriorCell { key: sep, child: left }],
                right_child: right,
            };
            self.store(self.root, &new_root)?;
        }
        Ok(())
    }

    fn insert_rec(&self, pn: PageNum, key: &[u8], payload: &[u8]) -> Result<SplitInfo> {
        match self.load(pn)? {
            Node::Leaf { kind, mut cells } => {
                let pos = match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
                    Ok(_) => return Err(Error::constraint("duplicate key")),
                    Err(pos) => pos,
                };
                let cell = self.build_leaf_cell(key, payload)?;
                cells.insert(pos, cell);
                let node = Node::Leaf { kind, cells };
                if node.fits() {
                    self.store(pn, &node)?;
                    return Ok(None);
                }
                let Node::Leaf { kind, cells } = node else { unreachable!() };
                let split = split_point(cells.iter().map(LeafCell::size));
                let mut left_cells = cells;
                let right_cells = left_cells.split_off(split);
                let sep = right_cells[0].key.clone();
                let right_pn = self.pager.allocate()?;
                self.store(pn, &Node::Leaf { kind, cells: left_cells })?;
                self.store(right_pn, &Node::Leaf { kind, cells: right_cells })?;
                Ok(Some((sep, right_pn)))
            }
            Node::Interior {
                kind,
                mut cells,
                mut right_child,
            } => {
                let slot = route_slot(&cells, key);
                let child = child_at(&cells, right_child, slot);
                let Some((sep, new_right)) = self.insert_rec(child, key, payload)? else {
                    return Ok(None);
                };
                // The split child kept its lower half; the upper half went
                // to `new_right`.  Point the old separator at the new page
                // and wire a new separator at the old child.
                if slot < cells.len() {
                    let displaced = cells[slot].child;
                    cells[slot].child = new_right;
                    cells.insert(slot, InteriorCell { key: sep, child: displaced });
                } else {
                    cells.push(InteriorCell { key: sep, child: right_child });
                    right_child = new_right;
                }
                let node = Node::Interior { kind, cells, right_child };
                if node.fits() {
                    self.store(pn, &node)?;
                    return Ok(None);
                }
                let Node::Interior { kind, cells, right_child } = node else { unreachable!() };
                let p = split_point(cells.iter().map(InteriorCell::size))
                    .clamp(1, cells.len() - 1);
                let mut left_cells = cells;
                let mut right_cells = left_cells.split_off(p);
                let promoted = right_cells.remove(0);
                let left_node = Node::Interior {
                    kind,
                    cells: left_cells,
                    right_child: promoted.child,
                };
                let right_node = Node::Interior {
                    kind,
                    cells: right_cells,
                    right_child,
                };
                let right_pn = self.pager.allocate()?;
                self.store(pn, &left_node)?;
                self.store(right_pn, &right_node)?;
                Ok(Some((promoted.key, right_pn)))
            }
        }
    }

    fn build_leaf_cell(&self, key: &[u8], payload: &[u8]) -> Result<LeafCell> {
        let (inline, overflow) = if payload.len() > MAX_INLINE_PAYLOAD {
            let first = self.write_overflow_chain(&payload[MAX_INLINE_PAYLOAD..])?;
            (payload[..MAX_INLINE_PAYLOAD].to_vec(), first)
        } else {
            (payload.to_vec(), 0)
        };
        Ok(LeafCell {
            key: key.to_vec(),
            inline,
            payload_len: payload.len() as u32,
            overflow,
        })
    }

    fn write_overflow_chain(&self, data: &[u8]) -> Result<PageNum> {
        // Built back to front so each page can point at the next.
        let mut next: PageNum = 0;
        for chunk in data.chunks(OVERFLOW_CAPACITY).rev() {
            let pn = self.pager.allocate()?;
            self.pager.write_page(pn, encode_overflow(next, chunk))?;
            next = pn;
        }
        Ok(next)
    }

    fn free_overflow_chain(&self, first: PageNum) -> Result<()> {
        let mut pn = first;
        while pn != 0 {
            let (next, _) = decode_overflow(&self.pager.get_page(pn)?)?;
            self.pager.free(pn)?;
            pn = next;
        }
        Ok(())
    }

    // ----- delete -----

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let found = self.delete_rec(self.root, key)?;
        // Height shrinks when the root is an interior node left with a
        // single child: pull that child up into the root page.
        loop {
            let node = self.load(self.root)?;
            match node {
                Node::Interior {
                    ref cells,
                    right_child,
                    ..
                } if cells.is_empty() => {
                    let image = self.pager.get_page(right_child)?;
                    self.pager.write_page(self.root, image)?;
                    self.pager.free(right_child)?;
                }
                _ => break,
            }
        }
        Ok(found)
    }

    fn delete_rec(&self, pn: PageNum, key: &[u8]) -> Result<bool> {
        match self.load(pn)? {
            Node::Leaf { kind, mut cells } => {
                match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
                    Err(_) => Ok(false),
                    Ok(i) => {
                        let cell = cells.remove(i);
                        if cell.overflow != 0 {
                            self.free_overflow_chain(cell.overflow)?;
                        }
                        self.store(pn, &Node::Leaf { kind, cells })?;
                        Ok(true)
                    }
                }
            }
            Node::Interior {
                kind,
                cells,
                right_child,
            } => {
                let slot = route_slot(&cells, key);
                let child = child_at(&cells, right_child, slot);
                let found = self.delete_rec(child, key)?;
                if !found {
                    return Ok(false);
                }
                if self.load(child)?.is_underfull() {
                    let mut parent = Node::Interior {
                        kind,
                        cells,
                        right_child,
                    };
                    self.rebalance(&mut parent, slot)?;
                    self.store(pn, &parent)?;
                }
                Ok(true)
            }
        }
    }

    /// Rebalances the child at `slot` of `parent` with an adjacent
    /// sibling: merge if everything fits one page, else redistribute at
    /// the byte midpoint.
    fn rebalance(&self, parent: &mut Node, slot: usize) -> Result<()> {
        let Node::Interior {
            cells: pcells,
            right_child: pright,
            ..
        } = parent
        else {
            return Err(Error::internal("rebalance on a leaf parent"));
        };
        // Pair the underfull child with its left neighbor when one
        // exists, else its right neighbor.  `li` is the separator index.
        let li = if slot > 0 { slot - 1 } else { slot };
        let ri = li + 1;
        if ri > pcells.len() {
            // Parent has a single child; nothing to pair with.  Only
            // reachable for the root's child, which the caller collapses.
            return Ok(());
        }
        let left_pn = child_at(pcells, *pright, li);
        let right_pn = child_at(pcells, *pright, ri);
        let left = self.load(left_pn)?;
        let right = self.load(right_pn)?;

        match (left, right) {
            (Node::Leaf { kind, cells: mut lc }, Node::Leaf { cells: rc, .. }) => {
                lc.extend(rc);
                let merged = Node::Leaf { kind, cells: lc };
                if merged.fits() {
                    self.store(left_pn, &merged)?;
                    self.pager.free(right_pn)?;
                    point_past_merge(pcells, pright, li, ri, left_pn);
                } else {
                    let Node::Leaf { kind, cells } = merged else { unreachable!() };
                    let split = split_point(cells.iter().map(LeafCell::size));
                    let mut left_cells = cells;
                    let right_cells = left_cells.split_off(split);
                    pcells[li].key = right_cells[0].key.clone();
                    self.store(left_pn, &Node::Leaf { kind, cells: left_cells })?;
                    self.store(right_pn, &Node::Leaf { kind, cells: right_cells })?;
                }
            }
            (
                Node::Interior {
                    kind,
                    cells: mut lc,
                    right_child: lrc,
                },
                Node::Interior {
                    cells: rc,
                    right_child: rrc,
                    ..
                },
            ) => {
                // The parent separator comes down between the two halves.
                lc.push(InteriorCell {
                    key: pcells[li].key.clone(),
                    child: lrc,
                });
                lc.extend(rc);
                let merged = Node::Interior {
                    kind,
                    cells: lc,
                    right_child: rrc,
                };
                if merged.fits() {
                    self.store(left_pn, &merged)?;
                    self.pager.free(right_pn)?;
                    point_past_merge(pcells, pright, li, ri, left_pn);
                } else {
                    let Node::Interior { kind, cells, right_child } = merged else {
                        unreachable!()
                    };
                    let p = split_point(cells.iter().map(InteriorCell::size))
                        .clamp(1, cells.len() - 1);
                    let mut left_cells = cells;
                    let mut right_cells = left_cells.split_off(p);
                    let promoted = right_cells.remove(0);
                    pcells[li].key = promoted.key;
                    self.store(
                        left_pn,
                        &Node::Interior {
                            kind,
                            cells: left_cells,
                            right_child: promoted.child,
                        },
                    )?;
                    self.store(
                        right_pn,
                        &Node::Interior {
                            kind,
                            cells: right_cells,
                            right_child,
                        },
                    )?;
                }
            }
            _ => return Err(Error::corrupt("sibling depth mismatch")),
        }
        Ok(())
    }

    // ----- whole-tree operations -----

    /// Frees every page of the tree, overflow chains included.  Used by
    /// DROP TABLE / DROP INDEX.
    pub fn free_all(&self) -> Result<()> {
        self.free_subtree(self.root)
    }

    fn free_subtree(&self, pn: PageNum) -> Result<()> {
        match self.load(pn)? {
            Node::Leaf { cells, .. } => {
                for c in &cells {
                    if c.overflow != 0 {
                        self.free_overflow_chain(c.overflow)?;
                    }
                }
            }
            Node::Interior {
                cells, right_child, ..
            } => {
                for c in &cells {
                    self.free_subtree(c.child)?;
                }
                self.free_subtree(right_child)?;
            }
        }
        self.pager.free(pn)
    }

    /// Walks the tree checking its invariants; returns the key count.
    /// Checks: keys strictly ascending in and across leaves, children
    /// within separator bounds, uniform leaf depth, and no underfull
    /// non-root node.
    pub fn verify(&self) -> Result<u64> {
        let mut leaf_depth: Option<usize> = None;
        let mut last_key: Option<Vec<u8>> = None;
        self.verify_rec(self.root, 0, None, &mut leaf_depth, &mut last_key)
    }

    fn verify_rec(
        &self,
        pn: PageNum,
        depth: usize,
        upper: Option<&[u8]>,
        leaf_depth: &mut Option<usize>,
        last_key: &mut Option<Vec<u8>>,
    ) -> Result<u64> {
        let node = self.load(pn)?;
        if pn != self.root && node.is_underfull() {
            return Err(Error::corrupt(format!("page {} underfull", pn)));
        }
        match node {
            Node::Leaf { cells, .. } => {
                match leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) if *d != depth => {
                        return Err(Error::corrupt("leaves at unequal depth"));
                    }
                    _ => {}
                }
                for c in &cells {
                    if let Some(prev) = last_key {
                        if prev.as_slice() >= c.key.as_slice() {
                            return Err(Error::corrupt("keys out of order"));
                        }
                    }
                    if let Some(hi) = upper {
                        if c.key.as_slice() >= hi {
                            return Err(Error::corrupt("leaf key above separator"));
                        }
                    }
                    *last_key = Some(c.key.clone());
                }
                Ok(cells.len() as u64)
            }
            Node::Interior {
                cells, right_child, ..
            } => {
                let mut count = 0;
                for c in &cells {
                    count += self.verify_rec(c.child, depth + 1, Some(&c.key), leaf_depth, last_key)?;
                }
                count += self.verify_rec(right_child, depth + 1, upper, leaf_depth, last_key)?;
                Ok(count)
            }
        }
    }
}

/// Slot of the child a key routes to: the first separator greater than
/// the key, or the rightmost child.
fn route_slot(cells: &[InteriorCell], key: &[u8]) -> usize {
    cells.partition_point(|c| c.key.as_slice() <= key)
}

fn child_at(cells: &[InteriorCell], right_child: PageNum, slot: usize) -> PageNum {
    if slot < cells.len() {
        cells[slot].child
    } else {
        right_child
    }
}

fn route(cells: &[InteriorCell], right_child: PageNum, key: &[u8]) -> PageNum {
    child_at(cells, right_child, route_slot(cells, key))
}

/// Index splitting a cell run at its byte midpoint, both halves
/// non-empty.  Callers only split runs of at least two cells.
fn split_point(sizes: impl Iterator<Item = usize>) -> usize {
    let sizes: Vec<usize> = sizes.collect();
    let total: usize = sizes.iter().sum();
    let last = sizes.len().saturating_sub(1).max(1);
    let mut acc = 0;
    for (i, s) in sizes.iter().enumerate() {
        acc += s;
        if acc * 2 >= total {
            return (i + 1).clamp(1, last);
        }
    }
    last
}

/// After merging the children at `li` and `ri` into `merged`, drops the
/// separator and repoints the surviving slot.
fn point_past_merge(
    pcells: &mut Vec<InteriorCell>,
    pright: &mut PageNum,
    li: usize,
    ri: usize,
    merged: PageNum,
) {
    if ri < pcells.len() {
        pcells[ri].child = merged;
    } else {
        *pright = merged;
    }
    pcells.remove(li);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;
    use std::path::PathBuf;
    use std::time::Duration;

    fn scratch_pager() -> (tempfile::TempDir, Pager) {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("btree_test.db");
        let pager = Pager::open(&path, Duration::from_millis(100)).unwrap();
        pager.begin_read().unwrap();
        pager.begin_write().unwrap();
        (dir, pager)
    }

    fn key(i: u32) -> Vec<u8> {
        format!("k{:08}", i).into_bytes()
    }

    #[test]
    fn test_insert_search_small() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        tree.insert(b"b", b"2").unwrap();
        tree.insert(b"a", b"1").unwrap();
        tree.insert(b"c", b"3").unwrap();
        assert_eq!(tree.search(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.search(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(tree.search(b"c").unwrap(), Some(b"3".to_vec()));
        assert_eq!(tree.search(b"d").unwrap(), None);
        assert_eq!(tree.verify().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        tree.insert(b"a", b"1").unwrap();
        assert!(matches!(
            tree.insert(b"a", b"2"),
            Err(Error::Constraint(_))
        ));
        assert_eq!(tree.search(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_split_and_multi_level_growth() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        // Enough entries to force several levels with ~100-byte payloads.
        let n = 2000;
        for i in 0..n {
            tree.insert(&key(i), format!("payload-{:090}", i).as_bytes())
                .unwrap();
        }
        assert_eq!(tree.root(), root);
        assert_eq!(tree.verify().unwrap(), n as u64);
        for i in (0..n).step_by(97) {
            assert!(tree.search(&key(i)).unwrap().is_some());
        }
    }

    #[test]
    fn test_scan_ascending_over_splits() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        let n: u32 = 500;
        // Insert in a scrambled order.
        for i in 0..n {
            let j = (i * 7919) % n;
            tree.insert(&key(j), &j.to_be_bytes()).unwrap();
        }
        let mut cursor = tree.scan(Bound::Unbounded, Bound::Unbounded).unwrap();
        let mut seen = 0;
        let mut prev: Option<Vec<u8>> = None;
        while let Some((k, v)) = cursor.next_entry().unwrap() {
            if let Some(p) = &prev {
                assert!(p < &k);
            }
            assert_eq!(v.len(), 4);
            prev = Some(k);
            seen += 1;
        }
        assert_eq!(seen, n);
    }

    #[test]
    fn test_range_scan_bounds() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        for i in 0..100_u32 {
            tree.insert(&key(i), b"x").unwrap();
        }
        let mut cursor = tree
            .scan(Bound::Included(key(10)), Bound::Excluded(key(20)))
            .unwrap();
        let mut keys = vec![];
        while let Some((k, _)) = cursor.next_entry().unwrap() {
            keys.push(k);
        }
        assert_eq!(keys.len(), 10);
        assert_eq!(keys[0], key(10));
        assert_eq!(keys[9], key(19));
    }

    #[test]
    fn test_delete_with_merges_down_to_empty() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        let n = 1200;
        for i in 0..n {
            tree.insert(&key(i), format!("v{:060}", i).as_bytes()).unwrap();
        }
        // Delete in an order that exercises both siblings.
        for i in (0..n).rev() {
            assert!(tree.delete(&key(i)).unwrap(), "missing {}", i);
            if i % 101 == 0 {
                tree.verify().unwrap();
            }
        }
        assert_eq!(tree.verify().unwrap(), 0);
        assert!(!tree.delete(&key(0)).unwrap());
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn test_overflow_payload_roundtrip_and_free() {
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        let big: Vec<u8> = (0..20_000_u32).map(|i| (i % 251) as u8).collect();
        tree.insert(b"big", &big).unwrap();
        assert_eq!(tree.search(b"big").unwrap(), Some(big.clone()));
        let pages_before = pager.page_count();
        assert!(tree.delete(b"big").unwrap());
        // The chain pages went to the free list, not the file end.
        assert_eq!(pager.page_count(), pages_before);
        assert_ne!(pager.freelist_head(), 0);
    }

    /// Free-list closure: after freeing a whole tree, the free list plus
    /// the permanently allocated pages (meta, catalog root) partition the
    /// file, with no page in two places.
    #[test]
    fn test_freelist_closure_after_free_all() {
        use byteorder::{ByteOrder, LittleEndian};
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        for i in 0..400 {
            tree.insert(&key(i), format!("v{:0120}", i).as_bytes()).unwrap();
        }
        tree.insert(b"zz-big", &vec![7_u8; 9000]).unwrap();
        for i in (0..400).step_by(3) {
            tree.delete(&key(i)).unwrap();
        }
        tree.free_all().unwrap();

        let mut free = std::collections::HashSet::new();
        let mut pn = pager.freelist_head();
        while pn != 0 {
            assert!(free.insert(pn), "page {} appears twice in the free list", pn);
            let page = pager.get_page(pn).unwrap();
            assert_eq!(page[0], crate::pager::PT_FREE);
            pn = LittleEndian::read_u32(&page[1..5]);
        }
        assert_eq!(free.len() as u32, pager.page_count() - 2);
        for pn in 2..pager.page_count() {
            assert!(free.contains(&pn), "page {} is neither allocated nor free", pn);
        }
        assert!(!free.contains(&0) && !free.contains(&1));
    }

    #[test]
    fn test_model_comparison_random_ops() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xb7ee);
        let (_dir, pager) = scratch_pager();
        let root = BTree::create(&pager, TreeKind::Table).unwrap();
        let tree = BTree::open(&pager, root, TreeKind::Table);
        let mut model = std::collections::BTreeMap::new();
        for _ in 0..3000 {
            let k = key(rng.gen_range(0..400));
            if rng.gen_bool(0.6) {
                let v = vec![rng.gen::<u8>(); rng.gen_range(1..200)];
                match tree.insert(&k, &v) {
                    Ok(()) => {
                        assert!(model.insert(k.clone(), v).is_none());
                    }
                    Err(Error::Constraint(_)) => {
                        assert!(model.contains_key(&k));
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            } else {
                assert_eq!(tree.delete(&k).unwrap(), model.remove(&k).is_some());
            }
        }
        assert_eq!(tree.verify().unwrap(), model.len() as u64);
        let mut cursor = tree
            .scan(std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)
            .unwrap();
        let mut from_tree = vec![];
        while let Some((k, v)) = cursor.next_entry().unwrap() {
            from_tree.push((k, v));
        }
        let from_model: Vec<_> = model.into_iter().collect();
        assert_eq!(from_tree, from_model);
    }
}
