//! A key-ordered map implemented on pager pages: one tree per table
//! (keyed by primary key) and one per secondary index (keyed by
//! `(value, pk)` with empty payloads).
//!
//! Organization of btree submodules and types:
//! *  `node` decodes a page image into a typed `Node` and back.  Nodes
//!    are reconstituted on demand from the pager cache; pages refer to
//!    each other by page number only.
//! *  `tree` owns the mutation discipline: search, insert with splits,
//!    delete with redistribution and merges, overflow chains.
//! *  `cursor` walks a tree in ascending key order over a key range,
//!    holding a root-to-leaf path.

pub mod cursor;
pub mod node;
pub mod tree;

pub use cursor::Cursor;
pub use node::TreeKind;
pub use tree::BTree;
