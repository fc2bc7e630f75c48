//! Represents typed access to one stored table: scans, primary-key and
//! index probes, and the mutations that keep every secondary index in
//! step with the table tree.

use std::ops::Bound;

use crate::btree::node::MAX_KEY_LEN;
use crate::btree::{BTree, Cursor, TreeKind};
use crate::catalog::TableSchema;
use crate::errors::{Error, Result};
use crate::pager::Pager;
use crate::record::{
    decode_key_value, decode_row, encode_index_key, encode_pk_key, encode_row,
};
use crate::sql_value::SqlValue;
use crate::typed_row::Row;

pub struct Table<'p> {
    pager: &'p Pager,
    schema: TableSchema,
}

impl<'p> Table<'p> {
    pub fn new(pager: &'p Pager, schema: TableSchema) -> Table<'p> {
        Table { pager, schema }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn tree(&self) -> BTree<'p> {
        BTree::open(self.pager, self.schema.root_page, TreeKind::Table)
    }

    // ----- reads -----

    /// Scans all rows in primary-key order.
    pub fn scan(&self) -> Result<RowScan<'p>> {
        let cursor = self.tree().scan(Bound::Unbounded, Bound::Unbounded)?;
        Ok(RowScan { cursor })
    }

    pub fn get_by_pk(&self, pk: &SqlValue) -> Result<Option<Row>> {
        match self.tree().search(&encode_pk_key(pk)?)? {
            Some(payload) => Ok(Some(decode_row(&payload)?)),
            None => Ok(None),
        }
    }

    /// Scans an index for primary keys whose indexed value falls within
    /// the bounds.  The payloads are empty; the pk is the second
    /// component of the composite key.
    pub fn index_pk_scan(
        &self,
        index_root: crate::pager::PageNum,
        lo: Bound<Vec<u8>>,
        hi: Bound<Vec<u8>>,
    ) -> Result<IndexPkScan<'p>> {
        let tree = BTree::open(self.pager, index_root, TreeKind::Index);
        Ok(IndexPkScan {
            cursor: tree.scan(lo, hi)?,
        })
    }

    // ----- writes -----

    /// Validates and inserts one row, updating every secondary index.
    pub fn insert_row(&self, row: &Row) -> Result<()> {
        self.validate_row(row)?;
        let pk = &row.items[self.schema.pk_col()];
        let key = encode_pk_key(pk)?;
        self.tree()
            .insert(&key, &encode_row(row)?)
            .map_err(|e| match e {
                Error::Constraint(_) => Error::constraint(format!(
                    "duplicate primary key {} in table {}",
                    pk, self.schema.name
                )),
                e => e,
            })?;
        for ix in &self.schema.indexes {
            let col = self
                .schema
                .col_index(&ix.column)
                .ok_or_else(|| Error::internal("index on unknown column"))?;
            let ix_tree = BTree::open(self.pager, ix.root_page, TreeKind::Index);
            ix_tree.insert(&encode_index_key(&row.items[col], pk)?, &[])?;
        }
        Ok(())
    }

    /// Deletes the row with the given primary key, removing its index
    /// entries.  Returns false when no such row exists.
    pub fn delete_by_pk(&self, pk: &SqlValue) -> Result<bool> {
        let Some(row) = self.get_by_pk(pk)? else {
            return Ok(false);
        };
        if !self.tree().delete(&encode_pk_key(pk)?)? {
            return Err(Error::internal("row vanished during delete"));
        }
        for ix in &self.schema.indexes {
            let col = self
                .schema
                .col_index(&ix.column)
                .ok_or_else(|| Error::internal("index on unknown column"))?;
            let ix_tree = BTree::open(self.pager, ix.root_page, TreeKind::Index);
            if !ix_tree.delete(&encode_index_key(&row.items[col], pk)?)? {
                return Err(Error::corrupt(format!(
                    "index {} is missing an entry for pk {}",
                    ix.name, pk
                )));
            }
        }
        Ok(true)
    }

    /// Bind-time validation: arity, column types, NOT NULL, and key
    /// sizes.  Runs before anything is written, so a bad row in a batch
    /// leaves no partial effect.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.items.len() != self.schema.columns.len() {
            return Err(Error::schema(format!(
                "table {} has {} columns but {} values were supplied",
                self.schema.name,
                self.schema.columns.len(),
                row.items.len()
            )));
        }
        for (value, col) in row.items.iter().zip(&self.schema.columns) {
            if value.is_null() {
                if !col.nullable {
                    return Err(Error::constraint(format!(
                        "column {}.{} may not be NULL",
                        self.schema.name, col.name
                    )));
                }
                continue;
            }
            if !value.fits(col.coltype) {
                return Err(Error::schema(format!(
                    "type mismatch for {}.{}: expected {}, got {}",
                    self.schema.name,
                    col.name,
                    col.coltype,
                    value.type_name()
                )));
            }
        }
        let pk = &row.items[self.schema.pk_col()];
        if encode_pk_key(pk)?.len() > MAX_KEY_LEN {
            return Err(Error::constraint(format!(
                "primary key too long in table {}",
                self.schema.name
            )));
        }
        for ix in &self.schema.indexes {
            let col = self
                .schema
                .col_index(&ix.column)
                .ok_or_else(|| Error::internal("index on unknown column"))?;
            if encode_index_key(&row.items[col], pk)?.len() > MAX_KEY_LEN {
                return Err(Error::constraint(format!(
                    "value too long for index {}",
                    ix.name
                )));
            }
        }
        Ok(())
    }
}

/// Pull-based row scan over a table tree.
pub struct RowScan<'p> {
    cursor: Cursor<'p>,
}

impl RowScan<'_> {
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        match self.cursor.next_entry()? {
            Some((_, payload)) => Ok(Some(decode_row(&payload)?)),
            None => Ok(None),
        }
    }
}

/// Pull-based scan over an index tree yielding matching primary keys.
pub struct IndexPkScan<'p> {
    cursor: Cursor<'p>,
}

impl IndexPkScan<'_> {
    pub fn next_pk(&mut self) -> Result<Option<SqlValue>> {
        match self.cursor.next_entry()? {
            None => Ok(None),
            Some((key, _)) => {
                let mut pos = 0;
                let _indexed_value = decode_key_value(&key, &mut pos)?;
                let pk = decode_key_value(&key, &mut pos)?;
                Ok(Some(pk))
            }
        }
    }
}
