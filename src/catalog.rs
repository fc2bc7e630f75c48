//! The catalog: a reserved table describing all user tables, their column
//! schemas, and their indexes.
//!
//! Catalog rows are `(object_type, name, parent_table, root_page,
//! schema_text)` keyed by object name; `schema_text` holds the CREATE
//! statement, re-parsed at boot the same way user statements are.  The
//! catalog's own root page is fixed in the meta page, so reading it is an
//! ordinary table scan.
//!
//! A table's stable integer id is its root page number: roots are
//! rewritten in place on split and collapse and never move.

use std::collections::HashMap;
use std::ops::Bound;

use crate::ast;
use crate::btree::{BTree, TreeKind};
use crate::errors::{Error, Result};
use crate::pager::{PageNum, Pager};
use crate::record::{decode_row, encode_pk_key, encode_row};
use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;
use crate::typed_row::Row;

pub const SCHEMA_TABLE_NAME: &str = "__schema__";

const OBJECT_TYPE_TABLE: &str = "table";
const OBJECT_TYPE_INDEX: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub coltype: SqlType,
    pub nullable: bool,
    pub is_pk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub table: String,
    pub column: String,
    pub root_page: PageNum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    /// Doubles as the table's stable integer id: roots are rewritten in
    /// place and never move.
    pub root_page: PageNum,
    pub columns: Vec<ColumnSchema>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn pk_col(&self) -> usize {
        self.columns
            .iter()
            .position(|c| c.is_pk)
            .expect("every table has exactly one pk column")
    }

    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn index_on(&self, column: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|ix| ix.column == column)
    }
}

/// The in-memory schema dictionary, rebuilt from the catalog whenever the
/// schema counter moves.
pub struct Catalog {
    tables: HashMap<String, TableSchema>,
    indexes: HashMap<String, IndexSchema>,
    loaded_counter: u32,
}

impl Catalog {
    pub fn empty() -> Catalog {
        Catalog {
            tables: HashMap::new(),
            indexes: HashMap::new(),
            loaded_counter: u32::MAX,
        }
    }

    /// True when the schema counter on page 0 moved since this catalog
    /// was loaded.
    pub fn is_stale(&self, pager: &Pager) -> bool {
        self.loaded_counter != pager.schema_counter()
    }

    /// Scans the catalog table into the schema dictionary.
    pub fn load(pager: &Pager) -> Result<Catalog> {
        let tree = BTree::open(pager, pager.catalog_root(), TreeKind::Table);
        let mut rows = vec![];
        let mut cursor = tree.scan(Bound::Unbounded, Bound::Unbounded)?;
        while let Some((_, payload)) = cursor.next_entry()? {
            rows.push(decode_row(&payload)?);
        }

        let mut catalog = Catalog {
            tables: HashMap::new(),
            indexes: HashMap::new(),
            loaded_counter: pager.schema_counter(),
        };
        // Tables first: index rows attach to their parent table.
        for row in &rows {
            let entry = CatalogEntry::from_row(row)?;
            if entry.object_type == OBJECT_TYPE_TABLE {
                let stmt = crate::pt_to_ast::parse_statement(&entry.schema_text)?;
                let ast::Statement::CreateTable(ct) = stmt else {
                    return Err(Error::corrupt(format!(
                        "catalog row for table {} holds a non-CREATE TABLE statement",
                        entry.name
                    )));
                };
                let columns = columns_from_ast(&ct)?;
                catalog.tables.insert(
                    entry.name.clone(),
                    TableSchema {
                        name: entry.name,
                        root_page: entry.root_page,
                        columns,
                        indexes: vec![],
                    },
                );
            }
        }
        for row in &rows {
            let entry = CatalogEntry::from_row(row)?;
            if entry.object_type == OBJECT_TYPE_INDEX {
                let table = catalog.tables.get_mut(&entry.parent_table).ok_or_else(|| {
                    Error::corrupt(format!(
                        "index {} references missing table {}",
                        entry.name, entry.parent_table
                    ))
                })?;
                let stmt = crate::pt_to_ast::parse_statement(&entry.schema_text)?;
                let ast::Statement::CreateIndex(ci) = stmt else {
                    return Err(Error::corrupt(format!(
                        "catalog row for index {} holds a non-CREATE INDEX statement",
                        entry.name
                    )));
                };
                let index = IndexSchema {
                    name: entry.name.clone(),
                    table: entry.parent_table,
                    column: ci.colname.name,
                    root_page: entry.root_page,
                };
                table.indexes.push(index.clone());
                catalog.indexes.insert(entry.name, index);
            }
        }
        Ok(catalog)
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::schema(format!("no such table: {}", name)))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    // ----- DDL -----

    /// CREATE TABLE: allocate a root page, insert a catalog row, bump the
    /// schema counter.
    pub fn create_table(&mut self, pager: &Pager, ct: &ast::CreateTableStatement) -> Result<()> {
        self.check_name_free(&ct.tablename)?;
        let columns = columns_from_ast(ct)?;
        let root_page = BTree::create(pager, TreeKind::Table)?;
        self.insert_catalog_row(
            pager,
            &CatalogEntry {
                object_type: OBJECT_TYPE_TABLE.to_string(),
                name: ct.tablename.clone(),
                parent_table: String::new(),
                root_page,
                schema_text: create_table_sql(ct),
            },
        )?;
        pager.bump_schema_counter()?;
        self.tables.insert(
            ct.tablename.clone(),
            TableSchema {
                name: ct.tablename.clone(),
                root_page,
                columns,
                indexes: vec![],
            },
        );
        self.loaded_counter = pager.schema_counter();
        Ok(())
    }

    /// CREATE INDEX: allocate a root page, backfill from the table,
    /// insert a catalog row, bump the schema counter.
    pub fn create_index(&mut self, pager: &Pager, ci: &ast::CreateIndexStatement) -> Result<()> {
        self.check_name_free(&ci.indexname)?;
        let table = self.table(&ci.tablename)?.clone();
        let col = table.col_index(&ci.colname.name).ok_or_else(|| {
            Error::schema(format!(
                "no such column: {}.{}",
                ci.tablename, ci.colname.name
            ))
        })?;
        let root_page = BTree::create(pager, TreeKind::Index)?;
        let index_tree = BTree::open(pager, root_page, TreeKind::Index);

        // Backfill from the existing rows.
        let table_tree = BTree::open(pager, table.root_page, TreeKind::Table);
        let pk_col = table.pk_col();
        let mut cursor = table_tree.scan(Bound::Unbounded, Bound::Unbounded)?;
        while let Some((_, payload)) = cursor.next_entry()? {
            let row = decode_row(&payload)?;
            let key = crate::record::encode_index_key(&row.items[col], &row.items[pk_col])?;
            index_tree.insert(&key, &[])?;
        }

        self.insert_catalog_row(
            pager,
            &CatalogEntry {
                object_type: OBJECT_TYPE_INDEX.to_string(),
                name: ci.indexname.clone(),
                parent_table: ci.tablename.clone(),
                root_page,
                schema_text: create_index_sql(ci),
            },
        )?;
        pager.bump_schema_counter()?;
        let index = IndexSchema {
            name: ci.indexname.clone(),
            table: ci.tablename.clone(),
            column: ci.colname.name.clone(),
            root_page,
        };
        self.tables
            .get_mut(&ci.tablename)
            .expect("checked above")
            .indexes
            .push(index.clone());
        self.indexes.insert(ci.indexname.clone(), index);
        self.loaded_counter = pager.schema_counter();
        Ok(())
    }

    /// DROP TABLE: free the table tree and every index tree, delete their
    /// catalog rows, bump the schema counter.
    pub fn drop_table(&mut self, pager: &Pager, name: &str) -> Result<()> {
        if name == SCHEMA_TABLE_NAME {
            return Err(Error::schema("cannot drop the catalog"));
        }
        let table = self.table(name)?.clone();
        for ix in &table.indexes {
            BTree::open(pager, ix.root_page, TreeKind::Index).free_all()?;
            self.delete_catalog_row(pager, &ix.name)?;
            self.indexes.remove(&ix.name);
        }
        BTree::open(pager, table.root_page, TreeKind::Table).free_all()?;
        self.delete_catalog_row(pager, name)?;
        pager.bump_schema_counter()?;
        self.tables.remove(name);
        self.loaded_counter = pager.schema_counter();
        Ok(())
    }

    /// DROP INDEX by name.
    pub fn drop_index(&mut self, pager: &Pager, name: &str) -> Result<()> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| Error::schema(format!("no such index: {}", name)))?
            .clone();
        BTree::open(pager, index.root_page, TreeKind::Index).free_all()?;
        self.delete_catalog_row(pager, name)?;
        pager.bump_schema_counter()?;
        self.indexes.remove(name);
        if let Some(table) = self.tables.get_mut(&index.table) {
            table.indexes.retain(|ix| ix.name != name);
        }
        self.loaded_counter = pager.schema_counter();
        Ok(())
    }

    fn check_name_free(&self, name: &str) -> Result<()> {
        if name == SCHEMA_TABLE_NAME {
            return Err(Error::schema(format!("{} is reserved", name)));
        }
        if self.tables.contains_key(name) {
            return Err(Error::schema(format!("table {} already exists", name)));
        }
        if self.indexes.contains_key(name) {
            return Err(Error::schema(format!("index {} already exists", name)));
        }
        Ok(())
    }

    fn insert_catalog_row(&self, pager: &Pager, entry: &CatalogEntry) -> Result<()> {
        let tree = BTree::open(pager, pager.catalog_root(), TreeKind::Table);
        let key = encode_pk_key(&SqlValue::Str(entry.name.clone()))?;
        tree.insert(&key, &encode_row(&entry.to_row())?)
    }

    fn delete_catalog_row(&self, pager: &Pager, name: &str) -> Result<()> {
        let tree = BTree::open(pager, pager.catalog_root(), TreeKind::Table);
        let key = encode_pk_key(&SqlValue::Str(name.to_string()))?;
        if !tree.delete(&key)? {
            return Err(Error::internal(format!("catalog row for {} missing", name)));
        }
        Ok(())
    }
}

struct CatalogEntry {
    object_type: String,
    name: String,
    parent_table: String,
    root_page: PageNum,
    schema_text: String,
}

impl CatalogEntry {
    fn to_row(&self) -> Row {
        Row::new(vec![
            SqlValue::Str(self.object_type.clone()),
            SqlValue::Str(self.name.clone()),
            SqlValue::Str(self.parent_table.clone()),
            SqlValue::Int(self.root_page as i64),
            SqlValue::Str(self.schema_text.clone()),
        ])
    }

    fn from_row(row: &Row) -> Result<CatalogEntry> {
        let get_str = |i: usize| -> Result<String> {
            match row.items.get(i) {
                Some(SqlValue::Str(s)) => Ok(s.clone()),
                _ => Err(Error::corrupt("catalog row has a malformed field")),
            }
        };
        let root_page = match row.items.get(3) {
            Some(SqlValue::Int(i)) if *i >= 0 => *i as PageNum,
            _ => return Err(Error::corrupt("catalog row has a bad root page")),
        };
        Ok(CatalogEntry {
            object_type: get_str(0)?,
            name: get_str(1)?,
            parent_table: get_str(2)?,
            root_page,
            schema_text: get_str(4)?,
        })
    }
}

fn columns_from_ast(ct: &ast::CreateTableStatement) -> Result<Vec<ColumnSchema>> {
    if ct.coldefs.is_empty() {
        return Err(Error::schema("a table needs at least one column"));
    }
    let pk_count = ct.coldefs.iter().filter(|c| c.is_pk).count();
    if pk_count != 1 {
        return Err(Error::schema(format!(
            "table {} must have exactly one PRIMARY KEY column, found {}",
            ct.tablename, pk_count
        )));
    }
    let mut columns = vec![];
    for def in &ct.coldefs {
        if columns
            .iter()
            .any(|c: &ColumnSchema| c.name == def.colname.name)
        {
            return Err(Error::schema(format!(
                "duplicate column name {}",
                def.colname.name
            )));
        }
        columns.push(ColumnSchema {
            name: def.colname.name.clone(),
            coltype: def.coltype,
            // The primary key is implicitly NOT NULL.
            nullable: !def.not_null && !def.is_pk,
            is_pk: def.is_pk,
        });
    }
    Ok(columns)
}

/// Canonical CREATE TABLE text stored in the catalog.
fn create_table_sql(ct: &ast::CreateTableStatement) -> String {
    use itertools::Itertools;
    let cols = ct
        .coldefs
        .iter()
        .map(|c| {
            let mut s = format!("{} {}", c.colname.name, c.coltype);
            if c.is_pk {
                s.push_str(" PRIMARY KEY");
            }
            if c.not_null {
                s.push_str(" NOT NULL");
            }
            s
        })
        .join(", ");
    format!("CREATE TABLE {} ({})", ct.tablename, cols)
}

fn create_index_sql(ci: &ast::CreateIndexStatement) -> String {
    format!(
        "CREATE INDEX {} ON {}({})",
        ci.indexname, ci.tablename, ci.colname.name
    )
}
