//! dbheader reads and writes the meta page (page 0) of a database file.
//!
//! Fixed layout, numeric fields little-endian:
//!
//! | offset | size | field |
//! |--------|------|-------------------------------|
//! | 0      | 16   | magic `PYSQLITE-FMT-01\0`     |
//! | 16     | 4    | page size                     |
//! | 20     | 4    | page count                    |
//! | 24     | 4    | free-list head (0 = none)     |
//! | 28     | 4    | catalog root page             |
//! | 32     | 4    | schema-change counter         |

use byteorder::{ByteOrder, LittleEndian};

use crate::errors::{Error, Result};
use crate::pager::{PageNum, PAGE_SIZE};

pub const MAGIC: &[u8; 16] = b"PYSQLITE-FMT-01\0";

const OFF_PAGE_SIZE: usize = 16;
const OFF_PAGE_COUNT: usize = 20;
const OFF_FREELIST_HEAD: usize = 24;
const OFF_CATALOG_ROOT: usize = 28;
const OFF_SCHEMA_COUNTER: usize = 32;

/// The decoded meta page.  The page size is checked, not stored: only
/// 4096-byte pages are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub page_count: PageNum,
    pub freelist_head: PageNum,
    pub catalog_root: PageNum,
    pub schema_counter: u32,
}

impl Meta {
    pub fn encode(&self) -> Vec<u8> {
        let mut page = vec![0_u8; PAGE_SIZE];
        page[0..16].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut page[OFF_PAGE_SIZE..], PAGE_SIZE as u32);
        LittleEndian::write_u32(&mut page[OFF_PAGE_COUNT..], self.page_count);
        LittleEndian::write_u32(&mut page[OFF_FREELIST_HEAD..], self.freelist_head);
        LittleEndian::write_u32(&mut page[OFF_CATALOG_ROOT..], self.catalog_root);
        LittleEndian::write_u32(&mut page[OFF_SCHEMA_COUNTER..], self.schema_counter);
        page
    }

    pub fn decode(page: &[u8]) -> Result<Meta> {
        if page.len() < PAGE_SIZE {
            return Err(Error::corrupt("meta page truncated"));
        }
        if &page[0..16] != MAGIC {
            return Err(Error::corrupt(format!(
                "bad magic: expected {}, found {}",
                hex::encode(MAGIC),
                hex::encode(&page[0..16])
            )));
        }
        let page_size = LittleEndian::read_u32(&page[OFF_PAGE_SIZE..]);
        if page_size as usize != PAGE_SIZE {
            return Err(Error::corrupt(format!("unsupported page size {}", page_size)));
        }
        let meta = Meta {
            page_count: LittleEndian::read_u32(&page[OFF_PAGE_COUNT..]),
            freelist_head: LittleEndian::read_u32(&page[OFF_FREELIST_HEAD..]),
            catalog_root: LittleEndian::read_u32(&page[OFF_CATALOG_ROOT..]),
            schema_counter: LittleEndian::read_u32(&page[OFF_SCHEMA_COUNTER..]),
        };
        if meta.page_count < 2 {
            return Err(Error::corrupt("page count smaller than meta + catalog root"));
        }
        if meta.catalog_root == 0 || meta.catalog_root >= meta.page_count {
            return Err(Error::corrupt("catalog root out of range"));
        }
        if meta.freelist_head >= meta.page_count {
            return Err(Error::corrupt("free-list head out of range"));
        }
        Ok(meta)
    }
}
