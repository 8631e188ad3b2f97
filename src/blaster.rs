//! Top-level handle combining the page cache and the b-tree into a single
//! bulk index-writer, mirroring the original's `sqlite_index_blaster` class:
//! open/create the file, recover or initialize page 1, expose put/get/remove,
//! and fix up the header on close.

use std::fs::{File, OpenOptions};

use log::info;

use crate::btree::Btree;
use crate::cache::PageCache;
use crate::config::SqibConfig;
use crate::error::Result;
use crate::page;
use crate::record::{make_record, ColumnValue};

/// Root page of a brand-new tree: page 1 carries the database header plus
/// the one-row `sqlite_schema` table, so the index's own root starts at 2.
const FIRST_INDEX_ROOT_PAGE: u32 = 2;

pub struct IndexBlaster {
    config: SqibConfig,
    cache: PageCache,
    tree: Btree,
}

impl IndexBlaster {
    /// Opens `config.file_name`, creating and initializing it if it does not
    /// already exist, and recovering the root page and page count from the
    /// header otherwise.
    pub fn open(config: SqibConfig) -> Result<Self> {
        config.validate()?;

        let is_new = !std::path::Path::new(&config.file_name).exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.file_name)?;

        let mut cache = PageCache::open(file, config.page_size, config.cache_size, 0);

        let root_page = if is_new {
            info!("creating new index file {}", config.file_name);
            Self::init_new_file(&mut cache, &config)?
        } else {
            Self::recover_root_page(&mut cache, &config)?
        };

        let tree = Btree::new(config.page_size, config.pk_count, root_page);
        Ok(IndexBlaster { config, cache, tree })
    }

    /// In-memory variant with no backing file, for tests and scratch
    /// indexes that never need to persist.
    pub fn in_memory(config: SqibConfig) -> Result<Self> {
        config.validate()?;
        let mut cache = PageCache::in_memory(config.page_size);
        let root_page = Self::init_new_file(&mut cache, &config)?;
        let tree = Btree::new(config.page_size, config.pk_count, root_page);
        Ok(IndexBlaster { config, cache, tree })
    }

    fn init_new_file(cache: &mut PageCache, config: &SqibConfig) -> Result<u32> {
        let page_size = config.page_size;
        let (page1_no, _) = cache.get_new_page(None)?;
        debug_assert_eq!(page1_no, 1);
        let (root_page_no, _) = cache.get_new_page(None)?;
        debug_assert_eq!(root_page_no, FIRST_INDEX_ROOT_PAGE);

        {
            let buf = cache.get_page_mut(root_page_no)?;
            page::init_leaf(buf, 0, page_size);
            page::mark_dirty(buf, page_size);
        }
        {
            let buf = cache.get_page_mut(1)?;
            page::write_db_header(buf, page_size as u32, cache.file_page_count());
            page::write_schema_page(buf, page_size, &config.table_name, &config.column_names, root_page_no);
            page::mark_dirty(buf, page_size);
        }
        Ok(root_page_no)
    }

    fn recover_root_page(cache: &mut PageCache, config: &SqibConfig) -> Result<u32> {
        let buf = cache.get_page(1)?;
        let header = page::read_db_header(buf)?;
        if header.page_size as usize != config.page_size {
            return Err(crate::error::malformed(format!(
                "file page size {} does not match configured page size {}",
                header.page_size, config.page_size
            )));
        }
        cache.set_file_page_count(header.page_count);
        let buf = cache.get_page(1)?;
        page::read_schema_root_page(buf)
    }

    pub fn put(&mut self, values: &[ColumnValue]) -> Result<()> {
        let record = make_record(values);
        self.tree.put(&mut self.cache, &record)
    }

    pub fn get(&mut self, key_values: &[ColumnValue]) -> Result<Option<Vec<u8>>> {
        let key_record = make_record(key_values);
        self.tree.get(&mut self.cache, &key_record)
    }

    pub fn remove(&mut self, key_values: &[ColumnValue]) -> Result<bool> {
        let key_record = make_record(key_values);
        self.tree.remove(&mut self.cache, &key_record)
    }

    /// Flushes resident pages and fixes up the file's page count and schema
    /// root pointer, both of which may have changed as the tree grew.
    pub fn close(mut self) -> Result<()> {
        let page_size = self.config.page_size;
        let file_page_count = self.cache.file_page_count();
        let root_page = self.tree.root_page();
        {
            let buf = self.cache.get_page_mut(1)?;
            page::write_db_header(buf, page_size as u32, file_page_count);
            page::write_schema_page(buf, page_size, &self.config.table_name, &self.config.column_names, root_page);
            page::mark_dirty(buf, page_size);
        }
        self.cache.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(file_name: &str) -> SqibConfig {
        SqibConfig {
            column_count: 2,
            pk_count: 1,
            column_names: "k,v".to_string(),
            table_name: "idx".to_string(),
            page_size: 4096,
            cache_size: 16,
            file_name: file_name.to_string(),
        }
    }

    #[test]
    fn in_memory_round_trips_put_get() {
        let mut blaster = IndexBlaster::in_memory(config("unused")).unwrap();
        blaster
            .put(&[ColumnValue::Int32(1), ColumnValue::Text("one".into())])
            .unwrap();
        let got = blaster.get(&[ColumnValue::Int32(1)]).unwrap().unwrap();
        let decoded = crate::record::decode_values(&got).unwrap();
        assert!(matches!(&decoded[1], crate::record::SerialData::Text(s) if s == "one"));
    }

    #[test]
    fn file_backed_round_trips_across_reopen() {
        let path = std::env::temp_dir().join(format!("sqib-blaster-test-{}.db", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path_str);

        {
            let mut blaster = IndexBlaster::open(config(&path_str)).unwrap();
            for i in 0..200 {
                blaster
                    .put(&[ColumnValue::Int32(i), ColumnValue::Text(format!("row{i}"))])
                    .unwrap();
            }
            blaster.close().unwrap();
        }
        {
            let mut blaster = IndexBlaster::open(config(&path_str)).unwrap();
            for i in 0..200 {
                let got = blaster.get(&[ColumnValue::Int32(i)]).unwrap();
                assert!(got.is_some(), "missing row {i} after reopen");
            }
            blaster.close().unwrap();
        }
        let _ = std::fs::remove_file(&path_str);
    }
}
