//! Bounded resident page pool. Pages are stored keyed by 1-based page
//! number; dirtiness is read directly off each page's reserved changed bit
//! (`page::is_dirty`) rather than a parallel tracking set, so the cache
//! never disagrees with the b-tree engine about what needs writing back.
//!
//! Grounded in the teacher's single-file-handle seek-and-read access
//! pattern (`btree.rs`/`page.rs`), generalized into a writer with eviction,
//! and in `ab532af9_ByteCraft-Co-INVDB`'s `pager.rs` (cache keyed by page
//! number, `flush` writing dirty pages in page-number order, a defensive
//! `Drop` flush alongside the explicit `close`).

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::page;

struct Resident {
    buf: Vec<u8>,
    ref_bit: bool,
}

pub struct PageCache {
    page_size: usize,
    /// Resident page capacity. 0 means unbounded/in-memory-only: no file,
    /// no eviction, used for tests that want a tree without a backing file.
    capacity: usize,
    file: Option<File>,
    pages: HashMap<u32, Resident>,
    clock: VecDeque<u32>,
    file_page_count: u32,
}

impl PageCache {
    /// Opens (or creates) `file_name` as a file-backed cache. `file_page_count`
    /// is the number of pages already in the file (0 for a brand-new, empty
    /// file, so the first `get_new_page()` call legitimately returns page 1;
    /// recovered from the header on reopen).
    pub fn open(file: File, page_size: usize, capacity: usize, file_page_count: u32) -> Self {
        PageCache {
            page_size,
            capacity,
            file: Some(file),
            pages: HashMap::new(),
            clock: VecDeque::new(),
            file_page_count,
        }
    }

    /// In-memory-only cache with no backing file, for `cache_size == 0`.
    /// Starts with zero pages so the first `get_new_page()` call returns
    /// page 1, matching the file-backed brand-new-file path.
    pub fn in_memory(page_size: usize) -> Self {
        PageCache {
            page_size,
            capacity: 0,
            file: None,
            pages: HashMap::new(),
            clock: VecDeque::new(),
            file_page_count: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn file_page_count(&self) -> u32 {
        self.file_page_count
    }

    pub fn set_file_page_count(&mut self, n: u32) {
        self.file_page_count = n;
    }

    fn load_from_file(&mut self, page_no: u32) -> Result<Vec<u8>> {
        match &mut self.file {
            Some(file) => {
                let mut buf = vec![0u8; self.page_size];
                file.seek(SeekFrom::Start((page_no as u64 - 1) * self.page_size as u64))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            None => Ok(vec![0u8; self.page_size]),
        }
    }

    fn write_to_file(&mut self, page_no: u32, buf: &[u8]) -> Result<()> {
        if let Some(file) = &mut self.file {
            file.seek(SeekFrom::Start((page_no as u64 - 1) * self.page_size as u64))?;
            file.write_all(buf)?;
        }
        Ok(())
    }

    /// Clock (second-chance) eviction: advance past pages with their
    /// reference bit set, clearing it as we go, and evict the first page
    /// found already clear. Flushes the victim first if dirty.
    fn evict_one(&mut self) -> Result<()> {
        loop {
            let candidate = self
                .clock
                .pop_front()
                .expect("evict_one called with nothing resident");
            let give_second_chance = self.pages.get(&candidate).map(|r| r.ref_bit).unwrap_or(false);
            if give_second_chance {
                if let Some(r) = self.pages.get_mut(&candidate) {
                    r.ref_bit = false;
                }
                self.clock.push_back(candidate);
                continue;
            }
            if let Some(r) = self.pages.remove(&candidate) {
                if page::is_dirty(&r.buf, self.page_size) {
                    self.write_to_file(candidate, &r.buf)?;
                }
            }
            return Ok(());
        }
    }

    fn admit(&mut self, page_no: u32, buf: Vec<u8>) -> Result<()> {
        if self.capacity > 0 && self.pages.len() >= self.capacity && !self.pages.contains_key(&page_no) {
            self.evict_one()?;
        }
        self.pages.insert(page_no, Resident { buf, ref_bit: false });
        self.clock.push_back(page_no);
        Ok(())
    }

    pub fn get_page(&mut self, page_no: u32) -> Result<&[u8]> {
        if !self.pages.contains_key(&page_no) {
            let buf = self.load_from_file(page_no)?;
            self.admit(page_no, buf)?;
        }
        let r = self.pages.get_mut(&page_no).unwrap();
        r.ref_bit = true;
        Ok(&r.buf)
    }

    pub fn get_page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        if !self.pages.contains_key(&page_no) {
            let buf = self.load_from_file(page_no)?;
            self.admit(page_no, buf)?;
        }
        let r = self.pages.get_mut(&page_no).unwrap();
        r.ref_bit = true;
        Ok(&mut r.buf)
    }

    /// Allocates a new page. `hint_sibling` biases eviction away from a
    /// page the caller expects to touch again soon (e.g. the page being
    /// split); the clock algorithm otherwise has no notion of hints beyond
    /// the reference bit it already tracks.
    ///
    /// If the candidate number would fall on the lock-byte page, that
    /// number is skipped (and still counted against `file_page_count`,
    /// leaving an unused gap page) and the next number is used instead.
    pub fn get_new_page(&mut self, hint_sibling: Option<u32>) -> Result<(u32, &mut [u8])> {
        if let Some(hint) = hint_sibling {
            if let Some(r) = self.pages.get_mut(&hint) {
                r.ref_bit = true;
            }
        }
        let mut candidate = self.file_page_count + 1;
        if page::is_lock_byte_page(candidate, self.page_size) {
            candidate += 1;
        }
        self.file_page_count = candidate;
        let page_size = self.page_size;
        self.admit(candidate, vec![0u8; page_size])?;
        Ok((candidate, &mut self.pages.get_mut(&candidate).unwrap().buf))
    }

    pub fn mark_dirty(&mut self, page_no: u32) {
        if let Some(r) = self.pages.get_mut(&page_no) {
            page::mark_dirty(&mut r.buf, self.page_size);
        }
    }

    pub fn is_dirty(&self, page_no: u32) -> bool {
        self.pages
            .get(&page_no)
            .map(|r| page::is_dirty(&r.buf, self.page_size))
            .unwrap_or(false)
    }

    /// Writes every resident dirty page back to the file, in page-number
    /// order, and clears each page's changed bit once it lands safely.
    pub fn flush(&mut self) -> Result<()> {
        let mut dirty: Vec<u32> = self
            .pages
            .iter()
            .filter(|(_, r)| page::is_dirty(&r.buf, self.page_size))
            .map(|(no, _)| *no)
            .collect();
        dirty.sort_unstable();
        for page_no in dirty {
            let buf = self.pages.get(&page_no).unwrap().buf.clone();
            self.write_to_file(page_no, &buf)?;
            if let Some(r) = self.pages.get_mut(&page_no) {
                page::clear_dirty(&mut r.buf, self.page_size);
            }
        }
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("page cache dropped with unflushed pages: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_cache_allocates_and_reads_back() {
        let mut cache = PageCache::in_memory(4096);
        let (page_no, buf) = cache.get_new_page(None).unwrap();
        buf[0] = 42;
        let page_no_copy = page_no;
        cache.mark_dirty(page_no_copy);
        assert_eq!(cache.get_page(page_no_copy).unwrap()[0], 42);
    }

    #[test]
    fn eviction_flushes_dirty_victims_file_backed() {
        let dir = std::env::temp_dir().join(format!("sqib-cache-test-{}", std::process::id()));
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&dir)
            .unwrap();
        let mut cache = PageCache::open(file, 4096, 2, 1);
        let (p1, buf1) = cache.get_new_page(None).unwrap();
        buf1[10] = 1;
        cache.mark_dirty(p1);
        let (p2, buf2) = cache.get_new_page(None).unwrap();
        buf2[10] = 2;
        cache.mark_dirty(p2);
        // third allocation forces an eviction since capacity is 2.
        let (_p3, _buf3) = cache.get_new_page(None).unwrap();
        cache.flush().unwrap();
        let _ = std::fs::remove_file(&dir);
    }
}
