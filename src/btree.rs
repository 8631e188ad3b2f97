//! Index b-tree write engine: locate, insert (with page splitting and root
//! promotion), point lookup, and pointer removal.
//!
//! This is a true b-tree, not a b+tree: a full record lives at every level,
//! and a key lookup can match and terminate at an interior page, not only at
//! a leaf. That follows directly from the original's `split()`, which always
//! promotes the whole broken-off cell to the parent regardless of
//! `is_leaf()` — see DESIGN.md's Open Question #5.
//!
//! None of the teacher's read-only `btree.rs` traversal survives (it only
//! ever walked table b-trees root to leaf). These algorithms are grounded
//! directly in the original's `search_current_block`, `add_data`,
//! `write_child_page_addr`, `split`, `del_ptr`, `prepare_kv_to_add_to_parent`
//! and `add_first_kv_to_root`.

use std::cmp::Ordering;

use itertools::Itertools;

use crate::cache::PageCache;
use crate::cell::{self, Thresholds};
use crate::error::Result;
use crate::page;
use crate::record::compare_records;

/// Result of descending the tree looking for `key`.
enum Loc {
    Found { page: u32, pos: usize },
    /// `pos` is the cell-pointer-array index a new cell for `key` should be
    /// inserted at on this (always leaf) page.
    Insert { page: u32, pos: usize },
}

pub struct Btree {
    pk_count: usize,
    thresholds: Thresholds,
    root_page: u32,
}

impl Btree {
    pub fn new(page_size: usize, pk_count: usize, root_page: u32) -> Self {
        Btree {
            pk_count,
            thresholds: Thresholds::new(page_size),
            root_page,
        }
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    /// Binary search over the cells on `page_no` comparing against `key`'s
    /// leading primary-key columns. Returns the matching position, or the
    /// insertion point if no cell matches.
    fn binary_search_node(&self, cache: &mut PageCache, page_no: u32, key: &[u8]) -> Result<(bool, usize)> {
        let buf = cache.get_page(page_no)?;
        let is_leaf = page::is_leaf(buf, 0);
        let hdr_len = page::header_len(page::page_type(buf, 0));
        let cc = page::cell_count(buf, 0) as usize;

        let mut lo = 0usize;
        let mut hi = cc;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let buf = cache.get_page(page_no)?;
            let offset = page::cell_pointer(buf, 0, hdr_len, mid);
            let (total_len, _p) = cell::raw_cell_len(buf, offset, is_leaf, self.thresholds)?;
            let raw = &buf[offset..offset + total_len];
            let payload = cell::materialize_payload(cache, raw, is_leaf, self.thresholds)?;

            match compare_records(&payload, key, self.pk_count)? {
                Ordering::Equal => return Ok((true, mid)),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        Ok((false, lo))
    }

    fn child_page_at(&self, cache: &mut PageCache, page_no: u32, pos: usize) -> Result<u32> {
        let buf = cache.get_page(page_no)?;
        let hdr_len = page::header_len(page::page_type(buf, 0));
        let cc = page::cell_count(buf, 0) as usize;
        if pos == cc {
            Ok(page::right_child(buf, 0))
        } else {
            let offset = page::cell_pointer(buf, 0, hdr_len, pos);
            Ok(cell::cell_left_child(&buf[offset..]))
        }
    }

    fn locate(&self, cache: &mut PageCache, key: &[u8]) -> Result<Loc> {
        let mut page_no = self.root_page;
        loop {
            let (found, pos) = self.binary_search_node(cache, page_no, key)?;
            if found {
                return Ok(Loc::Found { page: page_no, pos });
            }
            let buf = cache.get_page(page_no)?;
            if page::is_leaf(buf, 0) {
                return Ok(Loc::Insert { page: page_no, pos });
            }
            page_no = self.child_page_at(cache, page_no, pos)?;
        }
    }

    /// Looks up `key_record` (only its leading primary-key columns are
    /// compared) and returns the full stored record if present.
    pub fn get(&self, cache: &mut PageCache, key_record: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.locate(cache, key_record)? {
            Loc::Found { page, pos } => {
                let buf = cache.get_page(page)?;
                let is_leaf = page::is_leaf(buf, 0);
                let hdr_len = page::header_len(page::page_type(buf, 0));
                let offset = page::cell_pointer(buf, 0, hdr_len, pos);
                let (total_len, _p) = cell::raw_cell_len(buf, offset, is_leaf, self.thresholds)?;
                let raw_owned = buf[offset..offset + total_len].to_vec();
                let payload = cell::materialize_payload(cache, &raw_owned, is_leaf, self.thresholds)?;
                Ok(Some(payload))
            }
            Loc::Insert { .. } => Ok(None),
        }
    }

    /// Removes the cell matching `key_record`'s primary-key columns, if
    /// present. No rebalancing is performed: see DESIGN.md on bounded
    /// deletion.
    pub fn remove(&mut self, cache: &mut PageCache, key_record: &[u8]) -> Result<bool> {
        match self.locate(cache, key_record)? {
            Loc::Found { page, pos } => {
                let buf = cache.get_page_mut(page)?;
                let hdr_len = page::header_len(page::page_type(buf, 0));
                page::del_ptr(buf, 0, hdr_len, pos);
                page::mark_dirty(buf, cache.page_size());
                Ok(true)
            }
            Loc::Insert { .. } => Ok(false),
        }
    }

    /// Inserts `record`, or overwrites the existing entry sharing its
    /// primary-key prefix.
    pub fn put(&mut self, cache: &mut PageCache, record: &[u8]) -> Result<()> {
        let mut ancestors = Vec::new();
        let mut page_no = self.root_page;
        loop {
            let (found, pos) = self.binary_search_node(cache, page_no, record)?;
            if found {
                return self.update_or_replace(cache, &mut ancestors, page_no, pos, record);
            }
            let buf = cache.get_page(page_no)?;
            if page::is_leaf(buf, 0) {
                return self.insert_at(cache, &mut ancestors, page_no, pos, record, None);
            }
            let child = self.child_page_at(cache, page_no, pos)?;
            ancestors.push(page_no);
            page_no = child;
        }
    }

    fn update_or_replace(
        &mut self,
        cache: &mut PageCache,
        ancestors: &mut Vec<u32>,
        page_no: u32,
        pos: usize,
        record: &[u8],
    ) -> Result<()> {
        let buf = cache.get_page(page_no)?;
        let is_leaf = page::is_leaf(buf, 0);
        let hdr_len = page::header_len(page::page_type(buf, 0));
        let offset = page::cell_pointer(buf, 0, hdr_len, pos);
        let (total_len, old_p) = cell::raw_cell_len(buf, offset, is_leaf, self.thresholds)?;

        if record.len() == old_p && record.len() <= self.thresholds.x {
            let buf = cache.get_page_mut(page_no)?;
            let left_child_bytes = if is_leaf { 0 } else { 4 };
            let (_p, vlen) = crate::varint::read_varint(&buf[offset + left_child_bytes..])?;
            let payload_start = offset + left_child_bytes + vlen;
            buf[payload_start..payload_start + record.len()].copy_from_slice(record);
            page::mark_dirty(buf, cache.page_size());
            return Ok(());
        }

        let old_left_child = if is_leaf {
            None
        } else {
            let buf = cache.get_page(page_no)?;
            let raw = &buf[offset..offset + total_len];
            Some(cell::cell_left_child(raw))
        };
        let buf = cache.get_page_mut(page_no)?;
        page::del_ptr(buf, 0, hdr_len, pos);
        page::mark_dirty(buf, cache.page_size());
        self.insert_at(cache, ancestors, page_no, pos, record, old_left_child)
    }

    fn insert_at(
        &mut self,
        cache: &mut PageCache,
        ancestors: &mut Vec<u32>,
        page_no: u32,
        pos: usize,
        record: &[u8],
        left_child: Option<u32>,
    ) -> Result<()> {
        let cell_bytes = cell::encode_cell(record, left_child, self.thresholds, cache)?;
        let buf = cache.get_page(page_no)?;
        let hdr_len = page::header_len(page::page_type(buf, 0));

        let max_len = page::single_cell_capacity(cache.page_size(), hdr_len);
        if cell_bytes.len() > max_len {
            return Err(crate::error::SqibError::KeyTooLarge {
                len: cell_bytes.len(),
                max: max_len,
            });
        }

        if page::fits(buf, 0, hdr_len, cell_bytes.len()) {
            let buf = cache.get_page_mut(page_no)?;
            page::insert_cell_raw(buf, 0, hdr_len, pos, &cell_bytes);
            page::mark_dirty(buf, cache.page_size());
            Ok(())
        } else {
            self.split_and_insert(cache, ancestors, page_no, pos, cell_bytes)
        }
    }

    /// Rotates `new_right_child` into position `pos`'s child slot, returning
    /// the child pointer it displaced. Inserting the `n`th separator key
    /// requires an `n+1`th child pointer; this is how that pointer is made
    /// room for, mirroring the original's `write_child_page_addr`.
    fn rotate_in_child(buf: &mut [u8], hdr_len: usize, pos: usize, new_right_child: u32) -> u32 {
        let cc = page::cell_count(buf, 0) as usize;
        if pos == cc {
            let old = page::right_child(buf, 0);
            page::set_right_child(buf, 0, new_right_child);
            old
        } else {
            let offset = page::cell_pointer(buf, 0, hdr_len, pos);
            let old = cell::cell_left_child(&buf[offset..]);
            buf[offset..offset + 4].copy_from_slice(&new_right_child.to_be_bytes());
            old
        }
    }

    fn split_and_insert(
        &mut self,
        cache: &mut PageCache,
        ancestors: &mut Vec<u32>,
        page_no: u32,
        pos: usize,
        new_cell: Vec<u8>,
    ) -> Result<()> {
        let buf = cache.get_page(page_no)?;
        let is_leaf = page::is_leaf(buf, 0);
        let hdr_len = page::header_len(page::page_type(buf, 0));
        let cc = page::cell_count(buf, 0) as usize;

        let mut cells: Vec<Vec<u8>> = (0..cc)
            .map(|i| {
                let buf = cache.get_page(page_no).unwrap();
                let offset = page::cell_pointer(buf, 0, hdr_len, i);
                let (len, _p) = cell::raw_cell_len(buf, offset, is_leaf, self.thresholds).unwrap();
                buf[offset..offset + len].to_vec()
            })
            .collect_vec();
        cells.insert(pos, new_cell);

        let total: usize = cells.iter().map(|c| c.len()).sum();
        let half = total / 2;
        let mut running = 0usize;
        let mut brk_idx = 0usize;
        for (i, c) in cells.iter().enumerate() {
            running += c.len();
            brk_idx = i;
            if running >= half {
                break;
            }
        }
        if brk_idx == 0 && cells.len() > 1 {
            brk_idx = 1;
        }

        let break_cell = cells[brk_idx].clone();
        let left_cells = &cells[..brk_idx];
        let right_cells = &cells[brk_idx + 1..];

        let (old_right_child, break_left_child) = if !is_leaf {
            let buf = cache.get_page(page_no)?;
            (page::right_child(buf, 0), cell::cell_left_child(&break_cell))
        } else {
            (0, 0)
        };

        let (new_page_no, _) = cache.get_new_page(Some(page_no))?;
        let page_size = cache.page_size();

        {
            let buf = cache.get_page_mut(page_no)?;
            if is_leaf {
                page::init_leaf(buf, 0, page_size);
            } else {
                page::init_interior(buf, 0, page_size);
            }
            for c in left_cells {
                page::insert_cell_raw(buf, 0, hdr_len, page::cell_count(buf, 0) as usize, c);
            }
            if !is_leaf {
                page::set_right_child(buf, 0, break_left_child);
            }
            page::mark_dirty(buf, page_size);
        }
        {
            let buf = cache.get_page_mut(new_page_no)?;
            if is_leaf {
                page::init_leaf(buf, 0, page_size);
            } else {
                page::init_interior(buf, 0, page_size);
            }
            for c in right_cells {
                page::insert_cell_raw(buf, 0, hdr_len, page::cell_count(buf, 0) as usize, c);
            }
            if !is_leaf {
                page::set_right_child(buf, 0, old_right_child);
            }
            page::mark_dirty(buf, page_size);
        }

        let separator = cell::materialize_payload(cache, &break_cell, is_leaf, self.thresholds)?;

        match ancestors.pop() {
            Some(parent) => {
                let (_found, parent_pos) = self.binary_search_node(cache, parent, &separator)?;
                let parent_buf = cache.get_page_mut(parent)?;
                let parent_hdr_len = page::header_len(page::page_type(parent_buf, 0));
                let left_child_for_sep = Self::rotate_in_child(parent_buf, parent_hdr_len, parent_pos, new_page_no);
                page::mark_dirty(parent_buf, page_size);
                self.insert_at(cache, ancestors, parent, parent_pos, &separator, Some(left_child_for_sep))
            }
            None => {
                let (new_root_no, _) = cache.get_new_page(Some(page_no))?;
                {
                    let buf = cache.get_page_mut(new_root_no)?;
                    page::init_interior(buf, 0, page_size);
                    page::set_right_child(buf, 0, new_page_no);
                    page::mark_dirty(buf, page_size);
                }
                self.root_page = new_root_no;
                self.insert_at(cache, ancestors, new_root_no, 0, &separator, Some(page_no))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{make_record, ColumnValue};

    fn kv(k: i32, v: &str) -> Vec<u8> {
        make_record(&[ColumnValue::Int32(k), ColumnValue::Text(v.to_string())])
    }

    fn key_only(k: i32) -> Vec<u8> {
        make_record(&[ColumnValue::Int32(k)])
    }

    #[test]
    fn insert_and_get_single_row() {
        let mut cache = PageCache::in_memory(4096);
        let (root, _) = cache.get_new_page(None).unwrap();
        page::init_leaf(cache.get_page_mut(root).unwrap(), 0, 4096);
        let mut tree = Btree::new(4096, 1, root);

        tree.put(&mut cache, &kv(1, "one")).unwrap();
        let got = tree.get(&mut cache, &key_only(1)).unwrap().unwrap();
        assert_eq!(got, kv(1, "one"));
        assert!(tree.get(&mut cache, &key_only(2)).unwrap().is_none());
    }

    #[test]
    fn overwrite_existing_key_replaces_value() {
        let mut cache = PageCache::in_memory(4096);
        let (root, _) = cache.get_new_page(None).unwrap();
        page::init_leaf(cache.get_page_mut(root).unwrap(), 0, 4096);
        let mut tree = Btree::new(4096, 1, root);

        tree.put(&mut cache, &kv(1, "one")).unwrap();
        tree.put(&mut cache, &kv(1, "uno")).unwrap();
        let got = tree.get(&mut cache, &key_only(1)).unwrap().unwrap();
        assert_eq!(got, kv(1, "uno"));
    }

    #[test]
    fn many_inserts_force_splits_and_stay_retrievable() {
        let mut cache = PageCache::in_memory(4096);
        let (root, _) = cache.get_new_page(None).unwrap();
        page::init_leaf(cache.get_page_mut(root).unwrap(), 0, 4096);
        let mut tree = Btree::new(4096, 1, root);

        for i in 0..500 {
            let val = "x".repeat(50);
            tree.put(&mut cache, &kv(i, &val)).unwrap();
        }
        assert_ne!(tree.root_page(), root, "root must have split at least once");
        for i in 0..500 {
            let got = tree.get(&mut cache, &key_only(i)).unwrap();
            assert!(got.is_some(), "missing key {i}");
        }
    }

    #[test]
    fn remove_deletes_entry() {
        let mut cache = PageCache::in_memory(4096);
        let (root, _) = cache.get_new_page(None).unwrap();
        page::init_leaf(cache.get_page_mut(root).unwrap(), 0, 4096);
        let mut tree = Btree::new(4096, 1, root);

        tree.put(&mut cache, &kv(1, "one")).unwrap();
        assert!(tree.remove(&mut cache, &key_only(1)).unwrap());
        assert!(tree.get(&mut cache, &key_only(1)).unwrap().is_none());
        assert!(!tree.remove(&mut cache, &key_only(1)).unwrap());
    }

    #[test]
    fn cell_that_cannot_fit_any_emptied_page_returns_key_too_large() {
        let mut cache = PageCache::in_memory(512);
        let (root, _) = cache.get_new_page(None).unwrap();
        page::init_leaf(cache.get_page_mut(root).unwrap(), 0, 512);
        let mut tree = Btree::new(512, 1, root);
        // Inflate the on-page threshold so a single cell's on-page footprint
        // isn't capped by overflow, forcing the no-split-can-help case the
        // KeyTooLarge guard exists for.
        tree.thresholds.x = 100_000;

        let huge = make_record(&[ColumnValue::Int32(1), ColumnValue::Text("x".repeat(2000))]);
        let err = tree.put(&mut cache, &huge).unwrap_err();
        assert!(matches!(err, crate::error::SqibError::KeyTooLarge { .. }));
    }

    #[test]
    fn descending_insert_order_also_splits_cleanly() {
        let mut cache = PageCache::in_memory(4096);
        let (root, _) = cache.get_new_page(None).unwrap();
        page::init_leaf(cache.get_page_mut(root).unwrap(), 0, 4096);
        let mut tree = Btree::new(4096, 1, root);

        for i in (0..300).rev() {
            tree.put(&mut cache, &kv(i, "y")).unwrap();
        }
        for i in 0..300 {
            assert!(tree.get(&mut cache, &key_only(i)).unwrap().is_some());
        }
    }
}
