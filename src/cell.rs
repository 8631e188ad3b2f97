//! Index b-tree cell encode/decode and overflow chain read/write.
//!
//! Cell layout: `[4-byte left child, interior only][varint P][on-page
//! payload][4-byte first overflow page, iff P > X]`. Overflow pages:
//! `[4-byte next page, 0 terminates][up to U-4 bytes payload]`.
//!
//! Grounded in the teacher's `cell.rs::IndexLeafCell`/`IndexInteriorCell`
//! (decode, the `X`/`M`/`K` threshold formulas) generalized to encode, and
//! in the original's `copy_kv_with_overflow` for overflow chain writing.

use crate::cache::PageCache;
use crate::error::Result;
use crate::page;
use crate::varint::{read_varint, varint_len, write_varint};

/// The three payload-fraction thresholds for the index b-tree cell format,
/// derived once from the usable page size `U = page_size - RESERVED_BYTES`.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub u: usize,
    pub x: usize,
    pub m: usize,
}

impl Thresholds {
    pub fn new(page_size: usize) -> Self {
        let u = page_size - page::RESERVED_BYTES as usize;
        let x = ((u - 12) * 64 / 255) - 23;
        let m = ((u - 12) * 32 / 255) - 23;
        Thresholds { u, x, m }
    }

    /// How many of `payload_len` bytes are stored on the b-tree page itself;
    /// the rest spills into an overflow chain.
    pub fn on_page_len(&self, payload_len: usize) -> usize {
        if payload_len <= self.x {
            return payload_len;
        }
        let diff = payload_len as i64 - self.m as i64;
        let modulus = (self.u as i64 - 4).max(1);
        let k = self.m as i64 + diff.rem_euclid(modulus);
        if (k as usize) <= self.x {
            k as usize
        } else {
            self.m
        }
    }
}

/// Writes `remaining` across as many freshly allocated overflow pages as
/// needed, returning the first page's number. Each page holds `next (4
/// bytes, 0 = end) | up to U-4 bytes of payload`.
fn write_overflow_chain(cache: &mut PageCache, remaining: &[u8], u: usize) -> Result<u32> {
    let page_size = cache.page_size();
    let chunk_cap = u - 4;
    let mut offset = 0usize;
    let mut first_page_no = 0u32;
    let mut prev_page_no: Option<u32> = None;

    while offset < remaining.len() {
        let (page_no, buf) = cache.get_new_page(prev_page_no)?;
        buf[0..4].copy_from_slice(&0u32.to_be_bytes());
        let take = chunk_cap.min(remaining.len() - offset);
        buf[4..4 + take].copy_from_slice(&remaining[offset..offset + take]);
        page::mark_dirty(buf, page_size);

        if first_page_no == 0 {
            first_page_no = page_no;
        }
        if let Some(prev) = prev_page_no {
            let prev_buf = cache.get_page_mut(prev)?;
            prev_buf[0..4].copy_from_slice(&page_no.to_be_bytes());
            page::mark_dirty(prev_buf, page_size);
        }
        prev_page_no = Some(page_no);
        offset += take;
    }
    Ok(first_page_no)
}

/// Reads the remainder of an overflow payload starting at `first_page`,
/// appending it to `out`. `remaining` is the byte count still to read.
fn read_overflow_chain(cache: &mut PageCache, mut page_no: u32, mut remaining: usize, u: usize, out: &mut Vec<u8>) -> Result<()> {
    let chunk_cap = u - 4;
    while remaining > 0 {
        if page_no == 0 {
            return Err(crate::error::malformed("overflow chain ended before payload was fully read"));
        }
        let buf = cache.get_page(page_no)?;
        let next = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let take = chunk_cap.min(remaining);
        out.extend_from_slice(&buf[4..4 + take]);
        remaining -= take;
        page_no = next;
    }
    Ok(())
}

/// Encodes a full cell (optionally carrying a left-child pointer, for
/// interior nodes) for `payload`, writing any overflow pages as a side
/// effect.
pub fn encode_cell(payload: &[u8], left_child: Option<u32>, t: Thresholds, cache: &mut PageCache) -> Result<Vec<u8>> {
    let on_page_len = t.on_page_len(payload.len());

    let mut cell = Vec::with_capacity(4 + varint_len(payload.len() as u64) + on_page_len + 4);
    if let Some(lc) = left_child {
        cell.extend_from_slice(&lc.to_be_bytes());
    }
    write_varint(payload.len() as u64, &mut cell);
    cell.extend_from_slice(&payload[..on_page_len]);

    if payload.len() > t.x {
        let first_overflow = write_overflow_chain(cache, &payload[on_page_len..], t.u)?;
        cell.extend_from_slice(&first_overflow.to_be_bytes());
    }
    Ok(cell)
}

/// Total on-page byte length of the cell starting at `offset`, along with
/// the declared payload length `P`.
pub fn raw_cell_len(buf: &[u8], offset: usize, is_leaf: bool, t: Thresholds) -> Result<(usize, usize)> {
    let left_child_bytes = if is_leaf { 0 } else { 4 };
    let (p, vlen) = read_varint(&buf[offset + left_child_bytes..])?;
    let p = p as usize;
    let on_page_len = t.on_page_len(p);
    let overflow_bytes = if p > t.x { 4 } else { 0 };
    Ok((left_child_bytes + vlen + on_page_len + overflow_bytes, p))
}

/// Reconstructs the full logical payload (on-page bytes plus any overflow
/// tail) for the cell whose raw on-page bytes are `raw` (as returned by
/// `raw_cell_len`-bounded slicing).
pub fn materialize_payload(cache: &mut PageCache, raw: &[u8], is_leaf: bool, t: Thresholds) -> Result<Vec<u8>> {
    let left_child_bytes = if is_leaf { 0 } else { 4 };
    let (p, vlen) = read_varint(&raw[left_child_bytes..])?;
    let p = p as usize;
    let on_page_len = t.on_page_len(p);
    let payload_start = left_child_bytes + vlen;

    let mut out = Vec::with_capacity(p);
    out.extend_from_slice(&raw[payload_start..payload_start + on_page_len]);

    if p > t.x {
        let overflow_off = payload_start + on_page_len;
        let first_overflow = u32::from_be_bytes(raw[overflow_off..overflow_off + 4].try_into().unwrap());
        read_overflow_chain(cache, first_overflow, p - on_page_len, t.u, &mut out)?;
    }
    Ok(out)
}

/// Left-child page number stored in an interior cell's first 4 bytes.
pub fn cell_left_child(raw: &[u8]) -> u32 {
    u32::from_be_bytes(raw[0..4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_stays_on_page() {
        let t = Thresholds::new(4096);
        assert_eq!(t.on_page_len(10), 10);
        assert!(t.x > 3000); // usable_page_size-ish, sanity bound
    }

    #[test]
    fn payload_length_boundary_at_x() {
        let t = Thresholds::new(4096);
        assert_eq!(t.on_page_len(t.x), t.x, "payload of exactly X bytes stays fully on-page");
        assert!(
            t.on_page_len(t.x + 1) < t.x + 1,
            "payload of X+1 bytes must spill at least one byte to overflow"
        );
    }

    #[test]
    fn overflow_chunk_size_boundary_at_u_minus_4() {
        let t = Thresholds::new(4096);
        let chunk_cap = t.u - 4;

        // pick a total payload length comfortably past X, then grow by one
        // byte: the overflow tail should cross exactly one chunk boundary.
        let base_len = t.x + 1 + chunk_cap;
        let on_page_base = t.on_page_len(base_len);
        let expected_base = ((base_len - on_page_base) as f64 / chunk_cap as f64).ceil() as u32;

        let grown_len = base_len + 1;
        let on_page_grown = t.on_page_len(grown_len);
        let expected_grown = ((grown_len - on_page_grown) as f64 / chunk_cap as f64).ceil() as u32;

        let mut cache = PageCache::in_memory(4096);
        let before = cache.file_page_count();
        let _ = encode_cell(&vec![0u8; base_len], None, t, &mut cache).unwrap();
        assert_eq!(cache.file_page_count() - before, expected_base);

        let mut cache2 = PageCache::in_memory(4096);
        let before2 = cache2.file_page_count();
        let _ = encode_cell(&vec![0u8; grown_len], None, t, &mut cache2).unwrap();
        assert_eq!(cache2.file_page_count() - before2, expected_grown);
    }

    #[test]
    fn large_payload_spills_to_overflow_and_reads_back() {
        let mut cache = PageCache::in_memory(4096);
        let t = Thresholds::new(4096);
        let payload = vec![0xabu8; 1_000_000];
        let cell = encode_cell(&payload, None, t, &mut cache).unwrap();

        let (total_len, p) = raw_cell_len(&cell, 0, true, t).unwrap();
        assert_eq!(total_len, cell.len());
        assert_eq!(p, payload.len());

        let materialized = materialize_payload(&mut cache, &cell, true, t).unwrap();
        assert_eq!(materialized, payload);
    }

    #[test]
    fn overflow_chain_length_matches_formula() {
        let mut cache = PageCache::in_memory(4096);
        let t = Thresholds::new(4096);
        let payload = vec![0x11u8; 50_000];
        let on_page = t.on_page_len(payload.len());
        let expected_pages = ((payload.len() - on_page) as f64 / (t.u - 4) as f64).ceil() as u32;

        let before = cache.file_page_count();
        let _cell = encode_cell(&payload, None, t, &mut cache).unwrap();
        let after = cache.file_page_count();
        assert_eq!(after - before, expected_pages);
    }
}
