//! Raw page layout: header fields, cell-pointer array, reserved-byte
//! bit layout, and the 100-byte database header + single-row `sqlite_schema`
//! page that together make up page 1.
//!
//! Field offsets mirror the teacher's `PageHeader`/`CommonPageHeader`
//! (`page.rs`/`btree.rs`), generalized from read-only accessors into
//! read/write ones since this crate builds pages instead of only parsing
//! them. The 100-byte header layout mirrors the teacher's
//! `database.rs::DataBaseMetadata`.

use crate::error::{malformed, Result};
use crate::record::{make_record, ColumnValue};
use crate::varint::read_varint;

/// `page_resv_bytes` in the original: fixed, not user-configurable.
pub const RESERVED_BYTES: u8 = 5;

/// File offset of the lock-byte page, reserved by SQLite and never used for
/// content.
pub const LOCK_BYTE_OFFSET: u64 = 1 << 30;

pub const PAGE_TYPE_INTERIOR_INDEX: u8 = 2;
pub const PAGE_TYPE_INTERIOR_TABLE: u8 = 5;
pub const PAGE_TYPE_LEAF_INDEX: u8 = 10;
pub const PAGE_TYPE_LEAF_TABLE: u8 = 13;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Returns the byte offset, within a page's `page_size`, of the lock-byte
/// page, so callers can test `(page_no - 1) * page_size == LOCK_BYTE_OFFSET`.
pub fn is_lock_byte_page(page_no: u32, page_size: usize) -> bool {
    (page_no as u64 - 1) * page_size as u64 == LOCK_BYTE_OFFSET
}

pub fn header_len(page_type: u8) -> usize {
    if page_type == PAGE_TYPE_INTERIOR_INDEX || page_type == PAGE_TYPE_INTERIOR_TABLE {
        12
    } else {
        8
    }
}

pub fn page_type(buf: &[u8], base: usize) -> u8 {
    buf[base]
}

pub fn set_page_type(buf: &mut [u8], base: usize, t: u8) {
    buf[base] = t;
}

/// Matches the original's `is_leaf()`: leaf page types (10, 13) are numbered
/// above the interior ones (2, 5).
pub fn is_leaf(buf: &[u8], base: usize) -> bool {
    page_type(buf, base) > 9
}

pub fn cell_count(buf: &[u8], base: usize) -> u16 {
    u16::from_be_bytes(buf[base + 3..base + 5].try_into().unwrap())
}

pub fn set_cell_count(buf: &mut [u8], base: usize, n: u16) {
    buf[base + 3..base + 5].copy_from_slice(&n.to_be_bytes());
}

/// 0 in the on-disk field means 65536, the only value too large for a u16.
pub fn cell_content_start(buf: &[u8], base: usize) -> usize {
    let v = u16::from_be_bytes(buf[base + 5..base + 7].try_into().unwrap());
    if v == 0 {
        65536
    } else {
        v as usize
    }
}

pub fn set_cell_content_start(buf: &mut [u8], base: usize, v: usize) {
    let encoded = if v == 65536 { 0 } else { v as u16 };
    buf[base + 5..base + 7].copy_from_slice(&encoded.to_be_bytes());
}

pub fn right_child(buf: &[u8], base: usize) -> u32 {
    u32::from_be_bytes(buf[base + 8..base + 12].try_into().unwrap())
}

pub fn set_right_child(buf: &mut [u8], base: usize, v: u32) {
    buf[base + 8..base + 12].copy_from_slice(&v.to_be_bytes());
}

pub fn cell_pointer(buf: &[u8], base: usize, hdr_len: usize, i: usize) -> usize {
    let off = base + hdr_len + 2 * i;
    u16::from_be_bytes(buf[off..off + 2].try_into().unwrap()) as usize
}

pub fn set_cell_pointer(buf: &mut [u8], base: usize, hdr_len: usize, i: usize, v: usize) {
    let off = base + hdr_len + 2 * i;
    buf[off..off + 2].copy_from_slice(&(v as u16).to_be_bytes());
}

fn reserved_byte_offset(page_size: usize) -> usize {
    page_size - RESERVED_BYTES as usize
}

/// The first reserved byte doubles as `level (low 5 bits) | changed (0x40)`,
/// ported verbatim from the original's `get_level`/`set_level`/
/// `is_changed`/`set_changed`. The page cache reads this bit directly to
/// decide whether a resident page needs writing back.
pub fn is_dirty(buf: &[u8], page_size: usize) -> bool {
    buf[reserved_byte_offset(page_size)] & 0x40 != 0
}

pub fn mark_dirty(buf: &mut [u8], page_size: usize) {
    buf[reserved_byte_offset(page_size)] |= 0x40;
}

pub fn clear_dirty(buf: &mut [u8], page_size: usize) {
    buf[reserved_byte_offset(page_size)] &= 0xbf;
}

pub fn level(buf: &[u8], page_size: usize) -> u8 {
    buf[reserved_byte_offset(page_size)] & 0x1f
}

pub fn set_level(buf: &mut [u8], page_size: usize, lvl: u8) {
    let off = reserved_byte_offset(page_size);
    buf[off] = (buf[off] & 0xe0) | (lvl & 0x1f);
}

pub fn init_leaf(buf: &mut [u8], base: usize, page_size: usize) {
    set_page_type(buf, base, PAGE_TYPE_LEAF_INDEX);
    buf[base + 1..base + 3].copy_from_slice(&0u16.to_be_bytes());
    set_cell_count(buf, base, 0);
    set_cell_content_start(buf, base, page_size - RESERVED_BYTES as usize);
    buf[base + 7] = 0;
}

pub fn init_interior(buf: &mut [u8], base: usize, page_size: usize) {
    set_page_type(buf, base, PAGE_TYPE_INTERIOR_INDEX);
    buf[base + 1..base + 3].copy_from_slice(&0u16.to_be_bytes());
    set_cell_count(buf, base, 0);
    set_cell_content_start(buf, base, page_size - RESERVED_BYTES as usize);
    buf[base + 7] = 0;
    set_right_child(buf, base, 0);
}

/// Whether `cell_len` more bytes of content (plus one more cell pointer)
/// still fit on this page.
pub fn fits(buf: &[u8], base: usize, hdr_len: usize, cell_len: usize) -> bool {
    let cc = cell_count(buf, base) as usize;
    let ccs = cell_content_start(buf, base);
    if ccs < cell_len {
        return false;
    }
    let new_ccs = ccs - cell_len;
    new_ccs >= base + hdr_len + 2 * (cc + 1)
}

/// The most cell-content bytes a single cell can ever occupy, even on a
/// page that otherwise holds nothing (one cell, one cell pointer). A split
/// can rebalance cells across two pages, but it can never shrink a single
/// cell that already exceeds this bound, so callers use it to reject an
/// unplaceable key up front rather than attempting (and failing) a split.
pub fn single_cell_capacity(page_size: usize, hdr_len: usize) -> usize {
    (page_size - RESERVED_BYTES as usize).saturating_sub(hdr_len + 2)
}

/// Inserts `cell_bytes` at cell-pointer-array position `pos`, shifting
/// later pointers right and growing the content area downward. Caller must
/// have checked `fits` first.
pub fn insert_cell_raw(buf: &mut [u8], base: usize, hdr_len: usize, pos: usize, cell_bytes: &[u8]) {
    let cc = cell_count(buf, base) as usize;
    let ccs = cell_content_start(buf, base);
    let new_ccs = ccs - cell_bytes.len();

    let ptr_start = base + hdr_len;
    buf.copy_within(ptr_start + pos * 2..ptr_start + cc * 2, ptr_start + (pos + 1) * 2);

    buf[new_ccs..new_ccs + cell_bytes.len()].copy_from_slice(cell_bytes);
    set_cell_pointer(buf, base, hdr_len, pos, new_ccs);
    set_cell_content_start(buf, base, new_ccs);
    set_cell_count(buf, base, (cc + 1) as u16);
}

/// Removes the cell pointer at `pos`. The cell's content bytes are left in
/// place as dead space: there is no free-block list, matching the engine's
/// bounded deletion design (see DESIGN.md).
pub fn del_ptr(buf: &mut [u8], base: usize, hdr_len: usize, pos: usize) {
    let cc = cell_count(buf, base) as usize;
    let ptr_start = base + hdr_len;
    buf.copy_within(ptr_start + (pos + 1) * 2..ptr_start + cc * 2, ptr_start + pos * 2);
    set_cell_count(buf, base, (cc - 1) as u16);
}

// --- 100-byte database header (page 1 only) ---

pub struct DbHeader {
    pub page_size: u32,
    pub page_count: u32,
}

pub fn write_db_header(buf: &mut [u8], page_size: u32, page_count: u32) {
    buf[0..16].copy_from_slice(SQLITE_MAGIC);
    let encoded_page_size: u16 = if page_size == 65536 {
        1
    } else {
        page_size as u16
    };
    buf[16..18].copy_from_slice(&encoded_page_size.to_be_bytes());
    buf[18] = 1; // file format write version: legacy
    buf[19] = 1; // file format read version: legacy
    buf[20] = RESERVED_BYTES;
    buf[21] = 64; // max embedded payload fraction, fixed by the format
    buf[22] = 32; // min embedded payload fraction, fixed by the format
    buf[23] = 32; // leaf payload fraction, fixed by the format
    buf[24..28].copy_from_slice(&1u32.to_be_bytes()); // file change counter
    buf[28..32].copy_from_slice(&page_count.to_be_bytes());
    buf[32..36].copy_from_slice(&0u32.to_be_bytes()); // freelist trunk page
    buf[36..40].copy_from_slice(&0u32.to_be_bytes()); // freelist page count
    buf[40..44].copy_from_slice(&1u32.to_be_bytes()); // schema cookie
    buf[44..48].copy_from_slice(&1u32.to_be_bytes()); // schema format number
    buf[48..52].copy_from_slice(&0u32.to_be_bytes()); // default page cache size
    buf[52..56].copy_from_slice(&0u32.to_be_bytes()); // largest root page (no autovacuum)
    buf[56..60].copy_from_slice(&1u32.to_be_bytes()); // text encoding: UTF-8
    buf[60..64].copy_from_slice(&0u32.to_be_bytes()); // user version
    buf[64..68].copy_from_slice(&0u32.to_be_bytes()); // incremental vacuum
    buf[68..72].copy_from_slice(&0u32.to_be_bytes()); // application id
    buf[72..92].fill(0);
    buf[92..96].copy_from_slice(&1u32.to_be_bytes()); // version-valid-for
    buf[96..100].copy_from_slice(&3042000u32.to_be_bytes()); // SQLITE_VERSION_NUMBER
}

pub fn read_db_header(buf: &[u8]) -> Result<DbHeader> {
    if &buf[0..16] != SQLITE_MAGIC {
        return Err(malformed("page 1 does not start with the SQLite magic string"));
    }
    let raw_page_size = u16::from_be_bytes(buf[16..18].try_into().unwrap());
    let page_size = if raw_page_size == 1 {
        65536
    } else {
        raw_page_size as u32
    };
    let page_count = u32::from_be_bytes(buf[28..32].try_into().unwrap());
    Ok(DbHeader {
        page_size,
        page_count,
    })
}

// --- minimal single-row sqlite_schema page, base offset 100 on page 1 ---

/// Byte offset within page 1 where the schema b-tree's page header begins.
pub const SCHEMA_PAGE_BASE: usize = 100;

/// Writes the one-row `sqlite_schema` table-leaf page recording this
/// engine's index root page, grounded in the original's `fill_page0`.
/// The row is small enough that it never needs an overflow chain.
pub fn write_schema_page(buf: &mut [u8], page_size: usize, table_name: &str, column_names: &str, root_page: u32) {
    set_page_type(buf, SCHEMA_PAGE_BASE, PAGE_TYPE_LEAF_TABLE);
    buf[SCHEMA_PAGE_BASE + 1..SCHEMA_PAGE_BASE + 3].copy_from_slice(&0u16.to_be_bytes());
    set_cell_count(buf, SCHEMA_PAGE_BASE, 0);
    set_cell_content_start(buf, SCHEMA_PAGE_BASE, page_size - RESERVED_BYTES as usize);
    buf[SCHEMA_PAGE_BASE + 7] = 0;

    let record = make_record(&[
        ColumnValue::Text("index".to_string()),
        ColumnValue::Text(table_name.to_string()),
        ColumnValue::Text(table_name.to_string()),
        ColumnValue::Int32(root_page as i32),
        ColumnValue::Text(format!("CREATE INDEX {table_name} ({column_names})")),
    ]);

    let mut cell = Vec::with_capacity(record.len() + 2);
    crate::varint::write_varint(record.len() as u64, &mut cell);
    crate::varint::write_varint(1, &mut cell); // rowid, always 1: single row
    cell.extend_from_slice(&record);

    insert_cell_raw(buf, SCHEMA_PAGE_BASE, 8, 0, &cell);
}

/// Recovers the index root page number from the schema row written by
/// `write_schema_page`, used on reopen.
pub fn read_schema_root_page(buf: &[u8]) -> Result<u32> {
    let cc = cell_count(buf, SCHEMA_PAGE_BASE) as usize;
    if cc != 1 {
        return Err(malformed("page 1 schema b-tree does not hold exactly one row"));
    }
    let cell_off = cell_pointer(buf, SCHEMA_PAGE_BASE, 8, 0);
    let (_payload_len, used1) = read_varint(&buf[cell_off..])?;
    let (_rowid, used2) = read_varint(&buf[cell_off + used1..])?;
    let record = &buf[cell_off + used1 + used2..];
    let (offset, len, serial_type) = crate::record::locate_column(record, 3)?;
    let value = serial_type.decode(&record[offset..offset + len]).map_err(|e| e)?;
    match value {
        crate::record::SerialData::I32(v) => Ok(v as u32),
        crate::record::SerialData::I8(v) => Ok(v as u32),
        crate::record::SerialData::I16(v) => Ok(v as u32),
        crate::record::SerialData::I64(v) => Ok(v as u32),
        _ => Err(malformed("schema row's rootpage column has an unexpected type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_page_starts_empty_and_fits_one_cell() {
        let page_size = 4096usize;
        let mut buf = vec![0u8; page_size];
        init_leaf(&mut buf, 0, page_size);
        assert_eq!(cell_count(&buf, 0), 0);
        assert!(fits(&buf, 0, header_len(PAGE_TYPE_LEAF_INDEX), 100));
        insert_cell_raw(&mut buf, 0, header_len(PAGE_TYPE_LEAF_INDEX), 0, &vec![7u8; 50]);
        assert_eq!(cell_count(&buf, 0), 1);
    }

    #[test]
    fn single_cell_capacity_matches_empty_page_fits_boundary() {
        let page_size = 4096usize;
        let hdr_len = header_len(PAGE_TYPE_LEAF_INDEX);
        let max_len = single_cell_capacity(page_size, hdr_len);

        let mut buf = vec![0u8; page_size];
        init_leaf(&mut buf, 0, page_size);
        assert!(fits(&buf, 0, hdr_len, max_len));
        assert!(!fits(&buf, 0, hdr_len, max_len + 1));
    }

    #[test]
    fn dirty_bit_survives_level_writes() {
        let page_size = 4096usize;
        let mut buf = vec![0u8; page_size];
        set_level(&mut buf, page_size, 3);
        mark_dirty(&mut buf, page_size);
        assert!(is_dirty(&buf, page_size));
        assert_eq!(level(&buf, page_size), 3);
        clear_dirty(&mut buf, page_size);
        assert!(!is_dirty(&buf, page_size));
        assert_eq!(level(&buf, page_size), 3);
    }

    #[test]
    fn db_header_round_trips() {
        let mut buf = vec![0u8; 4096];
        write_db_header(&mut buf, 4096, 2);
        let header = read_db_header(&buf).unwrap();
        assert_eq!(header.page_size, 4096);
        assert_eq!(header.page_count, 2);
    }

    #[test]
    fn schema_page_round_trips_root_page() {
        let mut buf = vec![0u8; 4096];
        write_schema_page(&mut buf, 4096, "t", "k,v", 2);
        assert_eq!(read_schema_root_page(&buf).unwrap(), 2);
    }

    #[test]
    fn lock_byte_page_detection() {
        assert!(is_lock_byte_page(262145, 4096)); // (262145-1)*4096 == 2^30
        assert!(!is_lock_byte_page(262144, 4096));
    }
}
