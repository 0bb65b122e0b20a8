//! Page checksum computation, trimmed to the CRC-32C algorithm this engine
//! writes: the vendor-variant and legacy-checksum detection the teacher
//! carries for reading arbitrary `.ibd` files has no counterpart here, since
//! this engine only ever validates pages it wrote itself.

use byteorder::{BigEndian, ByteOrder};

use crate::innodb::constants::{
    FIL_PAGE_DATA, FIL_PAGE_FILE_FLUSH_LSN, FIL_PAGE_OFFSET, FIL_PAGE_SPACE_OR_CHKSUM,
    SIZE_FIL_TRAILER,
};

/// Compute the CRC-32C checksum of a page the same way InnoDB's
/// `buf_calc_page_crc32` does: fold the CRC of the header (excluding the
/// checksum field itself) with the CRC of the body (excluding the
/// trailer).
pub fn compute_checksum(page: &[u8]) -> u32 {
    let page_size = page.len();
    let trailer_start = page_size - SIZE_FIL_TRAILER;
    let head = crc32c::crc32c(&page[FIL_PAGE_OFFSET..FIL_PAGE_FILE_FLUSH_LSN]);
    let body = crc32c::crc32c(&page[FIL_PAGE_DATA..trailer_start]);
    head ^ body
}

/// Write the computed checksum into the page's header and trailer fields.
pub fn stamp_checksum(page: &mut [u8]) {
    let checksum = compute_checksum(page);
    BigEndian::write_u32(&mut page[FIL_PAGE_SPACE_OR_CHKSUM..], checksum);
    let trailer_start = page.len() - SIZE_FIL_TRAILER;
    BigEndian::write_u32(&mut page[trailer_start..], checksum);
}

/// Validate a page's stored checksum against a freshly computed one.
pub fn validate_checksum(page: &[u8]) -> bool {
    let stored = BigEndian::read_u32(&page[FIL_PAGE_SPACE_OR_CHKSUM..]);
    stored == compute_checksum(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::constants::SIZE_PAGE_DEFAULT;

    #[test]
    fn stamped_page_validates() {
        let mut page = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        page[100] = 0xAB;
        stamp_checksum(&mut page);
        assert!(validate_checksum(&page));
    }

    #[test]
    fn tampering_after_stamp_invalidates() {
        let mut page = vec![0u8; SIZE_PAGE_DEFAULT as usize];
        stamp_checksum(&mut page);
        page[200] ^= 0xFF;
        assert!(!validate_checksum(&page));
    }
}
