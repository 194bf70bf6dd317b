//! Segment footer stored at the end of every page.
//!
//! The footer belongs to the segment layer, not to page owners:
//! - successor page id (the out-of-node sibling chain link)
//! - owner tag recorded at allocation
//! - CRC32 checksum stamped on write-back

use crate::common::config::{PAGE_FOOTER_SIZE, PAGE_SIZE, USABLE_PAGE_SIZE};
use crate::common::{PageId, PageOwnerId};

/// Metadata stored in the last [`PAGE_FOOTER_SIZE`] bytes of every page.
///
/// # Layout (20 bytes, offsets relative to the footer start)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     successor (PageId, little-endian)
/// 8       8     owner (PageOwnerId, little-endian)
/// 16      4     checksum (CRC32, little-endian)
/// ```
///
/// The checksum covers the whole page with the checksum field zeroed. A zero
/// checksum means the page has never been stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFooter {
    pub successor: PageId,
    pub owner: PageOwnerId,
    pub checksum: u32,
}

impl Default for PageFooter {
    fn default() -> Self {
        Self {
            successor: PageId::NULL,
            owner: PageOwnerId::ANON,
            checksum: 0,
        }
    }
}

impl PageFooter {
    pub const SIZE: usize = PAGE_FOOTER_SIZE;

    /// Page offset where the footer begins.
    pub const START: usize = USABLE_PAGE_SIZE;
    pub const OFFSET_SUCCESSOR: usize = Self::START;
    pub const OFFSET_OWNER: usize = Self::START + 8;
    pub const OFFSET_CHECKSUM: usize = Self::START + 16;

    pub fn new(owner: PageOwnerId) -> Self {
        Self {
            owner,
            ..Self::default()
        }
    }

    /// Read the footer out of a full page image.
    ///
    /// # Panics
    /// Panics if `page_data` is not a full page.
    pub fn from_bytes(page_data: &[u8]) -> Self {
        assert_eq!(page_data.len(), PAGE_SIZE, "footer needs a full page");

        Self {
            successor: PageId(read_u64(page_data, Self::OFFSET_SUCCESSOR)),
            owner: PageOwnerId(read_u64(page_data, Self::OFFSET_OWNER)),
            checksum: read_u32(page_data, Self::OFFSET_CHECKSUM),
        }
    }

    /// Write this footer into a full page image.
    pub fn write_to(&self, page_data: &mut [u8]) {
        assert_eq!(page_data.len(), PAGE_SIZE, "footer needs a full page");

        page_data[Self::OFFSET_SUCCESSOR..Self::OFFSET_SUCCESSOR + 8]
            .copy_from_slice(&self.successor.0.to_le_bytes());
        page_data[Self::OFFSET_OWNER..Self::OFFSET_OWNER + 8]
            .copy_from_slice(&self.owner.0.to_le_bytes());
        page_data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
    }

    /// CRC32 of a page, computed with the checksum field treated as zero.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);
        hasher.finalize()
    }

    /// Check the stored checksum. Unstamped pages always pass.
    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == 0 || self.checksum == Self::compute_checksum(page_data)
    }
}

#[inline]
fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_roundtrip() {
        let mut data = vec![0u8; PAGE_SIZE];
        let footer = PageFooter {
            successor: PageId::new(77),
            owner: PageOwnerId(5),
            checksum: 0xDEAD_BEEF,
        };
        footer.write_to(&mut data);

        assert_eq!(PageFooter::from_bytes(&data), footer);
        // Owner data region untouched.
        assert!(data[..PageFooter::START].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_default_footer_has_null_successor() {
        let footer = PageFooter::default();
        assert!(footer.successor.is_null());
        assert_eq!(footer.owner, PageOwnerId::ANON);
    }

    #[test]
    fn test_checksum_ignores_checksum_field() {
        let mut data = vec![0u8; PAGE_SIZE];
        data[10] = 0x42;
        let before = PageFooter::compute_checksum(&data);

        let mut footer = PageFooter::from_bytes(&data);
        footer.checksum = before;
        footer.write_to(&mut data);

        assert_eq!(PageFooter::compute_checksum(&data), before);
        assert!(PageFooter::from_bytes(&data).verify_checksum(&data));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = 1;
        let mut footer = PageFooter::from_bytes(&data);
        footer.checksum = PageFooter::compute_checksum(&data);
        footer.write_to(&mut data);

        data[100] ^= 0xFF;
        assert!(!PageFooter::from_bytes(&data).verify_checksum(&data));
    }

    #[test]
    fn test_unstamped_page_verifies() {
        let data = vec![0u8; PAGE_SIZE];
        assert!(PageFooter::from_bytes(&data).verify_checksum(&data));
    }
}
