//! Page and page-owner identifiers.

use std::fmt;

/// Identifies a page on disk.
///
/// Page ids are opaque and totally ordered. `u64` leaves room for the
/// identifier to be embedded as a child pointer in non-leaf B-tree records.
///
/// # Example
/// ```
/// use pagetree::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(page_id.is_valid());
/// assert!(PageId::NULL.is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// Reserved "no page" value, used for absent siblings and rootless trees.
    pub const NULL: PageId = PageId(u64::MAX);

    #[inline]
    pub fn new(id: u64) -> Self {
        PageId(id)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }

    /// Returns `None` for [`PageId::NULL`].
    #[inline]
    pub fn to_option(self) -> Option<PageId> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Page(NULL)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}

/// Opaque tag recorded on every allocated page, naming the structure that
/// owns it (typically one B-tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PageOwnerId(pub u64);

impl PageOwnerId {
    /// Owner tag of pages nobody has claimed.
    pub const ANON: PageOwnerId = PageOwnerId(0);
}

impl fmt::Display for PageOwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_new() {
        let pid = PageId::new(42);
        assert_eq!(pid.0, 42);
        assert!(pid.is_valid());
        assert_eq!(pid.to_option(), Some(pid));
    }

    #[test]
    fn test_page_id_null() {
        assert!(PageId::NULL.is_null());
        assert!(!PageId::NULL.is_valid());
        assert_eq!(PageId::NULL.to_option(), None);
        assert_eq!(PageId::default(), PageId::NULL);
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId::new(1) < PageId::new(2));
        assert!(PageId::new(7) < PageId::NULL);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", PageId::new(42)), "Page(42)");
        assert_eq!(format!("{}", PageId::NULL), "Page(NULL)");
        assert_eq!(format!("{}", PageOwnerId(9)), "Owner(9)");
    }
}
