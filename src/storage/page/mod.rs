//! Page layout.
//!
//! - [`Page`] - The raw 4KB data container
//! - [`PageFooter`] - Segment metadata at the end of every page

#[allow(clippy::module_inception)]
mod page;
mod page_footer;

pub use page::Page;
pub use page_footer::PageFooter;
