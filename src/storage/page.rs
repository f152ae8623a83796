pub mod hash_bucket_page;
pub mod hash_directory_page;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel stored in page layouts for "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "INVALID")
        }
    }
}

pub use hash_bucket_page::{HashBucketPage, HashBucketPageMut};
pub use hash_directory_page::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE, DIRECTORY_MAX_DEPTH};
