//! Disk-resident indexes built on the buffer pool.
//!
//! - **ExtendibleHashTable**: multi-valued hash index whose directory and
//!   buckets are pool pages, growing by bucket splits and directory doubling
//! - **Storable / KeyComparator / KeyHasher**: how keys and values are encoded,
//!   compared and hashed

pub mod hash;
pub mod key;

pub use hash::ExtendibleHashTable;
pub use key::{
    GenericKey, KeyComparator, KeyHasher, OrdComparator, Storable, TupleId, XxKeyHasher,
};
