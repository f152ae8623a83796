//! Fixed-width key and value types stored in hash bucket slots.

use crate::storage::PageId;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// A type with a fixed-width little-endian encoding.
pub trait Storable: Sized + Clone + Send + Sync {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Encode into `buf`, which is exactly `SIZE` bytes.
    fn write_to(&self, buf: &mut [u8]);

    /// Decode from `buf`, which is exactly `SIZE` bytes.
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! impl_storable_int {
    ($ty:ty, $size:expr, $write:ident, $read:ident) => {
        impl Storable for $ty {
            const SIZE: usize = $size;

            fn write_to(&self, buf: &mut [u8]) {
                LittleEndian::$write(buf, *self);
            }

            fn read_from(buf: &[u8]) -> Self {
                LittleEndian::$read(buf)
            }
        }
    };
}

impl_storable_int!(i32, 4, write_i32, read_i32);
impl_storable_int!(u32, 4, write_u32, read_u32);
impl_storable_int!(i64, 8, write_i64, read_i64);
impl_storable_int!(u64, 8, write_u64, read_u64);

/// Opaque fixed-size key compared byte by byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    /// Build a key from a prefix of `bytes`, zero-padded to `N`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Encode an integer big-endian so byte order matches numeric order for
    /// non-negative values.
    pub fn from_integer(value: i64) -> Self {
        let bytes = value.to_be_bytes();
        let start = bytes.len().saturating_sub(N);
        Self::from_bytes(&bytes[start..])
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericKey<{}>(", N)?;
        for byte in &self.data {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl<const N: usize> Storable for GenericKey<N> {
    const SIZE: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data);
    }

    fn read_from(buf: &[u8]) -> Self {
        Self::from_bytes(buf)
    }
}

/// Location of a tuple: heap page plus slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl Storable for TupleId {
    const SIZE: usize = 6;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id.0);
        LittleEndian::write_u16(&mut buf[4..6], self.slot_id);
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: PageId(LittleEndian::read_u32(&buf[0..4])),
            slot_id: LittleEndian::read_u16(&buf[4..6]),
        }
    }
}

/// Three-way key comparison.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Compares keys with their `Ord` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Hash function over keys. The index addresses its directory with the low
/// 32 bits of the result.
pub trait KeyHasher<K>: Send + Sync {
    fn hash(&self, key: &K) -> u64;
}

/// xxHash64 of the key's stored encoding. Stable across processes, which a
/// disk-resident index requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxKeyHasher {
    seed: u64,
}

impl XxKeyHasher {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

impl<K: Storable> KeyHasher<K> for XxKeyHasher {
    fn hash(&self, key: &K) -> u64 {
        let mut buf = vec![0u8; K::SIZE];
        key.write_to(&mut buf);
        xxh64(&buf, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: Storable>(value: &T) -> Vec<u8> {
        let mut buf = vec![0u8; T::SIZE];
        value.write_to(&mut buf);
        buf
    }

    #[test]
    fn test_int_encoding_is_little_endian() {
        assert_eq!(encode(&0x0102_0304i32), vec![4, 3, 2, 1]);
        assert_eq!(i64::read_from(&encode(&-7i64)), -7);
        assert_eq!(u64::SIZE, 8);
    }

    #[test]
    fn test_tuple_id_layout() {
        let tid = TupleId::new(PageId(0x0A0B0C0D), 0x0102);
        let bytes = encode(&tid);
        assert_eq!(bytes, vec![0x0D, 0x0C, 0x0B, 0x0A, 0x02, 0x01]);
        assert_eq!(TupleId::read_from(&bytes), tid);
    }

    #[test]
    fn test_generic_key_ordering() {
        let a = GenericKey::<8>::from_integer(5);
        let b = GenericKey::<8>::from_integer(300);
        assert_eq!(OrdComparator.compare(&a, &b), Ordering::Less);
        assert_eq!(OrdComparator.compare(&b, &b), Ordering::Equal);

        let short = GenericKey::<4>::from_bytes(b"ab");
        assert_eq!(short.as_bytes(), b"ab\0\0");
    }

    #[test]
    fn test_xx_hasher_depends_on_encoding_and_seed() {
        let hasher = XxKeyHasher::default();
        assert_eq!(
            KeyHasher::<i32>::hash(&hasher, &42),
            KeyHasher::<i32>::hash(&hasher, &42)
        );
        assert_ne!(
            KeyHasher::<i32>::hash(&hasher, &42),
            KeyHasher::<i32>::hash(&hasher, &43)
        );
        assert_ne!(
            KeyHasher::<i32>::hash(&hasher, &42),
            KeyHasher::<i32>::hash(&XxKeyHasher::with_seed(1), &42)
        );
    }
}
