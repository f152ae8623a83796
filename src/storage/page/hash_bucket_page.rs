//! Bucket page of the extendible hash index.
//!
//! Layout: `[occupied bitmap][readable bitmap][slot array]`. Each bitmap holds
//! one bit per slot; each slot is a key encoding followed by a value encoding.
//! A slot is live iff its readable bit is set. The occupied bit stays set
//! after removal until the bucket is reset, so `is_full` and `is_empty` are
//! about occupied slots while `num_readable` counts live entries.

use crate::index::key::{KeyComparator, Storable};
use crate::storage::PAGE_SIZE;
use std::marker::PhantomData;

/// Most slots of `slot_size` bytes that fit a page next to both bitmaps.
pub const fn max_slots(slot_size: usize) -> usize {
    let mut n = 4 * PAGE_SIZE / (4 * slot_size + 1);
    while 2 * n.div_ceil(8) + n * slot_size > PAGE_SIZE {
        n -= 1;
    }
    n
}

struct Layout {
    capacity: usize,
    max_slots: usize,
    bitmap_len: usize,
    key_size: usize,
    slot_size: usize,
}

impl Layout {
    fn new<K: Storable, V: Storable>(capacity: usize) -> Self {
        let slot_size = K::SIZE + V::SIZE;
        let max = max_slots(slot_size);
        assert!(
            capacity > 0 && capacity <= max,
            "bucket capacity {} outside 1..={}",
            capacity,
            max
        );
        Self {
            capacity,
            max_slots: max,
            bitmap_len: max.div_ceil(8),
            key_size: K::SIZE,
            slot_size,
        }
    }

    fn readable_offset(&self) -> usize {
        self.bitmap_len
    }

    fn slot_offset(&self, index: usize) -> usize {
        2 * self.bitmap_len + index * self.slot_size
    }
}

fn bit(data: &[u8], base: usize, index: usize) -> bool {
    (data[base + index / 8] >> (index % 8)) & 1 == 1
}

fn set_bit(data: &mut [u8], base: usize, index: usize, value: bool) {
    let mask = 1u8 << (index % 8);
    if value {
        data[base + index / 8] |= mask;
    } else {
        data[base + index / 8] &= !mask;
    }
}

/// Read-only view of a bucket page.
pub struct HashBucketPage<'a, K, V> {
    data: &'a [u8; PAGE_SIZE],
    layout: Layout,
    _marker: PhantomData<(K, V)>,
}

/// Mutable view of a bucket page.
pub struct HashBucketPageMut<'a, K, V> {
    data: &'a mut [u8; PAGE_SIZE],
    layout: Layout,
    _marker: PhantomData<(K, V)>,
}

/// Shared read operations over the raw page bytes.
macro_rules! bucket_read_ops {
    () => {
        pub fn capacity(&self) -> usize {
            self.layout.capacity
        }

        pub fn is_occupied(&self, index: usize) -> bool {
            bit(&self.data[..], 0, index)
        }

        pub fn is_readable(&self, index: usize) -> bool {
            bit(&self.data[..], self.layout.readable_offset(), index)
        }

        pub fn key_at(&self, index: usize) -> K {
            let offset = self.layout.slot_offset(index);
            K::read_from(&self.data[offset..offset + self.layout.key_size])
        }

        pub fn value_at(&self, index: usize) -> V {
            let offset = self.layout.slot_offset(index) + self.layout.key_size;
            V::read_from(&self.data[offset..offset + V::SIZE])
        }

        /// Every value stored under `key`.
        pub fn get_value<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Vec<V> {
            (0..self.layout.capacity)
                .filter(|&i| self.is_readable(i) && cmp.compare(&self.key_at(i), key).is_eq())
                .map(|i| self.value_at(i))
                .collect()
        }

        pub fn key_exists<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> bool {
            (0..self.layout.capacity)
                .any(|i| self.is_readable(i) && cmp.compare(&self.key_at(i), key).is_eq())
        }

        pub fn contains<C: KeyComparator<K>>(&self, key: &K, value: &V, cmp: &C) -> bool {
            self.find(key, value, cmp).is_some()
        }

        fn find<C: KeyComparator<K>>(&self, key: &K, value: &V, cmp: &C) -> Option<usize> {
            (0..self.layout.capacity).find(|&i| {
                self.is_readable(i)
                    && cmp.compare(&self.key_at(i), key).is_eq()
                    && self.value_at(i) == *value
            })
        }

        pub fn is_full(&self) -> bool {
            (0..self.layout.capacity).all(|i| self.is_occupied(i))
        }

        pub fn is_empty(&self) -> bool {
            self.data[..self.layout.bitmap_len].iter().all(|&b| b == 0)
        }

        /// Occupied slots at or past `capacity`. Nonzero means the page was
        /// written with a larger capacity than this view uses.
        pub fn num_occupied_beyond_capacity(&self) -> usize {
            (self.layout.capacity..self.layout.max_slots)
                .filter(|&i| self.is_occupied(i))
                .count()
        }

        pub fn num_readable(&self) -> usize {
            (0..self.layout.capacity)
                .filter(|&i| self.is_readable(i))
                .count()
        }

        /// Live entries in slot order.
        pub fn get_all_elements(&self) -> Vec<(K, V)> {
            (0..self.layout.capacity)
                .filter(|&i| self.is_readable(i))
                .map(|i| (self.key_at(i), self.value_at(i)))
                .collect()
        }
    };
}

impl<'a, K: Storable, V: Storable + PartialEq> HashBucketPage<'a, K, V> {
    /// View `data` as a bucket using the first `capacity` slots.
    pub fn new(data: &'a [u8; PAGE_SIZE], capacity: usize) -> Self {
        Self {
            data,
            layout: Layout::new::<K, V>(capacity),
            _marker: PhantomData,
        }
    }

    bucket_read_ops!();
}

impl<'a, K: Storable, V: Storable + PartialEq> HashBucketPageMut<'a, K, V> {
    /// View `data` as a bucket using the first `capacity` slots.
    pub fn new(data: &'a mut [u8; PAGE_SIZE], capacity: usize) -> Self {
        Self {
            data,
            layout: Layout::new::<K, V>(capacity),
            _marker: PhantomData,
        }
    }

    bucket_read_ops!();

    /// Store the pair in the first unoccupied slot. Returns false if the
    /// bucket is full or already holds the identical pair.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        if self.contains(key, value, cmp) {
            return false;
        }
        let Some(index) = (0..self.layout.capacity).find(|&i| !self.is_occupied(i)) else {
            return false;
        };

        let offset = self.layout.slot_offset(index);
        let key_size = self.layout.key_size;
        key.write_to(&mut self.data[offset..offset + key_size]);
        value.write_to(&mut self.data[offset + key_size..offset + key_size + V::SIZE]);
        set_bit(&mut self.data[..], 0, index, true);
        set_bit(&mut self.data[..], self.layout.readable_offset(), index, true);
        true
    }

    /// Clear the readable bit of the matching pair.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        match self.find(key, value, cmp) {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) {
        let readable = self.layout.readable_offset();
        set_bit(&mut self.data[..], readable, index, false);
    }

    /// Clear both bitmaps.
    pub fn remove_all_elements(&mut self) {
        let len = 2 * self.layout.bitmap_len;
        self.data[..len].fill(0);
    }

    /// Rewrite the live entries into the leading slots, dropping tombstones.
    pub fn compact<C: KeyComparator<K>>(&mut self, cmp: &C) {
        let entries = self.get_all_elements();
        self.remove_all_elements();
        for (key, value) in &entries {
            self.insert(key, value, cmp);
        }
    }
}
