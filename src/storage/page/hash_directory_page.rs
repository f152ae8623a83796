//! Directory page of the extendible hash index.
//!
//! Layout (little-endian):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 4    | global depth |
//! | 4      | 4 × 512 | bucket page ids |
//! | 2052   | 512  | local depths |

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{PageId, PAGE_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

pub const DIRECTORY_MAX_DEPTH: u32 = 9;
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;

const GLOBAL_DEPTH_OFFSET: usize = 0;
const BUCKET_IDS_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = BUCKET_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;
const DIRECTORY_LAYOUT_SIZE: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

const _: () = assert!(DIRECTORY_LAYOUT_SIZE <= PAGE_SIZE);

/// Decoded directory page. Only the first `2^global_depth` slots are live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashDirectoryPage {
    global_depth: u32,
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
}

impl HashDirectoryPage {
    /// A depth-0 directory whose single slot points at `bucket_page_id`.
    pub fn new(bucket_page_id: PageId) -> Self {
        let mut bucket_page_ids = [PageId::INVALID; DIRECTORY_ARRAY_SIZE];
        bucket_page_ids[0] = bucket_page_id;
        Self {
            global_depth: 0,
            bucket_page_ids,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
        }
    }

    pub fn from_bytes(data: &[u8; PAGE_SIZE]) -> Self {
        let mut bucket_page_ids = [PageId::INVALID; DIRECTORY_ARRAY_SIZE];
        for (i, id) in bucket_page_ids.iter_mut().enumerate() {
            let offset = BUCKET_IDS_OFFSET + 4 * i;
            *id = PageId(LittleEndian::read_u32(&data[offset..offset + 4]));
        }

        let mut local_depths = [0u8; DIRECTORY_ARRAY_SIZE];
        local_depths.copy_from_slice(&data[LOCAL_DEPTHS_OFFSET..DIRECTORY_LAYOUT_SIZE]);

        Self {
            global_depth: LittleEndian::read_u32(&data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]),
            bucket_page_ids,
            local_depths,
        }
    }

    pub fn write_to(&self, data: &mut [u8; PAGE_SIZE]) {
        LittleEndian::write_u32(
            &mut data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4],
            self.global_depth,
        );
        for (i, id) in self.bucket_page_ids.iter().enumerate() {
            let offset = BUCKET_IDS_OFFSET + 4 * i;
            LittleEndian::write_u32(&mut data[offset..offset + 4], id.0);
        }
        data[LOCAL_DEPTHS_OFFSET..DIRECTORY_LAYOUT_SIZE].copy_from_slice(&self.local_depths);
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth) - 1
    }

    /// Number of live directory slots.
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn hash_to_index(&self, hash: u32) -> usize {
        (hash & self.global_depth_mask()) as usize
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        self.bucket_page_ids[index]
    }

    pub fn set_bucket_page_id(&mut self, index: usize, page_id: PageId) {
        self.bucket_page_ids[index] = page_id;
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        self.local_depths[index] as u32
    }

    pub fn set_local_depth(&mut self, index: usize, depth: u32) {
        self.local_depths[index] = depth as u8;
    }

    pub fn local_depth_mask(&self, index: usize) -> u32 {
        (1 << self.local_depth(index)) - 1
    }

    /// Index of the slot group `index` would merge with: the top local bit flipped.
    pub fn split_image_index(&self, index: usize) -> Option<usize> {
        let depth = self.local_depth(index);
        if depth == 0 {
            return None;
        }
        Some(index ^ (1 << (depth - 1)))
    }

    /// Double the directory, mirroring slot `i` into `i + size()`.
    pub fn incr_global_depth(&mut self) -> StorageResult<()> {
        if self.global_depth >= DIRECTORY_MAX_DEPTH {
            return Err(StorageError::IndexFull {
                global_depth: self.global_depth,
            });
        }

        let size = self.size();
        for i in 0..size {
            self.bucket_page_ids[size + i] = self.bucket_page_ids[i];
            self.local_depths[size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
        Ok(())
    }

    /// Halve the directory. Callers check `can_shrink` first.
    pub fn decr_global_depth(&mut self) {
        if self.global_depth == 0 {
            return;
        }
        self.global_depth -= 1;
        let size = self.size();
        for i in size..2 * size {
            self.bucket_page_ids[i] = PageId::INVALID;
            self.local_depths[i] = 0;
        }
    }

    /// True when every live slot's local depth is below the global depth.
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && (0..self.size()).all(|i| self.local_depth(i) < self.global_depth)
    }

    /// Point every live slot holding `from` at `to` with the given depth.
    pub fn repoint(&mut self, from: PageId, to: PageId, depth: u32) {
        for i in 0..self.size() {
            if self.bucket_page_ids[i] == from || self.bucket_page_ids[i] == to {
                self.bucket_page_ids[i] = to;
                self.local_depths[i] = depth as u8;
            }
        }
    }

    /// Distinct bucket pages referenced by the live slots.
    pub fn bucket_page_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self.bucket_page_ids[..self.size()].to_vec();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Check the directory invariants:
    /// - every local depth is at most the global depth;
    /// - all slots of one bucket share a local depth and agree on its low bits;
    /// - a bucket of local depth `d` is referenced by exactly `2^(global - d)` slots.
    pub fn verify_integrity(&self) -> StorageResult<()> {
        if self.global_depth > DIRECTORY_MAX_DEPTH {
            return Err(StorageError::Corrupted(format!(
                "global depth {} exceeds maximum {}",
                self.global_depth, DIRECTORY_MAX_DEPTH
            )));
        }

        // bucket -> (local depth, low bits, slot count)
        let mut seen: HashMap<PageId, (u32, u32, usize)> = HashMap::new();
        for i in 0..self.size() {
            let page_id = self.bucket_page_ids[i];
            let depth = self.local_depth(i);

            if !page_id.is_valid() {
                return Err(StorageError::Corrupted(format!(
                    "slot {} has no bucket page",
                    i
                )));
            }
            if depth > self.global_depth {
                return Err(StorageError::Corrupted(format!(
                    "slot {} local depth {} exceeds global depth {}",
                    i, depth, self.global_depth
                )));
            }

            let low_bits = i as u32 & self.local_depth_mask(i);
            let entry = seen.entry(page_id).or_insert((depth, low_bits, 0));
            if entry.0 != depth {
                return Err(StorageError::Corrupted(format!(
                    "bucket {} has local depths {} and {}",
                    page_id, entry.0, depth
                )));
            }
            if entry.1 != low_bits {
                return Err(StorageError::Corrupted(format!(
                    "bucket {} referenced by slots disagreeing on low {} bits",
                    page_id, depth
                )));
            }
            entry.2 += 1;
        }

        for (page_id, (depth, _, count)) in seen {
            let expected = 1usize << (self.global_depth - depth);
            if count != expected {
                return Err(StorageError::Corrupted(format!(
                    "bucket {} with local depth {} has {} slots, expected {}",
                    page_id, depth, count, expected
                )));
            }
        }

        Ok(())
    }
}
