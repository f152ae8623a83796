//! Sharded buffer pool.
//!
//! Page ids are partitioned across independent [`BufferPoolManager`] instances:
//! instance `i` owns every id congruent to `i` modulo the instance count, so
//! unrelated pages contend on different mutexes.

use super::lru::LruReplacer;
use super::{BufferPool, BufferPoolManager, PageReadGuard, PageWriteGuard};
use crate::storage::disk::DiskManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::PageId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Buffer pool sizing.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Frames per instance.
    pub pool_size: usize,
    /// Number of independent instances.
    pub num_instances: u32,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            pool_size: 64,
            num_instances: 1,
        }
    }
}

impl BufferPoolConfig {
    /// Build a pool with an LRU replacer per instance.
    pub fn build(&self, disk: Arc<dyn DiskManager>) -> StorageResult<ParallelBufferPoolManager> {
        ParallelBufferPoolManager::new(disk, self.num_instances, self.pool_size)
    }
}

pub struct ParallelBufferPoolManager {
    instances: Vec<BufferPoolManager>,
    /// Instance the next allocation scan starts from
    next_instance: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    pub fn new(
        disk: Arc<dyn DiskManager>,
        num_instances: u32,
        pool_size: usize,
    ) -> StorageResult<Self> {
        if num_instances == 0 {
            return Err(StorageError::InvalidState(
                "parallel buffer pool needs at least one instance".to_string(),
            ));
        }

        let instances = (0..num_instances)
            .map(|index| {
                BufferPoolManager::with_partition(
                    disk.clone(),
                    Box::new(LruReplacer::new(pool_size)),
                    pool_size,
                    num_instances,
                    index,
                )
            })
            .collect::<StorageResult<Vec<_>>>()?;

        log::debug!(
            "Created parallel buffer pool: {} instances x {} frames",
            num_instances,
            pool_size
        );
        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, index: usize) -> Option<&BufferPoolManager> {
        self.instances.get(index)
    }

    /// The instance responsible for `page_id`.
    pub fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id.0 as usize % self.instances.len()]
    }

    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        self.instance_for(page_id).fetch_page_write(page_id)
    }

    /// Allocate from the first instance with a free or evictable frame,
    /// starting at a rotating index.
    pub fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        let mut next_instance = self.next_instance.lock();
        let count = self.instances.len();

        for offset in 0..count {
            let index = (*next_instance + offset) % count;
            match self.instances[index].new_page() {
                Ok(allocated) => {
                    *next_instance = (index + 1) % count;
                    return Ok(allocated);
                }
                Err(StorageError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }

        log::warn!("All {} buffer pool instances are fully pinned", count);
        Err(StorageError::BufferPoolFull)
    }

    pub fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all(&self) -> StorageResult<()> {
        for instance in &self.instances {
            instance.flush_all()?;
        }
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }
}

impl BufferPool for ParallelBufferPoolManager {
    fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        ParallelBufferPoolManager::fetch_page(self, page_id)
    }

    fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        ParallelBufferPoolManager::fetch_page_write(self, page_id)
    }

    fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        ParallelBufferPoolManager::new_page(self)
    }

    fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        ParallelBufferPoolManager::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        ParallelBufferPoolManager::delete_page(self, page_id)
    }

    fn flush_all(&self) -> StorageResult<()> {
        ParallelBufferPoolManager::flush_all(self)
    }

    fn pool_size(&self) -> usize {
        ParallelBufferPoolManager::pool_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::MemoryPageManager;

    fn create_pool(num_instances: u32, pool_size: usize) -> ParallelBufferPoolManager {
        let disk = Arc::new(MemoryPageManager::new());
        ParallelBufferPoolManager::new(disk, num_instances, pool_size).unwrap()
    }

    #[test]
    fn test_rejects_zero_instances() {
        let disk = Arc::new(MemoryPageManager::new());
        assert!(ParallelBufferPoolManager::new(disk, 0, 4).is_err());
    }

    #[test]
    fn test_pool_size() {
        let pool = create_pool(3, 5);
        assert_eq!(pool.pool_size(), 15);
        assert_eq!(pool.num_instances(), 3);
    }

    #[test]
    fn test_round_robin_allocation() {
        let pool = create_pool(3, 4);

        let ids: Vec<u32> = (0..6)
            .map(|_| pool.new_page().map(|(id, _)| id.0).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_routing_by_page_id() {
        for num_instances in 1..=5u32 {
            let pool = create_pool(num_instances, 8);
            let mut guards = Vec::new();
            for _ in 0..(num_instances * 3) {
                let (page_id, mut guard) = pool.new_page().unwrap();
                guard[0] = page_id.0 as u8;
                guards.push(guard);
            }

            for guard in &guards {
                let page_id = guard.page_id();
                let owner = (page_id.0 % num_instances) as usize;
                assert_eq!(pool.instance_for(page_id).instance_index() as usize, owner);
                for index in 0..num_instances as usize {
                    let instance = pool.instance(index).unwrap();
                    assert_eq!(instance.is_resident(page_id), index == owner);
                }
            }
            drop(guards);

            for page_id in (0..num_instances * 3).map(PageId) {
                assert_eq!(pool.fetch_page(page_id).unwrap()[0], page_id.0 as u8);
            }
        }
    }

    #[test]
    fn test_full_instance_is_skipped() {
        let pool = create_pool(2, 1);

        let (first, g1) = pool.new_page().unwrap();
        let (second, g2) = pool.new_page().unwrap();
        assert_eq!(first, PageId(0));
        assert_eq!(second, PageId(1));

        // Both instances are fully pinned
        assert!(matches!(pool.new_page(), Err(StorageError::BufferPoolFull)));

        drop(g1);
        // Rotation starts at instance 0, which now has an evictable frame
        let (third, g3) = pool.new_page().unwrap();
        assert_eq!(third, PageId(2));

        drop(g2);
        drop(g3);
        // Instance 1 is tried first
        let (fourth, _g4) = pool.new_page().unwrap();
        assert_eq!(fourth, PageId(3));
    }

    #[test]
    fn test_skips_saturated_instance() {
        let pool = create_pool(2, 1);

        let (_, _g0) = pool.new_page().unwrap();
        let (page1, g1) = pool.new_page().unwrap();
        drop(g1);

        // Instance 0 is pinned, rotation points at it, so instance 1 serves
        let (page, _g) = pool.new_page().unwrap();
        assert_eq!(page1, PageId(1));
        assert_eq!(page, PageId(3));
    }

    #[test]
    fn test_flush_and_delete_route() {
        let pool = create_pool(2, 2);

        let (page_id, mut guard) = pool.new_page().unwrap();
        guard[0] = 1;
        drop(guard);

        assert!(pool.flush_page(page_id).unwrap());
        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.instance_for(page_id).is_resident(page_id));
        assert!(!pool.flush_page(page_id).unwrap());
        pool.flush_all().unwrap();
    }

    #[test]
    fn test_config_default_build() {
        let config = BufferPoolConfig::default();
        let pool = config.build(Arc::new(MemoryPageManager::new())).unwrap();
        assert_eq!(pool.pool_size(), 64);
        assert_eq!(pool.num_instances(), 1);
    }
}
