use anyhow::Result;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use vibestore::index::{ExtendibleHashTable, OrdComparator, TupleId, XxKeyHasher};
use vibestore::storage::{
    BufferPoolConfig, DiskManager, MemoryPageManager, PageId, PageManager,
    ParallelBufferPoolManager, StorageError,
};

type Index = ExtendibleHashTable<i64, TupleId, OrdComparator, XxKeyHasher, ParallelBufferPoolManager>;

fn tid(n: i64) -> TupleId {
    TupleId::new(PageId((n / 100) as u32), (n % 100) as u16)
}

fn memory_pool(num_instances: u32, pool_size: usize) -> Result<Arc<ParallelBufferPoolManager>> {
    let disk = Arc::new(MemoryPageManager::new());
    let config = BufferPoolConfig {
        pool_size,
        num_instances,
    };
    Ok(Arc::new(config.build(disk)?))
}

#[test]
fn test_index_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("index.db");

    let directory_page_id = {
        let disk = Arc::new(PageManager::create(&path)?);
        let pool = Arc::new(ParallelBufferPoolManager::new(disk, 3, 8)?);
        let index: Index = ExtendibleHashTable::new(
            "orders",
            pool.clone(),
            OrdComparator,
            XxKeyHasher::default(),
            Some(8),
        )?;

        for key in 0..300 {
            assert!(index.insert(&key, &tid(key))?);
        }
        index.verify_integrity()?;
        pool.flush_all()?;
        index.directory_page_id()
    };

    let disk = Arc::new(PageManager::open(&path)?);
    let pool = Arc::new(ParallelBufferPoolManager::new(disk, 3, 8)?);
    let index: Index = ExtendibleHashTable::open(
        "orders",
        pool.clone(),
        OrdComparator,
        XxKeyHasher::default(),
        directory_page_id,
        Some(8),
    )?;

    for key in 0..300 {
        assert_eq!(index.get_value(&key)?, vec![tid(key)]);
    }

    // New pages after a restart land past the existing file
    let (page_id, _guard) = pool.new_page()?;
    assert!(page_id.0 >= 3);
    assert!(index.insert(&1000, &tid(1000))?);
    assert_eq!(index.get_value(&1000)?, vec![tid(1000)]);
    Ok(())
}

#[test]
fn test_index_under_pool_pressure() -> Result<()> {
    // Far more bucket pages than frames, so lookups go through eviction
    let disk = Arc::new(MemoryPageManager::new());
    let pool = Arc::new(ParallelBufferPoolManager::new(disk.clone(), 2, 4)?);
    let index: Index =
        ExtendibleHashTable::new("t", pool, OrdComparator, XxKeyHasher::default(), Some(8))?;

    for key in 0..300 {
        assert!(index.insert(&key, &tid(key))?);
    }
    assert!(index.num_buckets()? > 8);
    for key in 0..300 {
        assert_eq!(index.get_value(&key)?, vec![tid(key)]);
    }
    index.verify_integrity()?;
    assert!(disk.write_count() > 0);
    assert!(disk.read_count() > 0);
    Ok(())
}

#[test]
fn test_remove_everything_collapses_directory() -> Result<()> {
    let pool = memory_pool(2, 16)?;
    let index: Index =
        ExtendibleHashTable::new("t", pool, OrdComparator, XxKeyHasher::default(), Some(8))?;

    for key in 0..300 {
        index.insert(&key, &tid(key))?;
    }
    assert!(index.global_depth()? > 0);

    for key in 0..300 {
        assert!(index.remove(&key, &tid(key))?);
    }
    index.verify_integrity()?;
    assert_eq!(index.global_depth()?, 0);
    assert_eq!(index.num_buckets()?, 1);
    assert!(index.get_value(&7)?.is_empty());
    Ok(())
}

#[test]
fn test_concurrent_index_workload() -> Result<()> {
    let pool = memory_pool(4, 16)?;
    let index: Arc<Index> = Arc::new(ExtendibleHashTable::new(
        "t",
        pool,
        OrdComparator,
        XxKeyHasher::default(),
        None,
    )?);

    let handles: Vec<_> = (0..8i64)
        .map(|t| {
            let index = index.clone();
            thread::spawn(move || -> Result<()> {
                for i in 0..500 {
                    let key = t * 10_000 + i;
                    assert!(index.insert(&key, &tid(key))?);
                    assert_eq!(index.get_value(&key)?, vec![tid(key)]);
                }
                for i in (0..500).step_by(2) {
                    let key = t * 10_000 + i;
                    assert!(index.remove(&key, &tid(key))?);
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    index.verify_integrity()?;
    for t in 0..8i64 {
        for i in 0..500 {
            let key = t * 10_000 + i;
            let expected = if i % 2 == 0 { vec![] } else { vec![tid(key)] };
            assert_eq!(index.get_value(&key)?, expected);
        }
    }
    Ok(())
}

#[test]
fn test_parallel_pool_full_and_recovery() -> Result<()> {
    let pool = memory_pool(2, 2)?;

    let mut guards = Vec::new();
    for _ in 0..4 {
        guards.push(pool.new_page()?);
    }
    assert!(matches!(pool.new_page(), Err(StorageError::BufferPoolFull)));

    // Releasing one frame in either instance makes room again
    drop(guards.remove(0));
    let (page_id, _guard) = pool.new_page()?;
    assert!(page_id.is_valid());
    Ok(())
}

#[test]
fn test_dirty_pages_written_back_on_eviction() -> Result<()> {
    let disk = Arc::new(MemoryPageManager::new());
    let pool = ParallelBufferPoolManager::new(disk.clone(), 1, 2)?;

    let first = {
        let (page_id, mut guard) = pool.new_page()?;
        guard[..5].copy_from_slice(b"hello");
        page_id
    };
    for _ in 0..3 {
        pool.new_page()?;
    }
    assert!(disk.contains(first));

    let guard = pool.fetch_page(first)?;
    assert_eq!(&guard[..5], b"hello");

    let mut buf = [0u8; vibestore::storage::PAGE_SIZE];
    disk.read_page(first, &mut buf)?;
    assert_eq!(&buf[..5], b"hello");
    Ok(())
}
