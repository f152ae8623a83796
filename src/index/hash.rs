use crate::index::key::{KeyComparator, KeyHasher, Storable};
use crate::storage::buffer::{BufferPool, PageWriteGuard};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::hash_bucket_page::max_slots;
use crate::storage::page::{HashBucketPage, HashBucketPageMut, HashDirectoryPage};
use crate::storage::PageId;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;

/// Extendible hash index over pool pages.
///
/// One directory page maps the low `global_depth` bits of a key's hash to
/// bucket pages. A full bucket splits in two, doubling the directory when its
/// local depth catches up with the global depth; an emptied bucket merges
/// back into its buddy. Duplicate keys are allowed, duplicate pairs are not.
///
/// Reads take the table latch shared and writes take it exclusively, so a
/// split or merge is atomic to other users of the table. An insert pins up
/// to three pages at once (directory, old bucket, new bucket).
pub struct ExtendibleHashTable<K, V, C, H, P: BufferPool + ?Sized> {
    name: String,
    pool: Arc<P>,
    comparator: C,
    hasher: H,
    directory_page_id: PageId,
    bucket_capacity: usize,
    table_latch: RwLock<()>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H, P> ExtendibleHashTable<K, V, C, H, P>
where
    K: Storable,
    V: Storable + PartialEq,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
    P: BufferPool + ?Sized,
{
    /// Create an empty index: a directory page of depth 0 and one bucket.
    /// `bucket_capacity` defaults to the most slots that fit a page.
    pub fn new(
        name: impl Into<String>,
        pool: Arc<P>,
        comparator: C,
        hasher: H,
        bucket_capacity: Option<usize>,
    ) -> StorageResult<Self> {
        let bucket_capacity = Self::check_capacity(bucket_capacity)?;

        let (directory_page_id, mut directory_guard) = pool.new_page()?;
        let (bucket_page_id, mut bucket_guard) = match pool.new_page() {
            Ok(allocated) => allocated,
            Err(e) => {
                drop(directory_guard);
                pool.delete_page(directory_page_id)?;
                return Err(e);
            }
        };

        HashBucketPageMut::<K, V>::new(&mut bucket_guard, bucket_capacity).remove_all_elements();
        HashDirectoryPage::new(bucket_page_id).write_to(&mut directory_guard);

        let name = name.into();
        log::debug!(
            "Created hash index '{}': directory {}, bucket capacity {}",
            name,
            directory_page_id,
            bucket_capacity
        );

        Ok(Self {
            name,
            pool,
            comparator,
            hasher,
            directory_page_id,
            bucket_capacity,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    /// Reattach to an index whose directory already lives at `directory_page_id`.
    /// `bucket_capacity` must match the value the index was created with.
    pub fn open(
        name: impl Into<String>,
        pool: Arc<P>,
        comparator: C,
        hasher: H,
        directory_page_id: PageId,
        bucket_capacity: Option<usize>,
    ) -> StorageResult<Self> {
        let table = Self {
            name: name.into(),
            pool,
            comparator,
            hasher,
            directory_page_id,
            bucket_capacity: Self::check_capacity(bucket_capacity)?,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        };
        table.verify_integrity()?;
        Ok(table)
    }

    fn check_capacity(requested: Option<usize>) -> StorageResult<usize> {
        let max = max_slots(K::SIZE + V::SIZE);
        match requested {
            None => Ok(max),
            Some(n) if n > 0 && n <= max => Ok(n),
            Some(n) => Err(StorageError::InvalidState(format!(
                "bucket capacity {} outside 1..={}",
                n, max
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash(key) as u32
    }

    fn read_directory(&self) -> StorageResult<HashDirectoryPage> {
        let guard = self.pool.fetch_page(self.directory_page_id)?;
        Ok(HashDirectoryPage::from_bytes(&guard))
    }

    /// All values stored under `key`.
    pub fn get_value(&self, key: &K) -> StorageResult<Vec<V>> {
        let _latch = self.table_latch.read();

        let directory = self.read_directory()?;
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_index(self.hash(key)));
        let guard = self.pool.fetch_page(bucket_page_id)?;
        let bucket = HashBucketPage::<K, V>::new(&guard, self.bucket_capacity);
        Ok(bucket.get_value(key, &self.comparator))
    }

    /// Insert the pair. Returns false if the identical pair is already present.
    pub fn insert(&self, key: &K, value: &V) -> StorageResult<bool> {
        match self.try_insert(key, value) {
            Ok(()) => Ok(true),
            Err(StorageError::DuplicateEntry) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Insert the pair, reporting an existing identical pair as
    /// [`StorageError::DuplicateEntry`].
    pub fn try_insert(&self, key: &K, value: &V) -> StorageResult<()> {
        let _latch = self.table_latch.write();
        let hash = self.hash(key);

        loop {
            let mut directory_guard = self.pool.fetch_page_write(self.directory_page_id)?;
            let mut directory = HashDirectoryPage::from_bytes(&directory_guard);
            let index = directory.hash_to_index(hash);
            let mut bucket_guard = self.pool.fetch_page_write(directory.bucket_page_id(index))?;

            let (duplicate, full, live) = {
                let bucket = HashBucketPage::<K, V>::new(&bucket_guard, self.bucket_capacity);
                (
                    bucket.contains(key, value, &self.comparator),
                    bucket.is_full(),
                    bucket.num_readable(),
                )
            };
            if duplicate {
                return Err(StorageError::DuplicateEntry);
            }

            if !full || live < self.bucket_capacity {
                let mut bucket =
                    HashBucketPageMut::<K, V>::new(&mut bucket_guard, self.bucket_capacity);
                if full {
                    bucket.compact(&self.comparator);
                }
                bucket.insert(key, value, &self.comparator);
                return Ok(());
            }

            self.split_bucket(&mut directory, index, &mut bucket_guard)?;
            directory.write_to(&mut directory_guard);
        }
    }

    /// Split the bucket at directory slot `index` by one more hash bit.
    fn split_bucket(
        &self,
        directory: &mut HashDirectoryPage,
        index: usize,
        bucket_guard: &mut PageWriteGuard,
    ) -> StorageResult<()> {
        let old_page_id = directory.bucket_page_id(index);
        let local_depth = directory.local_depth(index);

        if local_depth == directory.global_depth() {
            directory.incr_global_depth()?;
            log::debug!(
                "Hash index '{}' directory grew to global depth {}",
                self.name,
                directory.global_depth()
            );
        }

        let (new_page_id, mut new_guard) = self.pool.new_page()?;
        let high_bit = 1u32 << local_depth;
        for i in 0..directory.size() {
            if directory.bucket_page_id(i) == old_page_id {
                directory.set_local_depth(i, local_depth + 1);
                if i as u32 & high_bit != 0 {
                    directory.set_bucket_page_id(i, new_page_id);
                }
            }
        }

        let entries = HashBucketPage::<K, V>::new(bucket_guard, self.bucket_capacity).get_all_elements();
        let mut old_bucket = HashBucketPageMut::<K, V>::new(bucket_guard, self.bucket_capacity);
        let mut new_bucket = HashBucketPageMut::<K, V>::new(&mut new_guard, self.bucket_capacity);
        old_bucket.remove_all_elements();
        new_bucket.remove_all_elements();

        let mut moved = 0;
        for (key, value) in &entries {
            if self.hash(key) & high_bit != 0 {
                new_bucket.insert(key, value, &self.comparator);
                moved += 1;
            } else {
                old_bucket.insert(key, value, &self.comparator);
            }
        }

        log::debug!(
            "Hash index '{}' split bucket {} at depth {}: {} of {} entries moved to {}",
            self.name,
            old_page_id,
            local_depth + 1,
            moved,
            entries.len(),
            new_page_id
        );
        Ok(())
    }

    /// Remove the pair. Returns false if it is not present.
    pub fn remove(&self, key: &K, value: &V) -> StorageResult<bool> {
        let _latch = self.table_latch.write();

        let mut directory_guard = self.pool.fetch_page_write(self.directory_page_id)?;
        let mut directory = HashDirectoryPage::from_bytes(&directory_guard);
        let index = directory.hash_to_index(self.hash(key));
        let mut bucket_guard = self.pool.fetch_page_write(directory.bucket_page_id(index))?;

        let found = HashBucketPage::<K, V>::new(&bucket_guard, self.bucket_capacity)
            .contains(key, value, &self.comparator);
        if !found {
            return Ok(false);
        }

        let emptied = {
            let mut bucket = HashBucketPageMut::<K, V>::new(&mut bucket_guard, self.bucket_capacity);
            bucket.remove(key, value, &self.comparator);
            if bucket.num_readable() == 0 {
                bucket.remove_all_elements();
                true
            } else {
                false
            }
        };
        drop(bucket_guard);

        if emptied && self.merge(&mut directory, index) {
            directory.write_to(&mut directory_guard);
        }
        Ok(true)
    }

    /// Fold empty buckets into their buddies starting from slot `index`,
    /// shrinking the directory when possible. Returns whether the directory
    /// changed. A failed step stops merging and keeps the steps before it;
    /// the removal itself has already happened.
    fn merge(&self, directory: &mut HashDirectoryPage, mut index: usize) -> bool {
        let mut changed = false;

        loop {
            match self.merge_step(directory, &mut index) {
                Ok(true) => changed = true,
                Ok(false) => break,
                Err(e) => {
                    log::warn!(
                        "Hash index '{}' stopped merging at slot {}: {}",
                        self.name,
                        index,
                        e
                    );
                    break;
                }
            }
        }

        changed
    }

    /// Merge the bucket at `index` with its buddy if one of them is empty.
    /// On success `index` moves to a slot of the merged bucket.
    fn merge_step(&self, directory: &mut HashDirectoryPage, index: &mut usize) -> StorageResult<bool> {
        let local_depth = directory.local_depth(*index);
        let Some(image) = directory.split_image_index(*index) else {
            return Ok(false);
        };
        if directory.local_depth(image) != local_depth {
            return Ok(false);
        }

        let page_id = directory.bucket_page_id(*index);
        let image_page_id = directory.bucket_page_id(image);
        let (emptied, survivor) = if self.bucket_is_empty(page_id)? {
            (page_id, image_page_id)
        } else if self.bucket_is_empty(image_page_id)? {
            (image_page_id, page_id)
        } else {
            return Ok(false);
        };

        directory.repoint(emptied, survivor, local_depth - 1);
        while directory.can_shrink() {
            directory.decr_global_depth();
        }
        *index &= (1 << (local_depth - 1)) - 1;
        log::debug!(
            "Hash index '{}' merged bucket {} into {}, global depth {}",
            self.name,
            emptied,
            survivor,
            directory.global_depth()
        );

        // The directory no longer references the page, so a failure here only leaks it
        match self.pool.delete_page(emptied) {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "Hash index '{}' could not free merged bucket {}: still pinned",
                self.name,
                emptied
            ),
            Err(e) => log::warn!(
                "Hash index '{}' could not free merged bucket {}: {}",
                self.name,
                emptied,
                e
            ),
        }
        Ok(true)
    }

    fn bucket_is_empty(&self, page_id: PageId) -> StorageResult<bool> {
        let guard = self.pool.fetch_page(page_id)?;
        Ok(HashBucketPage::<K, V>::new(&guard, self.bucket_capacity).is_empty())
    }

    pub fn global_depth(&self) -> StorageResult<u32> {
        let _latch = self.table_latch.read();
        Ok(self.read_directory()?.global_depth())
    }

    /// Number of distinct bucket pages.
    pub fn num_buckets(&self) -> StorageResult<usize> {
        let _latch = self.table_latch.read();
        Ok(self.read_directory()?.bucket_page_ids().len())
    }

    /// Check the directory invariants, that no bucket holds slots past the
    /// configured capacity, and that every stored entry hashes to the bucket
    /// holding it.
    pub fn verify_integrity(&self) -> StorageResult<()> {
        let _latch = self.table_latch.read();

        let directory = self.read_directory()?;
        let result = directory.verify_integrity().and_then(|_| {
            for page_id in directory.bucket_page_ids() {
                let guard = self.pool.fetch_page(page_id)?;
                let bucket = HashBucketPage::<K, V>::new(&guard, self.bucket_capacity);
                let overflow = bucket.num_occupied_beyond_capacity();
                if overflow > 0 {
                    return Err(StorageError::Corrupted(format!(
                        "bucket {} has {} occupied slots past capacity {}",
                        page_id,
                        overflow,
                        bucket.capacity()
                    )));
                }
                for (key, _) in bucket.get_all_elements() {
                    let index = directory.hash_to_index(self.hash(&key));
                    if directory.bucket_page_id(index) != page_id {
                        return Err(StorageError::Corrupted(format!(
                            "entry in bucket {} belongs to slot {} (bucket {})",
                            page_id,
                            index,
                            directory.bucket_page_id(index)
                        )));
                    }
                }
            }
            Ok(())
        });

        if let Err(e) = &result {
            log::warn!("Hash index '{}' failed integrity check: {}", self.name, e);
        }
        result
    }

    /// Log the directory at debug level.
    pub fn print_directory(&self) -> StorageResult<()> {
        let _latch = self.table_latch.read();

        let directory = self.read_directory()?;
        log::debug!(
            "======== {} (global depth {}) ========",
            self.name,
            directory.global_depth()
        );
        log::debug!("| slot | page_id | local_depth | entries |");
        for i in 0..directory.size() {
            let page_id = directory.bucket_page_id(i);
            let guard = self.pool.fetch_page(page_id)?;
            let entries = HashBucketPage::<K, V>::new(&guard, self.bucket_capacity).num_readable();
            log::debug!(
                "| {:>4} | {:>7} | {:>11} | {:>7} |",
                i,
                page_id,
                directory.local_depth(i),
                entries
            );
        }
        Ok(())
    }
}
