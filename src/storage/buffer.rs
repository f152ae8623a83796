pub mod lru;
pub mod parallel;
pub mod replacer;

use crate::storage::disk::DiskManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{PageId, PAGE_SIZE};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::{HashMap, VecDeque};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use parallel::{BufferPoolConfig, ParallelBufferPoolManager};

type PageData = [u8; PAGE_SIZE];

/// Operations shared by a single pool instance and the sharded pool.
pub trait BufferPool: Send + Sync {
    fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard>;

    fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard>;

    fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)>;

    /// Never waits on a write guard of the page; returns false instead.
    fn flush_page(&self, page_id: PageId) -> StorageResult<bool>;

    fn delete_page(&self, page_id: PageId) -> StorageResult<bool>;

    fn flush_all(&self) -> StorageResult<()>;

    fn pool_size(&self) -> usize;
}

struct Frame {
    data: Arc<RwLock<PageData>>,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
            is_dirty: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
}

struct PoolState {
    meta: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
    next_page_id: u32,
}

struct BufferPoolInner {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    disk: Arc<dyn DiskManager>,
    num_instances: u32,
    instance_index: u32,
}

/// A fixed set of frames caching pages of one page-id partition.
///
/// Every metadata operation runs under one mutex. Page bytes are guarded per
/// frame and only touched under that mutex when the frame is unpinned, so a
/// caller holding a page guard never blocks the pool.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

impl BufferPoolManager {
    pub fn new(
        disk: Arc<dyn DiskManager>,
        replacer: Box<dyn Replacer>,
        pool_size: usize,
    ) -> StorageResult<Self> {
        Self::with_partition(disk, replacer, pool_size, 1, 0)
    }

    /// Create instance `instance_index` of `num_instances`. It owns the page
    /// ids congruent to `instance_index` modulo `num_instances`.
    pub fn with_partition(
        disk: Arc<dyn DiskManager>,
        replacer: Box<dyn Replacer>,
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
    ) -> StorageResult<Self> {
        if num_instances == 0 || instance_index >= num_instances {
            return Err(StorageError::InvalidState(format!(
                "instance index {} out of range for {} instances",
                instance_index, num_instances
            )));
        }

        // Skip past pages already on disk, staying inside the partition
        let on_disk = disk.num_pages()?;
        let mut next_page_id = instance_index;
        if on_disk > instance_index {
            let rounds = (on_disk - instance_index).div_ceil(num_instances);
            next_page_id += rounds * num_instances;
        }

        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let state = PoolState {
            meta: vec![FrameMeta::default(); pool_size],
            page_table: HashMap::with_capacity(pool_size),
            free_list: (0..pool_size as FrameId).collect(),
            replacer,
            next_page_id,
        };

        Ok(Self {
            inner: Arc::new(BufferPoolInner {
                frames,
                state: Mutex::new(state),
                disk,
                num_instances,
                instance_index,
            }),
        })
    }

    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let data = self.inner.frames[frame_id as usize].data.read_arc();
        Ok(PageReadGuard {
            inner: self.inner.clone(),
            page_id,
            data: ManuallyDrop::new(data),
        })
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        let frame_id = self.pin_frame(page_id)?;
        Ok(self.write_guard(page_id, frame_id))
    }

    pub fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        let (page_id, frame_id) = {
            let mut state = self.inner.state.lock();
            let frame_id = match self.acquire_frame(&mut state) {
                Ok(frame_id) => frame_id,
                Err(e) => {
                    log::debug!(
                        "Instance {} cannot allocate a page: {}",
                        self.inner.instance_index,
                        e
                    );
                    return Err(e);
                }
            };

            let page_id = PageId(state.next_page_id);
            state.next_page_id += self.inner.num_instances;

            let frame = &self.inner.frames[frame_id as usize];
            frame.data.write().fill(0);
            frame.is_dirty.store(false, Ordering::SeqCst);
            state.meta[frame_id as usize] = FrameMeta {
                page_id: Some(page_id),
                pin_count: 1,
            };
            state.page_table.insert(page_id, frame_id);
            (page_id, frame_id)
        };

        Ok((page_id, self.write_guard(page_id, frame_id)))
    }

    /// Drop one pin on a resident page. Returns false if the page is not
    /// resident or not pinned. Only page guards call this.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        Self::unpin_inner(&self.inner, page_id, is_dirty)
    }

    fn unpin_inner(inner: &BufferPoolInner, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            log::warn!("Unpin of page {} which is not resident", page_id);
            return false;
        };

        let meta = &mut state.meta[frame_id as usize];
        if meta.pin_count == 0 {
            log::warn!("Unpin of page {} with pin count 0", page_id);
            return false;
        }

        meta.pin_count -= 1;
        if is_dirty {
            inner.frames[frame_id as usize]
                .is_dirty
                .store(true, Ordering::SeqCst);
        }
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a resident page back if dirty. Returns false if it is not
    /// resident, or if a write guard on it is live. A page skipped that way
    /// keeps its dirty state and is written by a later flush or eviction.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        let frame_id = {
            let mut state = self.inner.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(false);
            };

            if state.meta[frame_id as usize].pin_count == 0 {
                // Nobody holds the frame's data lock
                self.write_back(page_id, frame_id)?;
                return Ok(true);
            }

            // Hold a pin so the frame stays put once the mutex is released
            state.meta[frame_id as usize].pin_count += 1;
            frame_id
        };

        let result = {
            let frame = &self.inner.frames[frame_id as usize];
            match frame.data.try_read() {
                Some(data) => self.write_locked(page_id, frame_id, &data).map(|_| true),
                None => {
                    log::debug!("Skipped flush of page {}: write guard is live", page_id);
                    Ok(false)
                }
            }
        };
        Self::unpin_inner(&self.inner, page_id, false);
        result
    }

    /// Remove an unpinned page from the pool. Returns true if it is not
    /// resident and false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut state = self.inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };

        let pin_count = state.meta[frame_id as usize].pin_count;
        if pin_count > 0 {
            log::debug!(
                "Cannot delete page {}: pin count is {}",
                page_id,
                pin_count
            );
            return Ok(false);
        }

        self.write_back(page_id, frame_id)?;

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        state.meta[frame_id as usize] = FrameMeta::default();
        self.inner.frames[frame_id as usize].data.write().fill(0);
        state.free_list.push_back(frame_id);
        Ok(true)
    }

    pub fn flush_all(&self) -> StorageResult<()> {
        let resident: Vec<PageId> = self.inner.state.lock().page_table.keys().copied().collect();
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.inner.frames.len()
    }

    pub fn instance_index(&self) -> u32 {
        self.inner.instance_index
    }

    pub fn num_instances(&self) -> u32 {
        self.inner.num_instances
    }

    /// Frames that have never held a page (or were returned by delete).
    pub fn free_frame_count(&self) -> usize {
        self.inner.state.lock().free_list.len()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.state.lock().page_table.contains_key(&page_id)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.meta[frame_id as usize].pin_count)
    }

    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.inner.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(
            self.inner.frames[frame_id as usize]
                .is_dirty
                .load(Ordering::SeqCst),
        )
    }

    /// Pin `page_id`, loading it from disk if needed.
    fn pin_frame(&self, page_id: PageId) -> StorageResult<FrameId> {
        let mut state = self.inner.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.meta[frame_id as usize].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(frame_id);
        }

        if !self.owns(page_id, state.next_page_id) {
            return Err(StorageError::PageNotFound(page_id));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.inner.frames[frame_id as usize];
        let loaded = {
            let mut data = frame.data.write();
            self.inner.disk.read_page(page_id, &mut data[..])
        };
        if let Err(e) = loaded {
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.is_dirty.store(false, Ordering::SeqCst);
        state.meta[frame_id as usize] = FrameMeta {
            page_id: Some(page_id),
            pin_count: 1,
        };
        state.page_table.insert(page_id, frame_id);
        Ok(frame_id)
    }

    fn owns(&self, page_id: PageId, next_page_id: u32) -> bool {
        page_id.is_valid()
            && page_id.0 % self.inner.num_instances == self.inner.instance_index
            && page_id.0 < next_page_id
    }

    /// Take a frame from the free list, or evict the replacer's victim.
    /// The returned frame is detached from the page table with empty metadata.
    fn acquire_frame(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.victim().ok_or(StorageError::BufferPoolFull)?;
        if let Some(old_page_id) = state.meta[frame_id as usize].page_id {
            if let Err(e) = self.write_back(old_page_id, frame_id) {
                state.replacer.unpin(frame_id);
                return Err(e);
            }
            log::debug!(
                "Evicted page {} from frame {} of instance {}",
                old_page_id,
                frame_id,
                self.inner.instance_index
            );
            state.page_table.remove(&old_page_id);
        }

        state.meta[frame_id as usize] = FrameMeta::default();
        Ok(frame_id)
    }

    /// Write the frame to disk if dirty. Caller holds the state mutex and the
    /// frame is unpinned, so its data lock is free.
    fn write_back(&self, page_id: PageId, frame_id: FrameId) -> StorageResult<()> {
        let data = self.inner.frames[frame_id as usize].data.read();
        self.write_locked(page_id, frame_id, &data)
    }

    /// Write back with the frame's data lock already held by the caller.
    fn write_locked(&self, page_id: PageId, frame_id: FrameId, data: &PageData) -> StorageResult<()> {
        let frame = &self.inner.frames[frame_id as usize];
        if frame.is_dirty.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.inner.disk.write_page(page_id, &data[..]) {
                frame.is_dirty.store(true, Ordering::SeqCst);
                return Err(e);
            }
            log::debug!("Wrote back dirty page {}", page_id);
        }
        Ok(())
    }

    fn write_guard(&self, page_id: PageId, frame_id: FrameId) -> PageWriteGuard {
        let data = self.inner.frames[frame_id as usize].data.write_arc();
        PageWriteGuard {
            inner: self.inner.clone(),
            page_id,
            data: ManuallyDrop::new(data),
            modified: false,
        }
    }
}

impl BufferPool for BufferPoolManager {
    fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        BufferPoolManager::fetch_page(self, page_id)
    }

    fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        BufferPoolManager::fetch_page_write(self, page_id)
    }

    fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        BufferPoolManager::new_page(self)
    }

    fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        BufferPoolManager::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        BufferPoolManager::delete_page(self, page_id)
    }

    fn flush_all(&self) -> StorageResult<()> {
        BufferPoolManager::flush_all(self)
    }

    fn pool_size(&self) -> usize {
        BufferPoolManager::pool_size(self)
    }
}

/// Shared access to a pinned page. Dropping it releases the pin.
pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    page_id: PageId,
    data: ManuallyDrop<ArcRwLockReadGuard<RawRwLock, PageData>>,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        // SAFETY: `data` is not touched again after this point.
        // Releasing the data lock before the pin keeps unpinned frames unlocked.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        BufferPoolManager::unpin_inner(&self.inner, self.page_id, false);
    }
}

/// Exclusive access to a pinned page. Dropping it releases the pin and marks
/// the page dirty if it was written through.
pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    page_id: PageId,
    data: ManuallyDrop<ArcRwLockWriteGuard<RawRwLock, PageData>>,
    modified: bool,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.modified = true;
        &mut self.data
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        // SAFETY: `data` is not touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        BufferPoolManager::unpin_inner(&self.inner, self.page_id, self.modified);
    }
}
