//! # 块缓存层
//!
//! 磁盘慢、内存快，所有块操作都先落在内存副本上：
//! 取用时整块载入，修改只打脏标记，真正写回发生在
//! [`BlockCacheManager::sync_all`]、缓存项被挤出或析构的时刻。
//!
//! 管理器持有底层块设备；每个文件系统实例自带一份缓存，互不串块。
//! 对缓存块的读写都通过 [`BlockCache::map`] / [`BlockCache::map_mut`]
//! 的闭包视图完成，指针铸造收拢在一处。

use std::mem;
use std::sync::Arc;

use spin::Mutex;

use crate::BlockDevice;
use crate::BLOCK_SIZE;

/// 缓冲按 8 字节对齐，块内任何 repr(C) 布局的视图都不会错位
#[repr(align(8))]
struct AlignedBlock([u8; BLOCK_SIZE]);

/// 一个磁盘块的内存副本
pub struct BlockCache {
    buf: AlignedBlock,
    block_id: usize,
    device: Arc<dyn BlockDevice>,
    dirty: bool,
}

/// 缓存的登记与挤出
pub struct BlockCacheManager {
    device: Arc<dyn BlockDevice>,
    slots: Vec<(usize, Arc<Mutex<BlockCache>>)>,
}

impl BlockCacheManager {
    /// 同时缓存的块数上限
    const MAX_CACHED: usize = 16;

    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            slots: Vec::new(),
        }
    }

    /// 取某块的缓存；未缓存则载入，容量满则先挤出一个闲置项
    pub fn get(&mut self, block_id: usize) -> Arc<Mutex<BlockCache>> {
        if let Some((_, cache)) = self.slots.iter().find(|(id, _)| *id == block_id) {
            return cache.clone();
        }

        if self.slots.len() == Self::MAX_CACHED {
            // 还有人引用的缓存项不能挤出，它的视图可能正拿在手里
            let idle = self
                .slots
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1)
                .expect("all block caches are in use");
            self.slots.swap_remove(idle);
        }

        let cache = Arc::new(Mutex::new(BlockCache::load(block_id, self.device.clone())));
        self.slots.push((block_id, cache.clone()));
        cache
    }

    /// 把所有脏块写回设备
    pub fn sync_all(&self) {
        for (_, cache) in &self.slots {
            cache.lock().sync();
        }
    }
}

impl BlockCache {
    fn load(block_id: usize, device: Arc<dyn BlockDevice>) -> Self {
        let mut buf = AlignedBlock([0; BLOCK_SIZE]);
        device.read_block(block_id, &mut buf.0);

        Self {
            buf,
            block_id,
            device,
            dirty: false,
        }
    }

    /// 把块内 `offset` 处当作 `T` 的只读视图交给闭包
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        Self::check_span::<T>(offset);
        let view = unsafe { &*self.buf.0.as_ptr().add(offset).cast::<T>() };
        f(view)
    }

    /// 可写视图；一经调用即视为修改过
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        Self::check_span::<T>(offset);
        self.dirty = true;
        let view = unsafe { &mut *self.buf.0.as_mut_ptr().add(offset).cast::<T>() };
        f(view)
    }

    /// 脏块写回设备，干净块什么都不做
    pub fn sync(&mut self) {
        if mem::take(&mut self.dirty) {
            self.device.write_block(self.block_id, &self.buf.0);
        }
    }

    /// 视图不得越过块边界；对齐由缓冲的 8 字节起点加偏移保证
    fn check_span<T>(offset: usize) {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        debug_assert_eq!(offset % mem::align_of::<T>(), 0);
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.sync();
    }
}
