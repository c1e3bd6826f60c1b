//! # 磁盘块管理器层
//!
//! 构建出磁盘的布局并使用。
//!
//! 超级块中的两个空闲计数是**权威**数据：每次分配减一、每次释放加一，
//! 修改都发生在块缓存里，随 [`TinixFileSystem::sync_all`] 落盘。

use std::mem;
use std::sync::Arc;

use spin::Mutex;

use crate::block_cache::BlockCacheManager;
use crate::layout::*;
use crate::vfs::Inode;
use crate::DataBlock;
use crate::{BlockDevice, FsError, FsResult};
use crate::{BLOCK_SIZE, MAX_INODES};
use crate::{DATA_AREA_START, DATA_BITMAP_BLOCK, INODE_AREA_BLOCKS, INODE_AREA_START};
use crate::{INODE_BITMAP_BLOCK, SUPER_BLOCK_ID};

const INODE_SIZE: usize = mem::size_of::<DiskInode>();
const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// `fsinfo` 之类的只读快照
#[derive(Debug, Clone, Copy)]
pub struct SuperBlockInfo {
    pub magic: u32,
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub data_area_start: u32,
}

pub struct TinixFileSystem {
    cache: BlockCacheManager,
    inode_bitmap: Bitmap,
    data_bitmap: Bitmap,
    /// 文件系统分区的块数，数据区域之外即交换区
    total_blocks: u32,
}

impl TinixFileSystem {
    /// 重新初始化文件系统分区，幂等。
    /// 分配 0 号 inode 和一个数据块给根目录并写入 `.`/`..`。
    pub fn format(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Arc<Mutex<Self>> {
        assert!(total_blocks as usize > DATA_AREA_START);
        let max_data_blocks = total_blocks - DATA_AREA_START as u32;

        let mut fs = Self::bare(block_device, total_blocks);

        // 清空超级块、两张位图和 inode 表
        for block_id in 0..DATA_AREA_START {
            fs.cache
                .get(block_id)
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| data_block.fill(0));
        }

        fs.cache.get(SUPER_BLOCK_ID).lock().map_mut(
            0,
            |super_block: &mut SuperBlock| {
                super_block.init(
                    total_blocks,
                    MAX_INODES as u32,
                    max_data_blocks,
                    MAX_INODES as u32,
                    INODE_BITMAP_BLOCK as u32,
                    DATA_BITMAP_BLOCK as u32,
                    INODE_AREA_START as u32,
                    INODE_AREA_BLOCKS as u32,
                    DATA_AREA_START as u32,
                )
            },
        );

        // 根目录：0 号 inode，恰好一个数据块
        assert_eq!(fs.alloc_inode().unwrap(), 0);
        let root_block = fs.alloc_data().unwrap();
        assert_eq!(root_block, DATA_AREA_START as u32);

        let (root_inode_block_id, root_inode_offset) = fs.disk_inode_pos(0);
        fs.cache
            .get(root_inode_block_id as usize)
            .lock()
            .map_mut(root_inode_offset, |disk_inode: &mut DiskInode| {
                disk_inode.init(InodeKind::Directory);
                disk_inode.expand_to(2 * DirEntry::SIZE as u32, vec![root_block]);
            });

        fs.cache
            .get(root_block as usize)
            .lock()
            .map_mut(0, |data_block: &mut DataBlock| {
                data_block[..DirEntry::SIZE].copy_from_slice(&DirEntry::new(".", 0).to_bytes());
                data_block[DirEntry::SIZE..2 * DirEntry::SIZE]
                    .copy_from_slice(&DirEntry::new("..", 0).to_bytes());
            });

        fs.cache.sync_all();

        Arc::new(Mutex::new(fs))
    }

    /// 挂载：读出超级块并校验魔数与布局。
    /// 几何不匹配的镜像由调用方决定是否重新格式化。
    pub fn open(
        block_device: Arc<dyn BlockDevice>,
        total_blocks: u32,
    ) -> FsResult<Arc<Mutex<Self>>> {
        let mut fs = Self::bare(block_device, total_blocks);

        fs.cache
            .get(SUPER_BLOCK_ID)
            .lock()
            .map(0, |super_block: &SuperBlock| {
                super_block.validate(total_blocks, MAX_INODES as u32)
            })?;

        Ok(Arc::new(Mutex::new(fs)))
    }

    /// 在磁盘上分配新的 inode 并返回其ID
    pub fn alloc_inode(&mut self) -> FsResult<u32> {
        let id = self
            .inode_bitmap
            .alloc(&mut self.cache)
            .ok_or(FsError::NoFreeInodes)?;
        self.update_super_block(|sb| sb.free_inodes -= 1);
        Ok(id)
    }

    pub fn dealloc_inode(&mut self, inode_id: u32) {
        let (block_id, offset) = self.disk_inode_pos(inode_id);
        self.cache
            .get(block_id as usize)
            .lock()
            .map_mut(offset, |disk_inode: &mut DiskInode| {
                *disk_inode = DiskInode::default();
            });
        self.inode_bitmap.dealloc(&mut self.cache, inode_id);
        self.update_super_block(|sb| sb.free_inodes += 1);
    }

    /// 在磁盘上分配新的数据块并返回其ID
    pub fn alloc_data(&mut self) -> FsResult<u32> {
        let id = self
            .data_bitmap
            .alloc(&mut self.cache)
            .ok_or(FsError::NoFreeBlocks)?;
        self.update_super_block(|sb| sb.free_blocks -= 1);
        Ok(DATA_AREA_START as u32 + id)
    }

    pub fn dealloc_data(&mut self, block_id: u32) {
        debug_assert!((DATA_AREA_START as u32..self.total_blocks).contains(&block_id));
        self.cache
            .get(block_id as usize)
            .lock()
            .map_mut(0, |data_block: &mut DataBlock| data_block.fill(0));
        self.data_bitmap
            .dealloc(&mut self.cache, block_id - DATA_AREA_START as u32);
        self.update_super_block(|sb| sb.free_blocks += 1);
    }

    /// 通过ID获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    pub fn disk_inode_pos(&self, inode_id: u32) -> (u32, usize) {
        let block_id = INODE_AREA_START as u32 + inode_id / INODES_PER_BLOCK as u32;
        let block_inoffset = inode_id as usize % INODES_PER_BLOCK * INODE_SIZE;

        (block_id, block_inoffset)
    }

    #[inline]
    pub fn root_inode(fs: &Arc<Mutex<Self>>) -> Inode {
        Self::inode(fs, 0)
    }

    pub fn inode(fs: &Arc<Mutex<Self>>, inode_id: u32) -> Inode {
        let (block_id, block_offset) = fs.lock().disk_inode_pos(inode_id);
        Inode::new(inode_id, block_id, block_offset, fs.clone())
    }

    pub fn meta(&mut self) -> SuperBlockInfo {
        self.cache
            .get(SUPER_BLOCK_ID)
            .lock()
            .map(0, |sb: &SuperBlock| SuperBlockInfo {
                magic: sb.magic(),
                total_blocks: sb.total_blocks,
                total_inodes: sb.total_inodes,
                free_blocks: sb.free_blocks,
                free_inodes: sb.free_inodes,
                data_area_start: sb.data_area_start,
            })
    }

    /// 两张位图中空闲位的个数 `(数据块, inode)`，
    /// 应当始终与超级块的空闲计数一致
    pub fn bitmap_zeros(&mut self) -> (usize, usize) {
        let data = self.data_bitmap.count_zeros(&mut self.cache);
        let inodes = self.inode_bitmap.count_zeros(&mut self.cache);
        (data, inodes)
    }

    /// 把所有脏缓存写回块设备
    #[inline]
    pub fn sync_all(&self) {
        self.cache.sync_all();
    }

    #[inline]
    pub(crate) fn cache_mut(&mut self) -> &mut BlockCacheManager {
        &mut self.cache
    }
}

impl TinixFileSystem {
    fn bare(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Self {
        let max_data_blocks = total_blocks as usize - DATA_AREA_START;
        Self {
            cache: BlockCacheManager::new(block_device),
            inode_bitmap: Bitmap::new(INODE_BITMAP_BLOCK, MAX_INODES),
            data_bitmap: Bitmap::new(DATA_BITMAP_BLOCK, max_data_blocks),
            total_blocks,
        }
    }

    fn update_super_block(&mut self, f: impl FnOnce(&mut SuperBlock)) {
        self.cache
            .get(SUPER_BLOCK_ID)
            .lock()
            .map_mut(0, |sb: &mut SuperBlock| f(sb));
    }
}
