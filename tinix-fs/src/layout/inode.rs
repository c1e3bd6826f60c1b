//! 索引节点只有直接索引：10 个块指针封顶 40 KiB，
//! 对一个教学模拟器里的文件来说绰绰有余。
//!
//! 目录的空间用于存放子项的目录项；
//! 文件的空间用于存放它的数据。

use crate::block_cache::BlockCacheManager;
use crate::DataBlock;
use crate::{BLOCK_SIZE, DIRECT_COUNT, MAX_FILE_SIZE};

const PAD_WORDS: usize = (128 - 3 * 4 - DIRECT_COUNT * 4) / 4;

/// 磁盘上的索引节点，恒为 128 字节，一个块放得下 32 个
#[derive(Default)]
#[repr(C)]
pub struct DiskInode {
    /// 类型
    pub kind: InodeKind,
    // 不用usize是为了严控布局
    pub size: u32,
    /// 硬链接个数，实践中只有 0 或 1
    pub links: u32,
    /// 直接索引块，包含 DIRECT_COUNT 个块编号
    direct: [u32; DIRECT_COUNT],
    _pad: [u32; PAD_WORDS],
}

/// 全零的磁盘表示必须解码为合法类型，故 File 取 0
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum InodeKind {
    #[default]
    File = 0,
    Directory = 1,
}

impl DiskInode {
    #[inline]
    pub fn init(&mut self, kind: InodeKind) {
        *self = Self {
            kind,
            links: 1,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引），
    /// 然后返回给**块缓存层**使用的ID
    #[inline]
    pub fn block_id(&self, block_index: usize) -> u32 {
        assert!(block_index < DIRECT_COUNT);
        self.direct[block_index]
    }

    /// 把容量扩展到 `larger_size`，新块的ID由调用方分配好传入
    pub fn expand_to(&mut self, larger_size: u32, new_blocks: Vec<u32>) {
        assert!(larger_size as usize <= MAX_FILE_SIZE);
        let mut block_index = Self::count_data_block(self.size);
        let new_total_blocks = Self::count_data_block(larger_size);
        assert_eq!(new_blocks.len(), new_total_blocks - block_index);
        self.size = larger_size;

        let mut new_blocks = new_blocks.into_iter();
        while block_index < new_total_blocks {
            self.direct[block_index] = new_blocks.next().unwrap();
            block_index += 1;
        }
    }

    /// 清空内容，返回曾持有的所有数据块ID交由调用方释放
    pub fn clear(&mut self) -> Vec<u32> {
        let data_blocks = Self::count_data_block(self.size);
        self.size = 0;

        let drop_data_blocks = self.direct[..data_blocks].to_vec();
        self.direct.fill(0);
        drop_data_blocks
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`
    pub fn read_at(&self, offset: usize, buf: &mut [u8], cache: &mut BlockCacheManager) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.size as usize);

        if start >= end {
            return 0;
        }

        // 已读取多少字节
        let mut read_size = 0;
        loop {
            // 当前块的逻辑索引
            let block_index = start / BLOCK_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;
            let dest = &mut buf[read_size..read_size + block_read_size];

            cache
                .get(self.block_id(block_index) as usize)
                .lock()
                .map(0, |data_block: &DataBlock| {
                    // 绝对地址 % 块大小 = 块内偏移
                    let src = &data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
                    dest.copy_from_slice(src);
                });

            read_size += block_read_size;

            if current_block_end == end {
                break;
            }

            start = current_block_end;
        }

        read_size
    }

    /// 向指定位置写入数据；容量必须已经扩展到位
    pub fn write_at(&mut self, offset: usize, buf: &[u8], cache: &mut BlockCacheManager) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.size as usize);

        assert!(start <= end);
        if start == end {
            return 0;
        }

        let mut written_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;

            cache
                .get(self.block_id(block_index) as usize)
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| {
                    let src = &buf[written_size..written_size + block_write_size];
                    let dest =
                        &mut data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_write_size];
                    dest.copy_from_slice(src);
                });

            written_size += block_write_size;

            if current_block_end == end {
                break;
            }

            start = current_block_end;
        }

        written_size
    }

    /// 计算容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_block(size: u32) -> usize {
        (size as usize).div_ceil(BLOCK_SIZE)
    }
}
