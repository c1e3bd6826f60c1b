use crate::{FsError, FsResult, MAGIC};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录两个**权威**的空闲计数，随每次分配/释放增减；
/// - 定位其它连续区域
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据块数（即交换区起点）
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub inode_bitmap_block: u32,
    pub data_bitmap_block: u32,
    pub inode_area_start: u32,
    pub inode_area_blocks: u32,
    pub data_area_start: u32,
}

impl SuperBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        total_blocks: u32,
        total_inodes: u32,
        free_blocks: u32,
        free_inodes: u32,
        inode_bitmap_block: u32,
        data_bitmap_block: u32,
        inode_area_start: u32,
        inode_area_blocks: u32,
        data_area_start: u32,
    ) {
        *self = Self {
            magic: MAGIC,
            total_blocks,
            total_inodes,
            free_blocks,
            free_inodes,
            inode_bitmap_block,
            data_bitmap_block,
            inode_area_start,
            inode_area_blocks,
            data_area_start,
        };
    }

    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// 校验魔数与布局是否与本次构建的几何参数一致。
    /// 几何不一致的镜像必须重新格式化后才能挂载。
    pub fn validate(&self, total_blocks: u32, total_inodes: u32) -> FsResult<()> {
        if self.magic != MAGIC {
            return Err(FsError::BadMagic(self.magic));
        }
        if self.total_blocks != total_blocks || self.total_inodes != total_inodes {
            return Err(FsError::LayoutMismatch {
                blocks: self.total_blocks,
                inodes: self.total_inodes,
            });
        }
        Ok(())
    }
}
