/* tinix-fs 的整体架构，自上而下 */

// 索引节点层：文件与目录的创建、查找、读写、删除
mod vfs;
pub use vfs::{DirEntryInfo, Inode};

// 磁盘块管理器层：布局定位、位图分配与超级块计数
mod tfs;
pub use tfs::{SuperBlockInfo, TinixFileSystem};

// 磁盘数据结构层：超级块、位图、inode 表、目录项
mod layout;
pub use layout::InodeKind;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

// 磁盘块设备接口层：读写磁盘块设备的接口
mod block_dev;
pub use block_dev::BlockDevice;

mod error;
pub use error::{FsError, FsResult};

#[cfg(test)]
mod tests;

/// 魔数 "TINX"
pub const MAGIC: u32 = 0x5449_4e58;
pub const BLOCK_SIZE: usize = 4096;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;

/// 文件系统可容纳的 inode 总数
pub const MAX_INODES: usize = 128;
/// 每个 inode 的直接块指针数，上限即最大文件尺寸
pub const DIRECT_COUNT: usize = 10;
pub const MAX_FILE_SIZE: usize = DIRECT_COUNT * BLOCK_SIZE;

/// 磁盘布局：超级块 | inode 位图 | 数据位图 | inode 表 | 数据区域
pub(crate) const SUPER_BLOCK_ID: usize = 0;
pub(crate) const INODE_BITMAP_BLOCK: usize = 1;
pub(crate) const DATA_BITMAP_BLOCK: usize = 2;
pub(crate) const INODE_AREA_START: usize = 3;
pub(crate) const INODE_AREA_BLOCKS: usize = 4;
pub const DATA_AREA_START: usize = INODE_AREA_START + INODE_AREA_BLOCKS;

type DataBlock = [u8; BLOCK_SIZE];
