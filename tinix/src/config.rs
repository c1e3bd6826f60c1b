//! Constants used in tinix

/// 物理页框数
pub const PAGE_FRAMES: usize = 8;
/// 物理页大小，十六进制表示方便地址转页号的计算
pub const PAGE_SIZE: usize = 0x1000;
/// 每个进程虚拟空间页数
pub const DEFAULT_VIRTUAL_PAGES: usize = 64;

/// 模拟磁盘镜像文件名，位于当前工作目录
pub const DISK_IMAGE_NAME: &str = "disk.img";
/// 块大小等于页大小，一个交换槽恰好一个块
pub const DISK_BLOCK_SIZE: usize = 0x1000;
pub const DISK_NUM_BLOCKS: usize = 1024;

/// 磁盘尾部保留给交换区的块数
pub const SWAP_RESERVED_BLOCKS: usize = 128;
/// 交换区起始块：它也是文件系统分区的块数
pub const SWAP_START_BLOCK: usize = DISK_NUM_BLOCKS - SWAP_RESERVED_BLOCKS;

/// 时间片长度
pub const DEFAULT_TIME_SLICE: u32 = 3;

/// 进程脚本 fd 从 3 起分配，0/1/2 永不使用
pub const FD_BASE: u32 = 3;

const _: () = assert!(SWAP_RESERVED_BLOCKS < DISK_NUM_BLOCKS);
const _: () = assert!(DISK_BLOCK_SIZE == PAGE_SIZE);
