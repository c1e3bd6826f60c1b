//! # 内核门面
//!
//! 唯一的一份内核状态，由 `main` 持有：文件系统、内存管理器、
//! 设备表、进程管理器都是它的字段，互相之间只通过引用传递，
//! 没有任何进程级全局变量。

use std::sync::Arc;

use tinix_fs::{BlockDevice, FsError};

use crate::config::{PAGE_FRAMES, SWAP_RESERVED_BLOCKS, SWAP_START_BLOCK};
use crate::dev::DeviceTable;
use crate::fs::FsManager;
use crate::memory::MemoryManager;
use crate::swap::SwapArea;
use crate::task::ProcessManager;

pub struct Kernel {
    pub fs: FsManager,
    pub mm: MemoryManager,
    pub devs: DeviceTable,
    pub pm: ProcessManager,
}

impl Kernel {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let swap = SwapArea::new(device.clone(), SWAP_START_BLOCK, SWAP_RESERVED_BLOCKS);

        Self {
            fs: FsManager::new(device),
            mm: MemoryManager::new(PAGE_FRAMES, swap),
            devs: DeviceTable::new(),
            pm: ProcessManager::new(),
        }
    }

    /// 挂载；镜像空白或布局不符时就地重新格式化再挂一次。
    /// 布局不匹配不是用户错误，用户看到的只是一次格式化。
    pub fn mount(&mut self) {
        match self.fs.mount() {
            Ok(()) => (),
            Err(FsError::BadMagic(_) | FsError::LayoutMismatch { .. }) => {
                log::info!("[Kernel] File system not found, formatting...");
                self.fs.format();
                if let Err(e) = self.fs.mount() {
                    log::error!("[Kernel] Mount failed after format: {e}");
                }
            }
            // 其余错误已在 FsManager 里给出诊断
            Err(_) => (),
        }
    }

    pub fn format(&mut self) {
        self.fs.format();
    }

    /// `tick n`
    pub fn tick(&mut self, n: u64) {
        for _ in 0..n {
            self.pm.tick(&mut self.mm, &mut self.devs, &self.fs);
        }
    }

    /// 干净退出前把文件系统落盘
    pub fn shutdown(&self) {
        self.fs.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MemDisk;
    use tinix_fs::BLOCK_SIZE;

    #[test]
    fn mount_on_blank_disk_reformats() {
        let mut kernel = Kernel::new(MemDisk::new(crate::config::DISK_NUM_BLOCKS));

        kernel.mount();
        assert!(kernel.fs.is_mounted());

        let meta = kernel.fs.meta().unwrap();
        assert_eq!(meta.total_blocks as usize, SWAP_START_BLOCK);
    }

    #[test]
    fn mount_on_mismatched_layout_reformats_and_succeeds() {
        let device = MemDisk::new(crate::config::DISK_NUM_BLOCKS);

        // 伪造一个魔数正确、总块数却不对的超级块
        let mut block = [0u8; BLOCK_SIZE];
        block[..4].copy_from_slice(&tinix_fs::MAGIC.to_le_bytes());
        block[4..8].copy_from_slice(&123u32.to_le_bytes());
        use tinix_fs::BlockDevice;
        device.write_block(0, &block);

        let mut kernel = Kernel::new(device);
        kernel.mount();
        assert!(kernel.fs.is_mounted());

        let meta = kernel.fs.meta().unwrap();
        assert_eq!(meta.total_blocks as usize, SWAP_START_BLOCK);
        assert_eq!(
            meta.free_blocks,
            (SWAP_START_BLOCK - tinix_fs::DATA_AREA_START - 1) as u32
        );
    }

    #[test]
    fn remount_preserves_files() {
        let device = MemDisk::new(crate::config::DISK_NUM_BLOCKS);

        let mut kernel = Kernel::new(device.clone());
        kernel.mount();
        kernel.fs.mkdir("/a").unwrap();
        kernel.fs.echo("hello", "/a/f").unwrap();
        kernel.shutdown();
        drop(kernel);

        let mut kernel = Kernel::new(device);
        kernel.mount();
        assert_eq!(kernel.fs.cat("/a/f").unwrap(), b"hello\n");
    }
}
