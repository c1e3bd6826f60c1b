//! 以宿主机上的一个普通文件模拟整块磁盘。

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use tinix_fs::{BlockDevice, BLOCK_SIZE};

use crate::config::DISK_NUM_BLOCKS;

pub struct BlockFile(Mutex<File>);

impl BlockFile {
    /// 打开磁盘镜像；不存在则创建并预分配全零空间。
    /// 已存在的镜像**绝不**截断，它承载着上次运行的文件系统。
    pub fn open(path: &Path) -> io::Result<Self> {
        let create = !path.exists();
        if create {
            log::info!(
                "[Disk] Creating new disk image: {} ({} KB)",
                path.display(),
                DISK_NUM_BLOCKS * BLOCK_SIZE / 1024
            );
        }

        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = (DISK_NUM_BLOCKS * BLOCK_SIZE) as u64;
        if fd.metadata()?.len() < len {
            fd.set_len(len)?;
        }

        let device = Self(Mutex::new(fd));
        log::info!(
            "[Disk] Opening disk image: {} ({} blocks x {} bytes)",
            path.display(),
            device.num_blocks(),
            device.block_size()
        );
        Ok(device)
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        DISK_NUM_BLOCKS
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert!(block_id < DISK_NUM_BLOCKS, "block id out of range");
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert!(block_id < DISK_NUM_BLOCKS, "block id out of range");
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            BLOCK_SIZE,
            "not a complete block!"
        );
    }
}
