//! 测试共用的内存块设备

use std::sync::{Arc, Mutex};

use tinix_fs::{BlockDevice, BLOCK_SIZE};

pub struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    pub fn new(num_blocks: usize) -> Arc<Self> {
        Arc::new(Self(Mutex::new(vec![0; num_blocks * BLOCK_SIZE])))
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let data = self.0.lock().unwrap();
        buf.copy_from_slice(&data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut data = self.0.lock().unwrap();
        data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
    }
}
