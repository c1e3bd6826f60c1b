use std::collections::BTreeMap;
use std::sync::Arc;

use super::program::Program;
use super::Pid;
use crate::config::{DEFAULT_TIME_SLICE, FD_BASE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    /// 睡满 remaining 个 tick 后自动回到就绪
    Sleeping { remaining: u64 },
    /// 在设备的等待队列里
    BlockedDevice { dev: u32 },
}

/// 打开文件表项：inode 编号加一个读写共用的偏移
#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub inode: u32,
    pub offset: usize,
}

/// 进程控制块
pub struct Pcb {
    pub pid: Pid,
    /// 程序来源，`ps` 展示用
    pub source: String,
    pub program: Arc<Program>,
    pub pc: usize,
    pub state: State,
    pub time_slice_left: u32,
    /// fd 在进程内唯一，从 [`FD_BASE`] 起自动分配
    pub fd_table: BTreeMap<u32, OpenFile>,
    pub held_devices: Vec<u32>,
}

impl Pcb {
    pub fn new(pid: Pid, source: String, program: Arc<Program>) -> Self {
        Self {
            pid,
            source,
            program,
            pc: 0,
            state: State::Ready,
            time_slice_left: DEFAULT_TIME_SLICE,
            fd_table: BTreeMap::new(),
            held_devices: Vec::new(),
        }
    }

    /// 最小的空闲 fd
    pub fn alloc_fd(&self) -> u32 {
        (FD_BASE..)
            .find(|fd| !self.fd_table.contains_key(fd))
            .unwrap()
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            State::Ready => "Ready",
            State::Running => "Running",
            State::Sleeping { .. } => "Sleeping",
            State::BlockedDevice { .. } => "Blocked",
        }
    }
}
