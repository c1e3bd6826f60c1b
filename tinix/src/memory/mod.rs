//! # 内存管理器
//!
//! 页框表、各进程页表、缺页处理与 Clock 置换。
//!
//! 置换指针是全局的：受害者不分进程，负载均衡时跨进程驱逐自然发生。
//! 一次缺页内的可观测顺序固定：`[Evict]` 行先于 `[PageFault] Allocated`，
//! 换出/换入的 `[Swap]` 行夹在两者之间。

mod frame;
mod page_table;

pub use frame::{FrameInfo, FrameTable};
pub use page_table::{PageState, PageTable, PageTableEntry};

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::PAGE_SIZE;
use crate::swap::{Page, SwapArea};
use crate::task::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemError {
    #[error("page {0} out of range")]
    AddressOutOfRange(usize),

    /// 物理内存与交换区双双耗尽，肇事进程将被终止
    #[error("out of memory and swap")]
    OutOfSwap,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub memory_accesses: usize,
    pub page_faults: usize,
}

pub struct MemoryManager {
    frames: FrameTable,
    page_tables: BTreeMap<Pid, PageTable>,
    /// Clock 置换的指针，跨缺页保留
    clock_ptr: usize,
    swap: SwapArea,
    stats: MemoryStats,
    process_stats: BTreeMap<Pid, MemoryStats>,
}

impl MemoryManager {
    pub fn new(num_frames: usize, swap: SwapArea) -> Self {
        Self {
            frames: FrameTable::new(num_frames),
            page_tables: BTreeMap::new(),
            clock_ptr: 0,
            swap,
            stats: MemoryStats::default(),
            process_stats: BTreeMap::new(),
        }
    }

    /// 为进程创建页表
    pub fn create_process_memory(&mut self, pid: Pid, num_pages: usize) {
        self.page_tables.insert(pid, PageTable::new(num_pages));
        self.process_stats.insert(pid, MemoryStats::default());

        log::info!("[Memory] Created page table for PID {pid} ({num_pages} pages)");
    }

    /// 释放进程的所有内存：常驻页框和占用的交换槽
    pub fn free_process_memory(&mut self, pid: Pid) {
        let table = self
            .page_tables
            .remove(&pid)
            .unwrap_or_else(|| panic!("no page table for PID {pid}"));

        for entry in table.iter() {
            match entry.state {
                PageState::Resident { frame } => self.frames.free(frame),
                PageState::Swapped { slot } => self.swap.free_slot(slot),
                PageState::Unmapped => (),
            }
        }
        self.process_stats.remove(&pid);

        log::info!("[Memory] Freed memory for PID {pid}");
    }

    /// 访问一个虚拟地址；不命中则在同一个 tick 内处理缺页
    pub fn access(&mut self, pid: Pid, vaddr: u64, kind: AccessKind) -> Result<(), MemError> {
        let page = vaddr as usize / PAGE_SIZE;
        let offset = vaddr as usize % PAGE_SIZE;

        let table = self
            .page_tables
            .get(&pid)
            .unwrap_or_else(|| panic!("no page table for PID {pid}"));
        if page >= table.len() {
            log::info!("[Memory] Invalid address: page {page} out of range");
            return Err(MemError::AddressOutOfRange(page));
        }

        self.stats.memory_accesses += 1;
        self.process_stats.entry(pid).or_default().memory_accesses += 1;

        if !self.page_tables[&pid][page].is_resident() {
            self.stats.page_faults += 1;
            self.process_stats.entry(pid).or_default().page_faults += 1;

            log::info!("[PageFault] PID={pid}, VPage={page}, VAddr={vaddr:#x}");
            self.handle_page_fault(pid, page, kind)?;
        }

        let entry = &mut self.page_tables.get_mut(&pid).unwrap()[page];
        entry.referenced = true;
        if kind == AccessKind::Write {
            entry.dirty = true;
        }

        let PageState::Resident { frame } = entry.state else {
            unreachable!();
        };
        let paddr = frame * PAGE_SIZE + offset;
        log::debug!("[Memory] PID={pid}, VAddr={vaddr:#x} -> PAddr={paddr:#x}, Frame={frame}");

        Ok(())
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn process_stats(&self, pid: Pid) -> MemoryStats {
        self.process_stats.get(&pid).copied().unwrap_or_default()
    }

    pub fn page_state(&self, pid: Pid, page: usize) -> Option<PageState> {
        self.page_tables.get(&pid).map(|table| table[page].state)
    }

    #[inline]
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    #[inline]
    pub fn swap(&self) -> &SwapArea {
        &self.swap
    }

    pub fn dump_page_table(&self, pid: Pid) {
        let Some(table) = self.page_tables.get(&pid) else {
            eprintln!("PID {pid} has no page table");
            return;
        };

        eprintln!("=== Page Table for PID {pid} ===");
        eprintln!("VPage | State         | Dirty | Ref");
        eprintln!("------|---------------|-------|----");
        for (page, entry) in table.iter().enumerate() {
            let state = match entry.state {
                PageState::Unmapped => continue,
                PageState::Resident { frame } => format!("frame {frame}"),
                PageState::Swapped { slot } => format!("slot {slot}"),
            };
            eprintln!(
                "{page:5} | {state:13} | {:5} | {:3}",
                entry.dirty as u8, entry.referenced as u8
            );
        }

        let stats = self.process_stats(pid);
        eprintln!(
            "Stats: {} page faults, {} accesses",
            stats.page_faults, stats.memory_accesses
        );
    }

    pub fn dump_frames(&self) {
        eprintln!("=== Physical Memory ({} frames) ===", self.frames.len());
        for (frame, info) in self.frames.iter().enumerate() {
            match info.occupant {
                Some((pid, vpage)) => eprintln!("Frame {frame}: PID={pid}, VPage={vpage}"),
                None => eprintln!("Frame {frame}: free"),
            }
        }
    }
}

impl MemoryManager {
    fn handle_page_fault(&mut self, pid: Pid, page: usize, kind: AccessKind) -> Result<(), MemError> {
        // 换入之前先腾出页框
        let frame = match self.frames.alloc(pid, page) {
            Some(frame) => frame,
            None => self.evict_victim(pid, page)?,
        };

        let entry = &mut self.page_tables.get_mut(&pid).unwrap()[page];
        if let PageState::Swapped { slot } = entry.state {
            log::info!("[Swap] Reading PID={pid} VPage={page} from Disk Block {slot}");
            let mut page_buf: Page = [0; PAGE_SIZE];
            self.swap.read_slot(slot, &mut page_buf);
            self.swap.free_slot(slot);
        }

        let entry = &mut self.page_tables.get_mut(&pid).unwrap()[page];
        entry.state = PageState::Resident { frame };
        entry.referenced = true;
        entry.dirty = kind == AccessKind::Write;

        log::info!("[PageFault] Allocated Frame {frame} for PID={pid}, VPage={page}");

        Ok(())
    }

    /// Clock(二次机会)：引用位为 1 的页框拨过去并清位，
    /// 第一个引用位为 0 的页框成为受害者
    fn evict_victim(&mut self, pid: Pid, page: usize) -> Result<usize, MemError> {
        let total_frames = self.frames.len();

        loop {
            let info = self.frames.get(self.clock_ptr);
            let (victim_pid, victim_vpage) =
                info.occupant.expect("clock pointer points to free frame");

            let victim_table = self
                .page_tables
                .get_mut(&victim_pid)
                .unwrap_or_else(|| panic!("no page table for victim PID {victim_pid}"));
            let victim_entry = &mut victim_table[victim_vpage];
            assert_eq!(
                victim_entry.state,
                PageState::Resident { frame: self.clock_ptr },
                "frame table and page table disagree"
            );

            if victim_entry.referenced {
                victim_entry.referenced = false; // second chance
                self.clock_ptr = (self.clock_ptr + 1) % total_frames;
                continue;
            }

            log::info!(
                "[Evict] Replacing Frame {} from PID={victim_pid}, VPage={victim_vpage}",
                self.clock_ptr
            );

            if victim_entry.dirty {
                // 脏页换出到新分配的槽
                let Some(slot) = self.swap.alloc_slot() else {
                    log::error!("[Swap] Out of swap blocks");
                    return Err(MemError::OutOfSwap);
                };

                log::info!(
                    "[Swap] Writing PID={victim_pid} VPage={victim_vpage} to Disk Block {slot}"
                );
                let page_buf: Page = [0xAA; PAGE_SIZE];
                self.swap.write_slot(slot, &page_buf);

                let victim_entry = &mut self.page_tables.get_mut(&victim_pid).unwrap()[victim_vpage];
                victim_entry.clear();
                victim_entry.state = PageState::Swapped { slot };
            } else {
                // 干净页直接丢弃，重新缺页得到的是同样的零页
                victim_entry.clear();
            }

            let frame = self.clock_ptr;
            self.frames.assign(frame, pid, page);
            self.clock_ptr = (self.clock_ptr + 1) % total_frames;
            return Ok(frame);
        }
    }
}
