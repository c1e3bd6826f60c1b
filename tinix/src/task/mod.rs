//! # 进程与调度
//!
//! 离散 tick 循环：一个 tick 推进当前运行进程恰好一条指令，
//! 指令触发的缺页（含驱逐与换入换出）在同一个 tick 内解决。
//! 就绪队列按 FIFO 轮转，时间片用完让出；睡眠计数在每个 tick 末尾递减。
//!
//! 进程结束时的清理顺序：关文件、还内存（页框与交换槽）、
//! 放设备（级联唤醒队首）。

mod process;
mod program;

pub use process::{OpenFile, Pcb, State};
pub use program::{Instruction, Program};

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::config::{DEFAULT_TIME_SLICE, DEFAULT_VIRTUAL_PAGES};
use crate::dev::{Acquire, DeviceTable};
use crate::fs::FsManager;
use crate::memory::{AccessKind, MemError, MemoryManager};

pub type Pid = usize;

/// 一条指令执行后的去向
enum Outcome {
    Continue,
    /// 内存与交换区双双耗尽，进程被杀
    Fatal,
}

pub struct ProcessManager {
    processes: BTreeMap<Pid, Pcb>,
    ready_queue: VecDeque<Pid>,
    current: Option<Pid>,
    /// 单调分配，永不复用
    next_pid: Pid,
    next_tick: u64,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            ready_queue: VecDeque::new(),
            current: None,
            next_pid: 1,
            next_tick: 0,
        }
    }

    pub fn create_from_file(
        &mut self,
        path: &str,
        mm: &mut MemoryManager,
    ) -> Option<Pid> {
        let program = match Program::load(Path::new(path)) {
            Ok(program) => program,
            Err(e) => {
                log::error!("Cannot open file: {path} ({e})");
                return None;
            }
        };
        if program.is_empty() {
            log::error!("Failed to load program from {path}");
            return None;
        }

        Some(self.create_with_program(path.to_owned(), program, mm))
    }

    /// `create [n]`：合成一个纯计算程序
    pub fn create_compute(&mut self, len: usize, mm: &mut MemoryManager) -> Pid {
        self.create_with_program("<compute>".to_owned(), Program::compute_only(len), mm)
    }

    pub fn create_with_program(
        &mut self,
        source: String,
        program: Arc<Program>,
        mm: &mut MemoryManager,
    ) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;

        mm.create_process_memory(pid, DEFAULT_VIRTUAL_PAGES);

        log::info!("Process {pid} created with {} instructions", program.len());
        self.processes.insert(pid, Pcb::new(pid, source, program));
        self.ready_queue.push_back(pid);

        pid
    }

    /// `kill`：人工终止
    pub fn kill(&mut self, pid: Pid, mm: &mut MemoryManager, devs: &mut DeviceTable) {
        if !self.processes.contains_key(&pid) {
            log::info!("Process {pid} not found.");
            return;
        }
        self.terminate(pid, mm, devs);
        log::info!("Process {pid} terminated.");
    }

    /// 推进一个 tick
    pub fn tick(&mut self, mm: &mut MemoryManager, devs: &mut DeviceTable, fs: &FsManager) {
        log::debug!("=== Tick {} ===", self.next_tick);
        self.next_tick += 1;

        if self.current.is_none() {
            self.schedule();
        }

        if let Some(pid) = self.current {
            // 取指并推进 PC；指令执行中的阻塞不回退 PC，
            // 被唤醒后从下一条继续
            let fetched = {
                let pcb = self
                    .processes
                    .get_mut(&pid)
                    .expect("current PID not in process table");
                (pcb.pc < pcb.program.len()).then(|| {
                    let inst = pcb.program.get(pcb.pc).clone();
                    pcb.pc += 1;
                    inst
                })
            };

            let outcome = match fetched {
                Some(inst) => self.execute(pid, inst, mm, devs, fs),
                None => Outcome::Continue,
            };

            if let Outcome::Fatal = outcome {
                log::error!("[Kernel] Process {pid} killed: out of memory and swap");
                self.terminate(pid, mm, devs);
            } else {
                let pcb = self.processes.get_mut(&pid).unwrap();
                pcb.time_slice_left -= 1;
                log::debug!(
                    "[Tick] Process {pid} executing (PC={}/{}, slice remaining: {})",
                    pcb.pc,
                    pcb.program.len(),
                    pcb.time_slice_left
                );

                if pcb.pc >= pcb.program.len() {
                    // 进程完成
                    log::info!("[Tick] Process {pid} completed");
                    self.terminate(pid, mm, devs);
                } else if pcb.state != State::Running {
                    // 执行中睡眠或排队设备
                    log::debug!("[Tick] Process {pid} blocked during execution");
                    self.current = None;
                } else if pcb.time_slice_left == 0 {
                    log::debug!("[Tick] Process {pid} time slice exhausted");
                    pcb.state = State::Ready;
                    pcb.time_slice_left = DEFAULT_TIME_SLICE;
                    self.ready_queue.push_back(pid);
                    self.current = None;
                }
            }
        }

        self.check_sleepers();
    }

    /// `ps`
    pub fn dump_processes(&self) {
        eprintln!("PID\tState\t\tPC\tSource");
        for (pid, pcb) in &self.processes {
            eprintln!(
                "{pid}\t{}\t\t{}/{}\t{}",
                pcb.state_name(),
                pcb.pc,
                pcb.program.len(),
                pcb.source
            );
        }
        match self.current {
            Some(pid) => eprintln!("Currently running: {pid}"),
            None => eprintln!("CPU idle"),
        }
    }

    #[inline]
    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl ProcessManager {
    /// FIFO 选取下一个就绪进程
    fn schedule(&mut self) {
        while let Some(pid) = self.ready_queue.pop_front() {
            // 就绪队列可能残留已终止或重复的项
            let Some(pcb) = self.processes.get_mut(&pid) else {
                continue;
            };
            if pcb.state != State::Ready {
                continue;
            }

            pcb.state = State::Running;
            pcb.time_slice_left = DEFAULT_TIME_SLICE;
            self.current = Some(pid);
            log::debug!("[Schedule] Process {pid} is now running");
            return;
        }

        log::debug!("[Schedule] CPU idle - no ready processes");
    }

    fn execute(
        &mut self,
        pid: Pid,
        inst: Instruction,
        mm: &mut MemoryManager,
        devs: &mut DeviceTable,
        fs: &FsManager,
    ) -> Outcome {
        use Instruction::*;

        match inst {
            Compute => {
                log::debug!("[Exec: {pid}] Compute");
            }

            MemRead { addr } => {
                log::debug!("[Exec: {pid}] MemRead addr={addr:#x}");
                if let Err(MemError::OutOfSwap) = mm.access(pid, addr, AccessKind::Read) {
                    return Outcome::Fatal;
                }
            }

            MemWrite { addr } => {
                log::debug!("[Exec: {pid}] MemWrite addr={addr:#x}");
                if let Err(MemError::OutOfSwap) = mm.access(pid, addr, AccessKind::Write) {
                    return Outcome::Fatal;
                }
            }

            Sleep { ticks } => {
                log::debug!("[Exec: {pid}] Sleep {ticks}");
                if ticks > 0 {
                    self.pcb(pid).state = State::Sleeping { remaining: ticks };
                }
            }

            DevRequest { dev } => {
                log::debug!("[Exec: {pid}] DevRequest dev={dev}");
                match devs.request(dev, pid) {
                    Acquire::Granted => {
                        let pcb = self.pcb(pid);
                        if !pcb.held_devices.contains(&dev) {
                            pcb.held_devices.push(dev);
                        }
                    }
                    Acquire::Queued => {
                        self.pcb(pid).state = State::BlockedDevice { dev };
                    }
                    Acquire::UnknownDevice => (),
                }
            }

            DevRelease { dev } => {
                log::debug!("[Exec: {pid}] DevRelease dev={dev}");
                self.pcb(pid).held_devices.retain(|&held| held != dev);
                if let Some(next) = devs.release(dev, pid) {
                    self.wake_device_waiter(next, dev);
                }
            }

            FileOpen { fd, path } => match fs.open_for_process(&path) {
                Ok(inode) => {
                    let pcb = self.pcb(pid);
                    let fd = fd.unwrap_or_else(|| pcb.alloc_fd());
                    if pcb.fd_table.contains_key(&fd) {
                        log::info!("[Exec] FileOpen fd={fd} already in use");
                    } else {
                        pcb.fd_table.insert(fd, OpenFile { inode, offset: 0 });
                        log::info!("[Exec] FileOpen file={path} -> fd={fd}");
                    }
                }
                Err(e) => log::info!("[Exec] FileOpen file={path} failed: {e}"),
            },

            FileRead { fd, size } => {
                let Some(open) = self.pcb(pid).fd_table.get(&fd).copied() else {
                    log::info!("[Exec] FileRead unknown fd={fd}");
                    return Outcome::Continue;
                };
                let read = fs
                    .read_inode_at(open.inode, open.offset, size)
                    .unwrap_or_else(|e| {
                        log::info!("[FS] Read failed: {e}");
                        0
                    });
                self.pcb(pid).fd_table.get_mut(&fd).unwrap().offset += read;
                log::info!("[Exec] FileRead fd={fd} size={size} -> {read} bytes");
            }

            FileWrite { fd, size } => {
                let Some(open) = self.pcb(pid).fd_table.get(&fd).copied() else {
                    log::info!("[Exec] FileWrite unknown fd={fd}");
                    return Outcome::Continue;
                };
                let buf = vec![b'x'; size];
                let written = fs
                    .write_inode_at(open.inode, open.offset, &buf)
                    .unwrap_or_else(|e| {
                        log::info!("[FS] Write failed: {e}");
                        0
                    });
                self.pcb(pid).fd_table.get_mut(&fd).unwrap().offset += written;
                log::info!("[Exec] FileWrite fd={fd} size={size} -> {written} bytes");
            }

            FileClose { fd } => {
                if self.pcb(pid).fd_table.remove(&fd).is_some() {
                    log::info!("[Exec] FileClose fd={fd}");
                } else {
                    log::info!("[Exec] FileClose unknown fd={fd}");
                }
            }
        }

        Outcome::Continue
    }

    /// 进程终止：关 fd、还内存、放设备，并从一切队列消失
    fn terminate(&mut self, pid: Pid, mm: &mut MemoryManager, devs: &mut DeviceTable) {
        let open_files = {
            let pcb = self.pcb(pid);
            let open = pcb.fd_table.len();
            pcb.fd_table.clear();
            open
        };
        if open_files > 0 {
            log::info!("[Exec] Closed {open_files} open file(s) for PID={pid}");
        }

        mm.free_process_memory(pid);

        for (dev, next) in devs.release_all(pid) {
            self.wake_device_waiter(next, dev);
        }

        self.processes.remove(&pid);
        self.ready_queue.retain(|&queued| queued != pid);
        if self.current == Some(pid) {
            self.current = None;
        }
    }

    /// 设备队首被唤醒：直接成为属主并回到就绪队列
    fn wake_device_waiter(&mut self, pid: Pid, dev: u32) {
        let Some(pcb) = self.processes.get_mut(&pid) else {
            return;
        };

        if !pcb.held_devices.contains(&dev) {
            pcb.held_devices.push(dev);
        }
        if let State::BlockedDevice { .. } = pcb.state {
            pcb.state = State::Ready;
            self.ready_queue.push_back(pid);
        }
    }

    /// 睡眠计数递减，睡满自动回到就绪
    fn check_sleepers(&mut self) {
        for (&pid, pcb) in self.processes.iter_mut() {
            if let State::Sleeping { remaining } = &mut pcb.state {
                *remaining -= 1;
                if *remaining == 0 {
                    pcb.state = State::Ready;
                    self.ready_queue.push_back(pid);
                    log::info!("[Tick] Process {pid} auto-woken up");
                }
            }
        }
    }

    fn pcb(&mut self, pid: Pid) -> &mut Pcb {
        self.processes
            .get_mut(&pid)
            .unwrap_or_else(|| panic!("no PCB for PID {pid}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DISK_NUM_BLOCKS, PAGE_FRAMES, SWAP_RESERVED_BLOCKS, SWAP_START_BLOCK};
    use crate::swap::SwapArea;
    use crate::test_util::MemDisk;

    struct Rig {
        pm: ProcessManager,
        mm: MemoryManager,
        devs: DeviceTable,
        fs: FsManager,
    }

    fn rig() -> Rig {
        let device = MemDisk::new(DISK_NUM_BLOCKS);
        let mut fs = FsManager::new(device.clone());
        fs.format();

        let swap = SwapArea::new(device, SWAP_START_BLOCK, SWAP_RESERVED_BLOCKS);
        Rig {
            pm: ProcessManager::new(),
            mm: MemoryManager::new(PAGE_FRAMES, swap),
            devs: DeviceTable::new(),
            fs,
        }
    }

    impl Rig {
        fn spawn(&mut self, text: &str) -> Pid {
            self.pm
                .create_with_program("<test>".into(), Program::parse(text), &mut self.mm)
        }

        fn run(&mut self, ticks: u64) {
            for _ in 0..ticks {
                self.pm.tick(&mut self.mm, &mut self.devs, &self.fs);
            }
        }
    }

    /// 每页写一次，9 页
    fn nine_page_writer(with_sleep: bool) -> String {
        let mut text = String::new();
        for page in 0..9 {
            if with_sleep && page == 4 {
                text.push_str("S 3\n");
            }
            text.push_str(&format!("W {:#x}\n", page * 0x1000));
        }
        text
    }

    #[test]
    fn pids_are_monotonic_from_one() {
        let mut rig = rig();
        assert_eq!(rig.spawn("C\n"), 1);
        assert_eq!(rig.spawn("C\n"), 2);
        rig.run(4);
        assert!(rig.pm.is_empty());
        // 终止的 PID 不复用
        assert_eq!(rig.spawn("C\n"), 3);
    }

    #[test]
    fn completion_tears_everything_down() {
        let mut rig = rig();
        let pid = rig.spawn("W 0x0\nW 0x1000\nC\n");

        rig.run(3);
        assert!(!rig.pm.contains(pid));
        assert_eq!(rig.mm.frames().free_frames(), PAGE_FRAMES);
        assert_eq!(rig.mm.swap().free_slots(), SWAP_RESERVED_BLOCKS);
    }

    #[test]
    fn sleep_blocks_then_auto_wakes() {
        let mut rig = rig();
        let pid = rig.spawn("C\nS 2\nC\n");

        rig.run(2);
        assert!(rig.pm.contains(pid));
        // 睡满自动回到就绪并跑完
        rig.run(4);
        assert!(rig.pm.is_empty());
    }

    #[test]
    fn device_contention_completes_and_frees_device() {
        let mut rig = rig();
        rig.spawn("DR 0\nS 3\nDD 0\nC\n");
        rig.spawn("DR 0\nC\nDD 0\nC\n");

        rig.run(20);

        assert!(rig.pm.is_empty());
        assert_eq!(rig.devs.owner(0), None);
        assert_eq!(rig.devs.dump()[0], "dev=0 name=disk owner=free wait=[]");
    }

    #[test]
    fn two_heavy_writers_finish_under_eviction() {
        let mut rig = rig();
        rig.spawn(&nine_page_writer(true));
        rig.spawn(&nine_page_writer(false));

        rig.run(80);

        assert!(rig.pm.is_empty());
        // 终止时页框和交换槽全部归还
        assert_eq!(rig.mm.frames().free_frames(), PAGE_FRAMES);
        assert_eq!(rig.mm.swap().free_slots(), SWAP_RESERVED_BLOCKS);
    }

    #[test]
    fn explicit_fd_write_then_read() {
        let mut rig = rig();
        rig.spawn("FO 9 /data\nFW 9 5\nFR 9 3\nFC 9\n");

        rig.run(8);
        assert!(rig.pm.is_empty());
        // FW 写的是 'x'
        assert_eq!(rig.fs.cat("/data").unwrap(), b"xxxxx");
    }

    #[test]
    fn auto_fd_starts_at_three_and_closes_on_exit() {
        let mut rig = rig();
        let pid = rig.spawn("FO /auto\nFW 3 4\n");

        rig.run(1);
        // 自动分配的第一个 fd 是 3，FW 3 正好写进同一个文件
        assert!(rig.pm.contains(pid));
        rig.run(3);
        assert!(rig.pm.is_empty());
        assert_eq!(rig.fs.cat("/auto").unwrap(), b"xxxx");
    }

    #[test]
    fn unknown_fds_are_noops() {
        let mut rig = rig();
        let pid = rig.spawn("FR 77 1\nFW 77 1\nFC 77\nC\n");

        rig.run(6);
        assert!(!rig.pm.contains(pid));
    }

    #[test]
    fn open_into_missing_directory_does_not_kill_process() {
        let mut rig = rig();
        let pid = rig.spawn("FO 9 /nodir/f\nC\n");

        rig.run(3);
        assert!(!rig.pm.contains(pid));
    }

    #[test]
    fn file_offset_advances_across_writes() {
        let mut rig = rig();
        rig.spawn("FO 5 /f\nFW 5 3\nFW 5 2\nFC 5\n");

        rig.run(8);
        assert_eq!(rig.fs.cat("/f").unwrap(), b"xxxxx");
    }

    #[test]
    fn kill_releases_devices_to_waiters() {
        let mut rig = rig();
        let holder = rig.spawn("DR 0\nS 9\nDD 0\n");
        let waiter = rig.spawn("DR 0\nDD 0\n");

        // holder 拿到设备并睡下，waiter 排队
        rig.run(3);
        assert_eq!(rig.devs.owner(0), Some(holder));

        rig.pm.kill(holder, &mut rig.mm, &mut rig.devs);
        assert_eq!(rig.devs.owner(0), Some(waiter));

        rig.run(6);
        assert!(rig.pm.is_empty());
        assert_eq!(rig.devs.owner(0), None);
    }
}
