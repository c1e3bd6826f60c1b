//! # 交互 shell
//!
//! 行式命令循环。输出纪律：stdout 只出现命令本身的结果
//! （help、pwd、ls、cat、dev、echo），横幅、提示符和所有诊断都在 stderr，
//! 回归测试靠这一点区分两路输出。

use std::fs;
use std::io;
use std::io::{BufRead, Write};

use crate::kernel::Kernel;

pub struct Shell {
    kernel: Kernel,
    running: bool,
}

impl Shell {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            running: true,
        }
    }

    pub fn run(&mut self) {
        eprintln!("Tinix OS Shell. Type 'help' for commands.");

        let stdin = io::stdin();
        let mut line = String::new();
        while self.running {
            eprint!("tinix> ");
            let _ = io::stderr().flush();

            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => (),
            }

            let args: Vec<&str> = line.split_whitespace().collect();
            if !args.is_empty() {
                self.execute(&args);
            }
        }

        self.kernel.shutdown();
    }

    fn execute(&mut self, args: &[&str]) {
        let kernel = &mut self.kernel;

        match args[0] {
            "help" => print_help(),

            "ps" => kernel.pm.dump_processes(),

            "create" | "cr" => {
                if args.len() > 2 && args[1] == "-f" {
                    if let Some(pid) = kernel.pm.create_from_file(args[2], &mut kernel.mm) {
                        eprintln!("Created process PID: {pid} from {}", args[2]);
                    }
                } else {
                    let len = args.get(1).and_then(|n| n.parse().ok()).unwrap_or(10);
                    let pid = kernel.pm.create_compute(len, &mut kernel.mm);
                    eprintln!("Created process PID: {pid}");
                }
            }

            "kill" => match args.get(1).and_then(|pid| pid.parse().ok()) {
                Some(pid) => kernel.pm.kill(pid, &mut kernel.mm, &mut kernel.devs),
                None => eprintln!("Usage: kill <pid>"),
            },

            "tick" | "tk" => {
                let n = args.get(1).and_then(|n| n.parse().ok()).unwrap_or(1);
                kernel.tick(n);
            }

            "pagetable" | "pt" => match args.get(1).and_then(|pid| pid.parse().ok()) {
                Some(pid) => kernel.mm.dump_page_table(pid),
                None => eprintln!("Usage: pagetable <pid>"),
            },

            "mem" => kernel.mm.dump_frames(),

            "memstats" | "ms" => match args.get(1).and_then(|pid| pid.parse().ok()) {
                Some(pid) => {
                    let stats = kernel.mm.process_stats(pid);
                    eprintln!("=== Memory Stats for PID {pid} ===");
                    eprintln!("Memory Accesses: {}", stats.memory_accesses);
                    eprintln!("Page Faults: {}", stats.page_faults);
                }
                None => {
                    let stats = kernel.mm.stats();
                    eprintln!("=== System Memory Stats ===");
                    eprintln!("Total Memory Accesses: {}", stats.memory_accesses);
                    eprintln!("Total Page Faults: {}", stats.page_faults);
                }
            },

            "script" | "sc" => match args.get(1) {
                Some(path) => self.run_script(path),
                None => eprintln!("Usage: script <filename>"),
            },

            "format" => kernel.format(),

            "mount" => kernel.mount(),

            "touch" => match args.get(1) {
                Some(path) => {
                    if let Err(e) = kernel.fs.touch(path) {
                        log::info!("[FS] {e}");
                    }
                }
                None => eprintln!("Usage: touch <filename>"),
            },

            "mkdir" => match args.get(1) {
                Some(path) => {
                    if let Err(e) = kernel.fs.mkdir(path) {
                        log::info!("[FS] {e}");
                    }
                }
                None => eprintln!("Usage: mkdir <dirname>"),
            },

            "ls" => match kernel.fs.ls(args.get(1).unwrap_or(&".")) {
                Ok((path, entries)) => {
                    println!("Contents of {path}:");
                    for entry in entries {
                        let t = if entry.kind == tinix_fs::InodeKind::Directory {
                            'd'
                        } else {
                            '-'
                        };
                        println!(
                            "  {t} {} (inode={}, size={})",
                            entry.name, entry.inode_id, entry.size
                        );
                    }
                }
                Err(e) => log::info!("[FS] {e}"),
            },

            "cd" => {
                if let Err(e) = kernel.fs.cd(args.get(1).unwrap_or(&"/")) {
                    log::info!("[FS] {e}");
                }
            }

            "pwd" => println!("{}", kernel.fs.pwd()),

            "rm" => match args.get(1) {
                Some(path) => {
                    if let Err(e) = kernel.fs.rm(path) {
                        log::info!("[FS] {e}");
                    }
                }
                None => eprintln!("Usage: rm <filename>"),
            },

            "cat" => match args.get(1) {
                Some(path) => match kernel.fs.cat(path) {
                    Ok(bytes) => {
                        let mut stdout = io::stdout();
                        let _ = stdout.write_all(&bytes);
                        let _ = stdout.flush();
                    }
                    Err(e) => log::info!("[FS] {e}"),
                },
                None => eprintln!("Usage: cat <filename>"),
            },

            "echo" => self.echo(&args[1..]),

            "fsinfo" => {
                let _ = kernel.fs.fsinfo();
            }

            "dev" => {
                for line in kernel.devs.dump() {
                    println!("{line}");
                }
            }

            "exit" => self.running = false,

            cmd => eprintln!("Unknown command: {cmd}"),
        }
    }

    /// `echo text... [> file]`
    fn echo(&mut self, args: &[&str]) {
        if args.is_empty() {
            eprintln!("Usage: echo <text> [> filename]");
            return;
        }

        match args.iter().position(|&arg| arg == ">") {
            Some(redirect) if redirect + 1 < args.len() => {
                let text = args[..redirect].join(" ");
                if let Err(e) = self.kernel.fs.echo(&text, args[redirect + 1]) {
                    log::info!("[FS] {e}");
                }
            }
            _ => println!("{}", args.join(" ")),
        }
    }

    /// 脚本回放：每行先回显到 stderr 再执行
    fn run_script(&mut self, path: &str) {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                eprintln!("Error: Could not open script file '{path}'");
                return;
            }
        };

        eprintln!("Executing script: {path}");
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            eprintln!(">>> {line}");
            let args: Vec<&str> = line.split_whitespace().collect();
            if !args.is_empty() {
                self.execute(&args);
            }
            if !self.running {
                break;
            }
        }
        eprintln!("Script execution completed.");
    }
}

fn print_help() {
    println!(
        "Available commands:\n\
         \x20 help             - Display this help message\n\
         \x20 ps               - List all simulated processes\n\
         \x20 create [n]       - Create a compute-only process of n instructions (default: 10)\n\
         \x20 create -f <file> - Create a process from .pc script file\n\
         \x20 kill <pid>       - Force terminate a process\n\
         \x20 tick [n]         - Execute n clock ticks (default: 1)\n\
         \x20 pagetable <pid>  - Display page table for a process\n\
         \x20 mem              - Display physical memory status\n\
         \x20 memstats [pid]   - Display memory statistics (system or per-process)\n\
         \x20 dev              - Display device table\n\
         \x20 script <file>    - Execute commands from a script file\n\
         \n\
         \x20 === File System Commands ===\n\
         \x20 format           - Format the file system\n\
         \x20 mount            - Mount the file system\n\
         \x20 touch <file>     - Create a new file\n\
         \x20 mkdir <dir>      - Create a new directory\n\
         \x20 ls [path]        - List directory contents\n\
         \x20 cd <path>        - Change current directory\n\
         \x20 pwd              - Print working directory\n\
         \x20 rm <file>        - Remove a file\n\
         \x20 cat <file>       - Display file contents\n\
         \x20 echo <text>      - Write text to file (use > for redirection)\n\
         \x20 fsinfo           - Display file system information\n\
         \n\
         \x20 exit             - Shutdown the simulation"
    );
}
