//! pc 程序：UTF-8 行式指令脚本。
//! 解码只在 `create -f` 时发生一次，PCB 里存的是解码完的指令表，
//! tick 执行纯粹是分发。

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `C`：占一个 tick，无副作用
    Compute,
    /// `R addr`：读虚拟地址，可能缺页
    MemRead { addr: u64 },
    /// `W addr`：写虚拟地址，可能缺页
    MemWrite { addr: u64 },
    /// `S n`：睡 n 个 tick
    Sleep { ticks: u64 },
    /// `DR d`：请求设备
    DevRequest { dev: u32 },
    /// `DD d`：释放设备
    DevRelease { dev: u32 },
    /// `FO [fd] path`：打开文件；缺省 fd 由内核自动分配
    FileOpen { fd: Option<u32>, path: String },
    /// `FR fd n`：读 n 字节，内容无关紧要
    FileRead { fd: u32, size: usize },
    /// `FW fd n`：在当前偏移写 n 个 `'x'`
    FileWrite { fd: u32, size: usize },
    /// `FC fd`：关闭 fd
    FileClose { fd: u32 },
}

pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn load(path: &Path) -> io::Result<Arc<Self>> {
        let text = fs::read_to_string(path)?;
        let program = Self::parse(&text);
        log::info!(
            "Loaded {} instructions from {}",
            program.len(),
            path.display()
        );
        Ok(program)
    }

    /// 空行与 `#` 行是注释；不合法的指令行记日志后跳过
    pub fn parse(text: &str) -> Arc<Self> {
        let instructions = text
            .lines()
            .filter(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .filter_map(|line| {
                let inst = Self::decode(line);
                if inst.is_none() {
                    log::warn!("[Exec] Ignoring invalid instruction: {line}");
                }
                inst
            })
            .collect();

        Arc::new(Self { instructions })
    }

    /// 纯计算程序，`create [n]` 用
    pub fn compute_only(len: usize) -> Arc<Self> {
        Arc::new(Self {
            instructions: vec![Instruction::Compute; len],
        })
    }

    #[inline]
    pub fn get(&self, pc: usize) -> &Instruction {
        &self.instructions[pc]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    fn decode(line: &str) -> Option<Instruction> {
        let mut tokens = line.split_whitespace();
        let op = tokens.next()?;
        let args: Vec<&str> = tokens.collect();

        use Instruction::*;
        let inst = match (op, args.as_slice()) {
            ("C" | "COMPUTE", []) => Compute,
            ("R" | "MEMREAD", [addr]) => MemRead {
                addr: parse_num(addr)?,
            },
            ("W" | "MEMWRITE", [addr]) => MemWrite {
                addr: parse_num(addr)?,
            },
            ("S" | "SLEEP", [ticks]) => Sleep {
                ticks: parse_num(ticks)?,
            },
            ("DR" | "DEVREQ", [dev]) => DevRequest {
                dev: parse_num(dev)? as u32,
            },
            ("DD" | "DEVREL", [dev]) => DevRelease {
                dev: parse_num(dev)? as u32,
            },
            ("FO" | "FILEOPEN", [path]) => FileOpen {
                fd: None,
                path: (*path).to_owned(),
            },
            ("FO" | "FILEOPEN", [fd, path]) => FileOpen {
                fd: Some(parse_num(fd)? as u32),
                path: (*path).to_owned(),
            },
            ("FR" | "FILEREAD", [fd, size]) => FileRead {
                fd: parse_num(fd)? as u32,
                size: parse_num(size)? as usize,
            },
            ("FW" | "FILEWRITE", [fd, size]) => FileWrite {
                fd: parse_num(fd)? as u32,
                size: parse_num(size)? as usize,
            },
            ("FC" | "FILECLOSE", [fd]) => FileClose {
                fd: parse_num(fd)? as u32,
            },
            _ => return None,
        };

        Some(inst)
    }
}

/// 接受十进制与 `0x` 前缀的十六进制
fn parse_num(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}
