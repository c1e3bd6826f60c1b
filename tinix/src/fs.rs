//! # 已挂载文件系统的门面
//!
//! 持有块设备与（挂载后的）文件系统实例，负责路径解析、当前目录，
//! 以及 shell 命令和进程文件指令所需的全部操作。
//! 布局校验失败时由内核门面决定重新格式化（见 `kernel.rs`）。

use std::sync::Arc;

use spin::Mutex;
use tinix_fs::{
    BlockDevice, DirEntryInfo, FsError, FsResult, Inode, InodeKind, SuperBlockInfo,
    TinixFileSystem,
};

use crate::config::SWAP_START_BLOCK;
use crate::path::VirtPath;

pub struct FsManager {
    device: Arc<dyn BlockDevice>,
    fs: Option<Arc<Mutex<TinixFileSystem>>>,
    /// 绝对路径，非根时不以 `/` 结尾
    cwd: String,
}

impl FsManager {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            fs: None,
            cwd: String::from("/"),
        }
    }

    /// 格式化并直接进入挂载状态，幂等
    pub fn format(&mut self) {
        log::info!("[FS] Formatting file system...");
        let fs = TinixFileSystem::format(self.device.clone(), SWAP_START_BLOCK as u32);

        let meta = fs.lock().meta();
        log::info!("[FS] Format complete!");
        log::info!(
            "[FS] Total blocks: {}, Total inodes: {}",
            meta.total_blocks,
            meta.total_inodes
        );

        self.fs = Some(fs);
        self.cwd = String::from("/");
    }

    /// 挂载；魔数或布局不符时报错，调用方决定是否重新格式化
    pub fn mount(&mut self) -> FsResult<()> {
        log::info!("[FS] Mounting file system...");
        match TinixFileSystem::open(self.device.clone(), SWAP_START_BLOCK as u32) {
            Ok(fs) => {
                let meta = fs.lock().meta();
                log::info!("[FS] Mount successful!");
                log::info!(
                    "[FS] Free blocks: {}, Free inodes: {}",
                    meta.free_blocks,
                    meta.free_inodes
                );
                self.fs = Some(fs);
                self.cwd = String::from("/");
                Ok(())
            }
            Err(e) => {
                log::info!("[FS] Mount failed: {e}");
                Err(e)
            }
        }
    }

    #[inline]
    pub fn is_mounted(&self) -> bool {
        self.fs.is_some()
    }

    pub fn mkdir(&self, path: &str) -> FsResult<()> {
        let (parent, name, canonical) = self.resolve_parent(path)?;
        let dir = parent.create(&name, InodeKind::Directory)?;
        log::info!("[FS] Created directory: {canonical} (inode={})", dir.id());
        Ok(())
    }

    pub fn touch(&self, path: &str) -> FsResult<()> {
        let (parent, name, canonical) = self.resolve_parent(path)?;
        let file = parent.create(&name, InodeKind::File)?;
        log::info!("[FS] Created file: {canonical} (inode={})", file.id());
        Ok(())
    }

    /// 只删文件；目录由 vfs 层拒绝
    pub fn rm(&self, path: &str) -> FsResult<()> {
        let (parent, name, canonical) = self.resolve_parent(path)?;
        parent.unlink(&name)?;
        log::info!("[FS] Removed file: {canonical}");
        Ok(())
    }

    /// 返回规范化路径与目录项清单
    pub fn ls(&self, path: &str) -> FsResult<(String, Vec<DirEntryInfo>)> {
        let canonical = path.canonicalize(&self.cwd);
        let inode = self.resolve(&canonical)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(canonical));
        }
        Ok((canonical, inode.read_dir()?))
    }

    pub fn cd(&mut self, path: &str) -> FsResult<()> {
        let canonical = path.canonicalize(&self.cwd);
        let inode = self.resolve(&canonical)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(canonical));
        }

        self.cwd = canonical;
        log::info!("[FS] Changed directory to: {}", self.cwd);
        Ok(())
    }

    #[inline]
    pub fn pwd(&self) -> &str {
        &self.cwd
    }

    /// 整个文件的字节，原样交给 stdout
    pub fn cat(&self, path: &str) -> FsResult<Vec<u8>> {
        let canonical = path.canonicalize(&self.cwd);
        let inode = self.resolve(&canonical)?;
        if inode.is_dir() {
            return Err(FsError::NotAFile(canonical));
        }

        let mut buf = vec![0; inode.size() as usize];
        let read = inode.read_at(0, &mut buf);
        buf.truncate(read);
        Ok(buf)
    }

    /// `echo text > path`：没有就创建，截断后写入 text 加换行
    pub fn echo(&self, text: &str, path: &str) -> FsResult<()> {
        let inode = self.open_or_create(path)?;
        inode.clear();

        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        inode.write_at(0, &data)?;
        Ok(())
    }

    /// 进程 `FO`：打开（必要时创建）文件，返回 inode 编号
    pub fn open_for_process(&self, path: &str) -> FsResult<u32> {
        Ok(self.open_or_create(path)?.id())
    }

    /// 进程 `FR`：按 inode 编号在指定偏移读 n 字节，返回实际读到的字节数
    pub fn read_inode_at(&self, inode_id: u32, offset: usize, len: usize) -> FsResult<usize> {
        let fs = self.require_mounted()?;
        let inode = TinixFileSystem::inode(fs, inode_id);
        let mut buf = vec![0; len];
        Ok(inode.read_at(offset, &mut buf))
    }

    /// 进程 `FW`：按 inode 编号在指定偏移写入，文件按需扩展
    pub fn write_inode_at(&self, inode_id: u32, offset: usize, buf: &[u8]) -> FsResult<usize> {
        let fs = self.require_mounted()?;
        let inode = TinixFileSystem::inode(fs, inode_id);
        inode.write_at(offset, buf)
    }

    /// 超级块快照
    pub fn meta(&self) -> FsResult<SuperBlockInfo> {
        let fs = self.require_mounted()?;
        let meta = fs.lock().meta();
        Ok(meta)
    }

    /// 位图里空闲位的个数 `(数据块, inode)`，一致性校验用
    pub fn bitmap_zeros(&self) -> FsResult<(usize, usize)> {
        let fs = self.require_mounted()?;
        let zeros = fs.lock().bitmap_zeros();
        Ok(zeros)
    }

    /// `fsinfo`：超级块一览，打到 stderr
    pub fn fsinfo(&self) -> FsResult<()> {
        let meta = self.meta()?;

        eprintln!("========== SuperBlock ==========");
        eprintln!("Magic: {:#x}", meta.magic);
        eprintln!("Total blocks: {}", meta.total_blocks);
        eprintln!("Total inodes: {}", meta.total_inodes);
        eprintln!("Free blocks: {}", meta.free_blocks);
        eprintln!("Free inodes: {}", meta.free_inodes);
        eprintln!("Data blocks start: {}", meta.data_area_start);
        eprintln!("===============================");
        Ok(())
    }

    /// 退出前把缓存落盘
    pub fn sync(&self) {
        if let Some(fs) = &self.fs {
            fs.lock().sync_all();
        }
    }
}

impl FsManager {
    fn require_mounted(&self) -> FsResult<&Arc<Mutex<TinixFileSystem>>> {
        self.fs.as_ref().ok_or_else(|| {
            log::info!("[FS] File system not mounted");
            FsError::NotMounted
        })
    }

    /// 从根目录逐级解析一条**已规范化**的绝对路径
    fn resolve(&self, canonical: &str) -> FsResult<Inode> {
        let fs = self.require_mounted()?;
        let mut inode = TinixFileSystem::root_inode(fs);

        for component in canonical.split('/').filter(|s| !s.is_empty()) {
            if !inode.is_dir() {
                return Err(FsError::NotADirectory(canonical.to_owned()));
            }
            inode = inode
                .find(component)
                .ok_or_else(|| FsError::NotFound(canonical.to_owned()))?;
        }

        Ok(inode)
    }

    /// 解析出父目录，返回 `(父目录, 名字, 规范化全路径)`
    fn resolve_parent(&self, path: &str) -> FsResult<(Inode, String, String)> {
        let canonical = path.canonicalize(&self.cwd);
        let (parent_path, name) = canonical
            .parent_file()
            .ok_or_else(|| FsError::AlreadyExists(canonical.clone()))?;

        let parent = self.resolve(parent_path)?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory(parent_path.to_owned()));
        }

        Ok((parent, name.to_owned(), canonical.clone()))
    }

    fn open_or_create(&self, path: &str) -> FsResult<Inode> {
        let canonical = path.canonicalize(&self.cwd);
        match self.resolve(&canonical) {
            Ok(inode) => {
                if inode.is_dir() {
                    return Err(FsError::NotAFile(canonical));
                }
                Ok(inode)
            }
            Err(FsError::NotFound(_)) => {
                let (parent, name, _) = self.resolve_parent(&canonical)?;
                parent.create(&name, InodeKind::File)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DISK_NUM_BLOCKS;
    use crate::test_util::MemDisk;
    use tinix_fs::DATA_AREA_START;

    fn mounted() -> FsManager {
        let mut fs = FsManager::new(MemDisk::new(DISK_NUM_BLOCKS));
        fs.format();
        fs
    }

    #[test]
    fn cd_and_pwd_follow_dot_components() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/a/b").unwrap();

        fs.cd("/a/b").unwrap();
        assert_eq!(fs.pwd(), "/a/b");
        fs.cd("..").unwrap();
        assert_eq!(fs.pwd(), "/a");
        fs.cd(".").unwrap();
        assert_eq!(fs.pwd(), "/a");

        // 相对路径以 cwd 为基准
        fs.cd("b").unwrap();
        assert_eq!(fs.pwd(), "/a/b");
    }

    #[test]
    fn echo_then_cat_roundtrip() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        fs.cd("/a").unwrap();
        fs.touch("f").unwrap();
        fs.echo("hello", "f").unwrap();

        assert_eq!(fs.cat("/a/f").unwrap(), b"hello\n");
        assert_eq!(fs.cat("f").unwrap(), b"hello\n");
    }

    #[test]
    fn echo_truncates_previous_content() {
        let fs = mounted();
        fs.echo("a long first line", "/f").unwrap();
        fs.echo("hi", "/f").unwrap();
        assert_eq!(fs.cat("/f").unwrap(), b"hi\n");
    }

    #[test]
    fn superblock_accounting_matches_shell_sequence() {
        let fs = mounted();
        let meta = fs.meta().unwrap();
        let (d, i) = (
            (SWAP_START_BLOCK - DATA_AREA_START) as u32,
            meta.total_inodes,
        );

        let counts = |fs: &FsManager| {
            let meta = fs.meta().unwrap();
            (meta.free_blocks, meta.free_inodes)
        };

        assert_eq!(counts(&fs), (d - 1, i - 1));
        fs.mkdir("/a").unwrap();
        assert_eq!(counts(&fs), (d - 2, i - 2));
        fs.touch("/a/f").unwrap();
        assert_eq!(counts(&fs), (d - 2, i - 3));
        fs.echo("hi", "/a/f").unwrap();
        assert_eq!(counts(&fs), (d - 3, i - 3));
        fs.rm("/a/f").unwrap();
        assert_eq!(counts(&fs), (d - 2, i - 2));

        // 超级块计数与位图一致
        let (zero_blocks, zero_inodes) = fs.bitmap_zeros().unwrap();
        assert_eq!(counts(&fs), (zero_blocks as u32, zero_inodes as u32));
    }

    #[test]
    fn ls_lists_dot_entries_first() {
        let mut fs = mounted();
        fs.mkdir("/a").unwrap();
        fs.touch("/a/f").unwrap();
        fs.cd("/a").unwrap();

        let (path, entries) = fs.ls(".").unwrap();
        assert_eq!(path, "/a");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "f"]);
        assert_eq!(entries[0].kind, InodeKind::Directory);
        assert_eq!(entries[2].kind, InodeKind::File);
        // 目录尺寸是目录项的整数倍
        assert_eq!(entries[0].size % 32, 0);
    }

    #[test]
    fn errors_surface_as_fs_error_kinds() {
        let mut fs = mounted();
        fs.touch("/f").unwrap();

        assert!(matches!(fs.cat("/none"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.cd("/f"), Err(FsError::NotADirectory(_))));
        assert!(matches!(fs.cat("/"), Err(FsError::NotAFile(_))));
        assert!(matches!(fs.mkdir("/f"), Err(FsError::AlreadyExists(_))));
        assert!(matches!(
            fs.touch("/none/f"),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(fs.rm("/nope"), Err(FsError::NotFound(_))));

        let unmounted = FsManager::new(MemDisk::new(DISK_NUM_BLOCKS));
        assert!(matches!(unmounted.cat("/f"), Err(FsError::NotMounted)));
    }

    #[test]
    fn process_file_io_by_inode() {
        let fs = mounted();
        let inode = fs.open_for_process("/data").unwrap();

        assert_eq!(fs.write_inode_at(inode, 0, b"xxxxx").unwrap(), 5);
        assert_eq!(fs.read_inode_at(inode, 0, 3).unwrap(), 3);
        // EOF 处读不到
        assert_eq!(fs.read_inode_at(inode, 5, 3).unwrap(), 0);
        assert_eq!(fs.cat("/data").unwrap(), b"xxxxx");
    }
}
