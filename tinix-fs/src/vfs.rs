//! # 索引节点层
//!
//! 位于内存的虚拟文件系统，确立了文件系统的操作逻辑：
//! 通过多个 [`Inode`] 形成文件树。
//!
//! 每个目录的前两项是 `.` 与 `..`；根目录的 `..` 指向自身。
//! 删除目录项就地清零成墓碑，空槽位会被后续的创建复用，
//! 因此目录尺寸只在追加到末尾时增长。
//!
//! 每个**修改**操作返回前都会把块缓存写回设备，
//! 这样命令之间的突然退出也不会破坏超级块计数与位图的一致。

use std::sync::Arc;

use spin::Mutex;

use crate::layout::{DirEntry, DiskInode, InodeKind, NAME_MAX_LEN};
use crate::{FsError, FsResult, TinixFileSystem, MAX_FILE_SIZE};

pub struct Inode {
    inode_id: u32,
    /// inode所在块
    block_id: usize,
    /// inode的块内偏移
    block_offset: usize,
    fs: Arc<Mutex<TinixFileSystem>>,
}

/// `read_dir` 返回的目录项视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub inode_id: u32,
    pub kind: InodeKind,
    pub size: u32,
}

impl Inode {
    #[inline]
    pub(crate) fn new(
        inode_id: u32,
        block_id: u32,
        block_offset: usize,
        fs: Arc<Mutex<TinixFileSystem>>,
    ) -> Self {
        Self {
            inode_id,
            block_id: block_id as usize,
            block_offset,
            fs,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.inode_id
    }

    pub fn kind(&self) -> InodeKind {
        let mut fs = self.fs.lock();
        self.on_disk(&mut fs, |disk_inode, _| disk_inode.kind)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    pub fn size(&self) -> u32 {
        let mut fs = self.fs.lock();
        self.on_disk(&mut fs, |disk_inode, _| disk_inode.size)
    }

    /// 在当前目录下创建子 inode；目录子项自带 `.`/`..` 和一个数据块
    pub fn create(&self, name: &str, kind: InodeKind) -> FsResult<Self> {
        if name.len() > NAME_MAX_LEN {
            return Err(FsError::NameTooLong(name.to_owned()));
        }

        let mut fs = self.fs.lock();

        // 确认没有已创建的同名项
        if self.get(&mut fs, name).is_some() {
            return Err(FsError::AlreadyExists(name.to_owned()));
        }

        let new_inode_id = fs.alloc_inode()?;

        // 目录需要一个数据块来存放 `.`/`..`
        let dir_block = if kind == InodeKind::Directory {
            match fs.alloc_data() {
                Ok(block_id) => Some(block_id),
                Err(e) => {
                    fs.dealloc_inode(new_inode_id);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let (new_inode_block_id, new_inode_block_offset) = fs.disk_inode_pos(new_inode_id);
        fs.cache_mut()
            .get(new_inode_block_id as usize)
            .lock()
            .map_mut(new_inode_block_offset, |new_inode: &mut DiskInode| {
                new_inode.init(kind);
                if let Some(block_id) = dir_block {
                    new_inode.expand_to(2 * DirEntry::SIZE as u32, vec![block_id]);
                }
            });

        if let Some(block_id) = dir_block {
            let dot = DirEntry::new(".", new_inode_id);
            let dotdot = DirEntry::new("..", self.inode_id);
            fs.cache_mut()
                .get(block_id as usize)
                .lock()
                .map_mut(0, |data: &mut [u8; 2 * DirEntry::SIZE]| {
                    data[..DirEntry::SIZE].copy_from_slice(&dot.to_bytes());
                    data[DirEntry::SIZE..].copy_from_slice(&dotdot.to_bytes());
                });
        }

        if let Err(e) = self.add_entry(&mut fs, DirEntry::new(name, new_inode_id)) {
            // 父目录扩容失败，撤销这次创建
            if let Some(block_id) = dir_block {
                fs.dealloc_data(block_id);
            }
            fs.dealloc_inode(new_inode_id);
            fs.sync_all();
            return Err(e);
        }

        fs.sync_all();

        Ok(Self::new(
            new_inode_id,
            new_inode_block_id,
            new_inode_block_offset,
            self.fs.clone(),
        ))
    }

    /// 根据文件名获取 inode
    pub fn find(&self, name: &str) -> Option<Self> {
        let mut fs = self.fs.lock();
        let inode_id = self.get(&mut fs, name)?;
        let (block_id, block_offset) = fs.disk_inode_pos(inode_id);
        Some(Self::new(inode_id, block_id, block_offset, self.fs.clone()))
    }

    /// 列出目录内容，`.`/`..` 在前，墓碑不出现
    pub fn read_dir(&self) -> FsResult<Vec<DirEntryInfo>> {
        let mut fs = self.fs.lock();

        let entries = self.on_disk(&mut fs, |disk_inode, fs| {
            if !disk_inode.is_dir() {
                return Err(FsError::NotADirectory(String::new()));
            }

            let mut entries = Vec::new();
            for offset in (0..disk_inode.size as usize).step_by(DirEntry::SIZE) {
                let dir_entry = entry_at(disk_inode, offset, fs);
                if !dir_entry.is_vacant() {
                    entries.push((dir_entry.name().to_owned(), dir_entry.inode_id()));
                }
            }
            Ok(entries)
        })?;

        // 子项的类型与尺寸逐个读出；不可嵌套读 inode 表的块
        let infos = entries
            .into_iter()
            .map(|(name, inode_id)| {
                let (block_id, block_offset) = fs.disk_inode_pos(inode_id);
                let cache = fs.cache_mut().get(block_id as usize);
                let cache = cache.lock();
                let (kind, size) =
                    cache.map(block_offset, |child: &DiskInode| (child.kind, child.size));
                DirEntryInfo {
                    name,
                    inode_id,
                    kind,
                    size,
                }
            })
            .collect();

        Ok(infos)
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let mut fs = self.fs.lock();
        self.on_disk(&mut fs, |disk_inode, fs| {
            disk_inode.read_at(offset, buf, fs.cache_mut())
        })
    }

    /// 按需分配数据块并写入；超出直接索引上限的尾部被静默截断。
    /// 空间不足时整个写入失败，不会留下半截扩容。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        let mut fs = self.fs.lock();

        let end = (offset + buf.len()).min(MAX_FILE_SIZE);
        if offset >= end {
            return Ok(0);
        }
        let buf = &buf[..end - offset];

        self.expand_to(&mut fs, end as u32)?;
        let written = self.on_disk_mut(&mut fs, |disk_inode, fs| {
            disk_inode.write_at(offset, buf, fs.cache_mut())
        });
        fs.sync_all();

        Ok(written)
    }

    /// 截断到空文件，释放全部数据块
    pub fn clear(&self) {
        let mut fs = self.fs.lock();
        self.internal_clear(&mut fs);
        fs.sync_all();
    }

    /// 删除目录项并释放其 inode 与数据块；目录不可删除
    pub fn unlink(&self, name: &str) -> FsResult<()> {
        let mut fs = self.fs.lock();

        let inode_id = self
            .get(&mut fs, name)
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;

        let (block_id, block_offset) = fs.disk_inode_pos(inode_id);
        let child = Self::new(inode_id, block_id, block_offset, self.fs.clone());
        if child.on_disk(&mut fs, |disk_inode, _| disk_inode.is_dir()) {
            return Err(FsError::NotAFile(name.to_owned()));
        }

        self.remove_entry(&mut fs, name);
        child.internal_clear(&mut fs);
        child.on_disk_mut(&mut fs, |disk_inode, _| disk_inode.links = 0);
        fs.dealloc_inode(inode_id);

        fs.sync_all();
        Ok(())
    }
}

impl Inode {
    /// 读取对磁盘的映射并处理
    fn on_disk<V>(
        &self,
        fs: &mut TinixFileSystem,
        f: impl FnOnce(&DiskInode, &mut TinixFileSystem) -> V,
    ) -> V {
        let cache = fs.cache_mut().get(self.block_id);
        let cache = cache.lock();
        cache.map(self.block_offset, |disk_inode: &DiskInode| f(disk_inode, fs))
    }

    /// 以某种方式修改对磁盘的映射
    fn on_disk_mut<V>(
        &self,
        fs: &mut TinixFileSystem,
        f: impl FnOnce(&mut DiskInode, &mut TinixFileSystem) -> V,
    ) -> V {
        let cache = fs.cache_mut().get(self.block_id);
        let mut cache = cache.lock();
        cache.map_mut(self.block_offset, |disk_inode: &mut DiskInode| {
            f(disk_inode, fs)
        })
    }

    /// 在目录下通过名字获取目录项的inode ID
    fn get(&self, fs: &mut TinixFileSystem, name: &str) -> Option<u32> {
        self.on_disk(fs, |disk_inode, fs| {
            assert!(disk_inode.is_dir());

            for offset in (0..disk_inode.size as usize).step_by(DirEntry::SIZE) {
                let dir_entry = entry_at(disk_inode, offset, fs);
                if !dir_entry.is_vacant() && dir_entry.name() == name {
                    return Some(dir_entry.inode_id());
                }
            }

            None
        })
    }

    /// 写入目录项：优先复用墓碑槽位，否则追加到目录末尾
    fn add_entry(&self, fs: &mut TinixFileSystem, dir_entry: DirEntry) -> FsResult<()> {
        let slot = self.on_disk(fs, |disk_inode, fs| {
            assert!(disk_inode.is_dir());
            let size = disk_inode.size as usize;

            for offset in (0..size).step_by(DirEntry::SIZE) {
                if entry_at(disk_inode, offset, fs).is_vacant() {
                    return offset;
                }
            }
            size
        });

        let size = self.on_disk(fs, |disk_inode, _| disk_inode.size as usize);
        if slot == size {
            self.expand_to(fs, (size + DirEntry::SIZE) as u32)?;
        }
        self.on_disk_mut(fs, |disk_inode, fs| {
            disk_inode.write_at(slot, &dir_entry.to_bytes(), fs.cache_mut());
        });
        Ok(())
    }

    /// 目录项清零成墓碑
    fn remove_entry(&self, fs: &mut TinixFileSystem, name: &str) {
        self.on_disk_mut(fs, |disk_inode, fs| {
            assert!(disk_inode.is_dir());

            for offset in (0..disk_inode.size as usize).step_by(DirEntry::SIZE) {
                let dir_entry = entry_at(disk_inode, offset, fs);
                if !dir_entry.is_vacant() && dir_entry.name() == name {
                    disk_inode.write_at(offset, &[0; DirEntry::SIZE], fs.cache_mut());
                    return;
                }
            }
        });
    }

    /// 先把所需的新块全部分配到手，再一次性扩容
    fn expand_to(&self, fs: &mut TinixFileSystem, larger_size: u32) -> FsResult<()> {
        let size = self.on_disk(fs, |disk_inode, _| disk_inode.size);
        if larger_size <= size {
            return Ok(());
        }
        if larger_size as usize > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }

        let needed =
            DiskInode::count_data_block(larger_size) - DiskInode::count_data_block(size);
        let mut new_blocks = Vec::with_capacity(needed);
        for _ in 0..needed {
            match fs.alloc_data() {
                Ok(block_id) => new_blocks.push(block_id),
                Err(e) => {
                    for block_id in new_blocks {
                        fs.dealloc_data(block_id);
                    }
                    return Err(e);
                }
            }
        }

        self.on_disk_mut(fs, |disk_inode, _| {
            disk_inode.expand_to(larger_size, new_blocks)
        });
        Ok(())
    }

    fn internal_clear(&self, fs: &mut TinixFileSystem) {
        let data_blocks = self.on_disk_mut(fs, |disk_inode, _| disk_inode.clear());
        for data_block in data_blocks {
            fs.dealloc_data(data_block);
        }
    }
}

/// 解析目录数据中 `offset` 处的目录项
fn entry_at(dir: &DiskInode, offset: usize, fs: &mut TinixFileSystem) -> DirEntry {
    let mut raw = [0; DirEntry::SIZE];
    assert_eq!(dir.read_at(offset, &mut raw, fs.cache_mut()), DirEntry::SIZE);
    DirEntry::from_bytes(&raw)
}
