use std::sync::Arc;

use spin::Mutex;

use crate::{
    BlockDevice, FsError, InodeKind, TinixFileSystem, BLOCK_SIZE, DATA_AREA_START, MAGIC,
    MAX_FILE_SIZE, MAX_INODES,
};

/// 测试用内存块设备
struct MemDisk(Mutex<Vec<u8>>);

impl MemDisk {
    fn new(num_blocks: usize) -> Arc<Self> {
        Arc::new(Self(Mutex::new(vec![0; num_blocks * BLOCK_SIZE])))
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let data = self.0.lock();
        buf.copy_from_slice(&data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut data = self.0.lock();
        data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
    }
}

const TOTAL: u32 = 64;

fn free_counts(fs: &Arc<Mutex<TinixFileSystem>>) -> (u32, u32) {
    let meta = fs.lock().meta();
    (meta.free_blocks, meta.free_inodes)
}

#[test]
fn format_initializes_superblock() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let meta = fs.lock().meta();

    assert_eq!(meta.magic, MAGIC);
    assert_eq!(meta.total_blocks, TOTAL);
    assert_eq!(meta.total_inodes, MAX_INODES as u32);
    // 根目录占据一个 inode 和一个数据块
    assert_eq!(meta.free_blocks, TOTAL - DATA_AREA_START as u32 - 1);
    assert_eq!(meta.free_inodes, MAX_INODES as u32 - 1);
}

#[test]
fn root_has_dot_entries() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    let entries = root.read_dir().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, ".");
    assert_eq!(entries[0].inode_id, 0);
    assert_eq!(entries[1].name, "..");
    assert_eq!(entries[1].inode_id, 0);
    assert_eq!(root.size(), 64);
}

#[test]
fn mkdir_wires_dot_entries_to_parent() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    let a = root.create("a", InodeKind::Directory).unwrap();
    let entries = a.read_dir().unwrap();
    assert_eq!(entries[0].name, ".");
    assert_eq!(entries[0].inode_id, a.id());
    assert_eq!(entries[1].name, "..");
    assert_eq!(entries[1].inode_id, root.id());
}

#[test]
fn superblock_accounting_sequence() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);
    let d = TOTAL - DATA_AREA_START as u32;
    let i = MAX_INODES as u32;

    assert_eq!(free_counts(&fs), (d - 1, i - 1));

    let a = root.create("a", InodeKind::Directory).unwrap();
    assert_eq!(free_counts(&fs), (d - 2, i - 2));

    let f = a.create("f", InodeKind::File).unwrap();
    assert_eq!(free_counts(&fs), (d - 2, i - 3));

    f.write_at(0, b"hi\n").unwrap();
    assert_eq!(free_counts(&fs), (d - 3, i - 3));

    a.unlink("f").unwrap();
    assert_eq!(free_counts(&fs), (d - 2, i - 2));
}

#[test]
fn free_counters_match_bitmaps() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    let a = root.create("a", InodeKind::Directory).unwrap();
    let f = a.create("f", InodeKind::File).unwrap();
    f.write_at(0, &[7; 2 * BLOCK_SIZE + 1]).unwrap();
    root.create("g", InodeKind::File).unwrap();
    a.unlink("f").unwrap();

    let (free_blocks, free_inodes) = free_counts(&fs);
    let (zero_blocks, zero_inodes) = fs.lock().bitmap_zeros();
    assert_eq!(free_blocks as usize, zero_blocks);
    assert_eq!(free_inodes as usize, zero_inodes);
}

#[test]
fn write_read_roundtrip() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    let f = root.create("hello", InodeKind::File).unwrap();
    assert_eq!(f.write_at(0, b"hello\n").unwrap(), 6);
    assert_eq!(f.size(), 6);

    let mut buf = [0; 16];
    let read = f.read_at(0, &mut buf);
    assert_eq!(&buf[..read], b"hello\n");
    // EOF 之后读不到数据
    assert_eq!(f.read_at(6, &mut buf), 0);
}

#[test]
fn truncate_then_rewrite() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);
    let before = free_counts(&fs);

    let f = root.create("f", InodeKind::File).unwrap();
    f.write_at(0, &[b'a'; BLOCK_SIZE + 1]).unwrap();
    f.clear();
    assert_eq!(f.size(), 0);
    assert_eq!(free_counts(&fs).0, before.0);

    f.write_at(0, b"short\n").unwrap();
    let mut buf = [0; 8];
    let read = f.read_at(0, &mut buf);
    assert_eq!(&buf[..read], b"short\n");
}

#[test]
fn persistence_across_mounts() {
    let disk = MemDisk::new(TOTAL as usize);

    {
        let fs = TinixFileSystem::format(disk.clone(), TOTAL);
        let root = TinixFileSystem::root_inode(&fs);
        let a = root.create("a", InodeKind::Directory).unwrap();
        let f = a.create("f", InodeKind::File).unwrap();
        f.write_at(0, b"hello\n").unwrap();
    }

    let fs = TinixFileSystem::open(disk, TOTAL).unwrap();
    let root = TinixFileSystem::root_inode(&fs);
    let f = root.find("a").unwrap().find("f").unwrap();
    let mut buf = [0; 16];
    let read = f.read_at(0, &mut buf);
    assert_eq!(&buf[..read], b"hello\n");

    let (free_blocks, free_inodes) = free_counts(&fs);
    let (zero_blocks, zero_inodes) = fs.lock().bitmap_zeros();
    assert_eq!(free_blocks as usize, zero_blocks);
    assert_eq!(free_inodes as usize, zero_inodes);
}

#[test]
fn open_rejects_bad_magic_and_layout() {
    let disk = MemDisk::new(96);

    // 全零镜像：魔数不对
    assert!(matches!(
        TinixFileSystem::open(disk.clone(), 96),
        Err(FsError::BadMagic(0))
    ));

    // 合法镜像但几何不同：布局不匹配
    TinixFileSystem::format(disk.clone(), TOTAL);
    assert!(matches!(
        TinixFileSystem::open(disk.clone(), 96),
        Err(FsError::LayoutMismatch { blocks: TOTAL, .. })
    ));

    assert!(TinixFileSystem::open(disk, TOTAL).is_ok());
}

#[test]
fn duplicate_names_rejected() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    root.create("f", InodeKind::File).unwrap();
    assert!(matches!(
        root.create("f", InodeKind::File),
        Err(FsError::AlreadyExists(_))
    ));
    assert!(matches!(
        root.create("f", InodeKind::Directory),
        Err(FsError::AlreadyExists(_))
    ));
}

#[test]
fn tombstoned_entries_are_hidden_and_reused() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    root.create("a", InodeKind::File).unwrap();
    root.create("b", InodeKind::File).unwrap();
    root.create("c", InodeKind::File).unwrap();
    let size = root.size();

    root.unlink("b").unwrap();
    let names: Vec<_> = root
        .read_dir()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, [".", "..", "a", "c"]);
    assert!(root.find("b").is_none());

    // 新建复用墓碑槽位，目录尺寸不变
    root.create("d", InodeKind::File).unwrap();
    assert_eq!(root.size(), size);
    let names: Vec<_> = root
        .read_dir()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, [".", "..", "a", "d", "c"]);
}

#[test]
fn unlink_refuses_directories() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    root.create("a", InodeKind::Directory).unwrap();
    assert!(matches!(root.unlink("a"), Err(FsError::NotAFile(_))));
    assert!(matches!(root.unlink("nope"), Err(FsError::NotFound(_))));
}

#[test]
fn write_is_capped_at_direct_limit() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    let f = root.create("big", InodeKind::File).unwrap();
    let written = f.write_at(0, &vec![b'x'; MAX_FILE_SIZE + 123]).unwrap();
    assert_eq!(written, MAX_FILE_SIZE);
    assert_eq!(f.size() as usize, MAX_FILE_SIZE);

    // 已到上限，后续写入一个字节也放不下
    assert_eq!(f.write_at(MAX_FILE_SIZE, b"y").unwrap(), 0);
}

#[test]
fn out_of_space_fails_whole_write() {
    // 数据区只有 2 块：根目录用掉 1 块
    let fs = TinixFileSystem::format(MemDisk::new(9), 9);
    let root = TinixFileSystem::root_inode(&fs);
    let f = root.create("f", InodeKind::File).unwrap();

    let before = free_counts(&fs);
    assert!(matches!(
        f.write_at(0, &[0; BLOCK_SIZE + 1]),
        Err(FsError::NoFreeBlocks)
    ));
    // 失败的写入不遗留半截扩容
    assert_eq!(free_counts(&fs), before);
    assert_eq!(f.size(), 0);

    assert_eq!(f.write_at(0, &[0; BLOCK_SIZE]).unwrap(), BLOCK_SIZE);
}

#[test]
fn overlong_names_are_rejected() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    // 27 字节封顶，28 字节拒绝
    root.create(&"a".repeat(27), InodeKind::File).unwrap();
    assert!(matches!(
        root.create(&"b".repeat(28), InodeKind::File),
        Err(FsError::NameTooLong(_))
    ));
}

#[test]
fn out_of_inodes() {
    let fs = TinixFileSystem::format(MemDisk::new(TOTAL as usize), TOTAL);
    let root = TinixFileSystem::root_inode(&fs);

    for i in 0..MAX_INODES as u32 - 1 {
        root.create(&format!("f{i}"), InodeKind::File).unwrap();
    }
    assert_eq!(free_counts(&fs).1, 0);
    assert!(matches!(
        root.create("straw", InodeKind::File),
        Err(FsError::NoFreeInodes)
    ));
}
