/// 文件名上限：28 字节的名字字段，NUL 填充
pub const NAME_MAX_LEN: usize = 27;
const NAME_FIELD: usize = NAME_MAX_LEN + 1;

/// 目录项的内存形式。磁盘上固定 32 字节：
/// 28 字节 NUL 填充的名字，后跟小端 u32 inode 编号。
/// 全零的 32 字节表示空槽位（含删除后的墓碑），不会出现在列表里。
#[derive(Debug, Clone)]
pub struct DirEntry {
    name: [u8; NAME_FIELD],
    inode_id: u32,
}

impl DirEntry {
    /// 磁盘上的目录项恒为32字节
    pub const SIZE: usize = NAME_FIELD + 4;

    pub fn new(name: &str, inode_id: u32) -> Self {
        assert!(name.len() <= NAME_MAX_LEN);
        let mut field = [0; NAME_FIELD];
        field[..name.len()].copy_from_slice(name.as_bytes());

        Self {
            name: field,
            inode_id,
        }
    }

    /// 序列化成落盘的 32 字节
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut raw = [0; Self::SIZE];
        raw[..NAME_FIELD].copy_from_slice(&self.name);
        raw[NAME_FIELD..].copy_from_slice(&self.inode_id.to_le_bytes());
        raw
    }

    /// 从落盘的 32 字节解析
    pub fn from_bytes(raw: &[u8]) -> Self {
        assert_eq!(raw.len(), Self::SIZE);
        let mut name = [0; NAME_FIELD];
        name.copy_from_slice(&raw[..NAME_FIELD]);
        let inode_id = u32::from_le_bytes(raw[NAME_FIELD..].try_into().unwrap());

        Self { name, inode_id }
    }

    /// 空槽位以名字为空为准
    #[inline]
    pub fn is_vacant(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().take_while(|&&byte| byte != 0).count();
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    #[inline]
    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }
}
