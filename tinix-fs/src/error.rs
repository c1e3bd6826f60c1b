use thiserror::Error;

/// 文件系统各层向上传播的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("name already exists: {0}")]
    AlreadyExists(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("out of free data blocks")]
    NoFreeBlocks,

    #[error("out of free inodes")]
    NoFreeInodes,

    #[error("file size limit reached")]
    FileTooLarge,

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("file system not mounted")]
    NotMounted,

    #[error("bad magic number {0:#x}")]
    BadMagic(u32),

    #[error("superblock layout mismatch (blocks={blocks}, inodes={inodes})")]
    LayoutMismatch { blocks: u32, inodes: u32 },
}

pub type FsResult<T> = Result<T, FsError>;
