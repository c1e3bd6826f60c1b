use crate::task::Pid;

/// 页框表项：谁的哪一页住在这里。
/// 页框表是「页框 F 里住着谁」的权威；页表是「(pid, vpage) 在哪」的权威，
/// 二者用编号互相指认，每次迁移时同步。
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInfo {
    pub occupant: Option<(Pid, usize)>,
}

pub struct FrameTable {
    frames: Vec<FrameInfo>,
}

impl FrameTable {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: vec![FrameInfo::default(); num_frames],
        }
    }

    /// 取编号最小的空闲页框
    pub fn alloc(&mut self, pid: Pid, vpage: usize) -> Option<usize> {
        let frame = self.frames.iter().position(|f| f.occupant.is_none())?;
        self.frames[frame].occupant = Some((pid, vpage));
        Some(frame)
    }

    /// 置换时改写占用者
    pub fn assign(&mut self, frame: usize, pid: Pid, vpage: usize) {
        self.frames[frame].occupant = Some((pid, vpage));
    }

    pub fn free(&mut self, frame: usize) {
        assert!(self.frames[frame].occupant.is_some(), "frame {frame} double free");
        self.frames[frame].occupant = None;
    }

    #[inline]
    pub fn get(&self, frame: usize) -> FrameInfo {
        self.frames[frame]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FrameInfo> {
        self.frames.iter()
    }

    #[inline]
    pub fn free_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.occupant.is_none()).count()
    }
}
