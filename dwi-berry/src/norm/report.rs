//! 归一化结果摘要.

use crate::Idx4d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 单个回波时间分组的处理摘要.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupSummary {
    /// 回波时间 (秒).
    pub echo_time: f64,

    /// 组内帧索引.
    pub frames: Vec<usize>,

    /// 参与基线平均的 b=0 帧索引.
    pub baselines: Vec<usize>,

    /// 基线为 0 的体素个数. 这些体素在组内所有帧上的输出都是 0.
    pub zero_baseline_voxels: usize,
}

/// 一次归一化的完整摘要.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NormReport {
    /// 体数据形状 (x, y, z, frame). 输入输出相同.
    pub shape: Idx4d,

    /// 预处理时被置 0 的体素值个数.
    pub clamped: usize,

    /// 各分组摘要, 按回波时间升序.
    pub groups: Vec<GroupSummary>,
}

impl NormReport {
    /// 帧数.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.shape.3
    }

    /// 单帧体素个数.
    #[inline]
    pub fn frame_size(&self) -> usize {
        let (x, y, z, _) = self.shape;
        x * y * z
    }

    /// 触发零值保护的 (体素, 帧) 总数.
    pub fn zero_guarded(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.zero_baseline_voxels * g.frames.len())
            .sum()
    }
}
