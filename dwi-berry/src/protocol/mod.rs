//! 采集协议元信息: 每帧的 b 值, 小 delta (δ) 和大 delta (Δ).
//!
//! 三张表由外部提供, 读入后立即换算到国际单位制.

use std::path::{Path, PathBuf};

use crate::consts::{files, units};
use crate::error::{NormError, NormResult};

mod table;

pub use table::{parse_table, read_table};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 单位换算参数. 默认值见 [`crate::consts::units`].
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitScales {
    /// b 值换算倍率.
    pub b_to_si: f64,

    /// 毫秒到秒的换算倍率.
    pub ms_to_s: f64,

    /// 回波时间固定偏移 (秒).
    pub te_offset_s: f64,
}

impl Default for UnitScales {
    #[inline]
    fn default() -> Self {
        Self {
            b_to_si: units::B_VALUE_TO_SI,
            ms_to_s: units::MS_TO_S,
            te_offset_s: units::TE_OFFSET_S,
        }
    }
}

/// 三张协议表的路径.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProtocolPaths {
    /// b 值表.
    pub bvals: PathBuf,

    /// 小 delta 表.
    pub small_delta: PathBuf,

    /// 大 delta 表.
    pub big_delta: PathBuf,
}

impl ProtocolPaths {
    /// 使用 `dir` 下的默认文件名 (见 [`crate::consts::files`]).
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            bvals: dir.join(files::BVALS),
            small_delta: dir.join(files::SMALL_DELTA),
            big_delta: dir.join(files::BIG_DELTA),
        }
    }
}

/// 已换算到国际单位制的逐帧协议信息.
///
/// 三个序列长度一定相等, 即帧数.
#[derive(Clone, Debug, PartialEq)]
pub struct Protocol {
    weighting: Vec<f64>,
    small_delta: Vec<f64>,
    big_delta: Vec<f64>,
    te_offset: f64,
}

impl Protocol {
    /// 从 `paths` 读取三张协议表, 并按 `scales` 换算单位.
    pub fn open(paths: &ProtocolPaths, scales: &UnitScales) -> NormResult<Self> {
        let bvals = read_table(&paths.bvals)?;
        let small = read_table(&paths.small_delta)?;
        let big = read_table(&paths.big_delta)?;
        log::debug!(
            "protocol tables: {} b-values, {} small deltas, {} big deltas",
            bvals.len(),
            small.len(),
            big.len()
        );
        Self::from_raw(bvals, small, big, scales)
    }

    /// 由原始单位 (`s/mm²`, 毫秒) 的三个序列创建.
    ///
    /// 若三者长度不一致, 返回 `MetadataShapeMismatch`.
    pub fn from_raw(
        bvals: Vec<f64>,
        small_delta: Vec<f64>,
        big_delta: Vec<f64>,
        scales: &UnitScales,
    ) -> NormResult<Self> {
        let n = bvals.len();
        check_len("small delta table", n, small_delta.len())?;
        check_len("big delta table", n, big_delta.len())?;

        let rescale = |v: Vec<f64>, k: f64| -> Vec<f64> { v.into_iter().map(|x| x * k).collect() };
        Ok(Self {
            weighting: rescale(bvals, scales.b_to_si),
            small_delta: rescale(small_delta, scales.ms_to_s),
            big_delta: rescale(big_delta, scales.ms_to_s),
            te_offset: scales.te_offset_s,
        })
    }

    /// 帧数.
    #[inline]
    pub fn len(&self) -> usize {
        self.weighting.len()
    }

    /// 是否不含任何帧.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weighting.is_empty()
    }

    /// 每帧 b 值, `s/m²`.
    #[inline]
    pub fn weighting(&self) -> &[f64] {
        &self.weighting
    }

    /// 每帧小 delta, 秒.
    #[inline]
    pub fn small_delta(&self) -> &[f64] {
        &self.small_delta
    }

    /// 每帧大 delta, 秒.
    #[inline]
    pub fn big_delta(&self) -> &[f64] {
        &self.big_delta
    }

    /// 回波时间固定偏移, 秒.
    #[inline]
    pub fn te_offset(&self) -> f64 {
        self.te_offset
    }

    /// 第 `frame` 帧是否为 b=0 帧.
    ///
    /// 当 `frame` 越界时 panic.
    #[inline]
    pub fn is_baseline(&self, frame: usize) -> bool {
        self.weighting[frame] == 0.0
    }

    /// 检查协议帧数是否与体数据帧数 `frames` 一致.
    #[inline]
    pub fn check_frames(&self, frames: usize) -> NormResult<()> {
        check_len("protocol (frame count of volume)", frames, self.len())
    }
}

#[inline]
fn check_len(what: &'static str, expected: usize, found: usize) -> NormResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(NormError::MetadataShapeMismatch {
            what,
            expected,
            found,
        })
    }
}
