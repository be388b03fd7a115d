//! 按回波时间分组的 b=0 基线归一化.
//!
//! 算法流程依次为:
//!
//! 1. 将所有小于 `clamp_floor` 的体素值置为 0;
//! 2. 按回波时间划分帧轴 (见 [`EchoGroups`]);
//! 3. 对每个分组, 对组内 b=0 帧逐体素求平均, 得到基线图像 `B`;
//! 4. 组内每一帧 (包括 b=0 帧自身) 逐体素除以 `B`. 当 `B == 0` 时结果为 0.
//!
//! 分组是帧轴的划分, 所以输出的每一帧恰好被写入一次.

use itertools::Itertools;
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, ArrayViewMut3, ArrayViewMut4, Axis};
use ndarray::{ShapeBuilder, Zip};

use crate::consts::CLAMP_FLOOR;
use crate::data::{DwiVolume, NiftiHeaderAttr};
use crate::echo::{EchoGroups, TeGroup, TeGrouping};
use crate::error::{NormError, NormResult};
use crate::protocol::Protocol;

mod report;

pub use report::{GroupSummary, NormReport};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 将 `data` 中所有小于 `floor` 的值置为 0. 返回被修改的个数.
///
/// 该操作在所有分组、求平均和除法之前进行.
pub fn clamp_below(mut data: ArrayViewMut4<f32>, floor: f32) -> usize {
    let mut cnt = 0usize;
    data.iter_mut().filter(|p| **p < floor).for_each(|p| {
        cnt += 1;
        *p = 0.0;
    });
    cnt
}

/// 对 `frames` 给出的所有帧逐体素求平均, 以 `f64` 累加.
///
/// 若 `frames` 为空则返回 `None`. 若存在越界帧索引, 则程序 panic.
pub fn baseline_mean(data: ArrayView4<f32>, frames: &[usize]) -> Option<Array3<f64>> {
    if frames.is_empty() {
        return None;
    }
    let (x, y, z, _) = data.dim();
    let mut acc = Array3::<f64>::zeros((x, y, z));
    for &t in frames {
        Zip::from(&mut acc)
            .and(data.index_axis(Axis(3), t))
            .for_each(|a, &v| *a += v as f64);
    }
    let n = frames.len() as f64;
    acc.mapv_inplace(|a| a / n);
    Some(acc)
}

/// `out = frame / baseline`, 其中基线为 0 的体素输出 0 (而不是 NaN / inf).
///
/// 三者形状必须相同, 否则程序 panic.
pub fn divide_guarded(frame: ArrayView3<f32>, baseline: ArrayView3<f64>, out: ArrayViewMut3<f32>) {
    Zip::from(out)
        .and(frame)
        .and(baseline)
        .for_each(|o, &v, &b| {
            *o = if b != 0.0 { (v as f64 / b) as f32 } else { 0.0 };
        });
}

/// 每个分组的基线, 以及帧到分组的映射.
struct Plan {
    baselines: Vec<Array3<f64>>,
    owner: Vec<usize>,
    summaries: Vec<GroupSummary>,
}

impl Plan {
    /// 按回波时间升序计算所有分组的基线.
    ///
    /// 遇到没有 b=0 帧的分组时返回 `EmptyBaselineGroup`.
    fn new(data: ArrayView4<f32>, groups: &EchoGroups) -> NormResult<Self> {
        assert_eq!(data.len_of(Axis(3)), groups.frame_count(), "分组帧数与体数据不一致");

        let mut owner = vec![usize::MAX; groups.frame_count()];
        let mut baselines = Vec::with_capacity(groups.len());
        let mut summaries = Vec::with_capacity(groups.len());
        for (k, g) in groups.iter().enumerate() {
            g.frames.iter().for_each(|&t| owner[t] = k);

            let b = baseline_mean(data.view(), &g.baselines)
                .ok_or(NormError::EmptyBaselineGroup(g.echo_time))?;
            let summary = summarize(g, &b);
            baselines.push(b);
            summaries.push(summary);
        }
        debug_assert!(owner.iter().all(|&k| k < groups.len()));

        Ok(Self {
            baselines,
            owner,
            summaries,
        })
    }
}

fn summarize(g: &TeGroup, baseline: &Array3<f64>) -> GroupSummary {
    let zero_baseline_voxels = baseline.iter().filter(|b| **b == 0.0).count();
    log::info!(
        "TE = {:.6} s: {} frames, {} baseline frames",
        g.echo_time,
        g.frames.len(),
        g.baselines.len()
    );
    log::debug!(
        "TE = {:.6} s: frames [{}], baselines [{}], {} zero baseline voxels",
        g.echo_time,
        g.frames.iter().join(", "),
        g.baselines.iter().join(", "),
        zero_baseline_voxels
    );
    if zero_baseline_voxels == baseline.len() {
        log::warn!(
            "TE = {:.6} s: baseline is zero everywhere, the whole group normalizes to 0",
            g.echo_time
        );
    }
    GroupSummary {
        echo_time: g.echo_time,
        frames: g.frames.clone(),
        baselines: g.baselines.clone(),
        zero_baseline_voxels,
    }
}

/// 与 `data` 内存布局相同的全零数组.
fn zeros_like(data: &ArrayView4<f32>) -> Array4<f32> {
    if data.is_standard_layout() {
        Array4::zeros(data.raw_dim())
    } else {
        Array4::zeros(data.raw_dim().f())
    }
}

/// 对 (已截断的) `data` 按 `groups` 做基线归一化, 返回与 `data` 同形状的新数组.
///
/// 任一分组没有 b=0 帧时返回 `EmptyBaselineGroup`.
/// 若 `groups` 的帧数与 `data` 不一致, 则程序 panic.
pub fn normalize_by_te(
    data: ArrayView4<f32>,
    groups: &EchoGroups,
) -> NormResult<(Array4<f32>, Vec<GroupSummary>)> {
    let plan = Plan::new(data.view(), groups)?;
    let mut out = zeros_like(&data);
    out.axis_iter_mut(Axis(3))
        .enumerate()
        .for_each(|(t, o)| {
            let b = &plan.baselines[plan.owner[t]];
            divide_guarded(data.index_axis(Axis(3), t), b.view(), o);
        });
    Ok((out, plan.summaries))
}

/// 借助 `rayon`, 并行地运行 [`normalize_by_te`]. 结果与串行版本逐位相同.
#[cfg(feature = "rayon")]
pub fn par_normalize_by_te(
    data: ArrayView4<f32>,
    groups: &EchoGroups,
) -> NormResult<(Array4<f32>, Vec<GroupSummary>)> {
    let plan = Plan::new(data.view(), groups)?;
    let mut out = zeros_like(&data);
    out.axis_iter_mut(Axis(3))
        .into_par_iter()
        .enumerate()
        .for_each(|(t, o)| {
            let b = &plan.baselines[plan.owner[t]];
            divide_guarded(data.index_axis(Axis(3), t), b.view(), o);
        });
    Ok((out, plan.summaries))
}

/// 归一化参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Normalizer {
    /// 小于该值的体素值在归一化前被置 0.
    pub clamp_floor: f32,

    /// 回波时间分组策略.
    pub grouping: TeGrouping,

    /// 是否使用多线程. 仅在 `rayon` feature 打开时生效.
    pub parallel: bool,
}

impl Default for Normalizer {
    #[inline]
    fn default() -> Self {
        Self {
            clamp_floor: CLAMP_FLOOR,
            grouping: TeGrouping::Exact,
            parallel: false,
        }
    }
}

impl Normalizer {
    /// 对 `volume` 做完整的归一化, 返回沿用其 header 的新图像和处理摘要.
    ///
    /// 1. `protocol` 帧数与 `volume` 不一致时返回 `MetadataShapeMismatch`;
    /// 2. 分组失败时返回 `InvalidGrouping` 或 `NonFiniteEchoTime`;
    /// 3. 任一分组没有 b=0 帧时返回 `EmptyBaselineGroup`.
    ///
    /// 出错时不会产生任何输出.
    pub fn normalize(
        &self,
        mut volume: DwiVolume,
        protocol: &Protocol,
    ) -> NormResult<(DwiVolume, NormReport)> {
        protocol.check_frames(volume.len_frames())?;
        let groups = EchoGroups::partition(protocol, self.grouping)?;
        log::info!(
            "{} frames in {} echo time groups",
            groups.frame_count(),
            groups.len()
        );

        let clamped = clamp_below(volume.data_mut(), self.clamp_floor);
        log::debug!("{clamped} samples below {} set to 0", self.clamp_floor);

        let (out, groups) = self.run(volume.data(), &groups)?;
        let report = NormReport {
            shape: volume.data().dim(),
            clamped,
            groups,
        };
        Ok((volume.with_data(out), report))
    }

    #[cfg(feature = "rayon")]
    fn run(
        &self,
        data: ArrayView4<f32>,
        groups: &EchoGroups,
    ) -> NormResult<(Array4<f32>, Vec<GroupSummary>)> {
        if self.parallel {
            par_normalize_by_te(data, groups)
        } else {
            normalize_by_te(data, groups)
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn run(
        &self,
        data: ArrayView4<f32>,
        groups: &EchoGroups,
    ) -> NormResult<(Array4<f32>, Vec<GroupSummary>)> {
        if self.parallel {
            log::warn!("built without the `rayon` feature, normalizing sequentially");
        }
        normalize_by_te(data, groups)
    }
}
