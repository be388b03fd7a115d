//! 回波时间 (TE) 推导与分组.
//!
//! 每帧的回波时间由 `TE = Δ + 2δ + offset` 得到. 默认按计算结果的精确相等分组,
//! 因此不同 `(δ, Δ)` 组合只要算出的 TE 完全相同, 就会落在同一组.
//!
//! # 注意
//!
//! 精确相等对浮点误差非常敏感. 如果协议表来自不同精度的来源, 可以显式使用
//! [`TeGrouping::Rounded`], 但这会改变分组语义, 需要对照参考结果验证.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::error::{NormError, NormResult};
use crate::protocol::Protocol;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// [`TeGrouping::Rounded`] 允许的最大小数位数. 超过 `f64` 的有效精度后取整没有意义.
pub const MAX_TE_DECIMALS: u32 = 15;

/// 回波时间分组策略.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TeGrouping {
    /// 按 `f64` 精确相等分组.
    #[default]
    Exact,

    /// 先四舍五入到小数点后 `decimals` 位 (以秒计), 再按相等分组.
    /// `decimals` 不能超过 [`MAX_TE_DECIMALS`].
    Rounded {
        /// 保留的小数位数.
        decimals: u32,
    },
}

impl TeGrouping {
    /// 检查分组参数. 小数位数超过 [`MAX_TE_DECIMALS`] 时返回 `InvalidGrouping`.
    pub fn check(&self) -> NormResult<()> {
        match *self {
            TeGrouping::Rounded { decimals } if decimals > MAX_TE_DECIMALS => {
                Err(NormError::InvalidGrouping {
                    decimals,
                    max: MAX_TE_DECIMALS,
                })
            }
            _ => Ok(()),
        }
    }

    /// 获取 `te` 所在分组的代表值.
    ///
    /// 调用前应先通过 [`TeGrouping::check`]. 结果可能不是有限数, 由调用者检查.
    pub fn key(&self, te: f64) -> f64 {
        match *self {
            TeGrouping::Exact => te,
            TeGrouping::Rounded { decimals } => {
                let scale = 10f64.powi(decimals.min(MAX_TE_DECIMALS) as i32);
                (te * scale).round() / scale
            }
        }
    }
}

/// 逐帧回波时间, 单位秒.
#[derive(Clone, Debug, PartialEq)]
pub struct EchoTimes(Vec<f64>);

impl EchoTimes {
    /// 由协议推导每帧回波时间.
    pub fn derive(protocol: &Protocol) -> Self {
        let offset = protocol.te_offset();
        let te = protocol
            .big_delta()
            .iter()
            .zip(protocol.small_delta())
            .map(|(&big, &small)| big + 2.0 * small + offset)
            .collect();
        Self(te)
    }

    /// 直接由已知回波时间创建.
    #[inline]
    pub fn from_vec(te: Vec<f64>) -> Self {
        Self(te)
    }

    /// 帧数.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 逐帧回波时间.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// 单个回波时间分组.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TeGroup {
    /// 分组的回波时间 (秒).
    pub echo_time: f64,

    /// 组内所有帧, 升序.
    pub frames: Vec<usize>,

    /// 组内 b=0 帧, 升序. 是 `frames` 的子集.
    pub baselines: Vec<usize>,
}

/// 对帧轴的一个划分: 每帧恰好属于一个分组. 分组按回波时间升序排列.
#[derive(Clone, Debug, PartialEq)]
pub struct EchoGroups {
    groups: Vec<TeGroup>,
    frames: usize,
}

impl EchoGroups {
    /// 由协议推导回波时间并分组.
    pub fn partition(protocol: &Protocol, grouping: TeGrouping) -> NormResult<Self> {
        let te = EchoTimes::derive(protocol);
        Self::from_parts(protocol.weighting(), &te, grouping)
    }

    /// 由逐帧 b 值 (已换算) 和回波时间分组.
    ///
    /// 1. 分组参数不合法时返回 `InvalidGrouping`;
    /// 2. 任一帧的回波时间或其分组代表值不是有限数时返回 `NonFiniteEchoTime`.
    ///
    /// 若两者长度不一致, 则程序 panic.
    pub fn from_parts(weighting: &[f64], te: &EchoTimes, grouping: TeGrouping) -> NormResult<Self> {
        assert_eq!(weighting.len(), te.len(), "b 值与回波时间长度不一致");
        grouping.check()?;

        let mut map: BTreeMap<OrderedFloat<f64>, TeGroup> = BTreeMap::new();
        for (frame, (&b, &t)) in weighting.iter().zip(te.as_slice()).enumerate() {
            let key = grouping.key(t);
            if !key.is_finite() {
                return Err(NormError::NonFiniteEchoTime { frame, value: t });
            }
            let group = map.entry(OrderedFloat(key)).or_insert_with(|| TeGroup {
                echo_time: key,
                frames: Vec::new(),
                baselines: Vec::new(),
            });
            group.frames.push(frame);
            if b == 0.0 {
                group.baselines.push(frame);
            }
        }

        Ok(Self {
            groups: map.into_values().collect(),
            frames: weighting.len(),
        })
    }

    /// 分组个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// 是否没有任何分组 (即帧数为 0).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 被划分的总帧数.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// 按回波时间升序迭代所有分组.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TeGroup> {
        self.groups.iter()
    }

    /// 各分组的回波时间, 升序.
    pub fn echo_times(&self) -> Vec<f64> {
        self.groups.iter().map(|g| g.echo_time).collect()
    }
}
