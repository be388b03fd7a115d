//! 通用常量.
//!
//! 这些常量与采集协议绑定. 若协议改变, 应通过 [`UnitScales`](crate::protocol::UnitScales)
//! 覆盖, 而不是修改此处.

/// 单位换算.
pub mod units {
    /// b 值从 `s/mm²` 换算到国际单位 `s/m²` 的倍率.
    pub const B_VALUE_TO_SI: f64 = 1e6;

    /// 时间从毫秒换算到秒的倍率.
    ///
    /// 注意不是 `0.01`.
    pub const MS_TO_S: f64 = 1e-3;

    /// 回波时间公式 `TE = Δ + 2δ + offset` 中的固定偏移, 以秒为单位.
    pub const TE_OFFSET_S: f64 = 0.001;
}

/// 体素值小于该下限的会在归一化之前被置为 0.
///
/// 去噪和去 Gibbs 振铃之后会出现负值和极小的正值, 若直接作为分母会得到巨大的比值.
pub const CLAMP_FLOOR: f32 = 1.0;

/// 协议表文件的默认文件名.
pub mod files {
    /// b 值表 (FSL `.bval` 格式).
    pub const BVALS: &str = "all.bval";

    /// 小 delta (δ) 表, 单位毫秒.
    pub const SMALL_DELTA: &str = "small_delta.txt";

    /// 大 delta (Δ) 表, 单位毫秒.
    pub const BIG_DELTA: &str = "big_delta.txt";
}

/// 预处理流程的阶段目录名.
pub mod stages {
    /// 涡流校正结果目录, 即归一化的输入.
    pub const EDDY_CORRECTED: &str = "3_eddy_corrected";

    /// 归一化结果目录.
    pub const NORMALIZED_FOR_TE: &str = "4_normalized_for_TE";
}
