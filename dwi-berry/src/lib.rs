#![warn(missing_docs)]

//! 核心库. 对扩散加权 MRI (DWI) 的 4D nifti 文件按回波时间 (TE) 分组,
//! 以每组 b=0 帧的平均图像为基线进行逐体素归一化.
//!
//! 该步骤位于预处理流程的涡流校正之后、分割之前. 去噪、去 Gibbs 振铃、
//! 涡流校正、配准与分割均由外部命令行工具完成, 不在本 crate 范围内.
//!
//! # 注意
//!
//! 1. 所有路径和协议常量均由 [`NormalizeConfig`] 显式传入, 核心流程不依赖任何环境变量.
//! 2. 回波时间默认按精确相等分组, 见 [`echo`] 模块说明.
//! 3. 输入数据不合法 (协议表长度不一致、某组没有 b=0 帧等) 时返回 [`NormError`],
//!   违反调用约定 (如越界帧索引) 时程序 panic.
//!
//! # 开发计划
//!
//! ### 协议表读取与单位换算 ✅
//!
//! b 值 `s/mm²` -> `s/m²` (×1e6), δ/Δ 毫秒 -> 秒 (×0.001).
//!
//! 实现位于 `dwi-berry/src/protocol`.
//!
//! ### 回波时间推导与分组 ✅
//!
//! `TE = Δ + 2δ + 0.001`. 精确相等分组为默认, 四舍五入分组需显式开启.
//!
//! 实现位于 `dwi-berry/src/echo.rs`.
//!
//! ### 基线归一化 ✅
//!
//! 截断 (< 1 置 0), 求组内 b=0 平均, 带零值保护的除法.
//!
//! 实现位于 `dwi-berry/src/norm`.
//!
//! ### nifti 读写 ✅
//!
//! 输出默认使用单位矩阵空间变换, 先写临时文件再重命名.
//!
//! 实现位于 `dwi-berry/src/data`.
//!
//! ### 按组流式处理以降低峰值内存 ⌛️
//!
//! 目前输入、输出与所有基线图像同时驻留内存.

/// 三维索引 (x, y, z).
pub type Idx3d = (usize, usize, usize);

/// 四维索引 (x, y, z, frame).
pub type Idx4d = (usize, usize, usize, usize);

/// 4D DWI nii 文件基础数据结构.
mod data;

pub use data::{DwiVolume, NiftiHeaderAttr, OutputGeometry, MAX_DIM};

pub mod config;
pub mod consts;
pub mod echo;
mod error;
pub mod norm;
pub mod pipeline;
pub mod prelude;
pub mod protocol;

pub use config::NormalizeConfig;
pub use error::{NormError, NormResult};
