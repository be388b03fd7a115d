//! 运行配置.
//!
//! 核心流程不读取任何环境变量, 所有路径和常量都经由 [`NormalizeConfig`] 传入.
//! 环境变量仅用于帮助上层构造默认值.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::consts::CLAMP_FLOOR;
use crate::data::OutputGeometry;
use crate::echo::TeGrouping;
use crate::norm::Normalizer;
use crate::protocol::{ProtocolPaths, UnitScales};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 存放协议表目录的环境变量.
pub const PROTOCOL_DIR_ENV: &str = "DWI_PROTOCOL_DIR";

/// 一次归一化运行的全部配置.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NormalizeConfig {
    /// 输入 4D nifti 文件 (涡流校正的结果).
    pub input: PathBuf,

    /// 输出 4D nifti 文件.
    pub output: PathBuf,

    /// 协议表路径.
    pub protocol: ProtocolPaths,

    /// 单位换算.
    pub units: UnitScales,

    /// 小于该值的体素值在归一化前被置 0.
    pub clamp_floor: f32,

    /// 回波时间分组策略.
    pub grouping: TeGrouping,

    /// 输出文件的空间变换.
    pub geometry: OutputGeometry,

    /// 是否使用多线程 (需要 `rayon` feature).
    pub parallel: bool,
}

impl NormalizeConfig {
    /// 使用默认常量创建配置.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q, protocol: ProtocolPaths) -> Self {
        Self {
            input: input.as_ref().to_owned(),
            output: output.as_ref().to_owned(),
            protocol,
            units: UnitScales::default(),
            clamp_floor: CLAMP_FLOOR,
            grouping: TeGrouping::default(),
            geometry: OutputGeometry::default(),
            parallel: false,
        }
    }

    /// 由配置得到归一化参数.
    #[inline]
    pub fn normalizer(&self) -> Normalizer {
        Normalizer {
            clamp_floor: self.clamp_floor,
            grouping: self.grouping,
            parallel: self.parallel,
        }
    }
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取协议表目录.
///
/// 1. 若环境变量 `$DWI_PROTOCOL_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/protocol`;
/// 3. 若无法确定用户主目录, 返回 `None`.
pub fn protocol_dir_from_env_or_home() -> Option<PathBuf> {
    protocol_dir_or_home(env::var_os(PROTOCOL_DIR_ENV))
}

fn protocol_dir_or_home(var: Option<OsString>) -> Option<PathBuf> {
    match var {
        Some(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["protocol"]),
    }
}
