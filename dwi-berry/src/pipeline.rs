//! 读取 → 归一化 → 写出.

use std::path::{Path, PathBuf};

use crate::config::NormalizeConfig;
use crate::consts::stages;
use crate::data::DwiVolume;
use crate::error::NormResult;
use crate::norm::NormReport;
use crate::protocol::Protocol;

/// 按 `config` 完成一次归一化.
///
/// 输出路径和协议表先于体数据校验. 任一步骤失败都会立即返回,
/// 输出路径处不会留下任何文件.
pub fn run(config: &NormalizeConfig) -> NormResult<NormReport> {
    DwiVolume::check_output_path(&config.output)?;
    let protocol = Protocol::open(&config.protocol, &config.units)?;
    let volume = DwiVolume::open(&config.input)?;
    let (out, report) = config.normalizer().normalize(volume, &protocol)?;
    out.save(&config.output, config.geometry)?;
    Ok(report)
}

/// 由预处理流程的目录约定推导输出路径:
/// `.../3_eddy_corrected/{file}` -> `.../4_normalized_for_TE/{file}`.
///
/// 如果 `input` 不在 `3_eddy_corrected` 目录下, 返回 `None`.
pub fn stage_output_path<P: AsRef<Path>>(input: P) -> Option<PathBuf> {
    let input = input.as_ref();
    let file = input.file_name()?;
    let stage = input.parent()?;
    if stage.file_name()? != stages::EDDY_CORRECTED {
        return None;
    }
    let mut ans = stage.parent()?.join(stages::NORMALIZED_FOR_TE);
    ans.push(file);
    Some(ans)
}
