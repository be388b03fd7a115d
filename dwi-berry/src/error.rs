//! 运行时错误.

use std::path::PathBuf;

use thiserror::Error;

use crate::Idx4d;

/// 归一化流程中所有可恢复的运行时错误.
///
/// 所有错误都是致命的: 一旦出现, 流程立即终止且不会写出任何结果文件.
#[derive(Debug, Error)]
pub enum NormError {
    /// 协议表长度互不相等, 或与体数据的帧数不一致.
    #[error("metadata shape mismatch: {what} has {found} entries, expected {expected}")]
    MetadataShapeMismatch {
        /// 出问题的序列名.
        what: &'static str,
        /// 期望长度.
        expected: usize,
        /// 实际长度.
        found: usize,
    },

    /// 某个回波时间分组内没有 b=0 帧, 无法计算基线.
    #[error("echo time group TE = {0} s has no zero-weighting frame")]
    EmptyBaselineGroup(f64),

    /// 回波时间取整位数超出 `f64` 能可靠表示的范围.
    #[error("cannot round echo times to {decimals} decimals, at most {max} are supported")]
    InvalidGrouping {
        /// 请求的小数位数.
        decimals: u32,
        /// 允许的最大位数.
        max: u32,
    },

    /// 某帧的回波时间 (或其分组代表值) 不是有限数.
    #[error("frame {frame}: echo time {value} s is not a finite number")]
    NonFiniteEchoTime {
        /// 帧索引.
        frame: usize,
        /// 出错的值.
        value: f64,
    },

    /// 读取协议表时的底层 I/O 错误.
    #[error("cannot read metadata table `{}`", path.display())]
    MetadataRead {
        /// 协议表路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 协议表中存在非法数值.
    #[error("`{}` line {line}: `{token}` is not a finite number", path.display())]
    MetadataParse {
        /// 协议表路径.
        path: PathBuf,
        /// 行号, 从 1 开始.
        line: usize,
        /// 出错的字段.
        token: String,
    },

    /// 打开 nifti 文件失败.
    #[error("cannot load volume `{}`", path.display())]
    VolumeLoad {
        /// nifti 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// nifti 文件不是 4D 的.
    #[error("volume `{}` is {ndim}D, expected 4D (x, y, z, frame)", path.display())]
    NotFourDimensional {
        /// nifti 文件路径.
        path: PathBuf,
        /// 实际维数.
        ndim: usize,
    },

    /// 体数据某一维超出 NIfTI-1 `dim` 字段的范围.
    #[error("volume shape {shape:?} exceeds {max} voxels along some axis")]
    DimensionOverflow {
        /// 体数据形状.
        shape: Idx4d,
        /// 单个维度的上限.
        max: usize,
    },

    /// 输出路径不是 `.nii` / `.nii.gz` 文件.
    #[error("output `{}` must end with `.nii` or `.nii.gz`", .0.display())]
    UnsupportedOutput(PathBuf),

    /// 写出 nifti 文件失败.
    #[error("cannot write volume `{}`", path.display())]
    VolumeWrite {
        /// nifti 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// 将临时文件移动到输出路径失败.
    #[error("cannot move finished volume into `{}`", path.display())]
    VolumePersist {
        /// 输出路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },
}

/// 归一化运行时结果.
pub type NormResult<T> = Result<T, NormError>;

#[cfg(test)]
mod tests {
    use super::NormError;

    #[test]
    fn test_messages_carry_context() {
        let e = NormError::MetadataShapeMismatch {
            what: "small delta table",
            expected: 376,
            found: 375,
        };
        assert_eq!(
            e.to_string(),
            "metadata shape mismatch: small delta table has 375 entries, expected 376"
        );

        let e = NormError::EmptyBaselineGroup(0.0525);
        assert!(e.to_string().contains("0.0525"));

        let e = NormError::MetadataParse {
            path: "a/b.txt".into(),
            line: 3,
            token: "x1".to_string(),
        };
        assert_eq!(e.to_string(), "`a/b.txt` line 3: `x1` is not a finite number");

        let e = NormError::UnsupportedOutput("out/result.hdr".into());
        assert_eq!(
            e.to_string(),
            "output `out/result.hdr` must end with `.nii` or `.nii.gz`"
        );
    }
}
