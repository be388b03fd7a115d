use std::fs;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView, ArrayView3, ArrayViewMut, ArrayViewMut3, Axis, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{NormError, NormResult};
use crate::{Idx3d, Idx4d};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// NIfTI `sform_code`: 与另一幅图像对齐的坐标系.
const NIFTI_XFORM_ALIGNED_ANAT: i16 = 2;

/// NIfTI `qform_code`: 未知坐标系.
const NIFTI_XFORM_UNKNOWN: i16 = 0;

/// NIfTI-1 `dim` 为有符号 16 位整数, 每个维度不能超过该值.
pub const MAX_DIM: usize = i16::MAX as usize;

/// 支持写出的文件后缀. 较长的后缀在前.
const OUTPUT_SUFFIXES: [&str; 2] = [".nii.gz", ".nii"];

/// 写出 nifti 文件时使用的空间变换.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutputGeometry {
    /// 单位矩阵 (体素大小为 1, 无旋转平移), 丢弃输入的方向信息.
    #[default]
    Identity,

    /// 沿用输入文件 header 中的方向和体素大小.
    Inherit,
}

/// 从 header 读取 (x, y, z, frame) 形状.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx4d {
    let [_, x, y, z, t, ..] = h.dim;
    (x as usize, y as usize, z as usize, t as usize)
}

/// 4D nii 文件 header 的共用属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状 (x, y, z, frame).
    #[inline]
    fn shape(&self) -> Idx4d {
        get_shape_from_header(self.header())
    }

    /// 获取单帧的空间形状 (x, y, z).
    #[inline]
    fn frame_shape(&self) -> Idx3d {
        let (x, y, z, _) = self.shape();
        (x, y, z)
    }

    /// 获取帧数.
    #[inline]
    fn len_frames(&self) -> usize {
        self.shape().3
    }

    /// 获取单帧体素个数.
    #[inline]
    fn frame_size(&self) -> usize {
        let (x, y, z) = self.frame_shape();
        x * y * z
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (x0, y0, z0, t0): &Idx4d) -> bool {
        let (x, y, z, t) = self.shape();
        *x0 < x && *y0 < y && *z0 < z && *t0 < t
    }

    /// 获取单个体素分辨率 (x, y, z), 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, x, y, z, ..] = self.header().pixdim;
        [x as f64, y as f64, z as f64]
    }

    /// 获取 sform 仿射矩阵的前三行 (行优先).
    #[inline]
    fn sform(&self) -> [[f32; 4]; 3] {
        let h = self.header();
        [h.srow_x, h.srow_y, h.srow_z]
    }
}

/// 将形状转换为 header 的 `dim` 字段. 任一维超过 [`MAX_DIM`] 时返回 `DimensionOverflow`.
fn checked_dim(shape: Idx4d) -> NormResult<[u16; 8]> {
    let (x, y, z, t) = shape;
    if [x, y, z, t].iter().any(|&n| n > MAX_DIM) {
        return Err(NormError::DimensionOverflow {
            shape,
            max: MAX_DIM,
        });
    }
    Ok([4, x as u16, y as u16, z as u16, t as u16, 1, 1, 1])
}

/// 生成空间变换为单位矩阵的 header.
fn identity_header(dim: [u16; 8]) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    header.dim = dim;
    header.pixdim = [1.0; 8];
    header.sform_code = NIFTI_XFORM_ALIGNED_ANAT;
    header.qform_code = NIFTI_XFORM_UNKNOWN;
    header.srow_x = [1.0, 0.0, 0.0, 0.0];
    header.srow_y = [0.0, 1.0, 0.0, 0.0];
    header.srow_z = [0.0, 0.0, 1.0, 0.0];
    (header.quatern_b, header.quatern_c, header.quatern_d) = (0.0, 0.0, 0.0);
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header
}

/// nii 格式 4D 扩散加权图像, 包括 header 和体素值. 体素值以 `f32` 保存.
///
/// 数据按照 nifti 惯例以 (x, y, z, frame) 访问.
#[derive(Debug, Clone)]
pub struct DwiVolume {
    header: BoxedHeader,
    data: Array4<f32>,
}

impl NiftiHeaderAttr for DwiVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx4d> for DwiVolume {
    type Output = f32;

    #[inline]
    fn index(&self, (x, y, z, t): Idx4d) -> &Self::Output {
        &self.data[[x, y, z, t]]
    }
}

impl IndexMut<Idx4d> for DwiVolume {
    #[inline]
    fn index_mut(&mut self, (x, y, z, t): Idx4d) -> &mut Self::Output {
        &mut self.data[[x, y, z, t]]
    }
}

impl DwiVolume {
    /// 打开 nii / nii.gz 格式的 4D 图像. `path` 为 nifti 文件的本地路径.
    ///
    /// 体素值会应用 header 中的 `scl_slope` / `scl_inter` 并转换为 `f32`.
    /// 非 4D 文件返回 `NotFourDimensional`.
    pub fn open<P: AsRef<Path>>(path: P) -> NormResult<Self> {
        let path = path.as_ref();
        let load_err = |source| NormError::VolumeLoad {
            path: path.to_owned(),
            source,
        };

        let obj = ReaderOptions::new().read_file(path).map_err(load_err)?;
        let mut header = Box::new(obj.header().clone());
        let data = obj.into_volume().into_ndarray::<f32>().map_err(load_err)?;

        let ndim = data.ndim();
        let data = data
            .into_dimensionality::<Ix4>()
            .map_err(|_| NormError::NotFourDimensional {
                path: path.to_owned(),
                ndim,
            })?;

        // 数据已按 scl_slope / scl_inter 换算.
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;

        log::info!("loaded `{}` with shape {:?}", path.display(), data.dim());
        Ok(Self { header, data })
    }

    /// 由裸数据直接创建. header 的空间变换为单位矩阵.
    ///
    /// 任一维超过 [`MAX_DIM`] 时返回 `DimensionOverflow`.
    pub fn from_array(data: Array4<f32>) -> NormResult<Self> {
        let header = Box::new(identity_header(checked_dim(data.dim())?));
        Ok(Self { header, data })
    }

    /// 沿用 `self` 的 header, 以 `data` 为体素值创建新的图像.
    ///
    /// 若 `data` 形状与 `self` 不一致, 则程序 panic.
    pub fn with_data(&self, data: Array4<f32>) -> Self {
        assert_eq!(self.data.dim(), data.dim(), "新数据形状与原图像不一致");
        Self {
            header: self.header.clone(),
            data,
        }
    }

    /// 检查 `path` 能否作为输出路径, 即是否以 `.nii` / `.nii.gz` 结尾.
    pub fn check_output_path<P: AsRef<Path>>(path: P) -> NormResult<()> {
        let path = path.as_ref();
        partial_path(path)
            .map(|_| ())
            .ok_or_else(|| NormError::UnsupportedOutput(path.to_owned()))
    }

    /// 保存为 nifti 文件. 路径须以 `.nii` 或 `.nii.gz` 结尾, 后者写出压缩文件.
    ///
    /// 数据先写入同目录下的临时文件, 成功后再重命名到 `path`,
    /// 因此失败时 `path` 处不会残留不完整的文件, 目录中也不会残留临时文件.
    pub fn save<P: AsRef<Path>>(&self, path: P, geometry: OutputGeometry) -> NormResult<()> {
        let path = path.as_ref();
        let tmp = partial_path(path).ok_or_else(|| NormError::UnsupportedOutput(path.to_owned()))?;
        let header = match geometry {
            OutputGeometry::Identity => identity_header(checked_dim(self.data.dim())?),
            OutputGeometry::Inherit => (*self.header).clone(),
        };

        if let Err(source) = WriterOptions::new(&tmp)
            .reference_header(&header)
            .write_nifti(&self.data)
        {
            let _ = fs::remove_file(&tmp);
            return Err(NormError::VolumeWrite {
                path: path.to_owned(),
                source,
            });
        }
        fs::rename(&tmp, path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            NormError::VolumePersist {
                path: path.to_owned(),
                source,
            }
        })?;

        log::info!("saved `{}` ({geometry:?} geometry)", path.display());
        Ok(())
    }

    /// 获取第 `t` 帧的 3D 视图.
    ///
    /// 当 `t` 越界时 panic.
    #[inline]
    pub fn frame_at(&self, t: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(3), t)
    }

    /// 获取第 `t` 帧的 3D 可变视图.
    ///
    /// 当 `t` 越界时 panic.
    #[inline]
    pub fn frame_at_mut(&mut self, t: usize) -> ArrayViewMut3<'_, f32> {
        self.data.index_axis_mut(Axis(3), t)
    }

    /// 获取能按升序迭代所有帧的迭代器.
    #[inline]
    pub fn frame_iter(&self) -> impl ExactSizeIterator<Item = ArrayView3<'_, f32>> {
        self.data.axis_iter(Axis(3))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix4> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix4> {
        self.data.view_mut()
    }
}

/// 与 `path` 同目录的临时文件路径, 后缀与 `path` 相同, 以便写出时沿用压缩设置.
///
/// `nifti` 写出时会去掉并重新添加后缀, 所以临时文件名除后缀外不能含有 `.`.
/// `path` 不以 `.nii` / `.nii.gz` 结尾时返回 `None`.
fn partial_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let suffix = OUTPUT_SUFFIXES
        .into_iter()
        .find(|s| name.len() > s.len() && name.ends_with(s))?;
    let stem = name[..name.len() - suffix.len()].replace('.', "_");
    Some(path.with_file_name(format!(".partial-{}-{stem}{suffix}", std::process::id())))
}
