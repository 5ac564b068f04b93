use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{InMemNiftiVolume, IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use once_cell::unsync::OnceCell;

use crate::error::{Error, Result};
use crate::post_proc::SpatialImage;
use crate::{Affine, Idx3d, Zooms};

pub mod orient;
pub mod reader;

use orient::{orient_shape, AxisTransform, SliceAxis};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// nifti 的 `sform_code`/`qform_code`: 与某个外部坐标系对齐.
const XFORM_ALIGNED: i16 = 2;

/// 从 header 中读取维度个数, 以及前三维的形状 (不足三维时补 1).
#[inline]
fn get_dims_from_header(h: &NiftiHeader) -> (usize, Idx3d) {
    let ndim = h.dim[0] as usize;
    let get = |i: usize| if i <= ndim { (h.dim[i] as usize).max(1) } else { 1 };
    (ndim, (get(1), get(2), get(3)))
}

/// 从 header 中读取前三维体素尺寸 (毫米). 不足三维时补 1.
#[inline]
fn get_zooms_from_header(h: &NiftiHeader, ndim: usize) -> Zooms {
    let get = |i: usize| if i <= ndim { h.pixdim[i] as f64 } else { 1.0 };
    (get(1), get(2), get(3))
}

/// 按 nifti 规范求体素坐标到世界坐标的仿射矩阵.
///
/// 优先使用 sform, 其次 qform (四元数 + qfac), 都不存在时退回 analyze 风格的基础仿射
/// (x 轴翻转, 原点居中).
pub fn affine_from_header(h: &NiftiHeader) -> Affine {
    let (ndim, shape) = get_dims_from_header(h);
    let zooms = get_zooms_from_header(h, ndim);

    if h.sform_code > 0 {
        let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
        [
            row(&h.srow_x),
            row(&h.srow_y),
            row(&h.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]
    } else if h.qform_code > 0 {
        let (b, c, d) = (h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let r = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - c * c - b * b,
            ],
        ];
        let z = [zooms.0, zooms.1, zooms.2 * qfac];
        let offset = [
            h.quatern_x as f64,
            h.quatern_y as f64,
            h.quatern_z as f64,
        ];
        let mut ans = [[0.0; 4]; 4];
        for (i, row) in r.iter().enumerate() {
            for j in 0..3 {
                ans[i][j] = row[j] * z[j];
            }
            ans[i][3] = offset[i];
        }
        ans[3][3] = 1.0;
        ans
    } else {
        let half = |n: usize| n.saturating_sub(1) as f64 / 2.0;
        [
            [-zooms.0, 0.0, 0.0, zooms.0 * half(shape.0)],
            [0.0, zooms.1, 0.0, -zooms.1 * half(shape.1)],
            [0.0, 0.0, zooms.2, -zooms.2 * half(shape.2)],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}

/// 以 `base` 为模板构建 header, 写入 3D 仿射矩阵 (sform) 和体素尺寸.
///
/// qform 被清除, 因为重定向后原四元数不再有效.
pub(crate) fn header_for(affine: &Affine, zooms: Zooms, base: Option<&NiftiHeader>) -> NiftiHeader {
    let mut header = base.cloned().unwrap_or_default();
    let row = |r: &[f64; 4]| [r[0] as f32, r[1] as f32, r[2] as f32, r[3] as f32];
    header.srow_x = row(&affine[0]);
    header.srow_y = row(&affine[1]);
    header.srow_z = row(&affine[2]);
    header.sform_code = header.sform_code.max(XFORM_ALIGNED);
    header.qform_code = 0;
    header.pixdim[0] = 1.0;
    header.pixdim[1] = zooms.0 as f32;
    header.pixdim[2] = zooms.1 as f32;
    header.pixdim[3] = zooms.2 as f32;
    header
}

/// 将不超过三维的解码数据补齐为三维 (在末尾追加长度为 1 的维度).
fn pad_to_3d(mut data: ArrayD<f32>, file: &Path) -> Result<Array3<f32>> {
    let ndim = data.ndim();
    while data.ndim() < 3 {
        let n = data.ndim();
        data = data.insert_axis(Axis(n));
    }
    data.into_dimensionality::<Ix3>()
        .map_err(|_| Error::UnsupportedDimensionality {
            ndim,
            file: file.to_owned(),
        })
}

/// 尚未解码的数据来源.
#[derive(Debug, Clone)]
enum VolumeSource {
    /// nifti 文件中的原始字节, 解码时才转换为 `f32`.
    Nifti(InMemNiftiVolume),

    /// 已解码的平面图像, 形状为 `(高, 宽, 1)`.
    Planar(Array3<f32>),
}

/// 体数据: 标量强度数组 + 空间元数据 (体素尺寸, 仿射矩阵, 是否已标准化).
///
/// 数据在第一次需要时才解码. 开启缓存时, 解码结果保存在容器内部,
/// 之后的调用不再重复解码. 缓存不是线程安全的, 同一个 `Volume`
/// 只应被一个 worker 使用.
///
/// 重定向 ([`Self::canonicalize`]) 只记录轴变换, 解码时才真正作用到数据上.
#[derive(Debug, Clone)]
pub struct Volume {
    path: PathBuf,
    header: BoxedHeader,
    ndim: usize,
    raw_shape: Idx3d,
    raw_zooms: Zooms,
    raw_affine: Affine,
    transform: AxisTransform,
    canonical: bool,
    source: VolumeSource,
    cache: OnceCell<Array3<f32>>,
}

impl Volume {
    /// 打开 nii 或 nii.gz 文件. 此时只读取 header 和原始字节, 不解码数据.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let obj = ReaderOptions::new().read_file(path)?;
        let header = Box::new(obj.header().clone());
        Ok(Self::from_parts(
            path,
            header,
            VolumeSource::Nifti(obj.into_volume()),
        ))
    }

    /// 用已解码的平面灰度图像 `data` (形状 `(高, 宽, 1)`) 构建单切片体数据.
    /// 仿射矩阵为单位阵, 体素尺寸为 `zooms` (毫米).
    ///
    /// # 注意
    ///
    /// nifti-1 header 的每一维至多为 `i16::MAX`, 超出时返回
    /// [`Error::DimensionTooLarge`], 而不是截断形状.
    pub fn from_planar<P: AsRef<Path>>(path: P, data: Array3<f32>, zooms: Zooms) -> Result<Self> {
        let path = path.as_ref();
        let (h, w, d) = data.dim();
        let dim = |n: usize| {
            i16::try_from(n)
                .ok()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| Error::DimensionTooLarge {
                    shape: (h, w, d),
                    file: path.to_owned(),
                })
        };
        let mut header = NiftiHeader::default();
        header.dim = [3, dim(h)?, dim(w)?, dim(d)?, 1, 1, 1, 1];
        let identity = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let header = Box::new(header_for(&identity, zooms, Some(&header)));
        Ok(Self::from_parts(path, header, VolumeSource::Planar(data)))
    }

    fn from_parts(path: &Path, header: BoxedHeader, source: VolumeSource) -> Self {
        let (ndim, raw_shape) = get_dims_from_header(&header);
        let raw_zooms = get_zooms_from_header(&header, ndim);
        let raw_affine = affine_from_header(&header);
        Self {
            path: path.to_owned(),
            header,
            ndim,
            raw_shape,
            raw_zooms,
            raw_affine,
            transform: AxisTransform::identity(),
            canonical: false,
            source,
            cache: OnceCell::new(),
        }
    }

    /// 数据来源文件.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 原始 nifti header.
    #[inline]
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// header 中记录的维度个数.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// 确认这是不超过三维的体数据.
    pub fn ensure_volumetric(&self) -> Result<()> {
        if self.ndim > 3 {
            return Err(Error::UnsupportedDimensionality {
                ndim: self.ndim,
                file: self.path.clone(),
            });
        }
        Ok(())
    }

    /// 当前 (可能已重定向的) 数据形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.transform.apply_shape(self.raw_shape)
    }

    /// 当前体素尺寸, 以毫米为单位.
    #[inline]
    pub fn zooms(&self) -> Zooms {
        self.transform.apply_shape(self.raw_zooms)
    }

    /// 当前体素到世界坐标的仿射矩阵.
    #[inline]
    pub fn affine(&self) -> Affine {
        self.transform.apply_affine(&self.raw_affine, self.raw_shape)
    }

    /// 按切片轴定向后的形状 `(高, 宽, 深)`.
    #[inline]
    pub fn oriented_shape(&self, axis: SliceAxis) -> Idx3d {
        orient_shape(self.shape(), axis)
    }

    /// 按切片轴定向后的体素尺寸.
    #[inline]
    pub fn oriented_zooms(&self, axis: SliceAxis) -> Zooms {
        orient_shape(self.zooms(), axis)
    }

    /// 是否已经重定向到最近的标准方向?
    #[inline]
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// 解码结果是否已缓存?
    #[inline]
    pub fn is_cached(&self) -> bool {
        self.cache.get().is_some()
    }

    /// 就地重定向到最近的 RAS+ 标准方向. 多次调用是幂等的.
    pub fn canonicalize(&mut self) {
        let step = AxisTransform::closest_canonical(&self.affine());
        if !step.is_identity() {
            log::debug!(
                "重定向 `{}`: 轴排列 {:?}, 翻转 {:?}",
                self.path.display(),
                step.permutation(),
                step.flips()
            );
            self.transform = self.transform.then(&step);
            self.cache.take();
        }
        self.canonical = true;
    }

    /// 解码完整数据, 并应用当前的轴变换.
    fn decode(&self) -> Result<Array3<f32>> {
        log::debug!("解码 `{}`", self.path.display());
        let raw = match &self.source {
            VolumeSource::Nifti(volume) => {
                pad_to_3d(volume.clone().into_ndarray::<f32>()?, &self.path)?
            }
            VolumeSource::Planar(data) => data.clone(),
        };
        Ok(self
            .transform
            .apply_data(raw)
            .as_standard_layout()
            .into_owned())
    }

    /// 在解码后的 `f32` 数据视图上运行 `op`.
    ///
    /// 如果已有缓存则直接使用; 否则当 `cache` 为 `true` 时解码并填充缓存,
    /// 为 `false` 时只解码一次性数据, 不改变缓存状态.
    pub fn with_fdata<R, F>(&self, cache: bool, op: F) -> Result<R>
    where
        F: FnOnce(ArrayView3<'_, f32>) -> R,
    {
        if let Some(data) = self.cache.get() {
            return Ok(op(data.view()));
        }
        if cache {
            let data = self.cache.get_or_try_init(|| self.decode())?;
            Ok(op(data.view()))
        } else {
            let data = self.decode()?;
            Ok(op(data.view()))
        }
    }

    /// 获得解码后数据的一份拷贝.
    #[inline]
    pub fn fdata(&self, cache: bool) -> Result<Array3<f32>> {
        self.with_fdata(cache, |v| v.to_owned())
    }

    /// 把当前 (可能已重定向的) 数据与仿射矩阵写为 nifti 文件.
    /// 路径以 `.gz` 结尾时自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P, cache: bool) -> Result<()> {
        let header = header_for(&self.affine(), self.zooms(), Some(&self.header));
        self.with_fdata(cache, |data| {
            WriterOptions::new(path.as_ref())
                .reference_header(&header)
                .write_nifti(&data)
        })??;
        Ok(())
    }

    /// 转换为后处理流程使用的空间容器.
    pub fn to_spatial_image(&self, cache: bool) -> Result<SpatialImage<f32>> {
        let data = self.fdata(cache)?;
        Ok(SpatialImage::new(data.into_dyn(), self.affine()))
    }
}
