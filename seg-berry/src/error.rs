//! 运行时错误.
//!
//! 所有错误都是致命的: 库内部不做任何重试, 也不会在出错后继续处理损坏的数据.

use std::path::PathBuf;

use crate::Idx3d;

/// 本 crate 的错误类型.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 文件扩展名不受支持 (包括无扩展名, 以及显式排除的 OME 显微镜多页格式).
    #[error("文件 `{}` 的扩展名 `{extension}` 不受支持, 仅支持 .nii, .nii.gz, .png, .tif, .tiff, .jpg 和 .jpeg", file.display())]
    UnsupportedFormat {
        /// 识别出的扩展名 (可能为空).
        extension: String,
        /// 文件路径.
        file: PathBuf,
    },

    /// 体数据维度超过 3.
    #[error("文件 `{}` 为 {ndim} 维数据, 目前仅支持不超过 3 维的体数据", file.display())]
    UnsupportedDimensionality {
        /// 实际维度.
        ndim: usize,
        /// 文件路径.
        file: PathBuf,
    },

    /// 某一维长度超过 nifti-1 header 的上限 (`i16::MAX`).
    #[error("`{}` 的形状 {shape:?} 超出 nifti-1 可表示的范围 (每一维至多 {})", file.display(), i16::MAX)]
    DimensionTooLarge {
        /// 数据形状.
        shape: Idx3d,
        /// 文件路径.
        file: PathBuf,
    },

    /// 平面图像转换时元数据缺少 `PixelSize`.
    #[error("元数据中缺少 `PixelSize`, 无法确定平面图像 `{}` 的体素尺寸", file.display())]
    MissingSpacingMetadata {
        /// 待转换的文件路径.
        file: PathBuf,
    },

    /// `PixelSize` 的类型或长度不受支持.
    #[error("`PixelSize` 格式不受支持: `{0}`. 必须为 2D [X, Y] 数组, 3D [X, Y, Z] 数组或标量")]
    InvalidSpacingMetadata(String),

    /// 没有任何输入通道.
    #[error("样本对至少需要一个输入通道")]
    NoInput,

    /// 各输入通道的 (定向后) 形状不一致.
    #[error("输入通道形状不一致: {0:?}")]
    InconsistentInputShapes(Vec<Idx3d>),

    /// 各真值标注 (跨类别和标注者) 的 (定向后) 形状不一致.
    #[error("真值标注形状不一致: {0:?}")]
    InconsistentLabelShapes(Vec<Idx3d>),

    /// 两个对象形状不一致: 输入与真值, 或者预测与掩码.
    #[error("形状不一致: {left:?} != {right:?}")]
    ShapeMismatch {
        /// 左侧形状.
        left: Vec<usize>,
        /// 右侧形状.
        right: Vec<usize>,
    },

    /// 切片轴不是 0, 1, 2 之一.
    #[error("非法切片轴 `{0}`, 必须为 0 (sagittal), 1 (coronal) 或 2 (axial)")]
    InvalidSliceAxis(usize),

    /// 切片索引越界.
    #[error("切片索引 {index} 越界, 深度方向共 {len} 个切片")]
    SliceOutOfRange {
        /// 请求的切片索引.
        index: usize,
        /// 深度方向切片个数.
        len: usize,
    },

    /// 逐切片处理时指定的轴超过数组维度.
    #[error("轴 {axis} 越界, 数组只有 {ndim} 维")]
    AxisOutOfRange {
        /// 请求的轴.
        axis: usize,
        /// 数组维度.
        ndim: usize,
    },

    /// 结构元维数与数组维数不一致.
    #[error("结构元维数 {structure} 与数组维数 {ndim} 不一致")]
    StructureDimensionMismatch {
        /// 结构元维数.
        structure: usize,
        /// 数组维数.
        ndim: usize,
    },

    /// 结构元某一维大小为 0.
    #[error("结构元 {0:?} 含有大小为 0 的维度")]
    InvalidStructure(Vec<usize>),

    /// 掩码中存在 0/1 以外的值.
    #[error("掩码必须只包含 0 和 1")]
    NotBinaryMask,

    /// 无法识别的真值类型名.
    #[error("未知真值类型 `{0}`, 必须为 `segmentation` 或 `classification`")]
    InvalidGtKind(String),

    /// nifti 读写错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 平面图像解码错误.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 本 crate 的 `Result` 类型.
pub type Result<T> = std::result::Result<T, Error>;
