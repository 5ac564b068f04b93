//! 通用常量.

/// 二值化相关.
pub mod binary {
    /// 软预测被视为前景的最低值. 形态学操作前用它把软预测二值化.
    pub const SOFT_CUTOFF: f64 = 1e-3;

    /// `threshold` 的常用默认门限.
    pub const DEFAULT_THRESHOLD: f64 = 0.5;
}

/// 文件格式相关.
pub mod format {
    /// 平面图像转换后的 nifti 文件扩展名.
    pub const CONVERTED_EXTENSION: &str = ".nii.gz";

    /// 显微镜多页格式标记, 目前显式排除.
    pub const OME_MARKER: &str = "ome";
}

/// 元数据相关.
pub mod meta {
    /// 平面图像像素尺寸 (微米) 的元数据键.
    pub const PIXEL_SIZE: &str = "PixelSize";

    /// `PixelSize` 允许的数组长度.
    pub const PIXEL_SIZE_LENGTHS: [usize; 2] = [2, 3];

    /// 微米到毫米的换算系数.
    pub const UM_TO_MM: f64 = 0.001;

    /// 体素尺寸 (毫米, 已定向).
    pub const ZOOMS: &str = "zooms";

    /// 数据形状 (已定向).
    pub const DATA_SHAPE: &str = "data_shape";

    /// 数据类型标签, 见 [`crate::DataKind`].
    pub const DATA_TYPE: &str = "data_type";

    /// 切片索引.
    pub const SLICE_INDEX: &str = "slice_index";

    /// 子体积坐标.
    pub const COORD: &str = "coord";

    /// 裁剪参数.
    pub const CROP_PARAMS: &str = "crop_params";

    /// 输入文件名.
    pub const INPUT_FILENAMES: &str = "input_filenames";

    /// 真值文件名结构.
    pub const GT_FILENAMES: &str = "gt_filenames";

    /// 包围盒提示.
    pub const BOUNDING_BOX: &str = "bounding_box";

    /// 标注者编号.
    pub const RATER_ID: &str = "rater_id";
}
