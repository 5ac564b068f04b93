//! 分割预测的后处理流程: 阈值化, 最大连通分量, 孔洞填充, 掩码.
//!
//! 所有变换都既可以作用于原始数组 ([`ndarray::ArrayD`]), 也可以作用于带仿射矩阵的
//! [`SpatialImage`] (经由 [`Prediction`]), 后者的空间信息在变换前后保持不变.

use num::{One, ToPrimitive, Zero};

mod label;
mod spatial;
mod transform;

pub use label::{label_components, Components, Connectivity};
pub use spatial::{lift_spatial, Prediction, SpatialImage};
pub use transform::{
    fill_holes, is_binary, keep_largest_object, keep_largest_object_per_slice, mask_predictions,
    threshold_predictions,
};

/// 后处理支持的体素类型.
pub trait Voxel: Copy + PartialEq + Zero + One + ToPrimitive {}

impl<T: Copy + PartialEq + Zero + One + ToPrimitive> Voxel for T {}
