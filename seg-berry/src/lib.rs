#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 为分割流程组装 "图像-真值" 样本对, 并对推理得到的分割预测做后处理.
//!
//! 该 crate 目前仅提供 `safe` 接口, 且是同步, 单线程的:
//! 同一个样本对只应由一个 worker 使用.
//!
//! # 注意
//!
//! 1. 支持的格式为 nifti (`.nii`, `.nii.gz`) 和平面灰度图像 (`.tif`, `.tiff`, `.png`,
//!   `.jpg`, `.jpeg`). 平面图像需要在元数据中提供 `PixelSize` (微米).
//! 2. 所有错误都会直接返回给调用者 ([`Error`]), 库内部不会跳过损坏的数据.
//!
//! # 模块
//!
//! ### 文件读取与转换 ✅
//!
//! 按扩展名选择解码方式. 平面图像被扩展为单切片体数据,
//! 并在原文件旁保存一份 `.nii.gz` (已存在时不覆盖).
//!
//! 实现位于 `seg-berry/src/data/reader.rs`.
//!
//! ### 方向标准化 ✅
//!
//! 把体数据重定向到最近的 RAS+ 方向, 再按切片轴 (sagittal/coronal/axial)
//! 把形状和数据排成 `(高, 宽, 深)`.
//!
//! 实现位于 `seg-berry/src/data/orient.rs`.
//!
//! ### 样本对与元数据 ✅
//!
//! 多通道输入, 多类别, 多标注者真值. 形状检查, 带缓存的数据查询, 切片提取,
//! 元数据合并.
//!
//! 实现位于 `seg-berry/src/dataset`.
//!
//! ### 后处理 ✅
//!
//! 阈值化, 最大连通分量 (整体或逐切片), 孔洞填充, 掩码.
//! 同时适用于原始数组和带仿射矩阵的容器.
//!
//! 实现位于 `seg-berry/src/post_proc`.

/// 三维索引 / 形状.
pub type Idx3d = (usize, usize, usize);

/// 三个方向的体素尺寸, 以毫米为单位.
pub type Zooms = (f64, f64, f64);

/// 体素坐标到世界坐标的 4x4 仿射矩阵.
pub type Affine = [[f64; 4]; 4];

pub mod consts;

/// 体数据容器, 文件读取与方向标准化.
pub mod data;

pub mod dataset;

mod error;

pub mod post_proc;

pub mod prelude;

pub use data::orient::SliceAxis;
pub use data::Volume;
pub use dataset::DataKind;
pub use error::{Error, Result};
