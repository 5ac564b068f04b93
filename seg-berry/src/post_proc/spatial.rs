//! 带空间信息的预测容器, 以及把数组变换提升到容器上的组合子.

use std::path::Path;

use ndarray::{ArrayD, ArrayViewD};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use super::transform::{
    fill_holes, keep_largest_object, keep_largest_object_per_slice, mask_predictions,
    threshold_predictions,
};
use super::Voxel;
use crate::data::{affine_from_header, header_for};
use crate::error::Result;
use crate::{Affine, Zooms};

/// 数组 + 体素到世界坐标的仿射矩阵.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialImage<T> {
    data: ArrayD<T>,
    affine: Affine,
}

impl<T> SpatialImage<T> {
    /// 创建容器.
    #[inline]
    pub fn new(data: ArrayD<T>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// 数据.
    #[inline]
    pub fn data(&self) -> &ArrayD<T> {
        &self.data
    }

    /// 仿射矩阵.
    #[inline]
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// 拆分为数据和仿射矩阵.
    #[inline]
    pub fn into_parts(self) -> (ArrayD<T>, Affine) {
        (self.data, self.affine)
    }

    /// 替换数据, 仿射矩阵不变.
    #[inline]
    pub fn with_data<U>(&self, data: ArrayD<U>) -> SpatialImage<U> {
        SpatialImage::new(data, self.affine)
    }

    /// 由仿射矩阵前三列的长度得到的体素尺寸.
    pub fn zooms(&self) -> Zooms {
        let norm = |c: usize| (0..3).map(|r| self.affine[r][c].powi(2)).sum::<f64>().sqrt();
        (norm(0), norm(1), norm(2))
    }
}

impl SpatialImage<f32> {
    /// 从 nifti 文件读取.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let affine = affine_from_header(obj.header());
        let data = obj.into_volume().into_ndarray::<f32>()?;
        Ok(Self::new(data, affine))
    }

    /// 写为 nifti 文件. 路径以 `.gz` 结尾时自动压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = header_for(&self.affine, self.zooms(), None);
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data)?;
        log::debug!("已保存预测 `{}`, 形状 {:?}", path.as_ref().display(), self.data.shape());
        Ok(())
    }
}

/// 后处理的输入/输出: 原始数组, 或者带空间信息的容器.
///
/// 每个后处理方法都返回与输入同类的值. 对容器而言, 变换只作用于其数据,
/// 仿射矩阵原样保留.
#[derive(Clone, Debug, PartialEq)]
pub enum Prediction<T> {
    /// 原始数组.
    Array(ArrayD<T>),

    /// 带空间信息的容器.
    Spatial(SpatialImage<T>),
}

impl<T> From<ArrayD<T>> for Prediction<T> {
    #[inline]
    fn from(data: ArrayD<T>) -> Self {
        Self::Array(data)
    }
}

impl<T> From<SpatialImage<T>> for Prediction<T> {
    #[inline]
    fn from(image: SpatialImage<T>) -> Self {
        Self::Spatial(image)
    }
}

impl<T> Prediction<T> {
    /// 数据.
    #[inline]
    pub fn data(&self) -> &ArrayD<T> {
        match self {
            Self::Array(data) => data,
            Self::Spatial(image) => image.data(),
        }
    }

    /// 取出数据, 丢弃空间信息.
    pub fn into_data(self) -> ArrayD<T> {
        match self {
            Self::Array(data) => data,
            Self::Spatial(image) => image.into_parts().0,
        }
    }

    /// 仿射矩阵. 原始数组返回 `None`.
    #[inline]
    pub fn affine(&self) -> Option<&Affine> {
        match self {
            Self::Array(_) => None,
            Self::Spatial(image) => Some(image.affine()),
        }
    }

    /// 在数据上运行可能失败的变换, 结果保持原有的容器类别.
    pub fn try_map<U, F>(&self, op: F) -> Result<Prediction<U>>
    where
        F: FnOnce(ArrayViewD<'_, T>) -> Result<ArrayD<U>>,
    {
        let data = op(self.data().view())?;
        Ok(match self {
            Self::Array(_) => Prediction::Array(data),
            Self::Spatial(image) => Prediction::Spatial(image.with_data(data)),
        })
    }

    /// 在数据上运行变换, 结果保持原有的容器类别.
    pub fn map<U, F>(&self, op: F) -> Prediction<U>
    where
        F: FnOnce(ArrayViewD<'_, T>) -> ArrayD<U>,
    {
        let data = op(self.data().view());
        match self {
            Self::Array(_) => Prediction::Array(data),
            Self::Spatial(image) => Prediction::Spatial(image.with_data(data)),
        }
    }
}

/// 把作用于原始数组的变换提升为作用于 [`Prediction`] 的变换.
pub fn lift_spatial<T, U, F>(op: F) -> impl Fn(&Prediction<T>) -> Result<Prediction<U>>
where
    F: Fn(ArrayViewD<'_, T>) -> Result<ArrayD<U>>,
{
    move |pred| pred.try_map(&op)
}

impl<T: Voxel> Prediction<T> {
    /// 见 [`threshold_predictions`].
    #[inline]
    pub fn threshold(&self, thr: f64) -> Prediction<u8> {
        self.map(|data| threshold_predictions(data, thr))
    }

    /// 见 [`keep_largest_object`].
    #[inline]
    pub fn keep_largest_object(&self) -> Prediction<T> {
        self.map(keep_largest_object)
    }

    /// 见 [`keep_largest_object_per_slice`].
    #[inline]
    pub fn keep_largest_object_per_slice(&self, axis: usize) -> Result<Prediction<T>> {
        self.try_map(|data| keep_largest_object_per_slice(data, axis))
    }

    /// 见 [`fill_holes`].
    #[inline]
    pub fn fill_holes(&self, structure: &[usize]) -> Result<Prediction<T>> {
        self.try_map(|data| fill_holes(data, structure))
    }

    /// 见 [`mask_predictions`]. 掩码可以是原始数组或容器, 只使用其数据.
    #[inline]
    pub fn mask<M: Voxel>(&self, mask: &Prediction<M>) -> Result<Prediction<T>> {
        self.try_map(|data| mask_predictions(data, mask.data().view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    fn affine() -> Affine {
        [
            [-0.5, 0.0, 0.0, 10.0],
            [0.0, 0.5, 0.0, -3.0],
            [0.0, 0.0, 2.0, 1.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[test]
    fn test_spatial_metadata_preserved() {
        let data = array![[[1.0f32, 0.0, 1.0]]].into_dyn();
        let pred = Prediction::from(SpatialImage::new(data.clone(), affine()));

        let out = pred.keep_largest_object();
        assert_eq!(out.affine(), Some(&affine()));
        assert_eq!(out.data(), &array![[[1.0f32, 0.0, 0.0]]].into_dyn());

        let t = pred.threshold(0.5);
        assert_eq!(t.affine(), Some(&affine()));

        let raw = Prediction::from(data);
        assert_eq!(raw.keep_largest_object().affine(), None);
        assert_eq!(raw.keep_largest_object().data(), out.data());
    }

    #[test]
    fn test_lift_spatial() {
        let lifted = lift_spatial(|a: ArrayViewD<'_, f32>| fill_holes(a, &[3, 3]));
        let data = array![[1.0f32, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0]].into_dyn();

        let spatial = lifted(&Prediction::from(SpatialImage::new(data.clone(), affine()))).unwrap();
        let raw = lifted(&Prediction::from(data)).unwrap();
        assert_eq!(spatial.affine(), Some(&affine()));
        assert!(raw.affine().is_none());
        assert_eq!(spatial.data(), raw.data());
        assert!(raw.data().iter().all(|&v| v == 1.0));

        let bad = lifted(&Prediction::from(Array3::<f32>::zeros((2, 2, 2)).into_dyn()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_mask_accepts_any_container() {
        let pred = Prediction::from(array![0.4f32, 0.6].into_dyn());
        let mask = Prediction::from(SpatialImage::new(array![0u8, 1].into_dyn(), affine()));
        let out = pred.mask(&mask).unwrap();
        assert_eq!(out, Prediction::Array(array![0.0f32, 0.6].into_dyn()));
    }

    #[test]
    fn test_zooms_and_save_roundtrip() {
        let img = SpatialImage::new(Array3::<f32>::from_elem((4, 3, 2), 1.0).into_dyn(), affine());
        assert_eq!(img.zooms(), (0.5, 0.5, 2.0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.nii.gz");
        img.save(&path).unwrap();
        let back = SpatialImage::<f32>::open(&path).unwrap();
        assert_eq!(back.data().shape(), &[4, 3, 2]);
        assert_eq!(back.affine(), img.affine());
        assert!(back.data().iter().all(|&v| v == 1.0));
    }
}
