//! 体数据定向.
//!
//! 包括两部分:
//!
//! 1. 按切片轴把 3D 形状/数据重排为 `(高, 宽, 深)` 格式, 深度方向即切片方向;
//! 2. 最近标准方向 (closest canonical) 重定向, 使体素轴与 RAS+ 世界坐标轴对齐.

use ndarray::{ArrayBase, Axis, Ix3, RawData};

use crate::error::Error;
use crate::{Affine, Idx3d};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 切片轴. 取值 0, 1, 2 分别对应 sagittal, coronal, axial.
///
/// 平面图像 (png/tif/jpg) 只有 axial 方向有意义.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "usize", into = "usize")
)]
pub enum SliceAxis {
    /// 矢状面, 索引 0.
    Sagittal = 0,

    /// 冠状面, 索引 1.
    Coronal = 1,

    /// 横断面, 索引 2.
    #[default]
    Axial = 2,
}

impl SliceAxis {
    /// 全部三个切片轴, 按索引升序.
    pub const ALL: [SliceAxis; 3] = [Self::Sagittal, Self::Coronal, Self::Axial];

    /// 从轴索引构造. 索引不在 `{0, 1, 2}` 中时返回 [`Error::InvalidSliceAxis`].
    #[inline]
    pub fn from_index(index: usize) -> Result<Self, Error> {
        Self::try_from(index)
    }

    /// 轴索引.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 定向排列: 输出第 `k` 维取自原始第 `permutation()[k]` 维.
    #[inline]
    pub const fn permutation(self) -> [usize; 3] {
        match self {
            Self::Sagittal => [2, 1, 0],
            Self::Coronal => [2, 0, 1],
            Self::Axial => [0, 1, 2],
        }
    }

    /// [`Self::permutation`] 的逆排列.
    #[inline]
    pub const fn inverse_permutation(self) -> [usize; 3] {
        match self {
            Self::Sagittal => [2, 1, 0],
            Self::Coronal => [1, 2, 0],
            Self::Axial => [0, 1, 2],
        }
    }
}

impl TryFrom<usize> for SliceAxis {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(Self::Sagittal),
            1 => Ok(Self::Coronal),
            2 => Ok(Self::Axial),
            other => Err(Error::InvalidSliceAxis(other)),
        }
    }
}

impl From<SliceAxis> for usize {
    #[inline]
    fn from(axis: SliceAxis) -> Self {
        axis.index()
    }
}

#[inline]
fn permute3<T: Copy>((a, b, c): (T, T, T), p: [usize; 3]) -> (T, T, T) {
    let v = [a, b, c];
    (v[p[0]], v[p[1]], v[p[2]])
}

/// 将原始 3 元组 (形状或体素尺寸) 重排为 `(高, 宽, 深)`, 切片轴成为最后一维.
#[inline]
pub fn orient_shape<T: Copy>(raw: (T, T, T), axis: SliceAxis) -> (T, T, T) {
    permute3(raw, axis.permutation())
}

/// [`orient_shape`] 的逆操作.
#[inline]
pub fn restore_shape<T: Copy>(oriented: (T, T, T), axis: SliceAxis) -> (T, T, T) {
    permute3(oriented, axis.inverse_permutation())
}

/// 与 [`orient_shape`] 相同的重排, 但作用于整个数组. 仅交换步长, 不复制数据.
#[inline]
pub fn orient_data<S: RawData>(raw: ArrayBase<S, Ix3>, axis: SliceAxis) -> ArrayBase<S, Ix3> {
    raw.permuted_axes(axis.permutation())
}

/// [`orient_data`] 的逆操作.
#[inline]
pub fn restore_data<S: RawData>(oriented: ArrayBase<S, Ix3>, axis: SliceAxis) -> ArrayBase<S, Ix3> {
    oriented.permuted_axes(axis.inverse_permutation())
}

/// 体素轴的排列与翻转.
///
/// 输出第 `j` 维取自输入第 `perm[j]` 维; 若 `flip[j]` 为真, 则该维反向.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AxisTransform {
    perm: [usize; 3],
    flip: [bool; 3],
}

impl Default for AxisTransform {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

impl AxisTransform {
    /// 恒等变换.
    #[inline]
    pub const fn identity() -> Self {
        Self {
            perm: [0, 1, 2],
            flip: [false; 3],
        }
    }

    /// 是否为恒等变换?
    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// 轴排列.
    #[inline]
    pub fn permutation(&self) -> [usize; 3] {
        self.perm
    }

    /// 各输出轴是否翻转.
    #[inline]
    pub fn flips(&self) -> [bool; 3] {
        self.flip
    }

    /// 根据体素到世界坐标的仿射矩阵, 求出到最近 RAS+ 标准方向的变换.
    ///
    /// 逐次选择绝对值最大的 (体素轴, 世界轴) 方向余弦进行配对, 直到三个体素轴都被分配.
    /// 退化 (零) 列按剩余轴的顺序分配, 且不翻转.
    pub fn closest_canonical(affine: &Affine) -> Self {
        // 方向余弦: cos[w][v] = 第 v 个体素轴在第 w 个世界轴上的分量.
        let mut cos = [[0.0f64; 3]; 3];
        for v in 0..3 {
            let norm = (0..3).map(|w| affine[w][v].powi(2)).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (w, row) in cos.iter_mut().enumerate() {
                    row[v] = affine[w][v] / norm;
                }
            }
        }

        let mut world_of = [None::<(usize, bool)>; 3];
        let mut world_used = [false; 3];
        for _ in 0..3 {
            let mut best: Option<(usize, usize, f64)> = None;
            for (v, assigned) in world_of.iter().enumerate() {
                if assigned.is_some() {
                    continue;
                }
                for w in (0..3).filter(|&w| !world_used[w]) {
                    let c = cos[w][v].abs();
                    if c > 0.0 && best.map_or(true, |(_, _, b)| c > b) {
                        best = Some((v, w, c));
                    }
                }
            }
            let Some((v, w, _)) = best else {
                break;
            };
            world_of[v] = Some((w, cos[w][v] < 0.0));
            world_used[w] = true;
        }

        // 退化轴.
        for v in 0..3 {
            if world_of[v].is_none() {
                if let Some(w) = (0..3).find(|&w| !world_used[w]) {
                    world_of[v] = Some((w, false));
                    world_used[w] = true;
                }
            }
        }

        let mut ans = Self::identity();
        for (v, slot) in world_of.iter().enumerate() {
            if let Some((w, flipped)) = *slot {
                ans.perm[w] = v;
                ans.flip[w] = flipped;
            }
        }
        ans
    }

    /// 复合: 先应用 `self`, 再应用 `next`.
    pub fn then(&self, next: &Self) -> Self {
        let mut ans = Self::identity();
        for j in 0..3 {
            let k = next.perm[j];
            ans.perm[j] = self.perm[k];
            ans.flip[j] = next.flip[j] ^ self.flip[k];
        }
        ans
    }

    /// 变换形状或体素尺寸 (只重排, 不受翻转影响).
    #[inline]
    pub fn apply_shape<T: Copy>(&self, raw: (T, T, T)) -> (T, T, T) {
        permute3(raw, self.perm)
    }

    /// 变换数组. 仅交换/反转步长, 不复制数据.
    pub fn apply_data<S: RawData>(&self, raw: ArrayBase<S, Ix3>) -> ArrayBase<S, Ix3> {
        let mut out = raw.permuted_axes(self.perm);
        for (j, flipped) in self.flip.iter().enumerate() {
            if *flipped {
                out.invert_axis(Axis(j));
            }
        }
        out
    }

    /// 求变换后数据对应的仿射矩阵. `raw_shape` 为变换前的形状.
    pub fn apply_affine(&self, affine: &Affine, raw_shape: Idx3d) -> Affine {
        let raw_shape = [raw_shape.0, raw_shape.1, raw_shape.2];
        let mut out = *affine;
        for j in 0..3 {
            let v = self.perm[j];
            let sign = if self.flip[j] { -1.0 } else { 1.0 };
            for w in 0..3 {
                out[w][j] = sign * affine[w][v];
            }
        }
        for w in 0..3 {
            out[w][3] = affine[w][3]
                + (0..3)
                    .filter(|&j| self.flip[j])
                    .map(|j| {
                        let v = self.perm[j];
                        affine[w][v] * raw_shape[v].saturating_sub(1) as f64
                    })
                    .sum::<f64>();
        }
        out
    }
}
