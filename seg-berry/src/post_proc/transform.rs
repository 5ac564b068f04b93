//! 作用于原始数组的后处理变换. 所有变换都不改变数组形状.
//!
//! 软预测 (非 0/1 取值) 在形态学操作前先以 [`SOFT_CUTOFF`] 二值化,
//! 操作结果只作为掩码作用在原始软预测上, 返回值保留原始的置信度.

use std::collections::VecDeque;

use itertools::Itertools;
use ndarray::{ArrayD, ArrayViewD, Axis, Zip};

use super::label::{label_components, shifted, unravel, Connectivity};
use super::Voxel;
use crate::consts::binary::SOFT_CUTOFF;
use crate::error::{Error, Result};

/// 阈值化: `>= thr` 的位置为 1, 其余为 0. NaN 视为 0.
pub fn threshold_predictions<T: Voxel>(pred: ArrayViewD<'_, T>, thr: f64) -> ArrayD<u8> {
    pred.mapv(|v| u8::from(v.to_f64().map_or(false, |x| x >= thr)))
}

/// 数组是否只包含 0 和 1.
pub fn is_binary<T: Voxel>(pred: ArrayViewD<'_, T>) -> bool {
    pred.iter().all(|v| v.is_zero() || v.is_one())
}

/// 前景支撑集, 以及输入是否为软预测.
fn support<T: Voxel>(pred: &ArrayViewD<'_, T>) -> (ArrayD<u8>, bool) {
    if is_binary(pred.view()) {
        (pred.mapv(|v| u8::from(v.is_one())), false)
    } else {
        (threshold_predictions(pred.view(), SOFT_CUTOFF), true)
    }
}

/// 已知形状一致时的掩码乘法.
fn apply_mask<T: Voxel>(pred: ArrayViewD<'_, T>, mask: ArrayViewD<'_, u8>) -> ArrayD<T> {
    Zip::from(&pred)
        .and(&mask)
        .map_collect(|&v, &m| if m == 0 { T::zero() } else { v })
}

/// 只保留体素最多的连通分量 (全连通规则: 2D 为 8-邻域, 3D 为 26-邻域).
///
/// 多个分量同样大时保留光栅顺序中最先出现的那个. 输入为软预测时,
/// 返回原始软值在保留分量上的部分, 其余位置 (包括低于截断值的位置) 为 0.
pub fn keep_largest_object<T: Voxel>(pred: ArrayViewD<'_, T>) -> ArrayD<T> {
    let (binary, _) = support(&pred);
    let components = label_components(binary.view(), Connectivity::Full);
    let kept = match components.largest() {
        Some(label) if components.count() > 1 => components.component_mask(label),
        _ => binary,
    };
    apply_mask(pred, kept.view())
}

/// 沿 `axis` 把数组切成若干个低一维的切片, 对每个切片独立运行 [`keep_largest_object`],
/// 再按原顺序拼回.
pub fn keep_largest_object_per_slice<T: Voxel>(
    pred: ArrayViewD<'_, T>,
    axis: usize,
) -> Result<ArrayD<T>> {
    if axis >= pred.ndim() {
        return Err(Error::AxisOutOfRange {
            axis,
            ndim: pred.ndim(),
        });
    }
    let mut ans = pred.to_owned();
    for (mut dst, src) in ans
        .axis_iter_mut(Axis(axis))
        .zip(pred.axis_iter(Axis(axis)))
    {
        dst.assign(&keep_largest_object(src));
    }
    Ok(ans)
}

/// 填充孔洞. `structure` 为全 1 结构元的形状, 长度必须等于数组维数.
///
/// 二值输入返回填充后的 0/1 数组; 软预测返回以填充结果为掩码的原始软值.
pub fn fill_holes<T: Voxel>(pred: ArrayViewD<'_, T>, structure: &[usize]) -> Result<ArrayD<T>> {
    if structure.len() != pred.ndim() {
        return Err(Error::StructureDimensionMismatch {
            structure: structure.len(),
            ndim: pred.ndim(),
        });
    }
    if structure.contains(&0) {
        return Err(Error::InvalidStructure(structure.to_vec()));
    }

    let (binary, soft) = support(&pred);
    let filled = binary_fill_holes(binary.view(), structure);
    Ok(if soft {
        apply_mask(pred, filled.view())
    } else {
        filled.mapv(|v| if v == 0 { T::zero() } else { T::one() })
    })
}

/// 二值孔洞填充.
///
/// 背景中能以结构元为邻域, 从数组外部 (视为背景) 到达的部分是真正的背景,
/// 其余背景都是孔洞, 被置为前景.
///
/// 长度为 `s` 的维度上邻域为 `-(s - 1) / 2 ..= s / 2`.
/// 偶数长度时中心偏向低端, 与 `scipy.ndimage` 的原点约定一致.
fn binary_fill_holes(binary: ArrayViewD<'_, u8>, structure: &[usize]) -> ArrayD<u8> {
    let shape = binary.shape().to_vec();
    let ranges: Vec<(isize, isize)> = structure
        .iter()
        .map(|&s| {
            let c = ((s - 1) / 2) as isize;
            (-c, s as isize - 1 - c)
        })
        .collect();
    let offsets: Vec<Vec<isize>> = ranges
        .iter()
        .map(|&(lo, hi)| lo..=hi)
        .multi_cartesian_product()
        .filter(|o| o.iter().any(|&d| d != 0))
        .map(|o| o.into_iter().map(|d| -d).collect())
        .collect();

    let background: Vec<bool> = binary.iter().map(|&v| v == 0).collect();
    let mut outside = vec![false; background.len()];
    let mut bfs_q = VecDeque::new();
    let mut pos = vec![0usize; shape.len()];

    for (flat, _) in background.iter().enumerate().filter(|&(_, &b)| b) {
        unravel(flat, &shape, &mut pos);
        let touches_border = pos
            .iter()
            .zip(&shape)
            .zip(&ranges)
            .any(|((&p, &n), &(lo, hi))| (p as isize) + lo < 0 || (p as isize) + hi >= n as isize);
        if touches_border {
            outside[flat] = true;
            bfs_q.push_back(flat);
        }
    }

    while let Some(cur) = bfs_q.pop_front() {
        unravel(cur, &shape, &mut pos);
        for offset in &offsets {
            if let Some(next) = shifted(&pos, offset, &shape) {
                if background[next] && !outside[next] {
                    outside[next] = true;
                    bfs_q.push_back(next);
                }
            }
        }
    }

    let mut ans = ArrayD::zeros(binary.raw_dim());
    ans.iter_mut()
        .zip(outside)
        .for_each(|(dst, out)| *dst = u8::from(!out));
    ans
}

/// 掩码: 掩码为 0 的位置置 0, 其余位置保留原值.
///
/// `mask` 的形状必须与 `pred` 一致, 且只能包含 0 和 1.
pub fn mask_predictions<T: Voxel, M: Voxel>(
    pred: ArrayViewD<'_, T>,
    mask: ArrayViewD<'_, M>,
) -> Result<ArrayD<T>> {
    if pred.shape() != mask.shape() {
        return Err(Error::ShapeMismatch {
            left: pred.shape().to_vec(),
            right: mask.shape().to_vec(),
        });
    }
    if !is_binary(mask.view()) {
        return Err(Error::NotBinaryMask);
    }
    Ok(Zip::from(&pred)
        .and(&mask)
        .map_collect(|&v, m| if m.is_zero() { T::zero() } else { v }))
}
