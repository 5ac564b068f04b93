//! 任意维度数组上的连通分量标记.

use std::collections::VecDeque;

use itertools::Itertools;
use ndarray::{ArrayD, ArrayViewD, IxDyn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Voxel;

/// 邻域规则.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Connectivity {
    /// 仅共享一个面的体素相邻 (2D 为 4-邻域, 3D 为 6-邻域).
    Face,

    /// 共享面, 棱或顶点的体素都相邻 (2D 为 8-邻域, 3D 为 26-邻域).
    #[default]
    Full,
}

/// 连通分量标记结果.
#[derive(Clone, Debug)]
pub struct Components {
    labels: ArrayD<usize>,
    sizes: Vec<usize>,
}

impl Components {
    /// 标记数组. 背景为 0, 分量从 1 开始按光栅顺序编号.
    #[inline]
    pub fn labels(&self) -> &ArrayD<usize> {
        &self.labels
    }

    /// 分量个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.sizes.len()
    }

    /// 体素最多的分量编号. 多个分量并列最大时取编号最小者. 没有前景时返回 `None`.
    pub fn largest(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (i, &size) in self.sizes.iter().enumerate() {
            if best.map_or(true, |(_, s)| size > s) {
                best = Some((i + 1, size));
            }
        }
        best.map(|(label, _)| label)
    }

    /// 只保留编号为 `label` 的分量的 0/1 掩码.
    pub fn component_mask(&self, label: usize) -> ArrayD<u8> {
        self.labels.mapv(|l| u8::from(l != 0 && l == label))
    }
}

/// 对非零体素做连通分量标记.
///
/// 以光栅顺序扫描, 每遇到一个未标记的前景体素就从它出发 BFS,
/// 因此编号顺序与扫描顺序一致, 结果是确定的.
pub fn label_components<T: Voxel>(mask: ArrayViewD<'_, T>, connectivity: Connectivity) -> Components {
    let shape = mask.shape().to_vec();
    let foreground: Vec<bool> = mask.iter().map(|v| !v.is_zero()).collect();
    let offsets = neighbour_offsets(shape.len(), connectivity);

    let mut flat = vec![0usize; foreground.len()];
    let mut sizes = Vec::new();
    let mut bfs_q = VecDeque::new();
    let mut pos = vec![0usize; shape.len()];

    for start in 0..foreground.len() {
        if !foreground[start] || flat[start] != 0 {
            continue;
        }
        let label = sizes.len() + 1;
        let mut size = 0;
        flat[start] = label;
        bfs_q.push_back(start);
        while let Some(cur) = bfs_q.pop_front() {
            size += 1;
            unravel(cur, &shape, &mut pos);
            for offset in &offsets {
                if let Some(next) = shifted(&pos, offset, &shape) {
                    if foreground[next] && flat[next] == 0 {
                        flat[next] = label;
                        bfs_q.push_back(next);
                    }
                }
            }
        }
        sizes.push(size);
    }

    let mut labels = ArrayD::zeros(IxDyn(&shape));
    labels.iter_mut().zip(flat).for_each(|(dst, l)| *dst = l);
    Components { labels, sizes }
}

/// `ndim` 维邻域的所有非零偏移.
pub(crate) fn neighbour_offsets(ndim: usize, connectivity: Connectivity) -> Vec<Vec<isize>> {
    (0..ndim)
        .map(|_| -1isize..=1)
        .multi_cartesian_product()
        .filter(|o| {
            let moved = o.iter().filter(|&&d| d != 0).count();
            match connectivity {
                Connectivity::Face => moved == 1,
                Connectivity::Full => moved > 0,
            }
        })
        .collect()
}

/// 行优先展开下标 `flat` 还原为多维下标, 写入 `pos`.
pub(crate) fn unravel(mut flat: usize, shape: &[usize], pos: &mut [usize]) {
    for (p, &n) in pos.iter_mut().zip(shape).rev() {
        *p = flat % n;
        flat /= n;
    }
}

/// 多维下标 `pos` 平移 `offset` 后的行优先展开下标. 越界时返回 `None`.
pub(crate) fn shifted(pos: &[usize], offset: &[isize], shape: &[usize]) -> Option<usize> {
    let mut flat = 0;
    for ((&p, &o), &n) in pos.iter().zip(offset).zip(shape) {
        let q = p.checked_add_signed(o)?;
        if q >= n {
            return None;
        }
        flat = flat * n + q;
    }
    Some(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_offsets() {
        assert_eq!(neighbour_offsets(2, Connectivity::Face).len(), 4);
        assert_eq!(neighbour_offsets(2, Connectivity::Full).len(), 8);
        assert_eq!(neighbour_offsets(3, Connectivity::Face).len(), 6);
        assert_eq!(neighbour_offsets(3, Connectivity::Full).len(), 26);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let a = array![[1u8, 0, 0], [0, 1, 0], [0, 0, 1]].into_dyn();
        assert_eq!(label_components(a.view(), Connectivity::Full).count(), 1);
        assert_eq!(label_components(a.view(), Connectivity::Face).count(), 3);
    }

    #[test]
    fn test_labels_and_sizes() {
        let a = array![[1.0f32, 1.0, 0.0, 0.5], [0.0, 0.0, 0.0, 0.5], [2.0, 0.0, 0.0, 0.5]].into_dyn();
        let c = label_components(a.view(), Connectivity::Full);
        assert_eq!(c.count(), 3);
        assert_eq!(c.labels()[[0, 0]], 1);
        assert_eq!(c.labels()[[0, 3]], 2);
        assert_eq!(c.labels()[[2, 0]], 3);
        assert_eq!(c.component_mask(1).sum(), 2);
        assert_eq!(c.component_mask(2).sum(), 3);
        assert_eq!(c.component_mask(3).sum(), 1);
        assert_eq!(c.component_mask(0).sum(), 0);
        assert_eq!(c.largest(), Some(2));
    }

    #[test]
    fn test_tie_keeps_lowest_label() {
        let a = array![[1u8, 0, 1], [1, 0, 1]].into_dyn();
        let c = label_components(a.view(), Connectivity::Full);
        assert_eq!(c.count(), 2);
        assert_eq!(c.largest(), Some(1));
        assert_eq!(c.component_mask(1), array![[1u8, 0, 0], [1, 0, 0]].into_dyn());
    }

    #[test]
    fn test_empty_and_3d() {
        let z = Array3::<u8>::zeros((3, 3, 3)).into_dyn();
        let c = label_components(z.view(), Connectivity::Full);
        assert_eq!(c.count(), 0);
        assert_eq!(c.largest(), None);

        let mut a = Array3::<u8>::zeros((3, 3, 3));
        a[[0, 0, 0]] = 1;
        a[[1, 1, 1]] = 1;
        a[[2, 2, 0]] = 1;
        let c = label_components(a.view().into_dyn(), Connectivity::Full);
        assert_eq!(c.count(), 1);
        let c = label_components(a.view().into_dyn(), Connectivity::Face);
        assert_eq!(c.count(), 3);
    }
}
