//! 样本对: 若干输入通道 + 按类别组织的 (多标注者) 真值.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{Array2, Array3, Axis};
use serde_json::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::annotation::gt_filenames_json;
use super::metadata::backfill;
use super::{Annotation, DataKind, GtSpec, MetadataBundle, SampleMetadata};
use crate::consts::meta::{BOUNDING_BOX, GT_FILENAMES, INPUT_FILENAMES, RATER_ID};
use crate::data::orient::{orient_data, SliceAxis};
use crate::data::reader::read_file;
use crate::data::Volume;
use crate::error::{Error, Result};
use crate::Idx3d;

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        /// 样本对的配置.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct PairOptions {
            /// 切片轴.
            pub slice_axis: SliceAxis,
            /// 是否缓存解码后的数据.
            pub cache: bool,
            /// 真值是否为软标签.
            pub soft_gt: bool,
        }
    } else {
        /// 样本对的配置.
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub struct PairOptions {
            /// 切片轴.
            pub slice_axis: SliceAxis,
            /// 是否缓存解码后的数据.
            pub cache: bool,
            /// 真值是否为软标签.
            pub soft_gt: bool,
        }
    }
}

impl Default for PairOptions {
    fn default() -> Self {
        Self {
            slice_axis: SliceAxis::Axial,
            cache: true,
            soft_gt: false,
        }
    }
}

/// 切片真值的返回形式.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum GtKind {
    /// 二维掩码.
    #[default]
    Segmentation,

    /// 切片上是否存在前景 (0 或 1).
    Classification,
}

impl GtKind {
    /// 名称.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::Classification => "classification",
        }
    }
}

impl FromStr for GtKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "segmentation" => Ok(Self::Segmentation),
            "classification" => Ok(Self::Classification),
            _ => Err(Error::InvalidGtKind(s.to_owned())),
        }
    }
}

impl fmt::Display for GtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 完整数据: 每个输入通道一个数组, 每个真值类别一项.
///
/// 没有标注的类别在这里才被具体化为与第一个输入通道同形状的全零数组.
#[derive(Clone, Debug, PartialEq)]
pub struct PairData {
    /// 定向后的输入数据 `(高, 宽, 深)`.
    pub input: Vec<Array3<f32>>,

    /// 定向后的真值数据. 推理时 (没有真值) 为空.
    ///
    /// 缺失的类别以全 0 数组代替. 与其他真值一样以 `f32` 存放,
    /// 取值只有 0, 可以无损地视为二值掩码.
    pub gt: Vec<Annotation<Array3<f32>>>,
}

/// 一个切片上的真值.
#[derive(Clone, Debug, PartialEq)]
pub enum GtSlices {
    /// 每个类别的二维掩码.
    Segmentation(Vec<Annotation<Array2<f32>>>),

    /// 每个类别在该切片上是否有前景.
    Classification(Vec<Annotation<u8>>),
}

impl GtSlices {
    /// 类别个数.
    pub fn len(&self) -> usize {
        match self {
            Self::Segmentation(v) => v.len(),
            Self::Classification(v) => v.len(),
        }
    }

    /// 是否没有任何类别?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 单个切片的样本.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceSample {
    /// 每个输入通道的二维切片.
    pub input: Vec<Array2<f32>>,

    /// 真值切片.
    pub gt: GtSlices,

    /// 输入元数据.
    pub input_metadata: Vec<SampleMetadata>,

    /// 真值元数据.
    pub gt_metadata: Vec<Option<Annotation<SampleMetadata>>>,
}

/// 样本对.
///
/// 构建时读取所有文件, 检查几何一致性, 并把所有体数据重定向到标准方向.
/// 之后只读; 唯一的内部状态是各体数据的解码缓存, 因此同一个样本对
/// 不能被多个 worker 同时使用.
#[derive(Debug)]
pub struct SegmentationPair {
    input_filenames: Vec<PathBuf>,
    gt_filenames: Vec<GtSpec>,
    metadata: Vec<SampleMetadata>,
    options: PairOptions,
    inputs: Vec<Volume>,
    gt: Vec<Option<Annotation<Volume>>>,
}

impl SegmentationPair {
    /// 构建样本对.
    ///
    /// `gt` 为每个类别的真值文件, 推理时为空. `metadata` 为每个输入通道的外部元数据,
    /// 第一个通道的元数据也用于平面图像的体素尺寸.
    pub fn new<P: AsRef<Path>>(
        input_filenames: &[P],
        gt: Vec<GtSpec>,
        metadata: Option<Vec<SampleMetadata>>,
        options: PairOptions,
    ) -> Result<Self> {
        let axis = options.slice_axis;
        let first_meta = metadata
            .as_ref()
            .and_then(|m| m.first())
            .map(|m| &**m);
        let open = |path: &Path| -> Result<Volume> {
            let volume = read_file(path, first_meta)?;
            volume.ensure_volumetric()?;
            Ok(volume)
        };

        let input_filenames: Vec<PathBuf> = input_filenames
            .iter()
            .map(|p| p.as_ref().to_owned())
            .collect();
        let mut inputs = input_filenames
            .iter()
            .map(|p| open(p))
            .collect::<Result<Vec<_>>>()?;
        let mut gt_volumes = gt
            .iter()
            .map(|spec| spec.open(open))
            .collect::<Result<Vec<_>>>()?;

        check_shapes(&inputs, &gt_volumes, axis)?;

        inputs.iter_mut().for_each(Volume::canonicalize);
        gt_volumes
            .iter_mut()
            .flatten()
            .flat_map(Annotation::iter_mut)
            .for_each(Volume::canonicalize);

        let gt_json = gt_filenames_json(&gt);
        let metadata = metadata
            .map(|all| {
                all.into_iter()
                    .zip(&input_filenames)
                    .map(|(mut m, path)| {
                        m.set(INPUT_FILENAMES, path.to_string_lossy().into_owned());
                        m.set(GT_FILENAMES, gt_json.clone());
                        m
                    })
                    .collect()
            })
            .unwrap_or_default();

        log::debug!(
            "样本对 {:?}: {} 个输入通道, {} 个真值类别, 切片轴 {:?}",
            input_filenames.first(),
            inputs.len(),
            gt.len(),
            axis
        );
        Ok(Self {
            input_filenames,
            gt_filenames: gt,
            metadata,
            options,
            inputs,
            gt: gt_volumes,
        })
    }

    /// 输入文件.
    #[inline]
    pub fn input_filenames(&self) -> &[PathBuf] {
        &self.input_filenames
    }

    /// 真值文件结构.
    #[inline]
    pub fn gt_filenames(&self) -> &[GtSpec] {
        &self.gt_filenames
    }

    /// 关联了文件名的外部元数据, 每个输入通道一条 (未提供时为空).
    #[inline]
    pub fn metadata(&self) -> &[SampleMetadata] {
        &self.metadata
    }

    /// 配置.
    #[inline]
    pub fn options(&self) -> &PairOptions {
        &self.options
    }

    /// 真值是否为软标签?
    #[inline]
    pub fn soft_gt(&self) -> bool {
        self.options.soft_gt
    }

    /// 输入体数据.
    #[inline]
    pub fn inputs(&self) -> &[Volume] {
        &self.inputs
    }

    /// 真值体数据.
    #[inline]
    pub fn gt(&self) -> &[Option<Annotation<Volume>>] {
        &self.gt
    }

    /// 定向后的 `(输入形状, 真值形状)`. 没有任何真值时后者为 `None`.
    pub fn pair_shapes(&self) -> Result<(Idx3d, Option<Idx3d>)> {
        check_shapes(&self.inputs, &self.gt, self.options.slice_axis)
    }

    /// 完整数据, 按切片轴定向为 `(高, 宽, 深)`.
    pub fn pair_data(&self) -> Result<PairData> {
        let PairOptions {
            slice_axis, cache, ..
        } = self.options;
        let load = |v: &Volume| v.with_fdata(cache, |d| orient_data(d, slice_axis).to_owned());

        let input = self.inputs.iter().map(load).collect::<Result<Vec<_>>>()?;
        let zero_shape = self
            .inputs
            .first()
            .map(|v| v.oriented_shape(slice_axis))
            .ok_or(Error::NoInput)?;
        let gt = self
            .gt
            .iter()
            .map(|class| match class {
                Some(a) => a.try_map(load),
                None => Ok(Annotation::Single(Array3::zeros(zero_shape))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PairData { input, gt })
    }

    /// 切片 `slice_index` 和子体积坐标 `coord` 处的元数据.
    pub fn pair_metadata(&self, slice_index: usize, coord: Option<&[usize]>) -> MetadataBundle {
        let axis = self.options.slice_axis;
        let geometry = |v: &Volume, kind| {
            SampleMetadata::geometry(v.oriented_zooms(axis), v.oriented_shape(axis), kind)
        };
        let bounding_box = self
            .metadata
            .first()
            .and_then(|m| m.get(BOUNDING_BOX))
            .cloned()
            .unwrap_or(Value::Null);
        let gt_json = gt_filenames_json(&self.gt_filenames);

        let mut gt_metadata: Vec<_> = self
            .gt
            .iter()
            .map(|class| {
                class.as_ref().map(|a| {
                    a.map_with(|rater, v| {
                        let mut m = geometry(v, DataKind::GroundTruth);
                        match rater {
                            None => m.set(GT_FILENAMES, gt_json.clone()),
                            Some(id) => {
                                m.set(GT_FILENAMES, v.path().to_string_lossy().into_owned());
                                m.set(RATER_ID, id.0);
                            }
                        }
                        m.set(BOUNDING_BOX, bounding_box.clone());
                        m
                    })
                })
            })
            .collect();
        backfill(&mut gt_metadata);

        let input_metadata = self
            .inputs
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut m = geometry(v, DataKind::Image);
                if let Some(supplied) = self.metadata.get(i) {
                    m.overlay(supplied);
                }
                m.set_position(slice_index, coord);
                m
            })
            .collect();

        MetadataBundle {
            input_metadata,
            gt_metadata,
        }
    }

    /// 沿切片轴取第 `slice_index` 个切片.
    pub fn pair_slice(&self, slice_index: usize, gt_kind: GtKind) -> Result<SliceSample> {
        let (_, _, depth) = self.pair_shapes()?.0;
        if slice_index >= depth {
            return Err(Error::SliceOutOfRange {
                index: slice_index,
                len: depth,
            });
        }

        let MetadataBundle {
            input_metadata,
            gt_metadata,
        } = self.pair_metadata(slice_index, None);
        let PairData { input, gt } = self.pair_data()?;

        let take = |a: &Array3<f32>| a.index_axis(Axis(2), slice_index).to_owned();
        let input = input.iter().map(take).collect();
        let gt = match gt_kind {
            GtKind::Segmentation => {
                GtSlices::Segmentation(gt.iter().map(|a| a.map(take)).collect())
            }
            GtKind::Classification => GtSlices::Classification(
                gt.iter()
                    .map(|a| {
                        a.map(|v| u8::from(v.index_axis(Axis(2), slice_index).iter().any(|&x| x != 0.0)))
                    })
                    .collect(),
            ),
        };

        Ok(SliceSample {
            input,
            gt,
            input_metadata,
            gt_metadata,
        })
    }
}

/// 检查定向后的形状: 输入之间, 真值之间 (跨类别和标注者), 第一个输入与第一个真值.
fn check_shapes(
    inputs: &[Volume],
    gt: &[Option<Annotation<Volume>>],
    axis: SliceAxis,
) -> Result<(Idx3d, Option<Idx3d>)> {
    let input_shapes: Vec<Idx3d> = inputs.iter().map(|v| v.oriented_shape(axis)).collect();
    let first = *input_shapes.first().ok_or(Error::NoInput)?;
    if input_shapes.iter().any(|s| *s != first) {
        return Err(Error::InconsistentInputShapes(input_shapes));
    }

    let gt_shapes: Vec<Idx3d> = gt
        .iter()
        .flatten()
        .flat_map(Annotation::iter)
        .map(|v| v.oriented_shape(axis))
        .collect();
    let gt_first = gt_shapes.first().copied();
    if let Some(g) = gt_first {
        if gt_shapes.iter().any(|s| *s != g) {
            return Err(Error::InconsistentLabelShapes(gt_shapes));
        }
        if g != first {
            return Err(Error::ShapeMismatch {
                left: vec![first.0, first.1, first.2],
                right: vec![g.0, g.1, g.2],
            });
        }
    }
    Ok((first, gt_first))
}
