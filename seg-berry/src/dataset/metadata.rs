//! 样本元数据.

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde_json::{json, Map, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Annotation;
use crate::consts::meta::{COORD, CROP_PARAMS, DATA_SHAPE, DATA_TYPE, SLICE_INDEX, ZOOMS};
use crate::{Idx3d, Zooms};

/// 元数据记录描述的数据类别.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataKind {
    /// 输入图像.
    #[cfg_attr(feature = "serde", serde(rename = "im"))]
    Image,

    /// 真值标注.
    #[cfg_attr(feature = "serde", serde(rename = "gt"))]
    GroundTruth,
}

impl DataKind {
    /// 写入元数据的标签.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "im",
            Self::GroundTruth => "gt",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条元数据记录, 即 JSON 对象. 外部提供的 sidecar 元数据可以原样叠加进来.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct SampleMetadata(Map<String, Value>);

impl SampleMetadata {
    /// 空记录.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 由定向后的体素尺寸和形状构建的记录, 裁剪参数为空.
    pub fn geometry(zooms: Zooms, shape: Idx3d, kind: DataKind) -> Self {
        let mut m = Map::new();
        m.insert(ZOOMS.to_owned(), json!([zooms.0, zooms.1, zooms.2]));
        m.insert(DATA_SHAPE.to_owned(), json!([shape.0, shape.1, shape.2]));
        m.insert(DATA_TYPE.to_owned(), Value::from(kind.as_str()));
        m.insert(CROP_PARAMS.to_owned(), Value::Object(Map::new()));
        Self(m)
    }

    /// 设置一个键.
    #[inline]
    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(key.to_owned(), value.into());
    }

    /// 用 `other` 中的每个键覆盖本记录.
    pub fn overlay(&mut self, other: &Map<String, Value>) {
        self.0
            .extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// 写入切片索引和子体积坐标.
    pub fn set_position(&mut self, slice_index: usize, coord: Option<&[usize]>) {
        self.set(SLICE_INDEX, slice_index);
        self.set(COORD, coord.map_or(Value::Null, |c| json!(c)));
    }

    /// 数据类别标签.
    pub fn data_kind(&self) -> Option<DataKind> {
        match self.0.get(DATA_TYPE)?.as_str()? {
            "im" => Some(DataKind::Image),
            "gt" => Some(DataKind::GroundTruth),
            _ => None,
        }
    }

    /// 定向后的形状.
    pub fn data_shape(&self) -> Option<Idx3d> {
        let v = self.0.get(DATA_SHAPE)?.as_array()?;
        let d = |i: usize| v.get(i)?.as_u64().map(|x| x as usize);
        Some((d(0)?, d(1)?, d(2)?))
    }

    /// 定向后的体素尺寸.
    pub fn zooms(&self) -> Option<Zooms> {
        let v = self.0.get(ZOOMS)?.as_array()?;
        let d = |i: usize| v.get(i)?.as_f64();
        Some((d(0)?, d(1)?, d(2)?))
    }

    /// 取出内部 JSON 对象.
    #[inline]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for SampleMetadata {
    #[inline]
    fn from(m: Map<String, Value>) -> Self {
        Self(m)
    }
}

impl Deref for SampleMetadata {
    type Target = Map<String, Value>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SampleMetadata {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// 一次查询得到的元数据: 每个输入通道一条, 每个真值类别一项.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetadataBundle {
    /// 输入通道元数据.
    pub input_metadata: Vec<SampleMetadata>,

    /// 真值类别元数据. 只有当所有类别都没有标注时才会是 `None`.
    pub gt_metadata: Vec<Option<Annotation<SampleMetadata>>>,
}

/// 没有标注的类别借用第一个有标注的类别的元数据.
pub(crate) fn backfill<T: Clone>(entries: &mut [Option<T>]) {
    if let Some(first) = entries.iter().flatten().next().cloned() {
        entries
            .iter_mut()
            .filter(|e| e.is_none())
            .for_each(|e| *e = Some(first.clone()));
    }
}
