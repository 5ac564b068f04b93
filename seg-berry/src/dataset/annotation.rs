//! 真值标注的结构: 单个标注者, 或者带编号的多个标注者.

use std::path::{Path, PathBuf};

use serde_json::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 标注者编号, 即其文件在该类别文件列表中的位置. 构建样本对时确定, 之后不再改变.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct RaterId(pub usize);

/// 带标注者编号的值.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rated<T> {
    /// 标注者编号.
    pub rater: RaterId,

    /// 该标注者对应的值 (体数据, 数组, 切片, 标签或元数据).
    pub value: T,
}

/// 一个类别的标注: 只有一个标注者, 或者多个带编号的标注者.
///
/// 体数据, 解码后的数组, 切片, 分类标签和元数据都使用这同一个结构,
/// 因此每个标注者的编号从文件一直跟随到查询结果.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Annotation<T> {
    /// 单个标注者.
    Single(T),

    /// 多个标注者.
    Raters(Vec<Rated<T>>),
}

impl<T> Annotation<T> {
    /// 依次迭代所有标注者的值.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (single, raters): (Option<&T>, &[Rated<T>]) = match self {
            Self::Single(v) => (Some(v), Default::default()),
            Self::Raters(r) => (None, r.as_slice()),
        };
        single.into_iter().chain(raters.iter().map(|r| &r.value))
    }

    /// 依次可变迭代所有标注者的值.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        let (single, raters): (Option<&mut T>, &mut [Rated<T>]) = match self {
            Self::Single(v) => (Some(v), Default::default()),
            Self::Raters(r) => (None, r.as_mut_slice()),
        };
        single
            .into_iter()
            .chain(raters.iter_mut().map(|r| &mut r.value))
    }

    /// 第一个标注者的值.
    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }

    /// 标注者个数.
    pub fn rater_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Raters(r) => r.len(),
        }
    }

    /// 逐个变换, 保留结构和标注者编号.
    #[inline]
    pub fn map<U, F: FnMut(&T) -> U>(&self, mut op: F) -> Annotation<U> {
        self.map_with(|_, v| op(v))
    }

    /// 与 [`Self::map`] 相同, 但同时提供标注者编号 (单标注者时为 `None`).
    pub fn map_with<U, F: FnMut(Option<RaterId>, &T) -> U>(&self, mut op: F) -> Annotation<U> {
        match self {
            Self::Single(v) => Annotation::Single(op(None, v)),
            Self::Raters(r) => Annotation::Raters(
                r.iter()
                    .map(|x| Rated {
                        rater: x.rater,
                        value: op(Some(x.rater), &x.value),
                    })
                    .collect(),
            ),
        }
    }

    /// 可能失败的逐个变换. 遇到第一个错误即返回.
    pub fn try_map<U, E, F: FnMut(&T) -> Result<U, E>>(&self, mut op: F) -> Result<Annotation<U>, E> {
        Ok(match self {
            Self::Single(v) => Annotation::Single(op(v)?),
            Self::Raters(r) => Annotation::Raters(
                r.iter()
                    .map(|x| {
                        Ok(Rated {
                            rater: x.rater,
                            value: op(&x.value)?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
            ),
        })
    }
}

/// 一个类别的真值文件: 缺失, 单个文件, 或者每个标注者一个文件.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GtSpec {
    /// 该类别没有标注.
    #[default]
    Absent,

    /// 单个标注者.
    Single(PathBuf),

    /// 多个标注者, 编号即在列表中的位置.
    Raters(Vec<PathBuf>),
}

impl GtSpec {
    /// 是否有标注?
    #[inline]
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// 转换为 `null`, 字符串或字符串数组.
    pub fn to_json(&self) -> Value {
        let s = |p: &Path| Value::String(p.to_string_lossy().into_owned());
        match self {
            Self::Absent => Value::Null,
            Self::Single(p) => s(p),
            Self::Raters(ps) => Value::Array(ps.iter().map(|p| s(p)).collect()),
        }
    }

    /// 按结构打开每个文件.
    pub(crate) fn open<T, E, F>(&self, mut open: F) -> Result<Option<Annotation<T>>, E>
    where
        F: FnMut(&Path) -> Result<T, E>,
    {
        Ok(match self {
            Self::Absent => None,
            Self::Single(p) => Some(Annotation::Single(open(p)?)),
            Self::Raters(ps) => Some(Annotation::Raters(
                ps.iter()
                    .enumerate()
                    .map(|(i, p)| {
                        Ok(Rated {
                            rater: RaterId(i),
                            value: open(p)?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
            )),
        })
    }
}

impl From<PathBuf> for GtSpec {
    #[inline]
    fn from(path: PathBuf) -> Self {
        Self::Single(path)
    }
}

impl From<&Path> for GtSpec {
    #[inline]
    fn from(path: &Path) -> Self {
        Self::Single(path.to_owned())
    }
}

impl From<&str> for GtSpec {
    #[inline]
    fn from(path: &str) -> Self {
        Self::Single(path.into())
    }
}

impl<P: Into<PathBuf>> From<Vec<P>> for GtSpec {
    fn from(paths: Vec<P>) -> Self {
        Self::Raters(paths.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<GtSpec>> From<Option<P>> for GtSpec {
    fn from(path: Option<P>) -> Self {
        path.map_or(Self::Absent, Into::into)
    }
}

/// 多个类别的文件结构转换为 JSON 数组.
pub(crate) fn gt_filenames_json(gt: &[GtSpec]) -> Value {
    Value::Array(gt.iter().map(GtSpec::to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_annotation_structure() {
        let mut a = Annotation::Raters(vec![
            Rated { rater: RaterId(0), value: 1 },
            Rated { rater: RaterId(1), value: 2 },
        ]);
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(a.first(), Some(&1));
        assert_eq!(a.rater_count(), 2);

        a.iter_mut().for_each(|v| *v *= 10);
        let ids = a.map_with(|id, v| (id, *v));
        assert_eq!(
            ids,
            Annotation::Raters(vec![
                Rated { rater: RaterId(0), value: (Some(RaterId(0)), 10) },
                Rated { rater: RaterId(1), value: (Some(RaterId(1)), 20) },
            ])
        );

        let s = Annotation::Single(3);
        assert_eq!(s.map(|v| v + 1), Annotation::Single(4));
        assert_eq!(s.rater_count(), 1);
        assert_eq!(s.try_map(|_| Err::<i32, _>("bad")), Err("bad"));
    }

    #[test]
    fn test_gt_spec() {
        assert_eq!(GtSpec::from("a.nii"), GtSpec::Single("a.nii".into()));
        assert_eq!(GtSpec::from(None::<&str>), GtSpec::Absent);
        assert_eq!(
            GtSpec::from(vec!["r1.nii", "r2.nii"]),
            GtSpec::Raters(vec!["r1.nii".into(), "r2.nii".into()])
        );
        let all = [
            GtSpec::from("a.nii"),
            GtSpec::Absent,
            GtSpec::from(vec!["r1.nii", "r2.nii"]),
        ];
        assert_eq!(
            gt_filenames_json(&all),
            json!(["a.nii", null, ["r1.nii", "r2.nii"]])
        );
    }

    #[test]
    fn test_open_assigns_rater_ids() {
        let spec = GtSpec::from(vec!["x", "yy"]);
        let opened = spec
            .open(|p| Ok::<_, ()>(p.to_string_lossy().len()))
            .unwrap()
            .unwrap();
        assert_eq!(
            opened,
            Annotation::Raters(vec![
                Rated { rater: RaterId(0), value: 1 },
                Rated { rater: RaterId(1), value: 2 },
            ])
        );
        assert_eq!(GtSpec::Absent.open(|_| Ok::<u8, ()>(0)).unwrap(), None);
    }
}
