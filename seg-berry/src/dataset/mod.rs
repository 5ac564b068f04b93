//! 样本组装: 读取输入通道与真值, 检查几何一致性, 按需提供数据, 切片和元数据.

mod annotation;
mod metadata;
mod pair;

pub use annotation::{Annotation, GtSpec, Rated, RaterId};
pub use metadata::{DataKind, MetadataBundle, SampleMetadata};
pub use pair::{GtKind, GtSlices, PairData, PairOptions, SegmentationPair, SliceSample};
