//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Affine, Idx3d, Zooms};
pub use crate::{Error, Result};

pub use crate::data::orient::{orient_data, orient_shape, restore_data, restore_shape, SliceAxis};
pub use crate::data::reader::read_file;
pub use crate::data::Volume;

pub use crate::dataset::{
    Annotation, DataKind, GtKind, GtSlices, GtSpec, MetadataBundle, PairOptions, Rated, RaterId,
    SampleMetadata, SegmentationPair,
};

pub use crate::post_proc::{
    fill_holes, keep_largest_object, keep_largest_object_per_slice, lift_spatial,
    mask_predictions, threshold_predictions, Connectivity, Prediction, SpatialImage,
};

pub use crate::consts::binary::{DEFAULT_THRESHOLD, SOFT_CUTOFF};
