//! 端到端: 写出真实的 nifti/png 文件, 再通过公开接口组装样本对并做后处理.

use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use ndarray::{s, Array3};
use seg_berry::prelude::*;
use serde_json::json;

fn init_logger() {
    let _ = simple_logger::init_with_level(log::Level::Debug);
}

fn close(a: Zooms, b: Zooms) -> bool {
    (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9 && (a.2 - b.2).abs() < 1e-9
}

fn write_nifti(dir: &Path, name: &str, data: Array3<f32>) -> PathBuf {
    let path = dir.join(name);
    Volume::from_planar(&path, data, (0.8, 0.8, 1.5))
        .unwrap()
        .save(&path, false)
        .unwrap();
    path
}

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
        .save(&path)
        .unwrap();
    path
}

fn pixel_size(v: serde_json::Value) -> SampleMetadata {
    let mut m = SampleMetadata::new();
    m.set("PixelSize", v);
    m
}

#[test]
fn test_planar_conversion() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "sub-01_sample-01_SEM.png", 100, 100);
    let meta = pixel_size(json!(0.5));

    let volume = read_file(&png, Some(&*meta)).unwrap();
    assert_eq!(volume.shape(), (100, 100, 1));
    assert!(close(volume.zooms(), (0.0005, 0.0005, 0.0005)));

    let converted = dir.path().join("sub-01_sample-01_SEM.nii.gz");
    assert!(converted.exists());
    let reopened = Volume::open(&converted).unwrap();
    assert_eq!(reopened.shape(), (100, 100, 1));
    assert!((reopened.zooms().0 - 0.0005).abs() < 1e-7);

    // 已存在的转换文件不会被覆盖, 但内存中的体素尺寸来自本次元数据.
    let modified = std::fs::metadata(&converted).unwrap().modified().unwrap();
    let again = read_file(&png, Some(&*pixel_size(json!([0.25, 0.5])))).unwrap();
    assert!(close(again.zooms(), (0.00025, 0.0005, 0.00025)));
    assert_eq!(std::fs::metadata(&converted).unwrap().modified().unwrap(), modified);
}

#[test]
fn test_planar_pair_keeps_image_layout() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "wide.png", 40, 30);
    let pair = SegmentationPair::new(
        &[&png],
        vec![],
        Some(vec![pixel_size(json!([1.0, 2.0, 0.0]))]),
        PairOptions::default(),
    )
    .unwrap();

    assert_eq!(pair.pair_shapes().unwrap(), ((30, 40, 1), None));
    let slice = pair.pair_slice(0, GtKind::Segmentation).unwrap();
    assert_eq!(slice.input[0].dim(), (30, 40));
    assert_eq!(slice.input[0][[2, 5]], 7.0);
    assert!(close(
        slice.input_metadata[0].zooms().unwrap(),
        (0.001, 0.002, 0.001)
    ));
}

#[test]
fn test_planar_without_pixel_size() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "a.png", 4, 4);
    let err = SegmentationPair::new(&[&png], vec![], None, PairOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MissingSpacingMetadata { .. }));

    let err = read_file(dir.path().join("a.ome.tif"), None).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { .. }));
}

#[test]
fn test_multi_rater_with_absent_class() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let shape = (6, 7, 4);
    let image = write_nifti(dir.path(), "sub-01_T2w.nii.gz", Array3::from_elem(shape, 3.0));

    let mut r1 = Array3::zeros(shape);
    r1.slice_mut(s![1..3, 1..3, 1]).fill(1.0);
    let mut r2 = Array3::zeros(shape);
    r2.slice_mut(s![2..4, 2..4, 1..3]).fill(1.0);
    let p1 = write_nifti(dir.path(), "sub-01_T2w_seg-r1.nii.gz", r1.clone());
    let p2 = write_nifti(dir.path(), "sub-01_T2w_seg-r2.nii.gz", r2.clone());

    let pair = SegmentationPair::new(
        &[&image],
        vec![GtSpec::from(vec![p1, p2]), GtSpec::Absent],
        None,
        PairOptions::default(),
    )
    .unwrap();

    let (input_shape, gt_shape) = pair.pair_shapes().unwrap();
    assert_eq!(Some(input_shape), gt_shape);

    let data = pair.pair_data().unwrap();
    assert_eq!(data.gt.len(), 2);
    let Annotation::Raters(raters) = &data.gt[0] else {
        panic!("expected two raters");
    };
    assert_eq!(raters.len(), 2);
    assert_eq!(raters[0].rater, RaterId(0));
    assert_eq!(raters[0].value, r1);
    assert_eq!(raters[1].value, r2);
    let Annotation::Single(zeros) = &data.gt[1] else {
        panic!("expected a synthetic zero mask");
    };
    assert_eq!(zeros.dim(), data.input[0].dim());
    assert!(zeros.iter().all(|&v| v == 0.0));
}

#[test]
fn test_input_label_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_nifti(dir.path(), "im.nii.gz", Array3::zeros((6, 7, 4)));
    let label = write_nifti(dir.path(), "gt.nii.gz", Array3::zeros((6, 7, 5)));
    let err = SegmentationPair::new(
        &[&image],
        vec![GtSpec::from(label)],
        None,
        PairOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_post_processing_keeps_affine() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let mut soft = Array3::<f32>::zeros((8, 8, 8));
    soft.slice_mut(s![1..5, 1..5, 1..5]).fill(0.9);
    soft[[3, 3, 3]] = 0.0;
    soft[[7, 7, 7]] = 0.6;
    let path = write_nifti(dir.path(), "pred.nii.gz", soft.clone());

    let volume = Volume::open(&path).unwrap();
    let pred = Prediction::from(volume.to_spatial_image(false).unwrap());
    let affine = *pred.affine().unwrap();

    let largest = pred.keep_largest_object();
    assert_eq!(largest.affine(), Some(&affine));
    assert_eq!(largest.data()[[7, 7, 7]], 0.0);
    assert_eq!(largest.data()[[1, 1, 1]], 0.9);

    let binary = largest.threshold(DEFAULT_THRESHOLD);
    let filled = binary.fill_holes(&[3, 3, 3]).unwrap();
    assert_eq!(filled.data()[[3, 3, 3]], 1);
    assert_eq!(filled.affine(), Some(&affine));

    let masked = pred.mask(&filled).unwrap();
    assert_eq!(masked.data()[[7, 7, 7]], 0.0);
    assert_eq!(masked.data()[[2, 2, 2]], 0.9);

    let out = dir.path().join("pred_post.nii.gz");
    let Prediction::Spatial(image) = masked.map(|d| d.mapv(|v| v * 2.0)) else {
        panic!("expected a spatial prediction");
    };
    image.save(&out).unwrap();
    let back = SpatialImage::<f32>::open(&out).unwrap();
    assert_eq!(back.affine(), &affine);
    assert_eq!(back.data()[[2, 2, 2]], 1.8);
}
