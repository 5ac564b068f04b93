//! 按扩展名读取单个图像文件, 统一得到 [`Volume`].
//!
//! nifti 文件直接加载. 平面图像 (tif/png/jpg) 以灰度解码, 扩展为单切片体数据,
//! 根据 `PixelSize` 元数据确定体素尺寸, 并在原文件旁边保存一份转换后的 nifti 文件.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use image::codecs::tiff::TiffDecoder;
use image::{ColorType, DynamicImage, GenericImageView};
use ndarray::{Array2, Axis};
use serde_json::{Map, Value};

use super::Volume;
use crate::consts::format::{CONVERTED_EXTENSION, OME_MARKER};
use crate::consts::meta::{PIXEL_SIZE, PIXEL_SIZE_LENGTHS, UM_TO_MM};
use crate::error::{Error, Result};
use crate::Zooms;

/// 可识别的扩展名. 顺序有意义: 先匹配较长的后缀.
const KNOWN_EXTENSIONS: [&str; 12] = [
    ".nii.gz", ".nii", ".ome.tif", ".ome.tiff", ".ome.tf2", ".ome.tf8", ".ome.btf", ".tif",
    ".tiff", ".png", ".jpg", ".jpeg",
];

/// 平面图像的解码族.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlanarFamily {
    /// TIFF, 使用专门的 TIFF 解码器.
    Tiff,

    /// 其它可按灰度解码的格式 (png, jpg).
    Generic,
}

/// 解码策略. 只由扩展名决定.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageDecoder {
    /// nifti 原生体数据.
    NativeVolumetric,

    /// 平面灰度图像.
    PlanarGrayscale(PlanarFamily),
}

impl ImageDecoder {
    /// 扩展名到解码策略的映射. 不支持的扩展名 (包括 OME 显微镜格式) 返回 `None`.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            _ if extension.contains(OME_MARKER) => None,
            ".nii" | ".nii.gz" => Some(Self::NativeVolumetric),
            ".tif" | ".tiff" => Some(Self::PlanarGrayscale(PlanarFamily::Tiff)),
            ".png" | ".jpg" | ".jpeg" => Some(Self::PlanarGrayscale(PlanarFamily::Generic)),
            _ => None,
        }
    }

    /// 根据文件名选择解码策略, 同时返回匹配到的扩展名.
    pub fn for_path(path: &Path) -> Result<(Self, &'static str)> {
        let extension = file_extension(path);
        extension
            .and_then(|ext| Self::from_extension(ext).map(|d| (d, ext)))
            .ok_or_else(|| Error::UnsupportedFormat {
                extension: extension.map(str::to_owned).unwrap_or_else(|| {
                    path.extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default()
                }),
                file: path.to_owned(),
            })
    }
}

/// 获取文件名匹配的已知扩展名 (大小写不敏感). 没有匹配时返回 `None`.
pub fn file_extension(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    KNOWN_EXTENSIONS
        .into_iter()
        .find(|ext| name.ends_with(ext))
}

/// 平面图像 `path` 转换后的 nifti 文件路径: 扩展名 `extension` 被替换为 `.nii.gz`.
pub fn converted_filename(path: &Path, extension: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cut = name.len().saturating_sub(extension.len());
    let stem = name.get(..cut).unwrap_or(&name);
    path.with_file_name(format!("{stem}{CONVERTED_EXTENSION}"))
}

/// 读取单个文件.
///
/// `metadata` 为第一个输入通道的元数据, 仅在转换平面图像时用于读取 `PixelSize`.
pub fn read_file<P: AsRef<Path>>(path: P, metadata: Option<&Map<String, Value>>) -> Result<Volume> {
    let path = path.as_ref();
    match ImageDecoder::for_path(path)? {
        (ImageDecoder::NativeVolumetric, _) => Volume::open(path),
        (ImageDecoder::PlanarGrayscale(family), extension) => {
            convert_planar(path, extension, family, metadata)
        }
    }
}

/// 将平面图像转换为单切片 [`Volume`], 并在转换文件不存在时将其写入磁盘.
///
/// 转换文件已存在时不会覆盖; 返回值的体素尺寸总是来自本次的 `metadata`.
pub fn convert_planar(
    path: &Path,
    extension: &str,
    family: PlanarFamily,
    metadata: Option<&Map<String, Value>>,
) -> Result<Volume> {
    let gray = decode_gray(path, family)?;
    let zooms = pixel_size_mm(path, metadata)?;
    log::debug!(
        "平面图像 `{}`: {:?} 像素, 体素尺寸 {zooms:?} mm",
        path.display(),
        gray.dim()
    );

    let volume = Volume::from_planar(path, gray.insert_axis(Axis(2)), zooms)?;
    persist_if_absent(&volume, &converted_filename(path, extension))?;
    Ok(volume)
}

/// 以灰度模式解码平面图像, 返回 `(高, 宽)` 数组.
fn decode_gray(path: &Path, family: PlanarFamily) -> Result<Array2<f32>> {
    let img = match family {
        PlanarFamily::Tiff => {
            let decoder = TiffDecoder::new(BufReader::new(File::open(path)?))?;
            DynamicImage::from_decoder(decoder)?
        }
        PlanarFamily::Generic => image::io::Reader::open(path)?
            .with_guessed_format()?
            .decode()?,
    };
    Ok(gray_array(&img))
}

/// 转换为单通道数组. 16 位和浮点图像保留其原始精度.
fn gray_array(img: &DynamicImage) -> Array2<f32> {
    let (width, height) = img.dimensions();
    let shape = (height as usize, width as usize);
    match img.color() {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            let buf = img.to_luma16();
            Array2::from_shape_fn(shape, |(h, w)| buf.get_pixel(w as u32, h as u32).0[0] as f32)
        }
        ColorType::Rgb32F | ColorType::Rgba32F => {
            let buf = img.to_luma32f();
            Array2::from_shape_fn(shape, |(h, w)| buf.get_pixel(w as u32, h as u32).0[0])
        }
        _ => {
            let buf = img.to_luma8();
            Array2::from_shape_fn(shape, |(h, w)| buf.get_pixel(w as u32, h as u32).0[0] as f32)
        }
    }
}

/// 解析 `PixelSize` (微米) 并换算为三维体素尺寸 (毫米).
///
/// 接受标量 (两个平面方向相同) 或长度为 2/3 的数组. 数组按循环方式补齐到 3 个分量,
/// 第三个分量为 0 时取第一个分量的值, 因为单切片体数据的每个方向尺寸也必须为正.
pub fn pixel_size_mm(path: &Path, metadata: Option<&Map<String, Value>>) -> Result<Zooms> {
    let value = metadata
        .and_then(|m| m.get(PIXEL_SIZE))
        .ok_or_else(|| Error::MissingSpacingMetadata {
            file: path.to_owned(),
        })?;
    let invalid = || Error::InvalidSpacingMetadata(value.to_string());

    let um: Vec<f64> = match value {
        Value::Number(n) => {
            let v = n.as_f64().ok_or_else(invalid)?;
            vec![v, v]
        }
        Value::Array(items) if PIXEL_SIZE_LENGTHS.contains(&items.len()) => items
            .iter()
            .map(Value::as_f64)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };

    let mut um: Vec<f64> = um.iter().copied().cycle().take(3).collect();
    if um[2] == 0.0 {
        um[2] = um[0];
    }
    Ok((um[0] * UM_TO_MM, um[1] * UM_TO_MM, um[2] * UM_TO_MM))
}

/// 只在 `dest` 不存在时写入转换结果.
///
/// 先写入同目录下的临时文件, 再以 "不存在才创建" 的原子方式改名,
/// 多个 worker 同时转换同一文件时只有一个会成功, 其余的直接放弃.
fn persist_if_absent(volume: &Volume, dest: &Path) -> Result<()> {
    if dest.exists() {
        log::warn!(
            "转换文件 `{}` 已存在, 不再重复写入; 其中的体素尺寸可能与本次元数据不同",
            dest.display()
        );
        return Ok(());
    }

    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".seg-berry-")
        .suffix(CONVERTED_EXTENSION)
        .tempfile_in(dir)?;
    volume.save(tmp.path(), false)?;

    match tmp.persist_noclobber(dest) {
        Ok(_) => {
            log::info!("已写入转换文件 `{}`", dest.display());
            Ok(())
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            log::warn!("转换文件 `{}` 已由其它 worker 写入", dest.display());
            Ok(())
        }
        Err(e) => Err(e.error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(v: Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(PIXEL_SIZE.to_owned(), v);
        m
    }

    fn close(a: Zooms, b: Zooms) -> bool {
        (a.0 - b.0).abs() < 1e-12 && (a.1 - b.1).abs() < 1e-12 && (a.2 - b.2).abs() < 1e-12
    }

    #[test]
    fn test_decoder_dispatch() {
        use ImageDecoder::*;
        use PlanarFamily::*;

        let d = |s: &str| ImageDecoder::for_path(Path::new(s)).map(|(d, _)| d);
        assert_eq!(d("sub-01_T2w.nii.gz").unwrap(), NativeVolumetric);
        assert_eq!(d("a/b/sub-01_T2w.NII").unwrap(), NativeVolumetric);
        assert_eq!(d("x.tif").unwrap(), PlanarGrayscale(Tiff));
        assert_eq!(d("x.TIFF").unwrap(), PlanarGrayscale(Tiff));
        assert_eq!(d("x.png").unwrap(), PlanarGrayscale(Generic));
        assert_eq!(d("x.jpeg").unwrap(), PlanarGrayscale(Generic));
    }

    #[test]
    fn test_unsupported_formats() {
        for name in ["x.ome.tif", "x.bmp", "noext"] {
            let err = ImageDecoder::for_path(Path::new(name)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedFormat { .. }), "{name}");
        }
        let Err(Error::UnsupportedFormat { extension, file }) =
            ImageDecoder::for_path(Path::new("dir/x.bmp"))
        else {
            unreachable!()
        };
        assert_eq!(extension, ".bmp");
        assert_eq!(file, PathBuf::from("dir/x.bmp"));
    }

    #[test]
    fn test_converted_filename() {
        assert_eq!(
            converted_filename(Path::new("d/sub-01_SEM.png"), ".png"),
            PathBuf::from("d/sub-01_SEM.nii.gz")
        );
        assert_eq!(
            converted_filename(Path::new("sub-01_TEM.TIFF"), ".tiff"),
            PathBuf::from("sub-01_TEM.nii.gz")
        );
    }

    #[test]
    fn test_pixel_size_scalar() {
        let z = pixel_size_mm(Path::new("x.png"), Some(&meta(json!(0.5)))).unwrap();
        assert!(close(z, (0.0005, 0.0005, 0.0005)));
    }

    #[test]
    fn test_pixel_size_arrays() {
        let p = Path::new("x.png");
        let z = pixel_size_mm(p, Some(&meta(json!([0.1, 0.2])))).unwrap();
        assert!(close(z, (0.0001, 0.0002, 0.0001)));

        let z = pixel_size_mm(p, Some(&meta(json!([0.1, 0.2, 0.0])))).unwrap();
        assert!(close(z, (0.0001, 0.0002, 0.0001)));

        let z = pixel_size_mm(p, Some(&meta(json!([0.1, 0.2, 3.0])))).unwrap();
        assert!(close(z, (0.0001, 0.0002, 0.003)));
    }

    #[test]
    fn test_tiff_keeps_16_bit_values() {
        let dir = tempfile::tempdir().unwrap();
        let tif = dir.path().join("scan.tif");
        let img: image::ImageBuffer<image::Luma<u16>, Vec<u16>> =
            image::ImageBuffer::from_fn(5, 3, |x, y| image::Luma([(y * 1000 + x) as u16]));
        img.save(&tif).unwrap();

        let v = read_file(&tif, Some(&meta(json!([2.0, 4.0])))).unwrap();
        assert_eq!(v.shape(), (3, 5, 1));
        let (zx, zy, zz) = v.zooms();
        assert!((zx - 0.002).abs() < 1e-9 && (zy - 0.004).abs() < 1e-9 && (zz - 0.002).abs() < 1e-9);
        let d = v.fdata(false).unwrap();
        assert_eq!(d[[2, 4, 0]], 2004.0);
        assert_eq!(d[[1, 0, 0]], 1000.0);

        let converted = dir.path().join("scan.nii.gz");
        assert!(converted.exists());
        assert_eq!(Volume::open(&converted).unwrap().fdata(false).unwrap(), d);
    }

    #[test]
    fn test_pixel_size_errors() {
        let p = Path::new("x.png");
        assert!(matches!(
            pixel_size_mm(p, None),
            Err(Error::MissingSpacingMetadata { .. })
        ));
        assert!(matches!(
            pixel_size_mm(p, Some(&Map::new())),
            Err(Error::MissingSpacingMetadata { .. })
        ));
        for bad in [json!([1.0]), json!([1, 2, 3, 4]), json!("0.5"), json!([1, "a"])] {
            assert!(matches!(
                pixel_size_mm(p, Some(&meta(bad))),
                Err(Error::InvalidSpacingMetadata(_))
            ));
        }
    }
}
