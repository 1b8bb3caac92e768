//! 画像の前処理
//!
//! 任意サイズ・任意形式の画像を、モデル入力となる
//! (C, H, W) 順の平坦な `f32` 配列に変換します。

use image::{imageops::FilterType, DynamicImage};

use crate::error::ClassifierError;

/// モデル入力の画像サイズ（正方形）
pub const IMAGE_SIZE: u32 = 224;

/// チャンネル数（RGB）
pub const CHANNELS: usize = 3;

/// バイト列から画像をデコード
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ClassifierError> {
    image::load_from_memory(bytes).map_err(ClassifierError::ImageDecode)
}

/// 画素値を [-1, 1] に変換
///
/// 学習時（MobileNetV2方式）と同じスケーリングでなければ信頼度が狂う。
#[inline]
pub fn normalize_channel(value: u8) -> f32 {
    (value as f32 / 127.5) - 1.0
}

/// 画像をリサイズして正規化
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化、長さは `3 * size * size`
pub fn image_to_input(img: &DynamicImage, size: u32) -> Vec<f32> {
    // バイリニア補間で正確に size x size にする（アスペクト比は保持しない）
    let rgb = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut data = Vec::with_capacity(CHANNELS * (width * height) as usize);
    for channel in 0..CHANNELS {
        for y in 0..height {
            for x in 0..width {
                let pixel = rgb.get_pixel(x, y);
                data.push(normalize_channel(pixel[channel]));
            }
        }
    }
    data
}

/// バイト列をデコードしてモデル入力に変換
pub fn preprocess_bytes(bytes: &[u8], size: u32) -> Result<Vec<f32>, ClassifierError> {
    let img = decode_image(bytes)?;
    Ok(image_to_input(&img, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_normalize_channel_range() {
        assert_eq!(normalize_channel(0), -1.0);
        assert_eq!(normalize_channel(255), 1.0);
        assert!(normalize_channel(127).abs() < 0.01);
    }

    #[test]
    fn test_output_has_fixed_shape() {
        let bytes = png_bytes(RgbImage::new(640, 37));
        let data = preprocess_bytes(&bytes, IMAGE_SIZE).unwrap();
        assert_eq!(data.len(), 3 * 224 * 224);
    }

    #[test]
    fn test_channels_are_planar() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 0, 255]));
        let data = image_to_input(&DynamicImage::ImageRgb8(img), 4);
        let plane = 16;
        assert!(data[..plane].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(data[plane..2 * plane].iter().all(|v| (*v + 1.0).abs() < 1e-6));
        assert!(data[2 * plane..].iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_grayscale_is_expanded_to_rgb() {
        let gray = image::GrayImage::from_pixel(10, 10, image::Luma([255]));
        let data = image_to_input(&DynamicImage::ImageLuma8(gray), 5);
        assert_eq!(data.len(), 3 * 25);
        assert!(data.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_malformed_bytes_fail_to_decode() {
        let err = preprocess_bytes(b"definitely not an image", IMAGE_SIZE).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode(_)));
    }
}
