//! テスト用のヘルパー

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// 単色のPNG画像をエンコードして返す
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([180, 120, 90]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode test png");
    bytes
}
