//! Test fixtures for generating image data.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use vitrine_core::config::MediaConfig;

/// Encode a gradient image of the given size in `format`.
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, 90])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .expect("encode fixture image");
    Bytes::from(buf.into_inner())
}

/// Media settings pointing at `https://images.test`.
pub fn media_config() -> MediaConfig {
    MediaConfig {
        public_url: Some("https://images.test".to_string()),
        ..MediaConfig::default()
    }
}
