//! Test fixtures for generating request bodies and images.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Raw admin token whose hash is `AdminConfig::for_testing()`.
pub const ADMIN_TOKEN: &str = "vitrine-test-admin";

/// Public base URL used by `AppConfig::for_testing()`.
pub const PUBLIC_URL: &str = "https://images.test";

/// Boundary used by [`multipart_body`].
pub const BOUNDARY: &str = "vitrine-test-boundary";

/// Public URL of a storage key under [`PUBLIC_URL`].
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn public_url(key: &str) -> String {
    format!("{PUBLIC_URL}/{key}")
}

/// Encode a gradient image of the given size in `format`.
#[allow(dead_code)]
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 5 % 256) as u8, (y * 11 % 256) as u8, 40])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .expect("encode fixture image");
    Bytes::from(buf.into_inner())
}

/// A multipart part: either a file or a text field.
#[allow(dead_code)]
pub enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

/// Build a `multipart/form-data` body delimited by [`BOUNDARY`].
#[allow(dead_code)]
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
