use std::io::Cursor;

use image::ImageFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to convert image: {0}")]
    Convert(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Gif,
    Jpeg,
    Png,
}

impl ImageKind {
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.contains("gif") {
            ImageKind::Gif
        } else if lower.contains("jpg") {
            ImageKind::Jpeg
        } else if lower.ends_with(".png") {
            ImageKind::Png
        } else {
            ImageKind::Jpeg
        }
    }
}

/// A detail image ready to be uploaded to object storage.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Names the image `{product_id}_{count}` and re-encodes GIFs as PNG.
pub fn prepare_upload(
    product_id: &str,
    count: u32,
    url: &str,
    bytes: Vec<u8>,
) -> Result<PreparedImage, ImageError> {
    let prepared = match ImageKind::from_url(url) {
        ImageKind::Gif => PreparedImage {
            file_name: format!("{product_id}_{count}.png"),
            content_type: "image/png",
            bytes: gif_to_png(&bytes)?,
        },
        ImageKind::Png => PreparedImage {
            file_name: format!("{product_id}_{count}.png"),
            content_type: "image/png",
            bytes,
        },
        ImageKind::Jpeg => PreparedImage {
            file_name: format!("{product_id}_{count}.jpg"),
            content_type: "image/jpeg",
            bytes,
        },
    };
    Ok(prepared)
}

// The format is sniffed from the bytes; only the first frame of an animated GIF survives.
fn gif_to_png(bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(bytes)?;
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

pub fn product_id_from_url(pc_url: &str) -> String {
    pc_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn tiny_gif() -> Vec<u8> {
        let img = RgbaImage::from_pixel(2, 2, Rgba([200, 10, 10, 255]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Gif)
            .unwrap();
        out
    }

    #[test]
    fn kind_follows_url_precedence() {
        assert_eq!(ImageKind::from_url("https://x/a.gif?type=w860"), ImageKind::Gif);
        assert_eq!(ImageKind::from_url("https://x/a.JPG"), ImageKind::Jpeg);
        assert_eq!(ImageKind::from_url("https://x/a.png"), ImageKind::Png);
        assert_eq!(ImageKind::from_url("https://x/a.png?type=w860"), ImageKind::Jpeg);
        assert_eq!(ImageKind::from_url("https://x/a.webp"), ImageKind::Jpeg);
    }

    #[test]
    fn gif_is_reencoded_as_png() {
        let prepared = prepare_upload("555", 3, "https://x/anim.gif", tiny_gif()).unwrap();
        assert_eq!(prepared.file_name, "555_3.png");
        assert_eq!(prepared.content_type, "image/png");
        assert!(prepared.bytes.starts_with(b"\x89PNG"));
    }

    #[test]
    fn gif_named_url_with_jpeg_bytes_still_converts() {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 120, 30]));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let prepared = prepare_upload(
            "555",
            1,
            "https://shop-phinf.pstatic.net/gift_box.jpg",
            jpeg,
        )
        .unwrap();
        assert_eq!(prepared.file_name, "555_1.png");
        assert!(prepared.bytes.starts_with(b"\x89PNG"));
    }

    #[test]
    fn jpeg_passes_through() {
        let prepared = prepare_upload("555", 1, "https://x/a.jpg", vec![1, 2, 3]).unwrap();
        assert_eq!(prepared.file_name, "555_1.jpg");
        assert_eq!(prepared.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn broken_gif_is_an_error() {
        assert!(prepare_upload("555", 1, "https://x/a.gif", b"nope".to_vec()).is_err());
    }

    #[test]
    fn product_id_is_last_segment() {
        assert_eq!(
            product_id_from_url("https://smartstore.naver.com/mall/products/555"),
            "555"
        );
        assert_eq!(product_id_from_url("https://x/products/556/"), "556");
    }
}
