//! Decoding of request images into RGB pixel buffers.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("unsupported image format: {0:?}")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("raw image with {channels} channels is not supported")]
    UnsupportedChannels { channels: u32 },
    #[error("raw buffer holds {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    InvalidLength {
        width: u32,
        height: u32,
        channels: u32,
        expected: usize,
        actual: usize,
    },
}

/// Image payload as received from a client.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    pub data: &'a [u8],
    /// `"jpeg"`, `"png"`, or `"raw"` (empty is read as raw).
    pub format: &'a str,
    /// Raw buffers only.
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

/// Decode a request image into RGB.
///
/// Raw buffers are row-major and tightly packed, either RGB or single-channel gray.
pub fn decode_image(req: ImageRequest<'_>) -> Result<RgbImage, InputError> {
    match req.format.to_ascii_lowercase().as_str() {
        "jpeg" | "jpg" => Ok(image::load_from_memory_with_format(req.data, ImageFormat::Jpeg)?.to_rgb8()),
        "png" => Ok(image::load_from_memory_with_format(req.data, ImageFormat::Png)?.to_rgb8()),
        "raw" | "" => decode_raw(req),
        other => Err(InputError::UnsupportedFormat(other.to_string())),
    }
}

fn decode_raw(req: ImageRequest<'_>) -> Result<RgbImage, InputError> {
    let ImageRequest {
        data,
        width,
        height,
        channels,
        ..
    } = req;

    if channels != 1 && channels != 3 {
        return Err(InputError::UnsupportedChannels { channels });
    }

    let expected = width as usize * height as usize * channels as usize;
    let invalid = || InputError::InvalidLength {
        width,
        height,
        channels,
        expected,
        actual: data.len(),
    };
    if data.len() != expected {
        return Err(invalid());
    }

    if channels == 3 {
        RgbImage::from_raw(width, height, data.to_vec()).ok_or_else(invalid)
    } else {
        let gray = GrayImage::from_raw(width, height, data.to_vec()).ok_or_else(invalid)?;
        Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn raw(data: &[u8], width: u32, height: u32, channels: u32) -> ImageRequest<'_> {
        ImageRequest {
            data,
            format: "raw",
            width,
            height,
            channels,
        }
    }

    #[test]
    fn test_decode_raw_rgb() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let img = decode_image(raw(&data, 2, 1, 3)).unwrap();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(1, 0), &Rgb([4, 5, 6]));
    }

    #[test]
    fn test_decode_raw_gray_expands() {
        let data = [7u8, 200];
        let img = decode_image(raw(&data, 1, 2, 1)).unwrap();
        assert_eq!(img.get_pixel(0, 1), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_decode_raw_wrong_length() {
        let data = [0u8; 5];
        let err = decode_image(raw(&data, 2, 1, 3)).unwrap_err();
        assert!(matches!(err, InputError::InvalidLength { expected: 6, actual: 5, .. }));
    }

    #[test]
    fn test_decode_raw_bad_channels() {
        let data = [0u8; 8];
        let err = decode_image(raw(&data, 2, 1, 4)).unwrap_err();
        assert!(matches!(err, InputError::UnsupportedChannels { channels: 4 }));
    }

    #[test]
    fn test_decode_png() {
        let src = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        src.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let req = ImageRequest {
            data: &bytes,
            format: "PNG",
            width: 0,
            height: 0,
            channels: 0,
        };
        let img = decode_image(req).unwrap();
        assert_eq!(img, src);
    }

    #[test]
    fn test_decode_garbage_jpeg() {
        let req = ImageRequest {
            data: b"not a jpeg",
            format: "jpeg",
            width: 0,
            height: 0,
            channels: 0,
        };
        assert!(matches!(decode_image(req), Err(InputError::Decode(_))));
    }

    #[test]
    fn test_unknown_format() {
        let req = ImageRequest {
            data: &[],
            format: "webp2",
            width: 0,
            height: 0,
            channels: 0,
        };
        assert!(matches!(decode_image(req), Err(InputError::UnsupportedFormat(_))));
    }
}
