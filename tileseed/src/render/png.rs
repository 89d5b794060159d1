//! PNG tile encoding.

use super::{EncodeError, EncodeParams, RawImage, TileEncoder};
use image::RgbaImage;
use std::io::Cursor;
use tracing::trace;

/// Encodes rendered tiles as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngTileEncoder;

impl PngTileEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl TileEncoder for PngTileEncoder {
    fn encode(&self, image: RawImage, params: &EncodeParams) -> Result<Vec<u8>, EncodeError> {
        let RawImage {
            width,
            height,
            mut data,
        } = image;

        if data.len() != width as usize * height as usize * 4 {
            return Err(EncodeError::InvalidBuffer {
                width,
                height,
                len: data.len(),
            });
        }

        unpremultiply(&mut data);

        let left = params.buffer_x * params.ratio;
        let top = params.buffer_y * params.ratio;
        if left * 2 >= width || top * 2 >= height {
            return Err(EncodeError::InvalidCrop {
                width,
                height,
                buffer_x: params.buffer_x,
                buffer_y: params.buffer_y,
            });
        }

        let mut img = RgbaImage::from_raw(width, height, data).ok_or(EncodeError::InvalidBuffer {
            width,
            height,
            len: 0,
        })?;

        if left > 0 || top > 0 {
            let (w, h) = (width - left * 2, height - top * 2);
            trace!(width = w, height = h, "Removing edge buffer");
            img = image::imageops::crop_imm(&img, left, top, w, h).to_image();
        }

        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        Ok(buffer)
    }
}

/// Divide alpha out of premultiplied RGBA pixels.
fn unpremultiply(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        let alpha = pixel[3] as u32;
        if alpha == 0 {
            pixel[..3].fill(0);
        } else if alpha < 255 {
            for c in &mut pixel[..3] {
                *c = ((*c as u32 * 255 + alpha / 2) / alpha).min(255) as u8;
            }
        }
    }
}
