//! Pixel geometry for cutting a padded face out of the source image.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;

use thiserror::Error;

use crate::db::BoundingBox;

/// Padding added on each side of a face, as a fraction of its width/height.
pub const DEFAULT_PADDING: f64 = 0.2;

/// Crop region within the source image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The image has a zero or unknown width or height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("image dimensions are zero or unknown")]
pub struct UnknownDimensions;

/// Compute the padded crop for a normalized face box.
///
/// The padded box is clamped into the image: the origin never goes negative
/// and the size is shrunk so the region never extends past `(width, height)`.
/// Zero dimensions are the only error.
pub fn crop_region(
    image_width: u32,
    image_height: u32,
    bbox: &BoundingBox,
    padding: f64,
) -> Result<CropRegion, UnknownDimensions> {
    if image_width == 0 || image_height == 0 {
        return Err(UnknownDimensions);
    }

    let padding = if padding.is_finite() { padding.max(0.0) } else { 0.0 };
    let (w, h) = (image_width as f64, image_height as f64);

    let face_left = bbox.left * w;
    let face_top = bbox.top * h;
    let face_width = bbox.width * w;
    let face_height = bbox.height * h;

    let pad_x = face_width * padding;
    let pad_y = face_height * padding;

    let (x, width) = clamp_axis(face_left - pad_x, face_width + 2.0 * pad_x, image_width);
    let (y, height) = clamp_axis(face_top - pad_y, face_height + 2.0 * pad_y, image_height);

    Ok(CropRegion {
        x,
        y,
        width,
        height,
    })
}

/// Clamp one axis: origin into `[0, limit - 1]`, extent into `[1, limit - origin]`.
fn clamp_axis(start: f64, extent: f64, limit: u32) -> (u32, u32) {
    let start = if start.is_finite() { start } else { 0.0 };
    let extent = if extent.is_finite() { extent } else { 0.0 };

    // `as` saturates, so negative starts land on 0
    let origin = (start.floor() as u32).min(limit - 1);
    let size = (extent.round() as u32).clamp(1, limit - origin);
    (origin, size)
}

/// Cut `region` out of `img` and encode it as JPEG.
pub fn encode_crop(
    img: &DynamicImage,
    region: CropRegion,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let cropped = img.crop_imm(region.x, region.y, region.width, region.height);
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(cropped.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbaImage};

    fn bbox(left: f64, top: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox::new(left, top, width, height).unwrap()
    }

    fn assert_inside(region: CropRegion, w: u32, h: u32) {
        assert!(region.width >= 1 && region.height >= 1);
        assert!(region.x + region.width <= w, "{:?} exceeds width {}", region, w);
        assert!(region.y + region.height <= h, "{:?} exceeds height {}", region, h);
    }

    #[test]
    fn centered_face_gets_symmetric_padding() {
        // 1000x500, face at 40%..60% x 40%..60%
        let region = crop_region(1000, 500, &bbox(0.4, 0.4, 0.2, 0.2), 0.2).unwrap();
        // face 200x100 at (400, 200); padding 40 x 20
        assert_eq!(
            region,
            CropRegion {
                x: 360,
                y: 180,
                width: 280,
                height: 140
            }
        );
    }

    #[test]
    fn zero_padding_is_the_face_itself() {
        let region = crop_region(200, 100, &bbox(0.25, 0.5, 0.5, 0.25), 0.0).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 50,
                y: 50,
                width: 100,
                height: 25
            }
        );
    }

    #[test]
    fn top_left_edge_clamps_origin() {
        let region = crop_region(100, 100, &bbox(0.0, 0.0, 0.3, 0.3), 0.2).unwrap();
        assert_eq!(region.x, 0);
        assert_eq!(region.y, 0);
        assert_inside(region, 100, 100);
    }

    #[test]
    fn bottom_right_edge_shrinks_extent() {
        // face 30x15 at (70, 35), padding 6 x 3
        let region = crop_region(100, 50, &bbox(0.7, 0.7, 0.3, 0.3), 0.2).unwrap();
        assert_eq!(region.x, 64);
        assert_eq!(region.y, 32);
        assert_eq!(region.width, 36);
        assert_eq!(region.height, 18);
        assert_inside(region, 100, 50);
    }

    #[test]
    fn full_frame_face_never_exceeds_image() {
        let region = crop_region(640, 480, &bbox(0.0, 0.0, 1.0, 1.0), 0.5).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 0,
                y: 0,
                width: 640,
                height: 480
            }
        );
    }

    #[test]
    fn degenerate_box_on_far_edge_stays_inside() {
        let region = crop_region(50, 50, &bbox(1.0, 1.0, 0.0, 0.0), 0.2).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 49,
                y: 49,
                width: 1,
                height: 1
            }
        );
    }

    #[test]
    fn edge_boxes_stay_inside_across_sizes() {
        let boxes = [
            bbox(0.0, 0.3, 0.2, 0.2),
            bbox(0.8, 0.3, 0.2, 0.2),
            bbox(0.3, 0.0, 0.2, 0.2),
            bbox(0.3, 0.8, 0.2, 0.2),
            bbox(0.95, 0.95, 0.05, 0.05),
        ];
        for (w, h) in [(1, 1), (3, 7), (100, 100), (1920, 1080), (4032, 3024)] {
            for b in &boxes {
                let region = crop_region(w, h, b, DEFAULT_PADDING).unwrap();
                assert_inside(region, w, h);
            }
        }
    }

    #[test]
    fn zero_dimensions_fail() {
        let b = bbox(0.1, 0.1, 0.2, 0.2);
        assert_eq!(crop_region(0, 100, &b, 0.2), Err(UnknownDimensions));
        assert_eq!(crop_region(100, 0, &b, 0.2), Err(UnknownDimensions));
    }

    #[test]
    fn encode_crop_produces_jpeg_of_region_size() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(64, 48));
        let region = CropRegion {
            x: 10,
            y: 8,
            width: 20,
            height: 16,
        };
        let bytes = encode_crop(&img, region, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (20, 16));
    }
}
