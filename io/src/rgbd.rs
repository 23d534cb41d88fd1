//! RGB-D image loading.

use image::DynamicImage;
use nalgebra::Vector3;
use scan_3d::RgbdImage;
use scan_core::{Error, Result};
use std::path::Path;

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| Error::resource(path, e.to_string()))
}

/// Reads an 8-bit color image and a 16-bit depth image into an [`RgbdImage`].
///
/// Depth samples are divided by `depth_scale` (units per metre); zero and
/// anything beyond `depth_trunc` metres become invalid.
pub fn read_rgbd_image(
    color_path: impl AsRef<Path>,
    depth_path: impl AsRef<Path>,
    depth_scale: f32,
    depth_trunc: f32,
) -> Result<RgbdImage> {
    if !(depth_scale > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "depth scale must be positive, got {depth_scale}"
        )));
    }
    let (color_path, depth_path) = (color_path.as_ref(), depth_path.as_ref());

    let color = open_image(color_path)?.to_rgb8();
    let depth = match open_image(depth_path)? {
        DynamicImage::ImageLuma16(depth) => depth,
        other => {
            return Err(Error::resource(
                depth_path,
                format!("depth must be a 16-bit single-channel image, got {:?}", other.color()),
            ))
        }
    };

    if color.dimensions() != depth.dimensions() {
        return Err(Error::resource(
            depth_path,
            format!(
                "depth is {:?} but color is {:?}",
                depth.dimensions(),
                color.dimensions()
            ),
        ));
    }

    let (width, height) = color.dimensions();
    let colors = color
        .pixels()
        .map(|p| Vector3::new(p[0], p[1], p[2]))
        .collect();
    let depths = depth
        .pixels()
        .map(|p| p[0] as f32 / depth_scale)
        .collect();
    RgbdImage::new(width, height, colors, depths, depth_trunc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};

    #[test]
    fn test_depth_is_scaled_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let color_path = dir.path().join("color.png");
        let depth_path = dir.path().join("depth.png");
        RgbImage::from_pixel(3, 2, Rgb([10, 20, 30])).save(&color_path).unwrap();
        let depth: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(3, 2, vec![0, 500, 1000, 1300, 1301, 4000]).unwrap();
        depth.save(&depth_path).unwrap();

        let image = read_rgbd_image(&color_path, &depth_path, 1000.0, 1.3).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.depth(), &[0.0, 0.5, 1.0, 1.3, 0.0, 0.0]);
        assert_eq!(image.color_at(2, 1), Vector3::new(10, 20, 30));
    }

    #[test]
    fn test_eight_bit_depth_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let color_path = dir.path().join("color.png");
        let depth_path = dir.path().join("depth.png");
        RgbImage::new(2, 2).save(&color_path).unwrap();
        GrayImage::new(2, 2).save(&depth_path).unwrap();

        let err = read_rgbd_image(&color_path, &depth_path, 1000.0, 1.3).unwrap_err();
        assert!(matches!(err, Error::Resource { ref path, .. } if path == &depth_path));
    }

    #[test]
    fn test_size_mismatch_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let color_path = dir.path().join("color.png");
        let depth_path = dir.path().join("depth.png");
        RgbImage::new(4, 4).save(&color_path).unwrap();
        ImageBuffer::<Luma<u16>, Vec<u16>>::new(2, 2).save(&depth_path).unwrap();
        assert!(read_rgbd_image(&color_path, &depth_path, 1000.0, 1.3).is_err());

        let missing = dir.path().join("missing.png");
        let err = read_rgbd_image(&missing, &depth_path, 1000.0, 1.3).unwrap_err();
        assert!(matches!(err, Error::Resource { ref path, .. } if path == &missing));
    }
}
