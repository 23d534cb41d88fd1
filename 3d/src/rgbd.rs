//! RGB-D frames and back-projection.

use nalgebra::{Point2, Point3, Vector3};
use rayon::prelude::*;
use scan_core::{CameraIntrinsics, Error, PointCloud, Pose, Result};
use std::sync::Arc;

/// A registered color + depth image pair.
///
/// Depth is stored in metres; samples that are non-finite, non-positive or
/// beyond the truncation range are stored as 0 (invalid).
#[derive(Debug, Clone)]
pub struct RgbdImage {
    width: u32,
    height: u32,
    color: Vec<Vector3<u8>>,
    depth: Vec<f32>,
}

impl RgbdImage {
    /// Builds an image from row-major buffers, truncating depth at `depth_trunc`.
    pub fn new(
        width: u32,
        height: u32,
        color: Vec<Vector3<u8>>,
        mut depth: Vec<f32>,
        depth_trunc: f32,
    ) -> Result<Self> {
        let pixels = width as usize * height as usize;
        if pixels == 0 {
            return Err(Error::InvalidInput("RGB-D image has zero size".into()));
        }
        if color.len() != pixels || depth.len() != pixels {
            return Err(Error::InvalidInput(format!(
                "{width}x{height} image needs {pixels} samples, got {} color and {} depth",
                color.len(),
                depth.len()
            )));
        }
        for d in &mut depth {
            if !(d.is_finite() && *d > 0.0 && *d <= depth_trunc) {
                *d = 0.0;
            }
        }
        Ok(Self {
            width,
            height,
            color,
            depth,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color(&self) -> &[Vector3<u8>] {
        &self.color
    }

    pub fn depth(&self) -> &[f32] {
        &self.depth
    }

    /// Depth at pixel `(u, v)` in metres, `None` when out of bounds or invalid.
    pub fn depth_at(&self, u: u32, v: u32) -> Option<f32> {
        if u >= self.width || v >= self.height {
            return None;
        }
        let d = self.depth[(v * self.width + u) as usize];
        (d > 0.0).then_some(d)
    }

    pub fn color_at(&self, u: u32, v: u32) -> Vector3<u8> {
        self.color[(v * self.width + u) as usize]
    }

    pub fn valid_depth_count(&self) -> usize {
        self.depth.iter().filter(|&&d| d > 0.0).count()
    }
}

/// An RGB-D image with its camera.
///
/// `extrinsic` maps world points into the camera frame (world-to-camera).
/// Intrinsics are shared between the frames of one sequence.
#[derive(Debug, Clone)]
pub struct PosedFrame {
    pub image: Arc<RgbdImage>,
    pub extrinsic: Pose,
    pub intrinsics: Arc<CameraIntrinsics>,
}

impl PosedFrame {
    pub fn new(
        image: Arc<RgbdImage>,
        extrinsic: Pose,
        intrinsics: Arc<CameraIntrinsics>,
    ) -> Result<Self> {
        intrinsics.validate()?;
        if image.width() != intrinsics.width || image.height() != intrinsics.height {
            return Err(Error::InvalidIntrinsics(format!(
                "intrinsics are {}x{} but the image is {}x{}",
                intrinsics.width,
                intrinsics.height,
                image.width(),
                image.height()
            )));
        }
        Ok(Self {
            image,
            extrinsic,
            intrinsics,
        })
    }

    /// Builds a frame from a camera-to-world pose, as stored in trajectory files.
    pub fn from_camera_pose(
        image: Arc<RgbdImage>,
        camera_to_world: &Pose,
        intrinsics: Arc<CameraIntrinsics>,
    ) -> Result<Self> {
        Self::new(image, camera_to_world.inverse(), intrinsics)
    }

    pub fn camera_to_world(&self) -> Pose {
        self.extrinsic.inverse()
    }

    /// Same image and camera under a different extrinsic.
    pub fn with_extrinsic(&self, extrinsic: Pose) -> Self {
        Self {
            image: Arc::clone(&self.image),
            extrinsic,
            intrinsics: Arc::clone(&self.intrinsics),
        }
    }

    /// Back-projects every valid depth sample into world coordinates, with
    /// colors in `[0, 1]`.
    pub fn to_point_cloud(&self) -> PointCloud {
        let image = &self.image;
        let to_world = self.camera_to_world();
        let (width, height) = (image.width(), image.height());

        let samples: Vec<(Point3<f32>, Point3<f32>)> = (0..height)
            .into_par_iter()
            .flat_map_iter(|v| {
                let to_world = &to_world;
                (0..width).filter_map(move |u| {
                    let d = image.depth_at(u, v)?;
                    let camera = self
                        .intrinsics
                        .unproject(Point2::new(u as f64, v as f64), d as f64);
                    let world = to_world.transform_point(&camera);
                    let c = image.color_at(u, v);
                    Some((
                        world.cast::<f32>(),
                        Point3::new(c.x as f32, c.y as f32, c.z as f32) / 255.0,
                    ))
                })
            })
            .collect();

        let (points, colors): (Vec<_>, Vec<_>) = samples.into_iter().unzip();
        PointCloud {
            points,
            colors: Some(colors),
            normals: None,
        }
    }
}

/// Back-projects frames independently on the worker pool.
pub fn frames_to_point_clouds(frames: &[PosedFrame]) -> Vec<PointCloud> {
    frames.par_iter().map(PosedFrame::to_point_cloud).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(depth: f32) -> PosedFrame {
        let intrinsics = Arc::new(CameraIntrinsics::new(20.0, 20.0, 9.5, 7.5, 20, 16));
        let image = RgbdImage::new(
            20,
            16,
            vec![Vector3::new(255, 0, 0); 320],
            vec![depth; 320],
            2.0,
        )
        .unwrap();
        PosedFrame::new(Arc::new(image), Pose::identity(), intrinsics).unwrap()
    }

    #[test]
    fn test_depth_truncation() {
        let image = RgbdImage::new(
            2,
            2,
            vec![Vector3::zeros(); 4],
            vec![0.5, 1.5, f32::NAN, -1.0],
            1.0,
        )
        .unwrap();
        assert_eq!(image.depth(), &[0.5, 0.0, 0.0, 0.0]);
        assert_eq!(image.valid_depth_count(), 1);
        assert_eq!(image.depth_at(0, 0), Some(0.5));
        assert_eq!(image.depth_at(1, 0), None);
    }

    #[test]
    fn test_mismatched_buffers_rejected() {
        let err = RgbdImage::new(2, 2, vec![Vector3::zeros(); 3], vec![1.0; 4], 1.0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_intrinsics_size_must_match() {
        let intrinsics = Arc::new(CameraIntrinsics::new(20.0, 20.0, 9.5, 7.5, 40, 16));
        let image = RgbdImage::new(20, 16, vec![Vector3::zeros(); 320], vec![1.0; 320], 2.0)
            .unwrap();
        let err = PosedFrame::new(Arc::new(image), Pose::identity(), intrinsics).unwrap_err();
        assert!(matches!(err, Error::InvalidIntrinsics(_)));
    }

    #[test]
    fn test_back_projection_in_world() {
        let frame = flat_frame(1.0);
        let camera = Pose::from_translation(Vector3::new(0.5, 0.0, 0.0));
        let moved = frame.with_extrinsic(camera.inverse());
        let cloud = moved.to_point_cloud();
        assert_eq!(cloud.len(), 320);
        for p in &cloud.points {
            assert!((p.z - 1.0).abs() < 1e-6);
        }
        let centroid = cloud.centroid().unwrap();
        assert!((centroid.x - 0.5).abs() < 1e-3);
        assert_eq!(cloud.colors.as_ref().unwrap()[0], Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_parallel_conversion_keeps_order() {
        let frames = vec![flat_frame(0.5), flat_frame(1.0)];
        let clouds = frames_to_point_clouds(&frames);
        assert!((clouds[0].points[0].z - 0.5).abs() < 1e-6);
        assert!((clouds[1].points[0].z - 1.0).abs() < 1e-6);
    }
}
