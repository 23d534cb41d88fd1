use crate::{Error, Result};
use nalgebra::{
    Matrix3, Matrix4, Point2, Point3, Quaternion, Rotation3, UnitQuaternion, Vector3, Vector6,
};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Pinhole intrinsics of a depth/color camera.
///
/// `sensor_width_mm` is only needed for the lens-equivalent focal length used
/// by renderers; fusion never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub sensor_width_mm: Option<f64>,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
            sensor_width_mm: None,
        }
    }

    pub fn with_sensor_width(mut self, sensor_width_mm: f64) -> Self {
        self.sensor_width_mm = Some(sensor_width_mm);
        self
    }

    /// Rejects intrinsics no camera could have produced.
    pub fn validate(&self) -> Result<()> {
        if !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0) {
            return Err(Error::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidIntrinsics(format!(
                "image size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        let inside_x = self.cx >= 0.0 && self.cx <= self.width as f64;
        let inside_y = self.cy >= 0.0 && self.cy <= self.height as f64;
        if !(inside_x && inside_y) {
            return Err(Error::InvalidIntrinsics(format!(
                "principal point ({}, {}) lies outside the {}x{} image",
                self.cx, self.cy, self.width, self.height
            )));
        }
        if let Some(sw) = self.sensor_width_mm {
            if !(sw.is_finite() && sw > 0.0) {
                return Err(Error::InvalidIntrinsics(format!(
                    "sensor width must be positive, got {sw}"
                )));
            }
        }
        Ok(())
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn project(&self, point: &Point3<f64>) -> Point2<f64> {
        let x = point.x / point.z;
        let y = point.y / point.z;
        Point2::new(x * self.fx + self.cx, y * self.fy + self.cy)
    }

    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        let x = (pixel.x - self.cx) / self.fx;
        let y = (pixel.y - self.cy) / self.fy;
        Point3::new(x * depth, y * depth, depth)
    }

    /// Lens-equivalent focal length in millimetres, if the sensor width is known.
    pub fn focal_length_mm(&self) -> Option<f64> {
        self.sensor_width_mm
            .map(|sw| self.fx * sw / self.width as f64)
    }

    /// Horizontal and vertical field of view in radians.
    pub fn field_of_view(&self) -> (f64, f64) {
        let fov_x = 2.0 * (self.width as f64 / (2.0 * self.fx)).atan();
        let fov_y = 2.0 * (self.height as f64 / (2.0 * self.fy)).atan();
        (fov_x, fov_y)
    }

    /// Principal point offset as a fraction of the image width.
    ///
    /// Both components are normalised by the width, which is the convention
    /// renderers with a horizontal sensor fit expect.
    pub fn shift(&self) -> (f64, f64) {
        let w = self.width as f64;
        let h = self.height as f64;
        let shift_x = -(self.cx / w - 0.5);
        let shift_y = (self.cy - 0.5 * h) / w;
        (shift_x, shift_y)
    }
}

/// A rigid transform in SE(3).
///
/// Poses are immutable values: every operation returns a new pose. The rotation
/// block is guaranteed orthonormal with determinant +1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    rotation: UnitQuaternion<f64>,
    translation: Vector3<f64>,
}

impl Pose {
    /// Tolerance on `RᵀR - I` and `det R - 1` when validating matrices.
    pub const ORTHONORMAL_TOLERANCE: f64 = 1e-4;

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::identity(), translation)
    }

    /// Exponential map of a twist `[ω; v]`.
    pub fn from_twist(twist: &Vector6<f64>) -> Self {
        let (_, translation) = twist_to_se3(twist);
        let omega = Vector3::new(twist[0], twist[1], twist[2]);
        Self::new(UnitQuaternion::from_scaled_axis(omega), translation)
    }

    /// Builds a pose from `[tx, ty, tz, qw, qx, qy, qz]`.
    ///
    /// The quaternion is normalised; a zero or non-finite quaternion is rejected.
    pub fn from_list(values: &[f64]) -> Result<Self> {
        if values.len() != 7 {
            return Err(Error::InvalidPose(format!(
                "expected 7 values [tx, ty, tz, qw, qx, qy, qz], got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidPose("pose list contains non-finite values".into()));
        }
        let q = Quaternion::new(values[3], values[4], values[5], values[6]);
        if q.norm() < 1e-12 {
            return Err(Error::InvalidPose("quaternion has zero norm".into()));
        }
        Ok(Self::new(
            UnitQuaternion::from_quaternion(q),
            Vector3::new(values[0], values[1], values[2]),
        ))
    }

    /// Inverse of [`Pose::from_list`].
    pub fn to_list(&self) -> [f64; 7] {
        let q = self.rotation.quaternion();
        let t = &self.translation;
        [t.x, t.y, t.z, q.w, q.i, q.j, q.k]
    }

    /// Builds a pose from a homogeneous matrix, rejecting anything that is not
    /// a rigid transform instead of re-orthonormalising it.
    pub fn from_matrix(transform: &Matrix4<f64>) -> Result<Self> {
        if transform.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidPose("matrix contains non-finite values".into()));
        }
        let bottom = transform.fixed_view::<1, 4>(3, 0);
        let expected = [0.0, 0.0, 0.0, 1.0];
        if bottom
            .iter()
            .zip(expected.iter())
            .any(|(a, b)| (a - b).abs() > 1e-9)
        {
            return Err(Error::InvalidPose(format!(
                "bottom row must be [0, 0, 0, 1], got {bottom}"
            )));
        }

        let r = Matrix3::from(transform.fixed_view::<3, 3>(0, 0));
        let gram_error = (r.transpose() * r - Matrix3::identity()).amax();
        if gram_error > Self::ORTHONORMAL_TOLERANCE {
            return Err(Error::InvalidPose(format!(
                "rotation block is not orthonormal (max |RᵀR - I| = {gram_error:.3e})"
            )));
        }
        let det = r.determinant();
        if (det - 1.0).abs() > Self::ORTHONORMAL_TOLERANCE {
            return Err(Error::InvalidPose(format!(
                "rotation block has determinant {det:.6}, expected +1"
            )));
        }

        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        let translation = Vector3::from(transform.fixed_view::<3, 1>(0, 3));
        Ok(Self::new(rotation, translation))
    }

    /// Builds a pose from 16 row-major matrix entries.
    pub fn from_flat(values: &[f64]) -> Result<Self> {
        if values.len() != 16 {
            return Err(Error::InvalidPose(format!(
                "expected 16 matrix entries, got {}",
                values.len()
            )));
        }
        Self::from_matrix(&Matrix4::from_row_slice(values))
    }

    /// Row-major flattening of [`Pose::matrix`].
    pub fn to_flat(&self) -> [f64; 16] {
        let m = self.matrix();
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = m[(r, c)];
            }
        }
        out
    }

    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation.to_rotation_matrix().into_inner());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn matrix_f32(&self) -> Matrix4<f32> {
        self.matrix().cast::<f32>()
    }

    pub fn rotation(&self) -> &UnitQuaternion<f64> {
        &self.rotation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation.inverse();
        Self::new(r_inv, -(r_inv * self.translation))
    }

    /// `self ∘ other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Pose) -> Self {
        Self::new(
            self.rotation * other.rotation,
            self.rotation * other.translation + self.translation,
        )
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    pub fn transform_point_f32(&self, point: &Point3<f32>) -> Point3<f32> {
        self.transform_point(&point.cast::<f64>()).cast::<f32>()
    }

    pub fn transform_vector_f32(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        (self.rotation * vector.cast::<f64>()).cast::<f32>()
    }

    /// Rotation angle of this pose in degrees.
    pub fn angle_deg(&self) -> f64 {
        self.rotation.angle().to_degrees()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl Mul for Pose {
    type Output = Pose;

    fn mul(self, rhs: Pose) -> Pose {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a Pose> for &'a Pose {
    type Output = Pose;

    fn mul(self, rhs: &'a Pose) -> Pose {
        self.compose(rhs)
    }
}

/// Angle in degrees of the relative rotation between an estimate and ground truth.
///
/// ```text
/// e_R = acos( clamp( (trace(R_est · R_gtᵀ) - 1) / 2, -1, 1 ) )
/// ```
pub fn rotation_error_deg(estimate: &Pose, ground_truth: &Pose) -> f64 {
    let r = estimate.rotation_matrix() * ground_truth.rotation_matrix().transpose();
    let cos = (0.5 * (r.trace() - 1.0)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Euclidean distance between the translations of two poses.
pub fn translation_error(estimate: &Pose, ground_truth: &Pose) -> f64 {
    (estimate.translation - ground_truth.translation).norm()
}

/// Exponential map of a twist `[ω; v]` onto a rigid transform.
pub fn twist_to_se3(twist: &Vector6<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let omega = Vector3::new(twist[0], twist[1], twist[2]);
    let v = Vector3::new(twist[3], twist[4], twist[5]);

    let theta = omega.norm();
    if theta < 1e-10 {
        return (Matrix3::identity() + skew_symmetric(&omega), v);
    }
    let skew = skew_symmetric(&omega);
    let skew2 = skew * skew;
    let a = theta.sin() / theta;
    let b = (1.0 - theta.cos()) / (theta * theta);
    let c = (theta - theta.sin()) / (theta * theta * theta);
    let r = Matrix3::identity() + a * skew + b * skew2;
    let jl = Matrix3::identity() + b * skew + c * skew2;
    (r, jl * v)
}

pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}
