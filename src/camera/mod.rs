//! Camera models used by the remapping engine.
//!
//! The source side of every map is a fisheye camera described by the
//! equidistant Kannala-Brandt model ([`KannalaBrandtModel`]). The output side of
//! a rectilinear map is an ideal, distortion-free virtual camera
//! ([`PinholeModel`]). Both implement the [`CameraModel`] trait.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod kannala_brandt;
pub mod pinhole;

pub use kannala_brandt::KannalaBrandtModel;
pub use pinhole::PinholeModel;

/// Focal lengths and principal point of a camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    /// Number of pixels covered by this resolution.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Image center `(width / 2, height / 2)` in continuous pixel coordinates.
    pub fn center(&self) -> Vector2<f64> {
        Vector2::new(self.width as f64 * 0.5, self.height as f64 * 0.5)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Kannala-Brandt model requires 4 distortion coefficients, got {0}")]
    InvalidDistortionCount(usize),
    #[error("Distortion coefficients must be finite")]
    DistortionMustBeFinite,
    #[error("Resolution must be non-zero, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("Undistortion did not converge for pixel ({u}, {v})")]
    UndistortionFailed { u: f64, v: f64 },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D point in camera coordinates to pixel coordinates
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject pixel coordinates to a unit-length 3D ray
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_distortion(&self) -> Vec<f64>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.fx <= 0.0
            || intrinsics.fy <= 0.0
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_resolution(resolution: &Resolution) -> Result<(), CameraModelError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CameraModelError::InvalidResolution {
                width: resolution.width,
                height: resolution.height,
            });
        }
        Ok(())
    }

    /// Checks a Kannala-Brandt coefficient set and converts it to a fixed array.
    pub fn validate_distortion(coefficients: &[f64]) -> Result<[f64; 4], CameraModelError> {
        let distortions: [f64; 4] = coefficients
            .try_into()
            .map_err(|_| CameraModelError::InvalidDistortionCount(coefficients.len()))?;
        if distortions.iter().any(|k| !k.is_finite()) {
            return Err(CameraModelError::DistortionMustBeFinite);
        }
        Ok(distortions)
    }
}
