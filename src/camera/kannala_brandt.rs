//! Implements the equidistant Kannala-Brandt fisheye camera model.
//!
//! The model relates the angle of incidence `θ` of a ray to its distorted
//! radius on the normalized image plane through an odd polynomial:
//!
//! `θd = θ (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)`
//!
//! This is the model used by OpenCV's `cv::fisheye` module. The forward
//! direction ([`KannalaBrandtModel::distort`]) is closed-form; the inverse
//! ([`KannalaBrandtModel::undistort`]) is solved with Newton iterations.
//!
//! # References
//!
//! Kannala, J., & Brandt, S. S. (2006). A generic camera model and calibration
//! method for conventional, wide-angle, and fish-eye lenses.
//! *IEEE Transactions on Pattern Analysis and Machine Intelligence*.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// Normalized radius below which the distortion scale is taken to be exactly 1.
pub const OPTICAL_AXIS_EPSILON: f64 = 1e-8;

const UNDISTORT_MAX_ITERATIONS: usize = 10;
const UNDISTORT_EPSILON: f64 = 1e-8;

/// Equidistant fisheye camera with four radial coefficients.
///
/// `resolution` is the size of the image the intrinsics were calibrated
/// against. It is the input image size of every map built from this model.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{DVector, Vector2};
/// use fisheye_remap::camera::KannalaBrandtModel;
///
/// // fx, fy, cx, cy, k1, k2, k3, k4
/// let params = DVector::from_vec(vec![
///     991.0, 991.0, 1612.0, 1617.0, 0.03562009, -0.02587979, 0.00564249, -0.00107043,
/// ]);
/// let model = KannalaBrandtModel::new(&params).unwrap();
///
/// // A point on the optical axis is not distorted
/// let distorted = model.distort(&Vector2::new(0.0, 0.0));
/// assert_eq!(model.to_pixel(&distorted), Vector2::new(1612.0, 1617.0));
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct KannalaBrandtModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    /// k1, k2, k3, k4
    pub distortions: [f64; 4],
}

impl KannalaBrandtModel {
    /// Creates a model from `[fx, fy, cx, cy, k1, k2, k3, k4]`.
    ///
    /// The resolution is initialized to 0x0 and should be set manually or by
    /// loading from YAML.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        if parameters.len() < 4 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 8 parameters (fx, fy, cx, cy, k1..k4), got {}",
                parameters.len()
            )));
        }
        let intrinsics = Intrinsics {
            fx: parameters[0],
            fy: parameters[1],
            cx: parameters[2],
            cy: parameters[3],
        };
        let coefficients: Vec<f64> = parameters.iter().skip(4).copied().collect();
        let model = KannalaBrandtModel {
            intrinsics,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            distortions: validation::validate_distortion(&coefficients)?,
        };

        model.validate_params()?;

        Ok(model)
    }

    /// Creates a model from its parts, checking that exactly four coefficients
    /// are supplied and that the calibration resolution is non-zero.
    pub fn from_parts(
        intrinsics: Intrinsics,
        distortions: &[f64],
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        let model = KannalaBrandtModel {
            intrinsics,
            resolution,
            distortions: validation::validate_distortion(distortions)?,
        };
        model.validate_params()?;
        validation::validate_resolution(&model.resolution)?;
        Ok(model)
    }

    /// Applies the forward equidistant distortion to a normalized point
    /// `(X/Z, Y/Z)`.
    ///
    /// Near the optical axis (`r < 1e-8`) the scale is exactly 1, so the point
    /// is returned unchanged.
    pub fn distort(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let [k1, k2, k3, k4] = self.distortions;

        let r = (normalized.x * normalized.x + normalized.y * normalized.y).sqrt();
        let theta = r.atan();
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta4 * theta4;
        let theta_d = theta * (1.0 + k1 * theta2 + k2 * theta4 + k3 * theta6 + k4 * theta8);

        let scale = if r < OPTICAL_AXIS_EPSILON {
            1.0
        } else {
            theta_d / r
        };

        normalized * scale
    }

    /// Maps a distorted normalized point to pixel coordinates.
    pub fn to_pixel(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.intrinsics.fx * distorted.x + self.intrinsics.cx,
            self.intrinsics.fy * distorted.y + self.intrinsics.cy,
        )
    }

    /// Inverts the distortion for a pixel, returning undistorted normalized
    /// coordinates `(X/Z, Y/Z)`.
    ///
    /// The distorted angle is clipped to `π/2` because the model is only
    /// invertible up to a 180° field of view. Past that point the recovered
    /// angle can exceed `π/2` and the returned point folds through infinity to
    /// the opposite side of the principal point, exactly as
    /// `cv::fisheye::undistortPoints` does.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::UndistortionFailed`] if the Newton iteration does
    /// not converge within 10 steps or the angle changes sign.
    pub fn undistort(&self, pixel: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        let [k1, k2, k3, k4] = self.distortions;
        let pw = Vector2::new(
            (pixel.x - self.intrinsics.cx) / self.intrinsics.fx,
            (pixel.y - self.intrinsics.cy) / self.intrinsics.fy,
        );

        let theta_d = pw.norm().min(FRAC_PI_2);
        if theta_d <= UNDISTORT_EPSILON {
            return Ok(pw);
        }

        let mut theta = theta_d;
        let mut converged = false;
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let theta2 = theta * theta;
            let theta4 = theta2 * theta2;
            let theta6 = theta4 * theta2;
            let theta8 = theta6 * theta2;
            let k1_theta2 = k1 * theta2;
            let k2_theta4 = k2 * theta4;
            let k3_theta6 = k3 * theta6;
            let k4_theta8 = k4 * theta8;

            // Newton step on f(θ) = θ(1 + k1θ² + ...) - θd
            let theta_fix = (theta * (1.0 + k1_theta2 + k2_theta4 + k3_theta6 + k4_theta8)
                - theta_d)
                / (1.0 + 3.0 * k1_theta2 + 5.0 * k2_theta4 + 7.0 * k3_theta6 + 9.0 * k4_theta8);
            theta -= theta_fix;

            if theta_fix.abs() < UNDISTORT_EPSILON {
                converged = true;
                break;
            }
        }

        // theta_d is non-negative here, so a negative theta means the solution
        // converged on the mirrored branch
        if !converged || theta < 0.0 {
            return Err(CameraModelError::UndistortionFailed {
                u: pixel.x,
                v: pixel.y,
            });
        }

        Ok(pw * (theta.tan() / theta_d))
    }

    /// Rescales the intrinsics to an image of a different size.
    ///
    /// `fx`/`cx` follow the width ratio and `fy`/`cy` the height ratio. The
    /// coefficients live in angular space and are left untouched. If both
    /// ratios are within `1e-6` of one the model is returned unchanged apart
    /// from its resolution.
    pub fn scaled_to(&self, resolution: &Resolution) -> Result<Self, CameraModelError> {
        validation::validate_resolution(&self.resolution)?;
        validation::validate_resolution(resolution)?;

        let scale_w = resolution.width as f64 / self.resolution.width as f64;
        let scale_h = resolution.height as f64 / self.resolution.height as f64;

        let intrinsics = if (scale_w - 1.0).abs() > 1e-6 || (scale_h - 1.0).abs() > 1e-6 {
            Intrinsics {
                fx: self.intrinsics.fx * scale_w,
                fy: self.intrinsics.fy * scale_h,
                cx: self.intrinsics.cx * scale_w,
                cy: self.intrinsics.cy * scale_h,
            }
        } else {
            self.intrinsics
        };

        Ok(KannalaBrandtModel {
            intrinsics,
            resolution: *resolution,
            distortions: self.distortions,
        })
    }
}

impl fmt::Debug for KannalaBrandtModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KannalaBrandt [ fx: {} fy: {} cx: {} cy: {} k1: {} k2: {} k3: {} k4: {} ({}x{}) ]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions[0],
            self.distortions[1],
            self.distortions[2],
            self.distortions[3],
            self.resolution.width,
            self.resolution.height
        )
    }
}

impl CameraModel for KannalaBrandtModel {
    /// Projects a camera-frame point to pixel coordinates through the
    /// distortion polynomial.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::PointAtCameraCenter`] if `z` is too close to zero
    /// (or negative) to divide by.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        Ok(self.to_pixel(&self.distort(&normalized)))
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let undistorted = self.undistort(point_2d)?;
        Ok(Vector3::new(undistorted.x, undistorted.y, 1.0).normalize())
    }

    /// Loads a model from a `cam0` YAML document with `intrinsics`,
    /// `distortion` and `resolution` arrays.
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }
        let doc = &docs[0];

        let intrinsics_yaml = doc["cam0"]["intrinsics"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'intrinsics' or not an array".to_string())
        })?;
        let resolution_yaml = doc["cam0"]["resolution"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'resolution' or not an array".to_string())
        })?;
        let distortion_yaml = doc["cam0"]["distortion"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'distortion' or not an array".to_string())
        })?;

        if intrinsics_yaml.len() != 4 || resolution_yaml.len() != 2 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 4 intrinsics and 2 resolution values, found {} and {}",
                intrinsics_yaml.len(),
                resolution_yaml.len()
            )));
        }

        let as_float = |value: &yaml_rust::Yaml, name: &str| {
            value.as_f64().ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid {name}: not a float"))
            })
        };

        let intrinsics = Intrinsics {
            fx: as_float(&intrinsics_yaml[0], "fx")?,
            fy: as_float(&intrinsics_yaml[1], "fy")?,
            cx: as_float(&intrinsics_yaml[2], "cx")?,
            cy: as_float(&intrinsics_yaml[3], "cy")?,
        };

        let as_dimension = |value: &yaml_rust::Yaml, name: &str| {
            value
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!("Invalid {name}: not an integer"))
                })
        };
        let resolution = Resolution {
            width: as_dimension(&resolution_yaml[0], "width")?,
            height: as_dimension(&resolution_yaml[1], "height")?,
        };

        let distortions = distortion_yaml
            .iter()
            .enumerate()
            .map(|(i, value)| as_float(value, &format!("k{}", i + 1)))
            .collect::<Result<Vec<f64>, _>>()?;

        KannalaBrandtModel::from_parts(intrinsics, &distortions, resolution)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let cam0 = serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("camera_model".to_string()),
                serde_yaml::Value::String("kannala_brandt".to_string()),
            ),
            (
                serde_yaml::Value::String("intrinsics".to_string()),
                serde_yaml::to_value(vec![
                    self.intrinsics.fx,
                    self.intrinsics.fy,
                    self.intrinsics.cx,
                    self.intrinsics.cy,
                ])
                .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
            ),
            (
                serde_yaml::Value::String("distortion".to_string()),
                serde_yaml::to_value(self.distortions.to_vec())
                    .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
            ),
            (
                serde_yaml::Value::String("resolution".to_string()),
                serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])
                    .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
            ),
        ]);
        let yaml = serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::Value::Mapping(cam0),
        )]);

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_distortion(&self.distortions)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}
