//! Implements the Pinhole camera model.
//!
//! In this crate the pinhole model is the *virtual* camera of a rectilinear
//! output image: the distortion-free camera whose pixels are traced back
//! through the fisheye lens. Its intrinsics are what gets reported as the new
//! camera matrix of a rectilinear remap.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// Represents a Pinhole camera model.
///
/// This struct holds the intrinsic parameters (focal length, principal point)
/// and image resolution for a pinhole camera with zero skew.
///
/// # Examples
///
/// ```rust
/// use fisheye_remap::camera::{Intrinsics, PinholeModel, Resolution};
///
/// let camera = PinholeModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     Resolution { width: 640, height: 480 },
/// )
/// .unwrap();
///
/// let k = camera.matrix();
/// assert_eq!(k[(0, 2)], 320.0);
/// assert_eq!(k[(0, 1)], 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`], validating the intrinsics.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    pub fn new(intrinsics: Intrinsics, resolution: Resolution) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
        };

        model.validate_params()?;

        Ok(model)
    }

    /// The 3x3 camera matrix `K` (zero skew).
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.intrinsics.fx,
            0.0,
            self.intrinsics.cx,
            0.0,
            self.intrinsics.fy,
            self.intrinsics.cy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Inverse-projects a pixel to the unit ray `normalize(mx, my, 1)`.
    ///
    /// Pixels outside the image are allowed; the ray is defined for any pixel.
    pub fn ray(&self, point_2d: &Vector2<f64>) -> Vector3<f64> {
        let mx = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let my = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        Vector3::new(mx, my, 1.0).normalize()
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point using `u = fx * X / Z + cx`, `v = fy * Y / Z + cy`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the 3D point's Z-coordinate is too close to zero.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let u = self.intrinsics.fx * point_3d.x / point_3d.z + self.intrinsics.cx;
        let v = self.intrinsics.fy * point_3d.y / point_3d.z + self.intrinsics.cy;

        Ok(Vector2::new(u, v))
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        Ok(self.ray(point_2d))
    }

    /// Loads camera parameters from a YAML file with a `cam0` section holding
    /// `intrinsics` (fx, fy, cx, cy) and `resolution` (width, height).
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs.first().ok_or_else(|| {
            CameraModelError::InvalidParams("Empty YAML document".to_string())
        })?;

        let intrinsics_yaml = doc["cam0"]["intrinsics"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'intrinsics' or not an array".to_string())
        })?;
        let resolution_yaml = doc["cam0"]["resolution"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'resolution' or not an array".to_string())
        })?;

        let values = intrinsics_yaml
            .iter()
            .map(|v| v.as_f64())
            .collect::<Option<Vec<f64>>>()
            .filter(|v| v.len() == 4)
            .ok_or_else(|| {
                CameraModelError::InvalidParams("Invalid intrinsics: expected 4 floats".to_string())
            })?;
        let dimensions = resolution_yaml
            .iter()
            .map(|v| v.as_i64().and_then(|v| u32::try_from(v).ok()))
            .collect::<Option<Vec<u32>>>()
            .filter(|v| v.len() == 2)
            .ok_or_else(|| {
                CameraModelError::InvalidParams(
                    "Invalid resolution: expected 2 integers".to_string(),
                )
            })?;

        PinholeModel::new(
            Intrinsics {
                fx: values[0],
                fy: values[1],
                cx: values[2],
                cy: values[3],
            },
            Resolution {
                width: dimensions[0],
                height: dimensions[1],
            },
        )
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let cam0 = serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("camera_model".to_string()),
                serde_yaml::Value::String("pinhole".to_string()),
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
        validation::validate_intrinsics(&self.intrinsics)
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_distortion(&self) -> Vec<f64> {
        vec![] // Pinhole model has no distortion parameters
    }
}
