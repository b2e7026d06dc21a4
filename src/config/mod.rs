//! Scenario configuration files.
//!
//! A [`RemapConfig`] lists fisheye cameras and the output scenarios to build
//! for each of them. It is read from JSON or YAML depending on the file
//! extension:
//!
//! ```json
//! {
//!   "cameras": [{
//!     "camera_id": 1,
//!     "camera_model": "Wide Angle Fisheye",
//!     "image_width": 3264, "image_height": 3264,
//!     "camera_matrix": {"fx": 991.0, "fy": 991.0, "cx": 1612.0, "cy": 1617.0},
//!     "distortion_coefficients": {"k1": 0.0356, "k2": -0.0259, "k3": 0.0056, "k4": -0.0011}
//!   }],
//!   "scenarios": [{
//!     "name": "equirectangular_panorama",
//!     "projection": "equirectangular",
//!     "output_scale": 0.25
//!   }]
//! }
//! ```

use crate::camera::{CameraModelError, Intrinsics, KannalaBrandtModel, Resolution};
use crate::projection::{Pane, ProjectionMode, ProjectionRequest, RemapError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Projection name selecting rectilinear output split into yaw panes.
pub const RECTILINEAR_PANES: &str = "rectilinear_panes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
}

/// Calibration of one fisheye camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: u32,
    /// Free-form description of the lens.
    #[serde(default)]
    pub camera_model: String,
    pub image_width: u32,
    pub image_height: u32,
    pub camera_matrix: Intrinsics,
    pub distortion_coefficients: DistortionCoefficients,
}

impl CameraConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image_width, self.image_height)
    }

    /// Builds the validated camera model for this calibration.
    pub fn to_model(&self) -> Result<KannalaBrandtModel, CameraModelError> {
        let k = &self.distortion_coefficients;
        KannalaBrandtModel::from_parts(
            self.camera_matrix,
            &[k.k1, k.k2, k.k3, k.k4],
            self.resolution(),
        )
    }
}

fn default_scale() -> f64 {
    1.0
}

/// One output to build for every camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `rectilinear`, `rectilinear_panes`, `equirectangular` or `cylindrical`.
    pub projection: String,
    #[serde(default)]
    pub output_subpath: Option<String>,
    #[serde(default)]
    pub manual_fx: Option<f64>,
    #[serde(default)]
    pub manual_fy: Option<f64>,
    #[serde(default)]
    pub balance: f64,
    #[serde(default = "default_scale")]
    pub fov_scale: f64,
    /// Output size as a fraction of the input image size.
    #[serde(default = "default_scale")]
    pub output_scale: f64,
    #[serde(default)]
    pub panes: Option<Vec<Pane>>,
}

impl ScenarioConfig {
    /// Whether the scenario produces one map per pane.
    pub fn is_multi_pane(&self) -> bool {
        self.projection.eq_ignore_ascii_case(RECTILINEAR_PANES)
    }

    /// Output size for an input image of `input_size`, truncated to whole pixels.
    pub fn output_size(&self, input_size: &Resolution) -> Resolution {
        // `as` saturates: negative or NaN scales give 0 and fail validation
        Resolution::new(
            (input_size.width as f64 * self.output_scale).floor() as u32,
            (input_size.height as f64 * self.output_scale).floor() as u32,
        )
    }

    /// Builds the validated request for an input image of `input_size`.
    ///
    /// # Errors
    ///
    /// [`RemapError::ConfigError`] when only one of `manual_fx`/`manual_fy`
    /// is given or a multi-pane scenario has no panes, plus anything
    /// [`ProjectionRequest::validate`] rejects.
    pub fn to_request(&self, input_size: &Resolution) -> Result<ProjectionRequest, RemapError> {
        let mode = if self.is_multi_pane() {
            ProjectionMode::Rectilinear
        } else {
            self.projection.parse()?
        };

        let mut request = ProjectionRequest::new(mode, self.output_size(input_size))
            .with_balance(self.balance)
            .with_fov_scale(self.fov_scale);

        match (self.manual_fx, self.manual_fy) {
            (Some(fx), Some(fy)) => request = request.with_manual_focal(fx, fy),
            (None, None) => {}
            _ => {
                return Err(RemapError::ConfigError(format!(
                    "scenario {}: manual_fx and manual_fy must be given together",
                    self.name
                )));
            }
        }

        if self.is_multi_pane() {
            match &self.panes {
                Some(panes) if !panes.is_empty() => request = request.with_panes(panes.clone()),
                _ => {
                    return Err(RemapError::ConfigError(format!(
                        "scenario {} uses {} but lists no panes",
                        self.name, RECTILINEAR_PANES
                    )));
                }
            }
        } else if let Some(panes) = &self.panes {
            request = request.with_panes(panes.clone());
        }

        request.validate()?;
        Ok(request)
    }
}

/// Cameras and the scenarios to build for each of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemapConfig {
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
}

impl RemapConfig {
    /// Loads a configuration file. `.json` files are parsed as JSON, `.yaml`
    /// and `.yml` files as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RemapError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
            _ => Err(RemapError::ConfigError(format!(
                "unsupported configuration format: {}",
                path.display()
            ))),
        }
    }

    pub fn camera(&self, camera_id: u32) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.camera_id == camera_id)
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioConfig> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CONFIG_JSON: &str = r#"{
        "cameras": [
            {
                "camera_id": 1,
                "camera_model": "Wide Angle Fisheye",
                "image_width": 3264,
                "image_height": 3264,
                "camera_matrix": {"fx": 991.0, "fy": 991.0, "cx": 1612.0, "cy": 1617.0},
                "distortion_coefficients": {"k1": 0.03562009, "k2": -0.02587979, "k3": 0.00564249, "k4": -0.00107043}
            }
        ],
        "scenarios": [
            {
                "name": "rectilinear_manual_fx_120pct",
                "projection": "rectilinear",
                "output_subpath": "rectilinear/manual_fx/120pct",
                "manual_fx": 1189.2,
                "manual_fy": 1189.2
            },
            {
                "name": "vms_panes",
                "projection": "rectilinear_panes",
                "balance": 0.5,
                "output_scale": 0.5,
                "panes": [{"id": "left", "yaw_deg": 60.0}, {"id": "right", "yaw_deg": -60.0}]
            },
            {
                "name": "cylindrical_panorama",
                "projection": "cylindrical",
                "output_scale": 0.25
            }
        ]
    }"#;

    fn scenario(projection: &str) -> ScenarioConfig {
        ScenarioConfig {
            name: "test".to_string(),
            description: String::new(),
            projection: projection.to_string(),
            output_subpath: None,
            manual_fx: None,
            manual_fy: None,
            balance: 0.0,
            fov_scale: 1.0,
            output_scale: 1.0,
            panes: None,
        }
    }

    #[test]
    fn test_parse_json_defaults() {
        let config: RemapConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.scenarios.len(), 3);

        let manual = config.scenario("rectilinear_manual_fx_120pct").unwrap();
        assert_eq!(manual.balance, 0.0);
        assert_eq!(manual.fov_scale, 1.0);
        assert_eq!(manual.output_scale, 1.0);
        assert_eq!(manual.description, "");

        let panes = config.scenario("vms_panes").unwrap();
        assert!(panes.is_multi_pane());
        let panes = panes.panes.as_ref().unwrap();
        assert_eq!(panes[0], Pane::new("left", 60.0));
    }

    #[test]
    fn test_camera_config_to_model() {
        let config: RemapConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        let model = config.camera(1).unwrap().to_model().unwrap();
        assert_eq!(model.resolution, Resolution::new(3264, 3264));
        assert_eq!(model.intrinsics.cx, 1612.0);
        assert_relative_eq!(model.distortions[3], -0.00107043);
        assert!(config.camera(2).is_none());
    }

    #[test]
    fn test_camera_config_rejects_bad_focal() {
        let config: RemapConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        let mut camera = config.cameras[0].clone();
        camera.camera_matrix.fx = -1.0;
        assert!(matches!(
            camera.to_model(),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
    }

    #[test]
    fn test_to_request_manual_focal() {
        let config: RemapConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        let input = Resolution::new(3264, 3264);
        let request = config
            .scenario("rectilinear_manual_fx_120pct")
            .unwrap()
            .to_request(&input)
            .unwrap();
        assert_eq!(request.mode, ProjectionMode::Rectilinear);
        assert_eq!(request.output_size, input);
        let focal = request.manual_focal.unwrap();
        assert_eq!(focal.fx, 1189.2);
        assert_eq!(focal.fy, 1189.2);
        assert!(request.panes.is_none());
    }

    #[test]
    fn test_to_request_panes_and_output_scale() {
        let config: RemapConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        let request = config
            .scenario("vms_panes")
            .unwrap()
            .to_request(&Resolution::new(3265, 3263))
            .unwrap();
        assert_eq!(request.mode, ProjectionMode::Rectilinear);
        // floor(3265 * 0.5), floor(3263 * 0.5)
        assert_eq!(request.output_size, Resolution::new(1632, 1631));
        assert_eq!(request.balance, 0.5);
        assert_eq!(request.panes.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_to_request_errors() {
        let input = Resolution::new(640, 480);

        assert!(matches!(
            scenario("fisheye").to_request(&input),
            Err(RemapError::UnknownProjection(_))
        ));
        assert!(matches!(
            scenario(RECTILINEAR_PANES).to_request(&input),
            Err(RemapError::ConfigError(_))
        ));

        let half_manual = ScenarioConfig {
            manual_fx: Some(500.0),
            ..scenario("rectilinear")
        };
        assert!(matches!(
            half_manual.to_request(&input),
            Err(RemapError::ConfigError(_))
        ));

        let tiny = ScenarioConfig {
            output_scale: 0.001,
            ..scenario("equirectangular")
        };
        assert!(matches!(
            tiny.to_request(&input),
            Err(RemapError::InvalidOutputSize { .. })
        ));

        let panes_on_panorama = ScenarioConfig {
            panes: Some(vec![Pane::new("front", 0.0)]),
            ..scenario("cylindrical")
        };
        assert!(matches!(
            panes_on_panorama.to_request(&input),
            Err(RemapError::PanesRequireRectilinear(ProjectionMode::Cylindrical))
        ));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = std::env::temp_dir();
        let json_path = dir.join("fisheye_remap_config_test.json");
        fs::write(&json_path, CONFIG_JSON).unwrap();
        let from_json = RemapConfig::load(&json_path).unwrap();

        let yaml_path = dir.join("fisheye_remap_config_test.yaml");
        fs::write(&yaml_path, serde_yaml::to_string(&from_json).unwrap()).unwrap();
        let from_yaml = RemapConfig::load(&yaml_path).unwrap();
        assert_eq!(from_json, from_yaml);

        let txt_path = dir.join("fisheye_remap_config_test.txt");
        fs::write(&txt_path, CONFIG_JSON).unwrap();
        assert!(matches!(
            RemapConfig::load(&txt_path),
            Err(RemapError::ConfigError(_))
        ));

        let _ = fs::remove_file(json_path);
        let _ = fs::remove_file(yaml_path);
        let _ = fs::remove_file(txt_path);
    }

    #[test]
    fn test_load_missing_file() {
        let missing = std::env::temp_dir().join("fisheye_remap_missing_config.json");
        assert!(matches!(
            RemapConfig::load(missing),
            Err(RemapError::ConfigError(_))
        ));
    }
}
