//! Output projections and the requests that describe them.
//!
//! A [`ProjectionRequest`] names the output projection, its size and, for
//! rectilinear output, how the virtual camera is chosen. A [`DirectionSampler`]
//! turns each output pixel into a viewing direction in the fisheye camera
//! frame.

use crate::camera::{CameraModelError, PinholeModel, Resolution};
use crate::geometry::{direction_from_angles, yaw_rotation};
use log::warn;
use nalgebra::{Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

pub mod estimate;

pub use estimate::{
    estimate_new_camera_matrix, focal_candidates, manual_camera_matrix, rectilinear_camera_matrix,
    virtual_camera_matrix, FocalCandidates,
};

#[derive(thiserror::Error, Debug)]
pub enum RemapError {
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(#[from] CameraModelError),
    #[error("Output size must be non-zero, got {width}x{height}")]
    InvalidOutputSize { width: u32, height: u32 },
    #[error("fov_scale must be positive and finite, got {0}")]
    InvalidFovScale(f64),
    #[error("balance must be a number, got {0}")]
    InvalidBalance(f64),
    #[error("Manual focal length must be positive and finite, got ({fx}, {fy})")]
    InvalidManualFocal { fx: f64, fy: f64 },
    #[error("Unknown projection mode: {0}")]
    UnknownProjection(String),
    #[error("Panes require rectilinear projection, got {0}")]
    PanesRequireRectilinear(ProjectionMode),
    #[error("Duplicate pane id: {0}")]
    DuplicatePaneId(String),
    #[error("Pane {id} has a non-finite yaw")]
    InvalidPaneYaw { id: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for RemapError {
    fn from(err: serde_json::Error) -> Self {
        RemapError::ConfigError(err.to_string())
    }
}

impl From<serde_yaml::Error> for RemapError {
    fn from(err: serde_yaml::Error) -> Self {
        RemapError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for RemapError {
    fn from(err: std::io::Error) -> Self {
        RemapError::ConfigError(err.to_string())
    }
}

/// Output projection of a remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    /// Perspective view through a virtual pinhole camera.
    Rectilinear,
    /// Full sphere: longitude and latitude both linear in pixels.
    Equirectangular,
    /// Unrolled cylinder: linear longitude, tangent latitude.
    Cylindrical,
}

impl ProjectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionMode::Rectilinear => "rectilinear",
            ProjectionMode::Equirectangular => "equirectangular",
            ProjectionMode::Cylindrical => "cylindrical",
        }
    }
}

impl fmt::Display for ProjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionMode {
    type Err = RemapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rectilinear" => Ok(ProjectionMode::Rectilinear),
            "equirectangular" => Ok(ProjectionMode::Equirectangular),
            "cylindrical" => Ok(ProjectionMode::Cylindrical),
            _ => Err(RemapError::UnknownProjection(s.to_string())),
        }
    }
}

/// Focal lengths of a manually specified virtual camera, in input-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualFocal {
    pub fx: f64,
    pub fy: f64,
}

/// One yaw-oriented rectilinear view of a multi-pane output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pane {
    pub id: String,
    #[serde(alias = "yaw_deg")]
    pub yaw_degrees: f64,
}

impl Pane {
    pub fn new(id: impl Into<String>, yaw_degrees: f64) -> Self {
        Pane {
            id: id.into(),
            yaw_degrees,
        }
    }
}

/// Everything needed, besides the camera, to build one output map.
///
/// `balance` is clamped into `[0, 1]` when used (see
/// [`ProjectionRequest::effective_balance`]). `fov_scale` must be positive.
/// When `manual_focal` is set it overrides the balance heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRequest {
    pub mode: ProjectionMode,
    pub output_size: Resolution,
    pub balance: f64,
    pub fov_scale: f64,
    pub manual_focal: Option<ManualFocal>,
    pub panes: Option<Vec<Pane>>,
}

impl ProjectionRequest {
    /// A request with `balance = 0`, `fov_scale = 1`, no manual focal and no panes.
    pub fn new(mode: ProjectionMode, output_size: Resolution) -> Self {
        ProjectionRequest {
            mode,
            output_size,
            balance: 0.0,
            fov_scale: 1.0,
            manual_focal: None,
            panes: None,
        }
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_fov_scale(mut self, fov_scale: f64) -> Self {
        self.fov_scale = fov_scale;
        self
    }

    pub fn with_manual_focal(mut self, fx: f64, fy: f64) -> Self {
        self.manual_focal = Some(ManualFocal { fx, fy });
        self
    }

    pub fn with_panes(mut self, panes: Vec<Pane>) -> Self {
        self.panes = Some(panes);
        self
    }

    /// Balance clamped into `[0, 1]`.
    pub fn effective_balance(&self) -> f64 {
        let clamped = self.balance.clamp(0.0, 1.0);
        if clamped != self.balance {
            warn!("balance {} is outside [0, 1], clamping to {}", self.balance, clamped);
        }
        clamped
    }

    /// Checks the request on its own, independent of any camera.
    pub fn validate(&self) -> Result<(), RemapError> {
        if self.output_size.width == 0 || self.output_size.height == 0 {
            return Err(RemapError::InvalidOutputSize {
                width: self.output_size.width,
                height: self.output_size.height,
            });
        }
        if self.fov_scale <= 0.0 || !self.fov_scale.is_finite() {
            return Err(RemapError::InvalidFovScale(self.fov_scale));
        }
        if self.balance.is_nan() {
            return Err(RemapError::InvalidBalance(self.balance));
        }
        if let Some(focal) = self.manual_focal {
            if focal.fx <= 0.0 || focal.fy <= 0.0 || !focal.fx.is_finite() || !focal.fy.is_finite()
            {
                return Err(RemapError::InvalidManualFocal {
                    fx: focal.fx,
                    fy: focal.fy,
                });
            }
        }
        if let Some(panes) = &self.panes {
            if self.mode != ProjectionMode::Rectilinear {
                return Err(RemapError::PanesRequireRectilinear(self.mode));
            }
            let mut seen = HashSet::new();
            for pane in panes {
                if !pane.yaw_degrees.is_finite() {
                    return Err(RemapError::InvalidPaneYaw {
                        id: pane.id.clone(),
                    });
                }
                if !seen.insert(pane.id.as_str()) {
                    return Err(RemapError::DuplicatePaneId(pane.id.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Turns output pixels into viewing directions in the fisheye camera frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectionSampler {
    Equirectangular {
        output_size: Resolution,
    },
    Cylindrical {
        output_size: Resolution,
    },
    Rectilinear {
        camera: PinholeModel,
        rotation: Option<Rotation3<f64>>,
    },
}

impl DirectionSampler {
    pub fn equirectangular(output_size: Resolution) -> Self {
        DirectionSampler::Equirectangular { output_size }
    }

    pub fn cylindrical(output_size: Resolution) -> Self {
        DirectionSampler::Cylindrical { output_size }
    }

    /// Rectilinear sampler through `camera`, optionally turned by a pane yaw.
    pub fn rectilinear(camera: PinholeModel, yaw_degrees: Option<f64>) -> Self {
        DirectionSampler::Rectilinear {
            camera,
            rotation: yaw_degrees.map(yaw_rotation),
        }
    }

    /// Viewing direction for output pixel `(x, y)`.
    ///
    /// Equirectangular and cylindrical directions are unit length; rectilinear
    /// directions are the normalized pinhole ray, turned by the inverse of the
    /// pane rotation when one is set. A positive yaw looks left (towards -X).
    pub fn direction(&self, x: f64, y: f64) -> Vector3<f64> {
        match self {
            DirectionSampler::Equirectangular { output_size } => {
                let w = output_size.width as f64;
                let h = output_size.height as f64;
                let longitude = (x / w - 0.5) * TAU;
                let latitude = (y / h - 0.5) * PI;
                direction_from_angles(longitude, latitude)
            }
            DirectionSampler::Cylindrical { output_size } => {
                let w = output_size.width as f64;
                let h = output_size.height as f64;
                let longitude = (x / w - 0.5) * TAU;
                let focal = w / TAU;
                let latitude = ((y - h * 0.5) / focal).atan();
                direction_from_angles(longitude, latitude)
            }
            DirectionSampler::Rectilinear { camera, rotation } => {
                let ray = camera.ray(&Vector2::new(x, y));
                match rotation {
                    // Rotation maps the pane frame onto the camera frame, so
                    // rays go through its transpose
                    Some(rotation) => rotation.inverse_transform_vector(&ray),
                    None => ray,
                }
            }
        }
    }
}
