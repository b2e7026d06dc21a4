//! Virtual camera matrices for rectilinear output.
//!
//! Either the caller supplies the focal lengths ([`manual_camera_matrix`]) or
//! they are derived from how far the fisheye image reaches along its edges
//! ([`estimate_new_camera_matrix`]), following the
//! `cv::fisheye::estimateNewCameraMatrixForUndistortRectify` heuristic.

use crate::camera::{
    validation, CameraModelError, Intrinsics, KannalaBrandtModel, PinholeModel, Resolution,
};
use crate::geometry::edge_midpoints;
use crate::projection::{ManualFocal, ProjectionMode, ProjectionRequest, RemapError};
use log::debug;
use nalgebra::Vector2;

/// The four edge-anchored focal lengths and the quantities they were derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct FocalCandidates {
    /// `[f1, f2, f3, f4]`: left, right, top and bottom anchored focal lengths.
    pub focals: [f64; 4],
    /// Centroid of the undistorted edge midpoints, y already scaled by the aspect ratio.
    pub centroid: Vector2<f64>,
    /// `fx / fy` of the source camera.
    pub aspect_ratio: f64,
}

impl FocalCandidates {
    /// Widest view: every edge midpoint of the input stays in view.
    pub fn min(&self) -> f64 {
        self.focals.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Tightest crop: the whole output is covered by image content.
    pub fn max(&self) -> f64 {
        self.focals.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Focal length for a balance in `[0, 1]`: `balance * min + (1 - balance) * max`.
    pub fn blend(&self, balance: f64) -> f64 {
        balance * self.min() + (1.0 - balance) * self.max()
    }
}

/// Undistorts the input image's edge midpoints and derives the four candidate
/// focal lengths.
///
/// # Errors
///
/// [`CameraModelError`] if the intrinsics or calibration resolution are
/// invalid (a zero `fy` leaves the aspect ratio undefined) or an edge
/// midpoint cannot be undistorted.
pub fn focal_candidates(camera: &KannalaBrandtModel) -> Result<FocalCandidates, CameraModelError> {
    validation::validate_intrinsics(&camera.intrinsics)?;
    validation::validate_resolution(&camera.resolution)?;

    let w = camera.resolution.width as f64;
    let h = camera.resolution.height as f64;
    let aspect_ratio = camera.intrinsics.fx / camera.intrinsics.fy;

    let mut points = [Vector2::zeros(); 4];
    for (point, midpoint) in points.iter_mut().zip(edge_midpoints(&camera.resolution)) {
        *point = camera.undistort(&midpoint)?;
    }

    let mut centroid = points.iter().sum::<Vector2<f64>>() / 4.0;
    centroid.y *= aspect_ratio;
    for point in points.iter_mut() {
        point.y *= aspect_ratio;
    }

    let min_x = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

    let focals = [
        w * 0.5 / (centroid.x - min_x),
        w * 0.5 / (max_x - centroid.x),
        h * 0.5 * aspect_ratio / (centroid.y - min_y),
        h * 0.5 * aspect_ratio / (max_y - centroid.y),
    ];
    debug!(
        "focal candidates {:?} around centroid ({}, {})",
        focals, centroid.x, centroid.y
    );

    Ok(FocalCandidates {
        focals,
        centroid,
        aspect_ratio,
    })
}

/// Estimates the virtual rectilinear camera for `camera`.
///
/// `balance` is clamped into `[0, 1]`: 0 picks the largest candidate focal
/// length (tightest crop), 1 the smallest (widest view). The result is then divided by `fov_scale` and, when
/// `output_size` differs from the calibration resolution, rescaled per axis.
///
/// # Errors
///
/// * [`RemapError::InvalidFovScale`] if `fov_scale` is not positive.
/// * [`RemapError::InvalidCalibration`] for the cases listed on [`focal_candidates`].
pub fn estimate_new_camera_matrix(
    camera: &KannalaBrandtModel,
    balance: f64,
    output_size: &Resolution,
    fov_scale: f64,
) -> Result<PinholeModel, RemapError> {
    if fov_scale <= 0.0 || !fov_scale.is_finite() {
        return Err(RemapError::InvalidFovScale(fov_scale));
    }
    validation::validate_resolution(output_size)?;

    let candidates = focal_candidates(camera)?;
    let balance = balance.clamp(0.0, 1.0);
    let f = candidates.blend(balance) / fov_scale;

    let w = camera.resolution.width as f64;
    let h = camera.resolution.height as f64;
    let aspect_ratio = candidates.aspect_ratio;

    let mut intrinsics = Intrinsics {
        fx: f,
        fy: f / aspect_ratio,
        cx: -candidates.centroid.x * f + w * 0.5,
        cy: (-candidates.centroid.y * f) / aspect_ratio + h * 0.5,
    };

    if *output_size != camera.resolution {
        let rx = output_size.width as f64 / w;
        let ry = output_size.height as f64 / h;
        intrinsics.fx *= rx;
        intrinsics.cx *= rx;
        intrinsics.fy *= ry;
        intrinsics.cy *= ry;
    }

    debug!(
        "estimated camera matrix fx={} fy={} cx={} cy={} (balance {}, fov_scale {})",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy, balance, fov_scale
    );

    Ok(PinholeModel::new(intrinsics, *output_size)?)
}

/// Virtual camera with caller-chosen focal lengths, rescaled from the input
/// to the output size and centered on the output image.
pub fn manual_camera_matrix(
    input_size: &Resolution,
    focal: &ManualFocal,
    output_size: &Resolution,
) -> Result<PinholeModel, RemapError> {
    validation::validate_resolution(input_size)?;
    validation::validate_resolution(output_size)?;

    let rx = output_size.width as f64 / input_size.width as f64;
    let ry = output_size.height as f64 / input_size.height as f64;
    let center = output_size.center();

    let intrinsics = Intrinsics {
        fx: focal.fx * rx,
        fy: focal.fy * ry,
        cx: center.x,
        cy: center.y,
    };

    PinholeModel::new(intrinsics, *output_size).map_err(|_| RemapError::InvalidManualFocal {
        fx: focal.fx,
        fy: focal.fy,
    })
}

/// Virtual camera for a rectilinear view of `camera`, whatever the request's
/// mode. A manual focal takes precedence over the balance heuristic.
pub fn rectilinear_camera_matrix(
    camera: &KannalaBrandtModel,
    request: &ProjectionRequest,
) -> Result<PinholeModel, RemapError> {
    match &request.manual_focal {
        Some(focal) => manual_camera_matrix(&camera.resolution, focal, &request.output_size),
        None => estimate_new_camera_matrix(
            camera,
            request.effective_balance(),
            &request.output_size,
            request.fov_scale,
        ),
    }
}

/// The virtual camera a request implies: `Some` for rectilinear requests,
/// `None` for every other mode.
pub fn virtual_camera_matrix(
    camera: &KannalaBrandtModel,
    request: &ProjectionRequest,
) -> Result<Option<PinholeModel>, RemapError> {
    if request.mode != ProjectionMode::Rectilinear {
        return Ok(None);
    }
    rectilinear_camera_matrix(camera, request).map(Some)
}
