//! Frame conventions and small geometric helpers shared by the samplers.
//!
//! All directions live in the camera frame: +Z forward, +X right, +Y down.

use crate::camera::Resolution;
use nalgebra::{Rotation3, Vector2, Vector3};

/// Rotation about the vertical (Y) axis by `yaw_degrees`.
///
/// `R = [[cos θ, 0, sin θ], [0, 1, 0], [-sin θ, 0, cos θ]]`. This is the
/// rectification rotation of a pane: a pane ray `d` looks along `Rᵀ d` in the
/// camera frame, so a positive yaw looks left (towards -X).
///
/// ```rust
/// use fisheye_remap::geometry::yaw_rotation;
/// use nalgebra::Vector3;
///
/// let r = yaw_rotation(90.0);
/// let looking = r.inverse_transform_vector(&Vector3::new(0.0, 0.0, 1.0));
/// assert!((looking.x + 1.0).abs() < 1e-12);
/// ```
pub fn yaw_rotation(yaw_degrees: f64) -> Rotation3<f64> {
    let theta = yaw_degrees.to_radians();
    let (s, c) = theta.sin_cos();
    #[rustfmt::skip]
    let matrix = nalgebra::Matrix3::new(
        c,   0.0, s,
        0.0, 1.0, 0.0,
        -s,  0.0, c,
    );
    Rotation3::from_matrix_unchecked(matrix)
}

/// Direction on the unit sphere for a longitude/latitude pair (radians).
///
/// Longitude turns around +Y starting at +Z; latitude tilts towards +Y (down).
pub fn direction_from_angles(longitude: f64, latitude: f64) -> Vector3<f64> {
    let cos_lat = latitude.cos();
    Vector3::new(
        longitude.sin() * cos_lat,
        latitude.sin(),
        longitude.cos() * cos_lat,
    )
}

/// Midpoints of the four image edges: top, right, bottom, left.
pub fn edge_midpoints(resolution: &Resolution) -> [Vector2<f64>; 4] {
    let w = resolution.width as f64;
    let h = resolution.height as f64;
    [
        Vector2::new(w * 0.5, 0.0),
        Vector2::new(w, h * 0.5),
        Vector2::new(w * 0.5, h),
        Vector2::new(0.0, h * 0.5),
    ]
}
