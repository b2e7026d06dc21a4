//! Fisheye Remap Library
//!
//! Builds per-pixel lookup maps that resample an image taken with a
//! Kannala-Brandt (equidistant) fisheye lens into one of several output
//! projections:
//! - Rectilinear (perspective) views through a virtual pinhole camera
//! - Multi-pane rectilinear views turned by a yaw angle
//! - Equirectangular panoramas
//! - Cylindrical panoramas
//!
//! Every map entry is either a sub-pixel source coordinate in the fisheye image
//! or a sentinel for output pixels looking behind the camera. Maps are built in
//! parallel with rayon and the result is identical to a sequential build.

pub mod camera;
pub mod config;
pub mod geometry;
pub mod projection;
pub mod remap;

// Re-export commonly used types
pub use camera::{
    CameraModel, CameraModelError, Intrinsics, KannalaBrandtModel, PinholeModel, Resolution,
};

pub use config::{CameraConfig, RemapConfig, ScenarioConfig};
pub use geometry::yaw_rotation;
pub use projection::{
    estimate_new_camera_matrix, DirectionSampler, ManualFocal, Pane, ProjectionMode,
    ProjectionRequest, RemapError,
};
pub use remap::{
    build_map, build_pane_maps, MapCache, MapEntry, PaneOutput, PaneSetOutput, PixelMap,
    RemapOutput,
};
