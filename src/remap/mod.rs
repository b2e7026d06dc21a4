//! Pixel maps from output images back into the fisheye image.
//!
//! A [`PixelMap`] holds, for every output pixel, the source pixel to sample or
//! [`MapEntry::Sentinel`] when the output pixel looks outside the front
//! hemisphere of the fisheye camera. Maps are computed row-parallel with
//! `rayon`; every entry depends only on its own coordinates and read-only
//! inputs, so the result does not depend on how rows are scheduled.

use crate::camera::{validation, CameraModel, KannalaBrandtModel, PinholeModel, Resolution};
use crate::projection::{
    rectilinear_camera_matrix, DirectionSampler, ProjectionMode, ProjectionRequest, RemapError,
};
use log::{debug, info};
use nalgebra::Vector2;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Directions with `z` at or below this value have no source pixel.
pub const DIRECTION_Z_EPSILON: f64 = 0.001;

/// Coordinate written for sentinel entries by [`PixelMap::to_xy_maps`].
pub const SENTINEL_COORDINATE: f32 = -1.0;

/// One cell of a [`PixelMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapEntry {
    /// Sample the source image at `(u, v)`.
    Source { u: f32, v: f32 },
    /// No source pixel; the resampler fills the border value.
    Sentinel,
}

impl MapEntry {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, MapEntry::Sentinel)
    }

    pub fn source(&self) -> Option<(f32, f32)> {
        match *self {
            MapEntry::Source { u, v } => Some((u, v)),
            MapEntry::Sentinel => None,
        }
    }
}

/// Row-major output-to-source map with a fixed size.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMap {
    resolution: Resolution,
    entries: Vec<MapEntry>,
}

impl PixelMap {
    /// Evaluates `entry(x, y)` for every pixel of `resolution`, rows in parallel.
    pub fn from_fn<F>(resolution: Resolution, entry: F) -> Self
    where
        F: Fn(u32, u32) -> MapEntry + Sync,
    {
        let mut entries = vec![MapEntry::Sentinel; resolution.area()];
        let width = resolution.width as usize;
        if width > 0 {
            entries
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, cell) in row.iter_mut().enumerate() {
                        *cell = entry(x as u32, y as u32);
                    }
                });
        }
        PixelMap {
            resolution,
            entries,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Entry at `(x, y)`, or `None` outside the map.
    pub fn get(&self, x: u32, y: u32) -> Option<MapEntry> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        self.entries
            .get(y as usize * self.resolution.width as usize + x as usize)
            .copied()
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// One row of the map, or `None` if `y` is out of range.
    pub fn row(&self, y: u32) -> Option<&[MapEntry]> {
        if y >= self.resolution.height {
            return None;
        }
        let width = self.resolution.width as usize;
        let start = y as usize * width;
        self.entries.get(start..start + width)
    }

    pub fn sentinel_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_sentinel()).count()
    }

    /// Fraction of entries that have a source pixel.
    pub fn coverage(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        1.0 - self.sentinel_count() as f64 / self.entries.len() as f64
    }

    /// Splits the map into separate x and y planes, sentinels written as
    /// [`SENTINEL_COORDINATE`].
    pub fn to_xy_maps(&self) -> (Vec<f32>, Vec<f32>) {
        self.entries
            .iter()
            .map(|entry| match *entry {
                MapEntry::Source { u, v } => (u, v),
                MapEntry::Sentinel => (SENTINEL_COORDINATE, SENTINEL_COORDINATE),
            })
            .unzip()
    }
}

/// Evaluates single map entries for one camera and one direction sampler.
#[derive(Debug, Clone)]
pub struct MapBuilder<'a> {
    camera: &'a KannalaBrandtModel,
    sampler: DirectionSampler,
}

impl<'a> MapBuilder<'a> {
    pub fn new(camera: &'a KannalaBrandtModel, sampler: DirectionSampler) -> Self {
        MapBuilder { camera, sampler }
    }

    /// Source pixel for output pixel `(x, y)`.
    pub fn entry(&self, x: u32, y: u32) -> MapEntry {
        let direction = self.sampler.direction(x as f64, y as f64);
        if direction.z <= DIRECTION_Z_EPSILON {
            return MapEntry::Sentinel;
        }
        let normalized = Vector2::new(direction.x / direction.z, direction.y / direction.z);
        let pixel = self.camera.to_pixel(&self.camera.distort(&normalized));
        MapEntry::Source {
            u: pixel.x as f32,
            v: pixel.y as f32,
        }
    }

    pub fn build(&self, output_size: Resolution) -> PixelMap {
        let map = PixelMap::from_fn(output_size, |x, y| self.entry(x, y));
        debug!(
            "built {}x{} map, {} sentinel entries",
            output_size.width,
            output_size.height,
            map.sentinel_count()
        );
        map
    }
}

/// A single-view map and the virtual camera behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapOutput {
    pub map: PixelMap,
    /// Present only for rectilinear output.
    pub camera_matrix: Option<PinholeModel>,
}

/// Map of one pane of a multi-pane output.
#[derive(Debug, Clone, PartialEq)]
pub struct PaneOutput {
    pub pane_id: String,
    pub yaw_degrees: f64,
    pub map: PixelMap,
}

/// Maps of every pane, all sharing one virtual camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PaneSetOutput {
    pub camera_matrix: PinholeModel,
    pub panes: Vec<PaneOutput>,
}

impl PaneSetOutput {
    pub fn pane(&self, pane_id: &str) -> Option<&PaneOutput> {
        self.panes.iter().find(|p| p.pane_id == pane_id)
    }
}

fn prepare(camera: &KannalaBrandtModel, request: &ProjectionRequest) -> Result<(), RemapError> {
    camera.validate_params()?;
    validation::validate_resolution(&camera.resolution)?;
    request.validate()
}

/// Builds the single-view map for `request`.
///
/// The input image size is the camera's calibration resolution. Any panes on
/// the request are ignored here; see [`build_pane_maps`].
///
/// # Errors
///
/// [`RemapError::InvalidCalibration`] for a bad camera and the request
/// variants of [`RemapError`] for a bad request.
pub fn build_map(
    camera: &KannalaBrandtModel,
    request: &ProjectionRequest,
) -> Result<RemapOutput, RemapError> {
    prepare(camera, request)?;
    info!(
        "Building {} map {}x{} from {}x{} fisheye",
        request.mode,
        request.output_size.width,
        request.output_size.height,
        camera.resolution.width,
        camera.resolution.height
    );

    let (sampler, camera_matrix) = match request.mode {
        ProjectionMode::Rectilinear => {
            let matrix = rectilinear_camera_matrix(camera, request)?;
            (DirectionSampler::rectilinear(matrix, None), Some(matrix))
        }
        ProjectionMode::Equirectangular => {
            (DirectionSampler::equirectangular(request.output_size), None)
        }
        ProjectionMode::Cylindrical => (DirectionSampler::cylindrical(request.output_size), None),
    };
    let map = MapBuilder::new(camera, sampler).build(request.output_size);

    Ok(RemapOutput { map, camera_matrix })
}

/// Builds one rectilinear map per pane, in parallel, sharing one virtual camera.
///
/// A request without panes yields an empty pane set.
///
/// # Errors
///
/// [`RemapError::PanesRequireRectilinear`] for non-rectilinear requests, plus
/// everything [`build_map`] can return.
pub fn build_pane_maps(
    camera: &KannalaBrandtModel,
    request: &ProjectionRequest,
) -> Result<PaneSetOutput, RemapError> {
    if request.mode != ProjectionMode::Rectilinear {
        return Err(RemapError::PanesRequireRectilinear(request.mode));
    }
    prepare(camera, request)?;
    let camera_matrix = rectilinear_camera_matrix(camera, request)?;
    let panes = request.panes.as_deref().unwrap_or_default();
    info!(
        "Building {} rectilinear panes {}x{}",
        panes.len(),
        request.output_size.width,
        request.output_size.height
    );

    let panes = panes
        .par_iter()
        .map(|pane| {
            let sampler = DirectionSampler::rectilinear(camera_matrix, Some(pane.yaw_degrees));
            PaneOutput {
                pane_id: pane.id.clone(),
                yaw_degrees: pane.yaw_degrees,
                map: MapBuilder::new(camera, sampler).build(request.output_size),
            }
        })
        .collect();

    Ok(PaneSetOutput {
        camera_matrix,
        panes,
    })
}

/// Cache key covering every input of [`build_map`]. Floats are compared by bit
/// pattern, so only bit-identical inputs share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MapKey {
    intrinsics: [u64; 4],
    distortions: [u64; 4],
    input_size: Resolution,
    mode: ProjectionMode,
    output_size: Resolution,
    balance: u64,
    fov_scale: u64,
    manual_focal: Option<[u64; 2]>,
}

impl MapKey {
    fn new(camera: &KannalaBrandtModel, request: &ProjectionRequest) -> Self {
        let k = &camera.intrinsics;
        MapKey {
            intrinsics: [k.fx, k.fy, k.cx, k.cy].map(f64::to_bits),
            distortions: camera.distortions.map(f64::to_bits),
            input_size: camera.resolution,
            mode: request.mode,
            output_size: request.output_size,
            balance: request.balance.clamp(0.0, 1.0).to_bits(),
            fov_scale: request.fov_scale.to_bits(),
            manual_focal: request.manual_focal.map(|f| [f.fx.to_bits(), f.fy.to_bits()]),
        }
    }
}

/// Memoizes [`build_map`] results by their complete set of inputs.
#[derive(Debug, Default)]
pub struct MapCache {
    entries: HashMap<MapKey, Arc<RemapOutput>>,
}

impl MapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached map for these inputs, building it on first use.
    pub fn get_or_build(
        &mut self,
        camera: &KannalaBrandtModel,
        request: &ProjectionRequest,
    ) -> Result<Arc<RemapOutput>, RemapError> {
        let key = MapKey::new(camera, request);
        if let Some(output) = self.entries.get(&key) {
            debug!("map cache hit for {} {:?}", request.mode, request.output_size);
            return Ok(Arc::clone(output));
        }
        let output = Arc::new(build_map(camera, request)?);
        self.entries.insert(key, Arc::clone(&output));
        Ok(output)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use crate::projection::Pane;

    fn small_fisheye() -> KannalaBrandtModel {
        KannalaBrandtModel::from_parts(
            Intrinsics {
                fx: 100.0,
                fy: 100.0,
                cx: 81.0,
                cy: 79.0,
            },
            &[0.03562009, -0.02587979, 0.00564249, -0.00107043],
            Resolution::new(160, 160),
        )
        .unwrap()
    }

    #[test]
    fn test_pixel_map_shape_and_access() {
        let map = PixelMap::from_fn(Resolution::new(7, 3), |x, y| MapEntry::Source {
            u: x as f32,
            v: y as f32,
        });
        assert_eq!(map.entries().len(), 21);
        assert_eq!(map.get(6, 2), Some(MapEntry::Source { u: 6.0, v: 2.0 }));
        assert_eq!(map.get(7, 0), None);
        assert_eq!(map.row(1).unwrap()[4], MapEntry::Source { u: 4.0, v: 1.0 });
        assert!(map.row(3).is_none());
    }

    #[test]
    fn test_to_xy_maps_encodes_sentinel() {
        let map = PixelMap::from_fn(Resolution::new(2, 1), |x, _| {
            if x == 0 {
                MapEntry::Sentinel
            } else {
                MapEntry::Source { u: 3.5, v: 4.5 }
            }
        });
        let (xs, ys) = map.to_xy_maps();
        assert_eq!(xs, vec![-1.0, 3.5]);
        assert_eq!(ys, vec![-1.0, 4.5]);
        assert_eq!(map.sentinel_count(), 1);
        assert_eq!(map.coverage(), 0.5);
    }

    #[test]
    fn test_equirectangular_center_maps_to_principal_point() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Equirectangular, Resolution::new(64, 32));
        let output = build_map(&camera, &request).unwrap();

        assert!(output.camera_matrix.is_none());
        assert_eq!(output.map.resolution(), Resolution::new(64, 32));
        assert_eq!(
            output.map.get(32, 16),
            Some(MapEntry::Source { u: 81.0, v: 79.0 })
        );
        // Back hemisphere columns have no source
        assert_eq!(output.map.get(0, 16), Some(MapEntry::Sentinel));
    }

    #[test]
    fn test_cylindrical_equator_row_keeps_principal_row() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Cylindrical, Resolution::new(64, 40));
        let output = build_map(&camera, &request).unwrap();

        for entry in output.map.row(20).unwrap() {
            if let MapEntry::Source { v, .. } = entry {
                assert_eq!(*v, 79.0);
            }
        }
    }

    fn assert_sentinel_iff_behind(map: &PixelMap, sampler: &DirectionSampler) -> (usize, usize) {
        let (mut sentinels, mut sources) = (0, 0);
        for y in 0..map.height() {
            for x in 0..map.width() {
                let z = sampler.direction(x as f64, y as f64).z;
                let entry = map.get(x, y).unwrap();
                if z <= DIRECTION_Z_EPSILON {
                    assert!(entry.is_sentinel(), "({x}, {y}) should be a sentinel");
                    sentinels += 1;
                } else {
                    let (u, v) = entry.source().unwrap();
                    assert!(u.is_finite() && v.is_finite());
                    sources += 1;
                }
            }
        }
        (sentinels, sources)
    }

    #[test]
    fn test_sentinel_iff_direction_behind() {
        let camera = small_fisheye();
        let size = Resolution::new(48, 24);
        let request = ProjectionRequest::new(ProjectionMode::Equirectangular, size);
        let output = build_map(&camera, &request).unwrap();

        let (sentinels, sources) =
            assert_sentinel_iff_behind(&output.map, &DirectionSampler::equirectangular(size));
        assert!(sentinels > 0 && sources > 0);
    }

    #[test]
    fn test_cylindrical_sentinel_iff_direction_behind() {
        let camera = small_fisheye();
        let size = Resolution::new(60, 30);
        let request = ProjectionRequest::new(ProjectionMode::Cylindrical, size);
        let output = build_map(&camera, &request).unwrap();

        let (sentinels, sources) =
            assert_sentinel_iff_behind(&output.map, &DirectionSampler::cylindrical(size));
        assert!(sentinels > 0 && sources > 0);
    }

    #[test]
    fn test_turned_pane_sentinel_iff_direction_behind() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Rectilinear, Resolution::new(160, 160))
            .with_manual_focal(100.0, 100.0)
            .with_panes(vec![Pane::new("back_left", 120.0)]);
        let output = build_pane_maps(&camera, &request).unwrap();

        let sampler = DirectionSampler::rectilinear(output.camera_matrix, Some(120.0));
        let (sentinels, sources) =
            assert_sentinel_iff_behind(&output.pane("back_left").unwrap().map, &sampler);
        // Only the right edge of a pane turned 120 degrees still sees the front
        assert!(sentinels > 0 && sources > 0);
        assert!(output.pane("back_left").unwrap().map.get(0, 80).unwrap().is_sentinel());
        assert!(!output.pane("back_left").unwrap().map.get(159, 80).unwrap().is_sentinel());
    }

    #[test]
    fn test_positive_yaw_looks_left() {
        let camera = KannalaBrandtModel::from_parts(
            Intrinsics {
                fx: 100.0,
                fy: 100.0,
                cx: 80.0,
                cy: 80.0,
            },
            &[0.0; 4],
            Resolution::new(160, 160),
        )
        .unwrap();
        let request = ProjectionRequest::new(ProjectionMode::Rectilinear, Resolution::new(160, 160))
            .with_manual_focal(100.0, 100.0)
            .with_panes(vec![Pane::new("left", 60.0), Pane::new("right", -60.0)]);
        let output = build_pane_maps(&camera, &request).unwrap();

        // Equidistant lens: 60 degrees off axis lands 100 * pi / 3 pixels away
        let offset = 100.0 * std::f64::consts::FRAC_PI_3;
        let (u, v) = output.pane("left").unwrap().map.get(80, 80).unwrap().source().unwrap();
        assert!((u as f64 - (80.0 - offset)).abs() < 1e-3, "{u}");
        assert!((v as f64 - 80.0).abs() < 1e-3);
        let (u, _) = output.pane("right").unwrap().map.get(80, 80).unwrap().source().unwrap();
        assert!((u as f64 - (80.0 + offset)).abs() < 1e-3, "{u}");
    }

    #[test]
    fn test_build_is_deterministic() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Rectilinear, Resolution::new(50, 40))
            .with_balance(0.5);
        let first = build_map(&camera, &request).unwrap();
        let second = build_map(&camera, &request).unwrap();
        assert_eq!(first, second);

        // Parallel build matches plain per-pixel evaluation
        let builder = MapBuilder::new(
            &camera,
            DirectionSampler::rectilinear(first.camera_matrix.unwrap(), None),
        );
        for y in 0..40 {
            for x in 0..50 {
                assert_eq!(first.map.get(x, y), Some(builder.entry(x, y)));
            }
        }
    }

    #[test]
    fn test_zero_yaw_pane_matches_single_view() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Rectilinear, Resolution::new(40, 30))
            .with_balance(0.5)
            .with_panes(vec![Pane::new("front", 0.0), Pane::new("left", 60.0)]);

        let single = build_map(&camera, &request).unwrap();
        let panes = build_pane_maps(&camera, &request).unwrap();

        assert_eq!(Some(panes.camera_matrix), single.camera_matrix);
        assert_eq!(panes.panes.len(), 2);
        assert_eq!(panes.pane("front").unwrap().map, single.map);
        assert_ne!(panes.pane("left").unwrap().map, single.map);
    }

    #[test]
    fn test_pane_maps_require_rectilinear() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Cylindrical, Resolution::new(40, 30));
        assert!(matches!(
            build_pane_maps(&camera, &request),
            Err(RemapError::PanesRequireRectilinear(ProjectionMode::Cylindrical))
        ));
    }

    #[test]
    fn test_build_rejects_invalid_request() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Rectilinear, Resolution::new(0, 30));
        assert!(matches!(
            build_map(&camera, &request),
            Err(RemapError::InvalidOutputSize { .. })
        ));
    }

    #[test]
    fn test_map_cache_reuses_results() {
        let camera = small_fisheye();
        let request = ProjectionRequest::new(ProjectionMode::Cylindrical, Resolution::new(32, 16));
        let mut cache = MapCache::new();

        let first = cache.get_or_build(&camera, &request).unwrap();
        let second = cache.get_or_build(&camera, &request).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let other = request.clone().with_fov_scale(2.0);
        cache.get_or_build(&camera, &other).unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
