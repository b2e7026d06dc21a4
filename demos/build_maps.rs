//! Remap Map Builder
//!
//! Builds every scenario of a configuration file for every camera it lists and
//! reports the virtual camera matrix and map coverage of each result.
//!
//! Usage:
//! ```bash
//! RUST_LOG=info cargo run --release --example build_maps -- \
//!   --config samples/scenarios.json
//!
//! # Use a fisheye-tools calibration file instead of the configured cameras
//! RUST_LOG=info cargo run --release --example build_maps -- \
//!   --config samples/scenarios.json \
//!   --calibration samples/kannala_brandt.yaml \
//!   --scenario rectilinear_balanced
//! ```

use clap::Parser;
use fisheye_remap::camera::{CameraModel, KannalaBrandtModel, PinholeModel};
use fisheye_remap::config::RemapConfig;
use fisheye_remap::remap::{build_pane_maps, MapCache, PixelMap};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Instant;

/// Fisheye remap map builder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the scenario configuration (JSON or YAML)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Kannala-Brandt calibration YAML used in place of the configured cameras
    #[arg(short = 'k', long)]
    calibration: Option<PathBuf>,

    /// Only build the scenario with this name
    #[arg(short = 's', long)]
    scenario: Option<String>,
}

fn log_camera_matrix(matrix: &PinholeModel) {
    let k = matrix.intrinsics;
    info!(
        "  virtual camera: fx={:.4} fy={:.4} cx={:.4} cy={:.4}",
        k.fx, k.fy, k.cx, k.cy
    );
}

fn log_map(label: &str, map: &PixelMap) {
    info!(
        "  {}: {}x{}, coverage {:.2}% ({} sentinel pixels)",
        label,
        map.width(),
        map.height(),
        map.coverage() * 100.0,
        map.sentinel_count()
    );
}

fn load_cameras(
    cli: &Cli,
    config: &RemapConfig,
) -> Result<Vec<(String, KannalaBrandtModel)>, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.calibration {
        let path = path.to_str().ok_or("calibration path is not valid UTF-8")?;
        info!("Loading Kannala-Brandt model from: {}", path);
        return Ok(vec![(
            path.to_string(),
            KannalaBrandtModel::load_from_yaml(path)?,
        )]);
    }

    let mut cameras = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
        let label = format!("camera {} ({})", camera.camera_id, camera.camera_model);
        cameras.push((label, camera.to_model()?));
    }
    Ok(cameras)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = RemapConfig::load(&cli.config)?;
    let cameras = load_cameras(&cli, &config)?;

    let scenarios: Vec<_> = config
        .scenarios
        .iter()
        .filter(|s| match &cli.scenario {
            Some(name) => &s.name == name,
            None => true,
        })
        .collect();
    if scenarios.is_empty() {
        warn!("No scenario matches the requested name");
        return Ok(());
    }

    info!(
        "Building {} scenarios for {} cameras",
        scenarios.len(),
        cameras.len()
    );

    let mut cache = MapCache::new();
    let start = Instant::now();

    for (label, camera) in &cameras {
        info!("{} {:?}", label, camera);
        for scenario in &scenarios {
            let request = scenario.to_request(&camera.get_resolution())?;
            info!("Scenario {}: {}", scenario.name, scenario.description);

            let scenario_start = Instant::now();
            if scenario.is_multi_pane() {
                let output = build_pane_maps(camera, &request)?;
                log_camera_matrix(&output.camera_matrix);
                for pane in &output.panes {
                    log_map(
                        &format!("pane {} (yaw {}°)", pane.pane_id, pane.yaw_degrees),
                        &pane.map,
                    );
                }
            } else {
                let output = cache.get_or_build(camera, &request)?;
                if let Some(matrix) = &output.camera_matrix {
                    log_camera_matrix(matrix);
                }
                log_map(request.mode.as_str(), &output.map);
            }
            info!("  built in {:?}", scenario_start.elapsed());
        }
    }

    info!(
        "Done: {} distinct single-view maps in {:?}",
        cache.len(),
        start.elapsed()
    );

    Ok(())
}
