//! Rift Tracker
//!
//! Runs the head tracking service against a simulated headset and either
//! synthetic or real (`--features camera`) eye cameras.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rift_tracker::{
    CaptureSource, EyeSide, HeadTrackingService, HeadlessSurface, OrientationSample, RiftConfig,
    RiftFrame, SimulatedSensor,
};

/// How long the demo session runs
const RUN_DURATION: Duration = Duration::from_secs(5);

fn make_capture(side: EyeSide, config: &RiftConfig) -> Box<dyn CaptureSource> {
    #[cfg(feature = "camera")]
    {
        let eye = config.eye(side);
        Box::new(rift_tracker::CameraCapture::new(
            side,
            eye.camera_index,
            config.capture_width,
            config.capture_height,
        ))
    }

    #[cfg(not(feature = "camera"))]
    {
        // Offset marker rows give the calibration something to line up
        let marker_row = match side {
            EyeSide::Left => config.capture_height / 2 + 5,
            EyeSide::Right => (config.capture_height / 2).saturating_sub(5),
        };
        Box::new(
            rift_tracker::SyntheticCapture::new(
                side,
                config.capture_width,
                config.capture_height,
                config.capture_fps,
            )
            .with_marker_row(marker_row),
        )
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Rift Tracker starting...");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match RiftConfig::load(&path) {
            Ok(config) => {
                log::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                return;
            }
        },
        None => RiftConfig::default(),
    };

    let sensor = Arc::new(SimulatedSensor::default());
    let surface = Arc::new(HeadlessSurface::new());
    let service = HeadTrackingService::new("rift", config, sensor, make_capture)
        .with_presentation_surface(surface.clone());

    service.add_orientation_listener(|sample: &OrientationSample| {
        log::debug!("orientation {}", sample);
    });
    service.add_rift_frame_listener(|frame: &RiftFrame| {
        if frame.is_complete() {
            log::trace!("stereo frame ready");
        }
    });

    if let Err(e) = service.initialize() {
        log::error!("Failed to initialize: {}", e);
        return;
    }

    std::thread::sleep(RUN_DURATION / 2);
    service.log_orientation();
    if let Err(e) = service.reset_sensor() {
        log::warn!("Recenter failed: {}", e);
    }
    std::thread::sleep(RUN_DURATION / 2);

    let sampler = service.sampler_stats();
    let compositor = service.compositor_stats();
    log::info!(
        "samples published: {}, read failures: {}",
        sampler.samples_published,
        sampler.read_failures
    );
    log::info!(
        "frames composed: {}, dropped: {}, shown: {}",
        compositor.frames_composed,
        compositor.frames_dropped,
        surface.frames_received()
    );

    service.stop();
    log::info!("Rift Tracker exiting");
}
