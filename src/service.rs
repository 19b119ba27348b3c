//! Head tracking service
//!
//! Owns the sensor handle, the orientation sampler, both eye capture sources
//! and the frame compositor, and drives them through a single lifecycle:
//!
//! ```text
//! Uninitialized -> Initializing -> Running -> Stopped
//! ```
//!
//! A failed initialization rolls back to `Uninitialized` so the caller can
//! retry. `Stopped` is terminal.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::calibration::{EyeTransform, ReferencePoint};
use crate::capture::{CaptureSource, EyeSide, FrameCallback};
use crate::compositor::{CompositorStats, FrameCompositor, PresentationSurface, RiftFrame};
use crate::config::RiftConfig;
use crate::error::Result;
use crate::publish::{Publisher, SubscriptionId};
use crate::sensor::{OrientationSample, PositionSample, SensorSource};
use crate::tracking::{OrientationSampler, SamplerStats};

/// Builds the capture source for one eye from the current configuration.
pub type CaptureFactory = Box<dyn Fn(EyeSide, &RiftConfig) -> Box<dyn CaptureSource> + Send + Sync>;

/// Service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Running,
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Uninitialized => write!(f, "Uninitialized"),
            ServiceState::Initializing => write!(f, "Initializing"),
            ServiceState::Running => write!(f, "Running"),
            ServiceState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// HMD head tracking and stereo passthrough service.
pub struct HeadTrackingService {
    name: String,
    /// Readers hold this across sensor access so `stop` cannot release the
    /// sensor underneath them.
    state: RwLock<ServiceState>,
    config: Mutex<RiftConfig>,
    sensor: Arc<dyn SensorSource>,
    sampler: OrientationSampler,
    compositor: Arc<FrameCompositor>,
    capture_factory: CaptureFactory,
    captures: Mutex<Vec<Box<dyn CaptureSource>>>,
    orientation_publisher: Arc<Publisher<OrientationSample>>,
    frame_publisher: Arc<Publisher<RiftFrame>>,
}

impl HeadTrackingService {
    pub fn new<F>(
        name: impl Into<String>,
        config: RiftConfig,
        sensor: Arc<dyn SensorSource>,
        capture_factory: F,
    ) -> Self
    where
        F: Fn(EyeSide, &RiftConfig) -> Box<dyn CaptureSource> + Send + Sync + 'static,
    {
        let name = name.into();
        let orientation_publisher = Arc::new(Publisher::new("publishOrientation"));
        let frame_publisher = Arc::new(Publisher::new("publishRiftFrame"));

        let sampler = OrientationSampler::new(
            name.clone(),
            Arc::clone(&sensor),
            Arc::clone(&orientation_publisher),
        );
        sampler.set_poll_interval_ms(config.poll_interval_ms);

        let compositor = Arc::new(FrameCompositor::new(
            EyeTransform::from(&config.left),
            EyeTransform::from(&config.right),
            Arc::clone(&frame_publisher),
        ));

        Self {
            name,
            state: RwLock::new(ServiceState::Uninitialized),
            config: Mutex::new(config),
            sensor,
            sampler,
            compositor,
            capture_factory: Box::new(capture_factory),
            captures: Mutex::new(Vec::new()),
            orientation_publisher,
            frame_publisher,
        }
    }

    pub fn with_presentation_surface(self, surface: Arc<dyn PresentationSurface>) -> Self {
        self.compositor.set_presentation_surface(Some(surface));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Bring up the sensor, the sampler, both cameras and the presentation
    /// surface. Calling this again once started is a no-op.
    pub fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ServiceState::Uninitialized => *state = ServiceState::Initializing,
                ServiceState::Initializing | ServiceState::Running => {
                    log::info!("Rift interface already initialized.");
                    return Ok(());
                }
                ServiceState::Stopped => {
                    log::info!("{} has been stopped; not initializing again.", self.name);
                    return Ok(());
                }
            }
        }

        let mut started: Vec<Box<dyn CaptureSource>> = Vec::new();
        match self.bring_up(&mut started) {
            Ok(()) => {
                *self.captures.lock() = started;
                *self.state.write() = ServiceState::Running;
                log::info!("{} running", self.name);
                Ok(())
            }
            Err(e) => {
                log::error!("{} failed to initialize: {}", self.name, e);
                for capture in started.iter_mut() {
                    capture.stop_capture();
                }
                self.sampler.stop();
                self.sensor.shutdown();
                *self.state.write() = ServiceState::Uninitialized;
                Err(e)
            }
        }
    }

    fn bring_up(&self, started: &mut Vec<Box<dyn CaptureSource>>) -> Result<()> {
        log::info!("Init the rift HMD");
        self.sensor.init()?;
        log::info!("Created HMD sensor");

        // Now that we have the sensor, start the polling thread
        self.sampler.start()?;

        let config = self.config.lock().clone();
        for side in EyeSide::BOTH {
            let mut capture = (self.capture_factory)(side, &config);
            let compositor = Arc::clone(&self.compositor);
            let on_frame: FrameCallback = Arc::new(move |frame| {
                // Errors are logged and counted by the compositor
                let _ = compositor.on_frame_arrived(frame);
            });
            capture.start_capture(on_frame)?;
            started.push(capture);
        }

        log::info!("Set up the presentation surface.");
        match self.compositor.presentation_surface() {
            Some(surface) => surface.start()?,
            None => log::warn!("No presentation surface attached; frames are only published."),
        }
        Ok(())
    }

    /// Stop head tracking and release the sensor. Capture sources keep
    /// running until the service is dropped.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            match *state {
                ServiceState::Running => *state = ServiceState::Stopped,
                ServiceState::Stopped => {
                    log::debug!("{} already stopped", self.name);
                    return;
                }
                ServiceState::Uninitialized | ServiceState::Initializing => {
                    log::info!("{} not initialized; nothing to stop.", self.name);
                    return;
                }
            }
        }

        // The sampler must be gone before the sensor is released
        self.sampler.stop();
        self.sensor.shutdown();
        log::info!("{} stopped", self.name);
    }

    /// Make the current orientation the straight-ahead orientation.
    pub fn reset_sensor(&self) -> Result<()> {
        let state = self.state.read();
        if *state != ServiceState::Running {
            log::info!("Sensor not initialized.");
            return Ok(());
        }
        self.sensor.recenter()
    }

    /// Read a fresh orientation directly from the sensor.
    pub fn current_orientation(&self) -> Option<OrientationSample> {
        let state = self.state.read();
        if *state != ServiceState::Running {
            log::info!("Sensor not initialized.");
            return None;
        }
        match self.sensor.sample() {
            Ok(raw) => Some(OrientationSample::from_raw(&raw)),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    pub fn yaw(&self) -> Option<f64> {
        self.current_orientation().map(|s| s.yaw)
    }

    pub fn pitch(&self) -> Option<f64> {
        self.current_orientation().map(|s| s.pitch)
    }

    pub fn roll(&self) -> Option<f64> {
        self.current_orientation().map(|s| s.roll)
    }

    /// Log the head position and orientation to help with debugging.
    pub fn log_orientation(&self) {
        let state = self.state.read();
        if *state != ServiceState::Running {
            log::info!("Sensor not initialized.");
            return;
        }
        match self.sensor.sample() {
            Ok(raw) => {
                let position = PositionSample::from_raw(&raw);
                let orientation = OrientationSample::from_raw(&raw);
                log::info!("Position: {}", position);
                log::info!("Roll: {}", orientation.roll);
                log::info!("Pitch: {}", orientation.pitch);
                log::info!("Yaw: {}", orientation.yaw);
            }
            Err(e) => log::warn!("{}", e),
        }
    }

    /// Last sample published by the background sampler.
    pub fn last_orientation(&self) -> Option<OrientationSample> {
        self.sampler.last_sample()
    }

    pub fn add_orientation_listener<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&OrientationSample) + Send + Sync + 'static,
    {
        self.orientation_publisher.subscribe(callback)
    }

    pub fn remove_orientation_listener(&self, id: SubscriptionId) -> bool {
        self.orientation_publisher.unsubscribe(id)
    }

    pub fn add_rift_frame_listener<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RiftFrame) + Send + Sync + 'static,
    {
        self.frame_publisher.subscribe(callback)
    }

    pub fn remove_rift_frame_listener(&self, id: SubscriptionId) -> bool {
        self.frame_publisher.unsubscribe(id)
    }

    pub fn set_presentation_surface(&self, surface: Option<Arc<dyn PresentationSurface>>) {
        self.compositor.set_presentation_surface(surface);
    }

    pub fn record_reference_click(&self, side: EyeSide, point: ReferencePoint) {
        self.compositor.record_reference_click(side, point);
    }

    pub fn reset_calibration(&self) {
        self.compositor.reset_calibration();
    }

    pub fn is_calibrated(&self) -> bool {
        self.compositor.is_calibrated()
    }

    pub fn current_frame(&self) -> RiftFrame {
        self.compositor.current_frame()
    }

    pub fn compositor(&self) -> &Arc<FrameCompositor> {
        &self.compositor
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.sampler.poll_interval_ms()
    }

    pub fn set_poll_interval_ms(&self, interval_ms: u64) {
        self.config.lock().poll_interval_ms = interval_ms;
        self.sampler.set_poll_interval_ms(interval_ms);
    }

    pub fn set_eye_angle(&self, side: EyeSide, angle: f64) {
        self.config.lock().eye_mut(side).angle = angle;
        self.compositor.set_angle(side, angle);
    }

    pub fn set_eye_vertical_offset(&self, side: EyeSide, dy: f64) {
        self.config.lock().eye_mut(side).vertical_offset = dy;
        self.compositor.set_vertical_offset(side, dy);
    }

    pub fn eye_transform(&self, side: EyeSide) -> EyeTransform {
        self.compositor.eye_transform(side)
    }

    /// Camera indices are read when the service initializes.
    pub fn left_camera_index(&self) -> u32 {
        self.config.lock().left.camera_index
    }

    pub fn set_left_camera_index(&self, index: u32) {
        self.config.lock().left.camera_index = index;
    }

    pub fn right_camera_index(&self) -> u32 {
        self.config.lock().right.camera_index
    }

    pub fn set_right_camera_index(&self, index: u32) {
        self.config.lock().right.camera_index = index;
    }

    pub fn config(&self) -> RiftConfig {
        self.config.lock().clone()
    }

    pub fn sampler_stats(&self) -> SamplerStats {
        self.sampler.stats()
    }

    pub fn compositor_stats(&self) -> CompositorStats {
        self.compositor.stats()
    }

    pub fn is_tracking(&self) -> bool {
        self.sampler.is_running()
    }
}

impl Drop for HeadTrackingService {
    fn drop(&mut self) {
        self.stop();
        for capture in self.captures.lock().iter_mut() {
            capture.stop_capture();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TaggedFrame;
    use crate::compositor::HeadlessSurface;
    use crate::error::RiftError;
    use crate::sensor::{Quat, SimulatedSensor};
    use image::{Rgba, RgbaImage};
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    type CallbackSlots = Arc<Mutex<HashMap<EyeSide, FrameCallback>>>;

    /// Capture source driven by the test through its stored callback.
    struct ManualCapture {
        side: EyeSide,
        slots: CallbackSlots,
        fail: bool,
        capturing: bool,
    }

    impl CaptureSource for ManualCapture {
        fn side(&self) -> EyeSide {
            self.side
        }

        fn start_capture(&mut self, on_frame: FrameCallback) -> Result<()> {
            if self.fail {
                return Err(RiftError::CaptureInit {
                    side: self.side,
                    reason: "device busy".into(),
                });
            }
            self.slots.lock().insert(self.side, on_frame);
            self.capturing = true;
            Ok(())
        }

        fn stop_capture(&mut self) {
            self.slots.lock().remove(&self.side);
            self.capturing = false;
        }

        fn is_capturing(&self) -> bool {
            self.capturing
        }
    }

    fn service_with(
        sensor: Arc<SimulatedSensor>,
        fail_side: Option<EyeSide>,
    ) -> (HeadTrackingService, CallbackSlots) {
        let slots: CallbackSlots = Arc::new(Mutex::new(HashMap::new()));
        let factory_slots = slots.clone();
        let mut config = RiftConfig::default();
        config.poll_interval_ms = 5;
        config.left = Default::default();
        config.right = Default::default();

        let factory = move |side, _config: &RiftConfig| {
            Box::new(ManualCapture {
                side,
                slots: factory_slots.clone(),
                fail: fail_side == Some(side),
                capturing: false,
            }) as Box<dyn CaptureSource>
        };
        let service = HeadTrackingService::new("rift", config, sensor, factory);
        (service, slots)
    }

    fn deliver(slots: &CallbackSlots, side: EyeSide, frame: TaggedFrame) {
        let callback = slots.lock().get(&side).cloned().unwrap();
        callback(frame);
    }

    fn solid(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(2, 2, Rgba([value, value, value, 255]))
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_initialize_and_repeat() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, slots) = service_with(sensor.clone(), None);
        assert_eq!(service.state(), ServiceState::Uninitialized);

        service.initialize().unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.is_initialized());
        assert!(service.is_tracking());
        assert!(sensor.is_initialized());
        assert_eq!(slots.lock().len(), 2);

        service.initialize().unwrap();
        assert_eq!(service.state(), ServiceState::Running);
    }

    #[test]
    fn test_sensor_failure_blocks_running() {
        let sensor = Arc::new(SimulatedSensor::unavailable());
        let (service, slots) = service_with(sensor, None);

        let err = service.initialize().unwrap_err();
        assert!(matches!(err, RiftError::SensorInit(_)));
        assert_eq!(service.state(), ServiceState::Uninitialized);
        assert!(!service.is_tracking());
        assert!(slots.lock().is_empty());
    }

    #[test]
    fn test_capture_failure_rolls_back() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, slots) = service_with(sensor.clone(), Some(EyeSide::Right));

        let err = service.initialize().unwrap_err();
        assert!(matches!(err, RiftError::CaptureInit { side: EyeSide::Right, .. }));
        assert_eq!(service.state(), ServiceState::Uninitialized);
        assert!(!service.is_tracking());
        assert!(!sensor.is_initialized());
        // Left capture was started, then stopped again
        assert!(slots.lock().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, _slots) = service_with(sensor.clone(), None);
        service.initialize().unwrap();

        service.stop();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(!service.is_tracking());
        assert!(!sensor.is_initialized());

        let reads = sensor.read_count();
        service.stop();
        assert_eq!(service.state(), ServiceState::Stopped);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sensor.read_count(), reads);

        // Stopped is terminal
        service.initialize().unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_pre_init_operations_are_skipped() {
        let sensor = Arc::new(SimulatedSensor::new(Quat::new(1.0, 0.0, 0.3, 0.0)));
        let (service, _slots) = service_with(sensor.clone(), None);

        service.reset_sensor().unwrap();
        assert!(service.yaw().is_none());
        assert!(service.current_orientation().is_none());
        service.stop();
        assert_eq!(service.state(), ServiceState::Uninitialized);

        service.initialize().unwrap();
        // The early reset did not recenter
        assert!((service.yaw().unwrap() - 0.3f64.to_degrees()).abs() < 1e-9);
    }

    #[test]
    fn test_accessors_and_recenter() {
        let sensor = Arc::new(SimulatedSensor::new(Quat::new(0.1, 0.2, 0.3, 0.4)));
        let (service, _slots) = service_with(sensor, None);
        service.initialize().unwrap();

        assert!((service.pitch().unwrap() - 0.2f64.to_degrees()).abs() < 1e-9);
        assert!((service.yaw().unwrap() - 0.3f64.to_degrees()).abs() < 1e-9);
        assert!((service.roll().unwrap() - 0.4f64.to_degrees()).abs() < 1e-9);

        service.reset_sensor().unwrap();
        assert!(service.yaw().unwrap().abs() < 1e-9);
        service.log_orientation();
    }

    #[test]
    fn test_orientation_listener() {
        let sensor = Arc::new(SimulatedSensor::new(Quat::new(0.1, 0.2, 0.3, 0.4)));
        let (service, _slots) = service_with(sensor, None);
        let samples = Arc::new(Mutex::new(Vec::new()));
        let s = samples.clone();
        let id = service.add_orientation_listener(move |sample: &OrientationSample| {
            s.lock().push(*sample)
        });

        service.initialize().unwrap();
        assert!(wait_until(Duration::from_secs(2), || samples.lock().len() >= 2));
        assert!(service.remove_orientation_listener(id));
        service.stop();

        let last = service.last_orientation().unwrap();
        assert!((last.roll - 0.4f64.to_degrees()).abs() < 1e-9);
        assert!(service.sampler_stats().samples_published >= 2);
    }

    #[test]
    fn test_frames_flow_to_listeners_and_surface() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, slots) = service_with(sensor, None);
        let surface = Arc::new(HeadlessSurface::new());
        let service = service.with_presentation_surface(surface.clone());

        let frames = Arc::new(Mutex::new(Vec::new()));
        let f = frames.clone();
        service.add_rift_frame_listener(move |frame: &RiftFrame| f.lock().push(frame.clone()));
        service.initialize().unwrap();

        deliver(&slots, EyeSide::Left, TaggedFrame::new(EyeSide::Left, solid(1), 0));
        {
            let frames = frames.lock();
            assert_eq!(frames.len(), 1);
            assert!(frames[0].left.is_some() && frames[0].right.is_none());
        }

        deliver(&slots, EyeSide::Right, TaggedFrame::with_source("middle", solid(2), 0));
        deliver(&slots, EyeSide::Right, TaggedFrame::new(EyeSide::Right, solid(3), 1));

        assert_eq!(frames.lock().len(), 2);
        assert!(service.current_frame().is_complete());
        assert_eq!(surface.frames_received(), 2);
        assert_eq!(service.compositor_stats().frames_dropped, 1);
    }

    #[test]
    fn test_missing_surface_still_publishes() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, slots) = service_with(sensor, None);
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        service.add_rift_frame_listener(move |_: &RiftFrame| *c.lock() += 1);
        service.initialize().unwrap();

        deliver(&slots, EyeSide::Left, TaggedFrame::new(EyeSide::Left, solid(0), 0));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_calibration_through_service() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, slots) = service_with(sensor, None);
        service.initialize().unwrap();

        service.record_reference_click(EyeSide::Left, ReferencePoint::new(100.0, 50.0));
        service.record_reference_click(EyeSide::Right, ReferencePoint::new(100.0, 40.0));
        assert!(!service.is_calibrated());

        deliver(&slots, EyeSide::Left, TaggedFrame::new(EyeSide::Left, solid(0), 0));
        assert!(service.is_calibrated());
        assert!((service.eye_transform(EyeSide::Left).vertical_offset + 5.0).abs() < 1e-12);
        assert!((service.eye_transform(EyeSide::Right).vertical_offset - 5.0).abs() < 1e-12);

        service.reset_calibration();
        assert!(!service.is_calibrated());
    }

    #[test]
    fn test_configuration_setters() {
        let sensor = Arc::new(SimulatedSensor::default());
        let (service, _slots) = service_with(sensor, None);

        service.set_left_camera_index(3);
        service.set_right_camera_index(2);
        assert_eq!(service.left_camera_index(), 3);
        assert_eq!(service.right_camera_index(), 2);

        service.set_poll_interval_ms(40);
        assert_eq!(service.poll_interval_ms(), 40);

        service.set_eye_angle(EyeSide::Left, 90.0);
        service.set_eye_vertical_offset(EyeSide::Right, -2.5);
        assert_eq!(service.eye_transform(EyeSide::Left).angle, 90.0);
        assert_eq!(service.eye_transform(EyeSide::Right).vertical_offset, -2.5);
        assert_eq!(service.config().right.vertical_offset, -2.5);
    }
}
