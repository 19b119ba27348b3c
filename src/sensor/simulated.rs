//! In-process sensor used when no headset is attached.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Quat, RawSample, SensorSource, Vec3};
use crate::error::{Result, RiftError};

struct SimulatedState {
    initialized: bool,
    orientation: Quat,
    position: Vec3,
    /// Yaw component captured by the last recenter.
    yaw_reference: f64,
    /// Remaining reads that should fail.
    pending_failures: u32,
}

/// Sensor returning a settable pose.
///
/// Recentering subtracts the current yaw component from subsequent reads.
pub struct SimulatedSensor {
    state: Mutex<SimulatedState>,
    reads: AtomicU64,
    fail_init: bool,
}

impl SimulatedSensor {
    pub fn new(orientation: Quat) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                initialized: false,
                orientation,
                position: Vec3::default(),
                yaw_reference: 0.0,
                pending_failures: 0,
            }),
            reads: AtomicU64::new(0),
            fail_init: false,
        }
    }

    /// A sensor whose `init` always fails.
    pub fn unavailable() -> Self {
        Self {
            fail_init: true,
            ..Self::new(Quat::default())
        }
    }

    pub fn set_orientation(&self, orientation: Quat) {
        self.state.lock().orientation = orientation;
    }

    pub fn set_position(&self, position: Vec3) {
        self.state.lock().position = position;
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().pending_failures = count;
    }

    /// Number of successful and failed reads so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(Quat::new(1.0, 0.0, 0.0, 0.0))
    }
}

impl SensorSource for SimulatedSensor {
    fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(RiftError::SensorInit("no headset attached".into()));
        }
        self.state.lock().initialized = true;
        Ok(())
    }

    fn sample(&self) -> Result<RawSample> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if !state.initialized {
            return Err(RiftError::SensorRead("sensor not initialized".into()));
        }
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(RiftError::SensorRead("simulated read failure".into()));
        }

        let mut orientation = state.orientation;
        orientation.y -= state.yaw_reference;
        Ok(RawSample {
            orientation,
            position: state.position,
        })
    }

    fn recenter(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.yaw_reference = state.orientation.y;
        Ok(())
    }

    fn shutdown(&self) {
        self.state.lock().initialized = false;
    }
}
