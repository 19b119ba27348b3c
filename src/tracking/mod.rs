//! Head tracking sampler
//!
//! Polls the HMD sensor on a dedicated background thread and publishes one
//! `OrientationSample` per cycle. The thread sleeps on a shutdown channel so
//! `stop` wakes it immediately instead of waiting out the poll interval.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::{Result, RiftError};
use crate::publish::Publisher;
use crate::sensor::{OrientationSample, SensorSource};

/// Sampler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Samples handed to subscribers
    pub samples_published: u64,
    /// Sensor reads that returned an error
    pub read_failures: u64,
}

/// State shared with the sampling thread
struct SamplerShared {
    poll_interval_ms: AtomicU64,
    running: AtomicBool,
    samples_published: AtomicU64,
    read_failures: AtomicU64,
    last_sample: Mutex<Option<OrientationSample>>,
}

struct SamplerThread {
    /// Dropping the sender wakes and stops the thread
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Background orientation polling loop.
pub struct OrientationSampler {
    name: String,
    sensor: Arc<dyn SensorSource>,
    publisher: Arc<Publisher<OrientationSample>>,
    shared: Arc<SamplerShared>,
    thread: Mutex<Option<SamplerThread>>,
}

impl OrientationSampler {
    pub fn new(
        name: impl Into<String>,
        sensor: Arc<dyn SensorSource>,
        publisher: Arc<Publisher<OrientationSample>>,
    ) -> Self {
        Self {
            name: name.into(),
            sensor,
            publisher,
            shared: Arc::new(SamplerShared {
                poll_interval_ms: AtomicU64::new(DEFAULT_POLL_INTERVAL_MS),
                running: AtomicBool::new(false),
                samples_published: AtomicU64::new(0),
                read_failures: AtomicU64::new(0),
                last_sample: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the sampling thread.
    ///
    /// Returns `Ok(false)` without spawning if the thread is already running.
    pub fn start(&self) -> Result<bool> {
        log::info!("starting head tracking");

        let mut thread = self.thread.lock();
        if thread.is_some() {
            log::info!("Head tracker thread already started.");
            return Ok(false);
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let sensor = Arc::clone(&self.sensor);
        let publisher = Arc::clone(&self.publisher);
        let shared = Arc::clone(&self.shared);

        shared.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name(format!("{}-head-tracking", self.name))
            .spawn(move || Self::sample_loop(sensor, publisher, shared, shutdown_rx))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                RiftError::ThreadSpawn(e.to_string())
            })?;

        *thread = Some(SamplerThread {
            shutdown_tx,
            handle,
        });
        Ok(true)
    }

    /// Signal the thread to exit and wait for it. Safe to call repeatedly.
    pub fn stop(&self) {
        log::debug!("stopping head tracking");

        let Some(SamplerThread {
            shutdown_tx,
            handle,
        }) = self.thread.lock().take()
        else {
            return;
        };

        let _ = shutdown_tx.try_send(());
        drop(shutdown_tx);
        if handle.join().is_err() {
            log::error!("Head tracking thread panicked");
        }
        self.shared.running.store(false, Ordering::Release);
    }

    fn sample_loop(
        sensor: Arc<dyn SensorSource>,
        publisher: Arc<Publisher<OrientationSample>>,
        shared: Arc<SamplerShared>,
        shutdown_rx: Receiver<()>,
    ) {
        log::info!("Head tracking thread started");

        loop {
            match sensor.sample() {
                Ok(raw) => {
                    let sample = OrientationSample::from_raw(&raw);
                    *shared.last_sample.lock() = Some(sample);
                    publisher.publish(&sample);
                    shared.samples_published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    shared.read_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Head tracking read failed: {}", e);
                }
            }

            // Interval is re-read every cycle
            let interval = Duration::from_millis(shared.poll_interval_ms.load(Ordering::Relaxed));
            match shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        shared.running.store(false, Ordering::Release);
        log::info!("Head tracking thread stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.shared.poll_interval_ms.load(Ordering::Relaxed)
    }

    /// Change the poll interval. Takes effect after the current sleep.
    /// Zero is clamped to one millisecond.
    pub fn set_poll_interval_ms(&self, interval_ms: u64) {
        self.shared
            .poll_interval_ms
            .store(interval_ms.max(1), Ordering::Relaxed);
    }

    /// Most recently published sample.
    pub fn last_sample(&self) -> Option<OrientationSample> {
        *self.shared.last_sample.lock()
    }

    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            samples_published: self.shared.samples_published.load(Ordering::Relaxed),
            read_failures: self.shared.read_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for OrientationSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Quat, SimulatedSensor};
    use std::time::Instant;

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

    type Harness = (OrientationSampler, Arc<SimulatedSensor>, Arc<Publisher<OrientationSample>>);

    fn sampler_with(orientation: Quat) -> Harness {
        let sensor = Arc::new(SimulatedSensor::new(orientation));
        sensor.init().unwrap();
        let publisher = Arc::new(Publisher::new("orientation"));
        let sampler = OrientationSampler::new("test", sensor.clone(), publisher.clone());
        (sampler, sensor, publisher)
    }

    #[test]
    fn test_published_angles() {
        let (sampler, _sensor, publisher) = sampler_with(Quat::new(0.1, 0.2, 0.3, 0.4));
        let samples = Arc::new(Mutex::new(Vec::new()));
        let s = samples.clone();
        publisher.subscribe(move |sample: &OrientationSample| s.lock().push(*sample));

        sampler.set_poll_interval_ms(5);
        sampler.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || samples.lock().len() >= 3));
        sampler.stop();

        for sample in samples.lock().iter() {
            assert!((sample.pitch - 0.2f64.to_degrees()).abs() < 1e-9);
            assert!((sample.yaw - 0.3f64.to_degrees()).abs() < 1e-9);
            assert!((sample.roll - 0.4f64.to_degrees()).abs() < 1e-9);
        }
        assert_eq!(sampler.last_sample(), samples.lock().last().copied());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (sampler, _sensor, _publisher) = sampler_with(Quat::default());
        assert!(sampler.start().unwrap());
        assert!(!sampler.start().unwrap());
        assert!(sampler.is_running());
        sampler.stop();
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (sampler, _sensor, _publisher) = sampler_with(Quat::default());
        sampler.stop();
        sampler.start().unwrap();
        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let (sampler, sensor, _publisher) = sampler_with(Quat::default());
        sampler.set_poll_interval_ms(10_000);
        sampler.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || sampler.stats().samples_published == 1));

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(2));

        let reads = sensor.read_count();
        let published = sampler.stats().samples_published;
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sensor.read_count(), reads);
        assert_eq!(sampler.stats().samples_published, published);
    }

    #[test]
    fn test_read_failures_do_not_stop_loop() {
        let (sampler, sensor, _publisher) = sampler_with(Quat::default());
        sensor.fail_next_reads(3);
        sampler.set_poll_interval_ms(1);
        sampler.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || sampler.stats().samples_published >= 2));
        sampler.stop();

        assert_eq!(sampler.stats().read_failures, 3);
    }

    #[test]
    fn test_restart_after_stop() {
        let (sampler, _sensor, _publisher) = sampler_with(Quat::default());
        sampler.set_poll_interval_ms(1);
        sampler.start().unwrap();
        sampler.stop();
        assert!(sampler.start().unwrap());
        assert!(sampler.is_running());
        sampler.stop();
    }

    #[test]
    fn test_poll_interval_clamped() {
        let (sampler, _sensor, _publisher) = sampler_with(Quat::default());
        assert_eq!(sampler.poll_interval_ms(), 20);
        sampler.set_poll_interval_ms(0);
        assert_eq!(sampler.poll_interval_ms(), 1);
    }
}
