//! Acquisition and inference threads.
//!
//! The acquisition thread reads the camera, publishes every frame to the
//! latest-frame slot and offers it to the bounded queue. The inference thread
//! pops frames, runs the backend, filters with one settings snapshot per pass
//! and replaces the tracker contents. Status events go to the operator side
//! over a bounded channel and are dropped when it lags.
//!
//! Both loops check a shared running flag at each iteration. The source is
//! released exactly once, by the acquisition thread on its way out.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{filter_detections, Detection, InferenceBackend};
use crate::frame::{Frame, FrameQueue, LatestFrame, DEFAULT_POP_TIMEOUT};
use crate::ingest::FrameSource;
use crate::settings::SharedSettings;
use crate::tracker::{Completeness, CompletenessTracker};

const EXIT_EVENT_TIMEOUT: Duration = Duration::from_secs(1);
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// Retry policy
// ----------------------------------------------------------------------------

/// Bounded exponential backoff for camera read failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed reads tolerated before acquisition gives up.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("retry max_attempts must be at least 1"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(anyhow!(
                "retry initial backoff ({} ms) exceeds max backoff ({} ms)",
                self.initial_backoff_ms,
                self.max_backoff_ms
            ));
        }
        Ok(())
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// How the acquisition loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquisitionExit {
    /// The running flag was cleared.
    Stopped,
    /// The camera kept failing until the retry budget ran out.
    Failed { attempts: u32, last_error: String },
}

/// Result of one inference pass.
#[derive(Clone, Debug)]
pub struct StatusUpdate {
    pub sequence: u64,
    pub completeness: Completeness,
    /// Accepted detections of this pass, in backend order.
    pub detections: Vec<Detection>,
    pub frame: Frame,
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Status(StatusUpdate),
    AcquisitionEnded(AcquisitionExit),
}

/// Counters across both threads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub inference_passes: u64,
    pub inference_failures: u64,
    pub events_dropped: u64,
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    inference_passes: AtomicU64,
    inference_failures: AtomicU64,
    events_dropped: AtomicU64,
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

pub struct Pipeline {
    queue: FrameQueue,
    latest: LatestFrame,
    tracker: Arc<CompletenessTracker>,
    settings: SharedSettings,
    retry: RetryPolicy,
    pop_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        queue: FrameQueue,
        latest: LatestFrame,
        tracker: Arc<CompletenessTracker>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            queue,
            latest,
            tracker,
            settings,
            retry: RetryPolicy::default(),
            pop_timeout: DEFAULT_POP_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Result<Self> {
        retry.validate()?;
        self.retry = retry;
        Ok(self)
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Warm up the backend, then start both threads.
    pub fn spawn(
        self,
        mut source: Box<dyn FrameSource>,
        mut backend: Box<dyn InferenceBackend>,
        events: Sender<PipelineEvent>,
    ) -> Result<PipelineHandle> {
        if let Err(err) = backend.warm_up() {
            source.release();
            return Err(err.context(format!("{} backend warm-up failed", backend.name())));
        }

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        log::info!(
            "pipeline starting: source {}, backend {}, queue capacity {}",
            source.describe(),
            backend.name(),
            self.queue.capacity()
        );

        let acquisition = {
            let running = running.clone();
            let counters = counters.clone();
            let queue = self.queue.clone();
            let latest = self.latest.clone();
            let retry = self.retry.clone();
            let events = events.clone();
            std::thread::Builder::new()
                .name("acquisition".into())
                .spawn(move || {
                    let exit = run_acquisition(source, &queue, &latest, &running, &retry, &counters);
                    if events
                        .send_timeout(PipelineEvent::AcquisitionEnded(exit.clone()), EXIT_EVENT_TIMEOUT)
                        .is_err()
                    {
                        log::debug!("acquisition exit event not delivered");
                    }
                    exit
                })
                .context("failed to spawn acquisition thread")?
        };

        let inference = {
            let thread_running = running.clone();
            let counters = counters.clone();
            let worker = InferenceWorker {
                queue: self.queue.clone(),
                tracker: self.tracker,
                settings: self.settings,
                pop_timeout: self.pop_timeout,
                events,
            };
            let spawned = std::thread::Builder::new()
                .name("inference".into())
                .spawn(move || worker.run(backend.as_mut(), &thread_running, &counters));
            match spawned {
                Ok(join) => join,
                Err(err) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = acquisition.join();
                    return Err(anyhow::Error::new(err).context("failed to spawn inference thread"));
                }
            }
        };

        Ok(PipelineHandle {
            running,
            counters,
            queue: self.queue,
            acquisition: Some(acquisition),
            inference: Some(inference),
        })
    }
}

fn run_acquisition(
    mut source: Box<dyn FrameSource>,
    queue: &FrameQueue,
    latest: &LatestFrame,
    running: &AtomicBool,
    retry: &RetryPolicy,
    counters: &Counters,
) -> AcquisitionExit {
    let mut failures = 0u32;
    let exit = loop {
        if !running.load(Ordering::SeqCst) {
            break AcquisitionExit::Stopped;
        }
        match source.read() {
            Ok(frame) => {
                failures = 0;
                counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                latest.publish(frame.clone());
                if !queue.offer(frame) {
                    log::debug!("frame queue full, dropped frame");
                }
            }
            Err(err) => {
                failures += 1;
                counters.read_failures.fetch_add(1, Ordering::Relaxed);
                if failures >= retry.max_attempts {
                    log::error!(
                        "camera {} failed {} times in a row, giving up: {:#}",
                        source.describe(),
                        failures,
                        err
                    );
                    // Nothing left to infer on.
                    running.store(false, Ordering::SeqCst);
                    break AcquisitionExit::Failed {
                        attempts: failures,
                        last_error: format!("{:#}", err),
                    };
                }
                let backoff = retry.backoff_for(failures);
                log::warn!(
                    "camera read failed (attempt {}/{}), retrying in {:?}: {:#}",
                    failures,
                    retry.max_attempts,
                    backoff,
                    err
                );
                sleep_while_running(backoff, running);
            }
        }
    };
    source.release();
    log::info!("acquisition stopped: {:?}", exit);
    exit
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(BACKOFF_SLICE.min(deadline - now));
    }
}

struct InferenceWorker {
    queue: FrameQueue,
    tracker: Arc<CompletenessTracker>,
    settings: SharedSettings,
    pop_timeout: Duration,
    events: Sender<PipelineEvent>,
}

impl InferenceWorker {
    fn run(self, backend: &mut dyn InferenceBackend, running: &AtomicBool, counters: &Counters) {
        let mut applied_version = None;
        while running.load(Ordering::SeqCst) {
            let Some(frame) = self.queue.pop_timeout(self.pop_timeout) else {
                continue;
            };
            if let Err(err) = self.pass(backend, frame, &mut applied_version, counters) {
                log::error!("inference loop stopped: {:#}", err);
                break;
            }
        }
        log::info!("inference stopped");
    }

    /// One pass. Backend failures skip the frame; lock failures end the loop.
    fn pass(
        &self,
        backend: &mut dyn InferenceBackend,
        frame: Frame,
        applied_version: &mut Option<u64>,
        counters: &Counters,
    ) -> Result<()> {
        let (version, settings) = self.settings.versioned_snapshot()?;
        if *applied_version != Some(version) {
            if applied_version.is_some() {
                log::info!(
                    "detection settings v{} applied: confidence > {}, tracking {}",
                    version,
                    settings.confidence_threshold,
                    if settings.tracking_enabled { "on" } else { "off" }
                );
            }
            *applied_version = Some(version);
        }

        let raw = match backend.infer(&frame, &settings) {
            Ok(raw) => raw,
            Err(err) => {
                counters.inference_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("inference failed on frame {}: {:#}", frame.sequence, err);
                return Ok(());
            }
        };
        let detections = filter_detections(&raw, backend.class_names(), &settings);
        let completeness = self.tracker.update(detections.clone())?;
        counters.inference_passes.fetch_add(1, Ordering::Relaxed);

        let update = StatusUpdate {
            sequence: frame.sequence,
            completeness,
            detections,
            frame,
        };
        if self.events.try_send(PipelineEvent::Status(update)).is_err() {
            counters.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Owns the pipeline threads. Dropping it stops them.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    queue: FrameQueue,
    acquisition: Option<JoinHandle<AcquisitionExit>>,
    inference: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.queue.dropped(),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
            inference_passes: self.counters.inference_passes.load(Ordering::Relaxed),
            inference_failures: self.counters.inference_failures.load(Ordering::Relaxed),
            events_dropped: self.counters.events_dropped.load(Ordering::Relaxed),
        }
    }

    /// Clear the running flag and join both threads.
    ///
    /// An in-flight inference pass completes first.
    pub fn stop(mut self) -> Result<AcquisitionExit> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<AcquisitionExit> {
        self.running.store(false, Ordering::SeqCst);
        let mut exit = AcquisitionExit::Stopped;
        if let Some(join) = self.acquisition.take() {
            exit = join
                .join()
                .map_err(|_| anyhow!("acquisition thread panicked"))?;
        }
        if let Some(join) = self.inference.take() {
            join.join()
                .map_err(|_| anyhow!("inference thread panicked"))?;
        }
        log::info!("pipeline stopped: {:?}", self.stats());
        Ok(exit)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.acquisition.is_some() || self.inference.is_some() {
            if let Err(err) = self.shutdown() {
                log::error!("pipeline shutdown failed: {:#}", err);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
