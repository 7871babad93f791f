//! # Live Analysis Engine
//!
//! Orchestrates microphone capture and the per-window analysis loop.
//!
//! ## Architecture
//! - **Worker thread**: owns the capture stream and runs the analysis
//!   loop, one window at a time
//! - **Communication**: crossbeam channels for windows and shutdown
//! - **Broadcast**: every completed frame goes to every subscriber,
//!   synchronously, in registration order
//!
//! The lifecycle is `start` → running → `stop`; both calls are
//! idempotent. A failed frame never tears the engine down — only an
//! explicit `stop` or the capture stream dying ends the loop.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, info, warn};

use crate::AnalysisFrame;
use crate::analyzer::{AnalyzerConfig, FrameAnalyzer};
use crate::audio;
use crate::filter::{ANALYSIS_CUTOFF_HZ, LowPassFilter};

/// How long `start` waits for the capture stream to come up.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback invoked with every completed analysis frame.
pub type FrameCallback = Box<dyn FnMut(&AnalysisFrame) + Send>;

/// Handle for removing a subscriber again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    callback: FrameCallback,
}

/// State shared between the engine handle and its worker thread.
#[derive(Default)]
struct EngineShared {
    subscribers: Mutex<Vec<Subscriber>>,
    /// Removals requested while the registry was out for delivery.
    removed: Mutex<HashSet<u64>>,
    last_frame: Mutex<Option<AnalysisFrame>>,
    next_id: AtomicU64,
}

struct EngineWorker {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Live microphone analysis engine.
///
/// Owns its capture stream, its smoothing history and its subscriber
/// set; independent engine instances never share any of them.
pub struct LiveEngine {
    shared: Arc<EngineShared>,
    worker: Option<EngineWorker>,
    config: AnalyzerConfig,
}

impl Default for LiveEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveEngine {
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            shared: Arc::new(EngineShared::default()),
            worker: None,
            config,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts capture and analysis. A second call while running is a
    /// no-op.
    ///
    /// The worker thread opens the capture stream itself and reports
    /// readiness back over a bounded channel, so a missing device or a
    /// denied microphone surfaces here as an error the caller can act
    /// on. Nothing retries; the caller decides whether to re-prompt.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            debug!("live engine already running");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();

        let handle = thread::spawn(move || {
            let (raw_tx, raw_rx) = unbounded::<Vec<f32>>();

            let (stream, sample_rate) = match audio::start_audio_capture(raw_tx) {
                Ok(pair) => {
                    let _ = ready_tx.send(Ok(pair.1));
                    pair
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            run_analysis_loop(&shared, config, sample_rate, raw_rx, shutdown_rx);

            if let Err(e) = stream.pause() {
                warn!("error pausing capture stream: {e}");
            }
            drop(stream);
            debug!("analysis worker finished");
        });

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(sample_rate)) => {
                info!("live engine running at {sample_rate} Hz");
                self.worker = Some(EngineWorker {
                    shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = shutdown_tx.send(());
                let _ = handle.join();
                Err(anyhow!("audio capture did not start in time"))
            }
        }
    }

    /// Stops capture and analysis, releasing the microphone. Safe to
    /// call when already stopped.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            if worker.handle.join().is_err() {
                warn!("analysis worker panicked during shutdown");
            }
            info!("live engine stopped");
        }
        self.shared.subscribers.lock().unwrap().clear();
        self.shared.removed.lock().unwrap().clear();
    }

    /// Registers a callback for every analysis frame.
    ///
    /// Frames are delivered synchronously on the analysis thread, in
    /// registration order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&AnalysisFrame) + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().unwrap().push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        SubscriptionId(id)
    }

    /// Removes a subscriber. Removing one mid-broadcast does not disturb
    /// delivery to the rest.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.shared.subscribers.lock().unwrap();
        let before = registry.len();
        registry.retain(|s| s.id != id.0);
        if registry.len() == before {
            // Not in the registry right now: either unknown or out for
            // delivery. Record it so the dispatcher drops it afterwards.
            self.shared.removed.lock().unwrap().insert(id.0);
        }
    }

    /// The most recent broadcast frame, for pull-style consumers.
    pub fn last_frame(&self) -> Option<AnalysisFrame> {
        self.shared.last_frame.lock().unwrap().clone()
    }
}

impl Drop for LiveEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_analysis_loop(
    shared: &EngineShared,
    config: AnalyzerConfig,
    sample_rate: u32,
    raw_rx: Receiver<Vec<f32>>,
    shutdown_rx: Receiver<()>,
) {
    let mut analyzer = FrameAnalyzer::new(config);
    let mut filter = LowPassFilter::new(ANALYSIS_CUTOFF_HZ, sample_rate);

    loop {
        crossbeam_channel::select! {
            recv(raw_rx) -> msg => match msg {
                Ok(mut window) => {
                    filter.process(&mut window);
                    let frame = analyzer.analyze(&window, sample_rate);
                    broadcast(shared, frame);
                }
                Err(_) => {
                    warn!("capture channel closed, stopping analysis loop");
                    break;
                }
            },
            recv(shutdown_rx) -> _ => {
                debug!("analysis loop received shutdown");
                break;
            }
        }
    }
}

/// Delivers one frame to every subscriber, then records it as the
/// latest frame.
///
/// The registry is taken out of the mutex for the duration of delivery
/// so a callback may subscribe or unsubscribe without deadlocking, and a
/// panicking callback is isolated from the rest.
fn broadcast(shared: &EngineShared, frame: AnalysisFrame) {
    let mut active = std::mem::take(&mut *shared.subscribers.lock().unwrap());

    for subscriber in active.iter_mut() {
        if catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(&frame))).is_err() {
            warn!("subscriber panicked on frame delivery");
        }
    }

    let mut registry = shared.subscribers.lock().unwrap();
    // Anything added during delivery landed in the emptied registry;
    // restore the active set in front of it to keep registration order.
    let added = std::mem::take(&mut *registry);
    *registry = active;
    registry.extend(added);

    let mut removed = shared.removed.lock().unwrap();
    if !removed.is_empty() {
        registry.retain(|s| !removed.contains(&s.id));
        removed.clear();
    }
    drop(removed);
    drop(registry);

    *shared.last_frame.lock().unwrap() = Some(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn frame_with_rms(rms: f32) -> AnalysisFrame {
        AnalysisFrame {
            rms,
            ..AnalysisFrame::silent()
        }
    }

    #[test]
    fn every_subscriber_receives_the_frame() {
        let engine = LiveEngine::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&first);
        engine.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&second);
        engine.subscribe(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        broadcast(&engine.shared, frame_with_rms(0.5));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let engine = LiveEngine::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            engine.subscribe(move |_| order.lock().unwrap().push(tag));
        }

        broadcast(&engine.shared, frame_with_rms(0.5));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribed_callback_stops_receiving() {
        let engine = LiveEngine::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = engine.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        broadcast(&engine.shared, frame_with_rms(0.5));
        engine.unsubscribe(id);
        broadcast(&engine.shared, frame_with_rms(0.5));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_starve_the_rest() {
        let engine = LiveEngine::new();
        let survivor = Arc::new(AtomicUsize::new(0));

        engine.subscribe(|_| panic!("subscriber bug"));
        let s = Arc::clone(&survivor);
        engine.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        broadcast(&engine.shared, frame_with_rms(0.5));
        assert_eq!(survivor.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_records_the_latest_frame() {
        let engine = LiveEngine::new();
        assert!(engine.last_frame().is_none());
        broadcast(&engine.shared, frame_with_rms(0.25));
        assert_eq!(engine.last_frame().unwrap().rms, 0.25);
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut engine = LiveEngine::new();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn stop_clears_subscribers() {
        let mut engine = LiveEngine::new();
        engine.subscribe(|_| {});
        engine.stop();
        assert!(engine.shared.subscribers.lock().unwrap().is_empty());
    }
}
