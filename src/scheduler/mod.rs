//! # Pacing Queue
//!
//! Releases frames to the renderer at the right wall-clock moment.
//!
//! ## Plain English Explanation
//!
//! Frames are produced in bursts (whenever a buffer frees up), but must be
//! shown at a steady beat. The pacing queue is a FIFO with one background
//! thread that looks at the oldest frame, asks the clock what time it is,
//! and either shows the frame, or sleeps until it is almost due.
//!
//! ```text
//!   schedule() ──► [ f3 | f2 | f1 ] ──► pacing thread ──► present callback
//!                    newest    oldest     (waits for f1's time)
//! ```
//!
//! Frames that must be shown right now (repaints, scrubbing, stopped
//! playback) skip the queue and are presented on the caller's thread.

mod timing;
mod worker;

pub use timing::TimingMode;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::backend::BackendError;
use crate::clock::PresentationClock;
use crate::frame::TrackedFrame;
use crate::source::{FrameRate, NANOS_PER_SECOND};
use timing::Decision;
use worker::Command;

/// Longest single sleep of the pacing thread, unless configured otherwise.
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(100);

// ============================================
// PRESENT CALLBACK
// ============================================

/// Timing context handed to the present callback with each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresentTiming {
    /// Presentation time of the frame (0 if it had none)
    pub target_ns: i64,
    /// Wall time since the previous dispatch, 0 for the first one
    pub time_delta_ns: i64,
    /// Frames still waiting behind this one
    pub remaining_in_queue: usize,
    /// A quarter of the per-frame duration
    pub quarter_frame_ns: i64,
}

impl PresentTiming {
    /// Timing for an immediate blank frame.
    pub fn blank() -> Self {
        Self {
            target_ns: 0,
            time_delta_ns: 0,
            remaining_in_queue: 1,
            quarter_frame_ns: NANOS_PER_SECOND,
        }
    }
}

/// Where the pacing queue sends frames when they are due.
///
/// `None` means "show a blank image". Invoked from the pacing thread and,
/// for immediate presents, from the scheduling thread.
pub trait PresentCallback: Send + Sync {
    fn present_frame(&self, frame: Option<TrackedFrame>, timing: PresentTiming) -> Result<(), BackendError>;

    /// A present made on the pacing thread failed. There is no caller to
    /// return the error to, so it comes back here.
    fn present_failed(&self, error: BackendError) {
        warn!("Present from pacing thread failed: {}", error);
    }
}

// ============================================
// ERRORS & STATS
// ============================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("pacing queue is not started")]
    NotStarted,

    #[error("pacing queue is already running")]
    AlreadyRunning,

    #[error("failed to spawn pacing thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("present failed: {0}")]
    Present(#[from] BackendError),
}

/// Counters since the queue was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames handed to the present callback
    pub dispatched: u64,
    /// Late frames discarded under the frame-drop threshold
    pub skipped: u64,
    /// Frames discarded by flush or stop
    pub flushed: u64,
}

// ============================================
// SHARED STATE
// ============================================

struct TimingState {
    clock: Option<Arc<dyn PresentationClock>>,
    rate: f32,
    frame_duration_ns: i64,
    quarter_frame_ns: i64,
    last_sample_time_ns: i64,
    last_dispatch: Option<Instant>,
    mode: TimingMode,
    drop_threshold: i32,
    max_sleep: Duration,
}

/// State shared between the queue handle and the pacing thread.
pub(crate) struct QueueShared {
    frames: Mutex<VecDeque<TrackedFrame>>,
    timing: Mutex<TimingState>,
    callback: Arc<dyn PresentCallback>,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    flushed: AtomicU64,
}

impl QueueShared {
    /// Presents every due frame at the head of the queue.
    ///
    /// Returns how long to wait for the next one, `None` when the queue is empty.
    fn process_queue(&self) -> Option<Duration> {
        loop {
            let (frame, remaining) = {
                let mut frames = self.frames.lock();
                let frame = frames.pop_front()?;
                (frame, frames.len())
            };

            if let Some((frame, wait)) = self.process_frame(frame, remaining) {
                // Only this thread pops, so the head is still ours
                self.frames.lock().push_front(frame);
                return Some(wait);
            }
        }
    }

    /// Presents `frame` if due. Hands it back with a wait time if not.
    fn process_frame(&self, frame: TrackedFrame, remaining: usize) -> Option<(TrackedFrame, Duration)> {
        let (clock, rate, quarter, frame_duration, mode, threshold, max_sleep) = {
            let t = self.timing.lock();
            (
                t.clock.clone(),
                t.rate,
                t.quarter_frame_ns,
                t.frame_duration_ns,
                t.mode,
                t.drop_threshold,
                t.max_sleep,
            )
        };

        if let (Some(clock), Some(start)) = (clock, frame.start_ns()) {
            if rate != 0.0 {
                let now = mode.current_time(clock.correlated_time(), rate, Instant::now());
                let mut delta = start - now;
                if rate < 0.0 {
                    delta = -delta;
                }

                match timing::decide(delta, quarter, rate, max_sleep) {
                    Decision::Wait(wait) => return Some((frame, wait)),
                    Decision::Late { by_ns } => {
                        if remaining > 0 && timing::exceeds_drop_threshold(by_ns, threshold, frame_duration) {
                            trace!("Skipping frame {} ({} ns late)", frame.id(), by_ns);
                            self.skipped.fetch_add(1, Ordering::Relaxed);
                            return None;
                        }
                        trace!("Frame {} is {} ns late", frame.id(), by_ns);
                    }
                    Decision::OnTime => {}
                }
            }
        }

        match self.dispatch(frame, remaining) {
            Ok(()) => {}
            Err(SchedulerError::Present(e)) => self.callback.present_failed(e),
            Err(e) => warn!("Pacing thread dispatch failed: {}", e),
        }
        None
    }

    /// Records dispatch bookkeeping and invokes the present callback.
    fn dispatch(&self, frame: TrackedFrame, remaining: usize) -> Result<(), SchedulerError> {
        let timing = {
            let mut t = self.timing.lock();
            let now = Instant::now();
            let time_delta_ns = t
                .last_dispatch
                .map(|previous| now.saturating_duration_since(previous).as_nanos() as i64)
                .unwrap_or(0);
            t.last_dispatch = Some(now);
            if let Some(start) = frame.start_ns() {
                t.last_sample_time_ns = start;
            }

            PresentTiming {
                target_ns: frame.start_ns().unwrap_or(0),
                time_delta_ns,
                remaining_in_queue: remaining,
                quarter_frame_ns: t.quarter_frame_ns,
            }
        };

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.callback.present_frame(Some(frame), timing)?;
        Ok(())
    }

    /// Empties the queue. Frames are dropped after the lock is released.
    fn discard_all(&self) {
        let discarded = std::mem::take(&mut *self.frames.lock());
        if !discarded.is_empty() {
            debug!("Discarding {} queued frames", discarded.len());
            self.flushed
                .fetch_add(discarded.len() as u64, Ordering::Relaxed);
        }
    }
}

// ============================================
// PACING QUEUE
// ============================================

struct Worker {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
    thread_id: ThreadId,
}

/// FIFO of frames released by a dedicated thread at their presentation time.
pub struct PacingQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<Worker>>,
}

impl PacingQueue {
    /// Creates a stopped queue presenting through `callback`.
    pub fn new(callback: Arc<dyn PresentCallback>) -> Self {
        let default_duration = FrameRate::default().frame_duration_ns().unwrap_or(NANOS_PER_SECOND / 30);

        Self {
            shared: Arc::new(QueueShared {
                frames: Mutex::new(VecDeque::new()),
                timing: Mutex::new(TimingState {
                    clock: None,
                    rate: 1.0,
                    frame_duration_ns: default_duration,
                    quarter_frame_ns: default_duration / 4,
                    last_sample_time_ns: 0,
                    last_dispatch: None,
                    mode: TimingMode::default(),
                    drop_threshold: 0,
                    max_sleep: DEFAULT_MAX_SLEEP,
                }),
                callback,
                dispatched: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                flushed: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the pacing thread. Without a clock every frame presents immediately.
    pub fn start(&self, clock: Option<Arc<dyn PresentationClock>>) -> Result<(), SchedulerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        {
            let mut t = self.shared.timing.lock();
            t.clock = clock;
            t.last_dispatch = None;
        }

        let (commands, receiver) = channel::unbounded();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("frame-pacer".to_string())
            .spawn(move || worker::run(shared, receiver))?;

        *worker = Some(Worker {
            commands,
            thread_id: handle.thread().id(),
            handle,
        });

        debug!("Pacing queue started");
        Ok(())
    }

    /// Stops the pacing thread and discards anything still queued.
    ///
    /// Once this returns, no queued frame will reach the callback.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();

        if let Some(worker) = worker {
            let _ = worker.commands.send(Command::Terminate);

            if worker.thread_id == thread::current().id() {
                // Called from our own callback; the loop exits when it gets back to the channel
                debug!("Pacing queue stopped from the pacing thread");
            } else if worker.handle.join().is_err() {
                log::error!("Pacing thread panicked");
            }
        }

        self.shared.discard_all();
        self.shared.timing.lock().clock = None;
        debug!("Pacing queue stopped");
    }

    /// Queues `frame`, or presents it on this thread when `present_now` is
    /// set or there is no clock.
    pub fn schedule(&self, frame: TrackedFrame, present_now: bool) -> Result<(), SchedulerError> {
        let commands = match self.worker.lock().as_ref() {
            Some(worker) => worker.commands.clone(),
            None => return Err(SchedulerError::NotStarted),
        };

        let has_clock = self.shared.timing.lock().clock.is_some();
        if present_now || !has_clock {
            let remaining = self.pending_count();
            return self.shared.dispatch(frame, remaining);
        }

        trace!("Queueing frame {} for {:?}", frame.id(), frame.start_ns());
        self.shared.frames.lock().push_back(frame);
        let _ = commands.send(Command::Schedule);
        Ok(())
    }

    /// Discards every queued frame and waits until the pacing thread has
    /// let go of them.
    pub fn flush(&self) {
        let worker = self
            .worker
            .lock()
            .as_ref()
            .map(|worker| (worker.commands.clone(), worker.thread_id));

        if let Some((commands, thread_id)) = worker {
            if thread_id != thread::current().id() {
                let (ack, acked) = channel::bounded(1);
                if commands.send(Command::Flush(ack)).is_ok() && acked.recv().is_ok() {
                    return;
                }
            }
        }

        self.shared.discard_all();
    }

    /// Sets the nominal frame rate used for the presentation window.
    pub fn set_frame_rate(&self, frame_rate: FrameRate) {
        let Some(duration) = frame_rate.frame_duration_ns() else {
            warn!("Ignoring invalid frame rate {:?}", frame_rate);
            return;
        };

        let mut t = self.shared.timing.lock();
        t.frame_duration_ns = duration;
        t.quarter_frame_ns = duration / 4;
        debug!(
            "Pacing at {:.3} fps ({} ns per frame)",
            frame_rate.as_f32(),
            duration
        );
    }

    /// Playback rate multiplier. 0 means scrubbing.
    pub fn set_rate(&self, rate: f32) {
        self.shared.timing.lock().rate = rate;
    }

    pub fn rate(&self) -> f32 {
        self.shared.timing.lock().rate
    }

    pub fn set_timing_mode(&self, mode: TimingMode) {
        self.shared.timing.lock().mode = mode;
    }

    pub fn timing_mode(&self) -> TimingMode {
        self.shared.timing.lock().mode
    }

    /// Late frames beyond this many frame durations are skipped when a
    /// newer frame is waiting. 0 disables skipping.
    pub fn set_frame_drop_threshold(&self, threshold: i32) {
        self.shared.timing.lock().drop_threshold = threshold;
    }

    pub fn frame_drop_threshold(&self) -> i32 {
        self.shared.timing.lock().drop_threshold
    }

    pub fn set_max_sleep(&self, max_sleep: Duration) {
        self.shared.timing.lock().max_sleep = max_sleep;
    }

    /// Presentation time of the most recently dispatched frame.
    pub fn last_sample_time(&self) -> i64 {
        self.shared.timing.lock().last_sample_time_ns
    }

    pub fn frame_duration(&self) -> i64 {
        self.shared.timing.lock().frame_duration_ns
    }

    /// Frames waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.shared.frames.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            flushed: self.shared.flushed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PacingQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================
// TESTS
// ============================================
