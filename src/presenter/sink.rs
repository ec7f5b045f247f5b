//! Late-frame policy and the present callback wired into the pacing queue.
//!
//! ## Plain English
//!
//! The pacing queue reports how long it has been since the previous frame
//! went out. We keep a running average of that gap. When the average
//! suddenly shrinks by more than a quarter frame, frames are bunching up
//! after a stall, and the incoming one is treated as too late: the screen
//! keeps the previous picture instead.

use std::sync::{Arc, Weak};

use log::{trace, warn};
use parking_lot::Mutex;

use crate::backend::{BackendError, PresentRequest, RenderBackend};
use crate::frame::TrackedFrame;
use crate::scheduler::{PresentCallback, PresentTiming};

/// Verdict of the drop policy for one presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    OnTime,
    TooLate,
}

/// Running-average late-frame detector.
#[derive(Clone, Debug, Default)]
pub struct DropPolicy {
    avg_time_delta_ns: i64,
    frames_dropped: u64,
    frames_good: u64,
}

impl DropPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `time_delta_ns` into the average and judges the frame.
    ///
    /// Too late iff a frame is present and the average dropped by more
    /// than `quarter_frame_ns`.
    pub fn evaluate(&mut self, has_frame: bool, time_delta_ns: i64, quarter_frame_ns: i64) -> Verdict {
        let previous = self.avg_time_delta_ns;
        self.avg_time_delta_ns = if previous == 0 {
            time_delta_ns
        } else {
            (previous + time_delta_ns) / 2
        };

        if has_frame && previous > self.avg_time_delta_ns && previous - self.avg_time_delta_ns > quarter_frame_ns {
            self.frames_dropped += 1;
            Verdict::TooLate
        } else {
            self.frames_good += 1;
            Verdict::OnTime
        }
    }

    pub fn average_time_delta_ns(&self) -> i64 {
        self.avg_time_delta_ns
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn frames_good(&self) -> u64 {
        self.frames_good
    }
}

/// Told about present failures nobody else will see.
pub(crate) trait FaultHook: Send + Sync {
    fn on_fault(&self, error: BackendError);
}

struct SinkState {
    policy: DropPolicy,
    /// The backend holds an image it can repaint
    has_last_image: bool,
}

/// Applies the drop policy and hands the result to the backend.
pub(crate) struct PresentSink {
    backend: Arc<dyn RenderBackend>,
    state: Mutex<SinkState>,
    faults: Option<Weak<dyn FaultHook>>,
}

impl PresentSink {
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(SinkState {
                policy: DropPolicy::new(),
                has_last_image: false,
            }),
            faults: None,
        }
    }

    /// Routes failures from the pacing thread to `hook`.
    pub fn with_fault_hook(mut self, hook: Weak<dyn FaultHook>) -> Self {
        self.faults = Some(hook);
        self
    }

    /// (good, dropped) frame counters.
    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.policy.frames_good(), state.policy.frames_dropped())
    }
}

impl PresentCallback for PresentSink {
    fn present_frame(&self, frame: Option<TrackedFrame>, timing: PresentTiming) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let verdict = state
            .policy
            .evaluate(frame.is_some(), timing.time_delta_ns, timing.quarter_frame_ns);

        let request = match (&frame, verdict) {
            (None, _) => PresentRequest::Blank,
            (Some(late), Verdict::TooLate) if state.has_last_image => {
                trace!("Frame {} too late, repainting previous image", late.id());
                PresentRequest::RepaintLast
            }
            (Some(next), _) => PresentRequest::Frame(next),
        };
        let shows_image = !matches!(request, PresentRequest::Blank);

        match self.backend.present(request, timing.target_ns) {
            Ok(()) => {
                state.has_last_image = shows_image;
                Ok(())
            }
            Err(BackendError::DeviceLost) => {
                // The next delivery's health check resets the device
                warn!("Display device lost during present");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn present_failed(&self, error: BackendError) {
        match self.faults.as_ref().and_then(Weak::upgrade) {
            Some(hook) => hook.on_fault(error),
            None => warn!("Present from pacing thread failed: {}", error),
        }
    }
}
