//! Test doubles shared by the module tests.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::{BackendError, DeviceHealth, PresentRequest, RenderBackend};
use crate::frame::{DesiredTime, Frame, FrameBuffer, ReleaseHook, TrackedFrame};
use crate::scheduler::{PresentCallback, PresentTiming};
use crate::source::{FrameRate, FrameSource, PixelFormat, PullOutcome, VideoFormat};

/// Duration stamped on frames made by the helpers.
pub const FRAME_NS: i64 = 40_000_000;

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// 4x4 RGB32 at 25 fps.
pub fn test_format() -> VideoFormat {
    VideoFormat::new(4, 4, PixelFormat::Rgb32).with_frame_rate(FrameRate::new(25, 1))
}

// ============================================
// RELEASE COUNTER
// ============================================

/// Release hook that only counts.
#[derive(Default)]
pub struct ReleaseCounter {
    released: Mutex<Vec<u64>>,
}

impl ReleaseCounter {
    /// A tracked frame reporting back to this counter.
    pub fn frame(self: &Arc<Self>, id: u64, start_ns: Option<i64>) -> TrackedFrame {
        let mut frame = Frame::from_buffer(
            id,
            0,
            FrameBuffer {
                width: 1,
                height: 1,
                data: vec![0; 4],
            },
        );
        if let Some(start) = start_ns {
            frame.set_timing(start, FRAME_NS);
        }

        let hook: Weak<dyn ReleaseHook> = Arc::downgrade(self) as Weak<dyn ReleaseHook>;
        TrackedFrame::new(frame, hook)
    }

    pub fn count(&self) -> usize {
        self.released.lock().len()
    }
}

impl ReleaseHook for ReleaseCounter {
    fn on_release(&self, frame: Frame) {
        self.released.lock().push(frame.id());
    }
}

// ============================================
// RECORDING CALLBACK
// ============================================

#[derive(Default)]
struct Recorded {
    ids: Vec<u64>,
    timings: Vec<PresentTiming>,
    first_at: Option<Instant>,
}

/// Present callback that records what it was handed.
#[derive(Default)]
pub struct RecordingCallback {
    recorded: Mutex<Recorded>,
}

impl RecordingCallback {
    pub fn presented_ids(&self) -> Vec<u64> {
        self.recorded.lock().ids.clone()
    }

    pub fn timings(&self) -> Vec<PresentTiming> {
        self.recorded.lock().timings.clone()
    }

    pub fn first_present_at(&self) -> Option<Instant> {
        self.recorded.lock().first_at
    }
}

impl PresentCallback for RecordingCallback {
    fn present_frame(&self, frame: Option<TrackedFrame>, timing: PresentTiming) -> Result<(), BackendError> {
        let mut recorded = self.recorded.lock();
        recorded.first_at.get_or_insert_with(Instant::now);
        if let Some(frame) = &frame {
            recorded.ids.push(frame.id());
        }
        recorded.timings.push(timing);
        Ok(())
    }
}

// ============================================
// MOCK BACKEND
// ============================================

/// What the mock backend put on screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presented {
    Frame { id: u64, target_ns: i64 },
    Repaint,
    Blank,
}

struct BackendState {
    presented: Vec<Presented>,
    fail_next: Option<BackendError>,
    fail_allocation: bool,
    health: DeviceHealth,
    resets: usize,
    releases: usize,
    refresh_hz: u32,
    unsupported: Vec<VideoFormat>,
}

/// Backend that records presents and allocates plain memory buffers.
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                presented: Vec::new(),
                fail_next: None,
                fail_allocation: false,
                health: DeviceHealth::Ok,
                resets: 0,
                releases: 0,
                refresh_hz: 60,
                unsupported: Vec::new(),
            }),
        }
    }

    pub fn presented(&self) -> Vec<Presented> {
        self.state.lock().presented.clone()
    }

    /// Ids of presented frames, in order.
    pub fn presented_ids(&self) -> Vec<u64> {
        self.presented()
            .into_iter()
            .filter_map(|p| match p {
                Presented::Frame { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_present(&self, error: BackendError) {
        self.state.lock().fail_next = Some(error);
    }

    pub fn fail_allocation(&self) {
        self.state.lock().fail_allocation = true;
    }

    pub fn set_health(&self, health: DeviceHealth) {
        self.state.lock().health = health;
    }

    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn resource_releases(&self) -> usize {
        self.state.lock().releases
    }

    pub fn set_refresh_rate(&self, hz: u32) {
        self.state.lock().refresh_hz = hz;
    }

    pub fn reject_format(&self, format: VideoFormat) {
        self.state.lock().unsupported.push(format);
    }
}

impl RenderBackend for MockBackend {
    fn present(&self, request: PresentRequest<'_>, target_ns: i64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }

        let presented = match request {
            PresentRequest::Frame(frame) => Presented::Frame {
                id: frame.id(),
                target_ns,
            },
            PresentRequest::RepaintLast => Presented::Repaint,
            PresentRequest::Blank => Presented::Blank,
        };
        state.presented.push(presented);
        Ok(())
    }

    fn check_health(&self) -> DeviceHealth {
        self.state.lock().health
    }

    fn reset_device(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.resets += 1;
        state.health = DeviceHealth::Ok;
        Ok(())
    }

    fn create_frames(&self, format: &VideoFormat, count: usize) -> Result<Vec<FrameBuffer>, BackendError> {
        if self.state.lock().fail_allocation {
            return Err(BackendError::Allocation("out of video memory".to_string()));
        }
        Ok((0..count).map(|_| FrameBuffer::for_format(format)).collect())
    }

    fn release_resources(&self) {
        self.state.lock().releases += 1;
    }

    fn supports_format(&self, format: &VideoFormat) -> bool {
        !self.state.lock().unsupported.contains(format)
    }

    fn refresh_rate_hz(&self) -> u32 {
        self.state.lock().refresh_hz
    }

    fn display_width(&self) -> u32 {
        1920
    }

    fn display_height(&self) -> u32 {
        1080
    }
}

// ============================================
// SCRIPTED SOURCE
// ============================================

enum Step {
    Frame { start_ns: i64 },
    Outcome(PullOutcome),
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    formats: Vec<VideoFormat>,
    refused: Vec<VideoFormat>,
    negotiated: Option<VideoFormat>,
    pulls: usize,
    repaints: Vec<DesiredTime>,
}

/// Test handle onto a [`ScriptedSource`]'s script.
#[derive(Clone, Default)]
pub struct SourceHandle {
    script: Arc<Mutex<Script>>,
}

impl SourceHandle {
    /// Queues `count` frames at `FRAME_NS` intervals from `first_start_ns`.
    pub fn push_frames(&self, count: usize, first_start_ns: i64) {
        let mut script = self.script.lock();
        for i in 0..count {
            script.steps.push_back(Step::Frame {
                start_ns: first_start_ns + i as i64 * FRAME_NS,
            });
        }
    }

    pub fn push_outcome(&self, outcome: PullOutcome) {
        self.script.lock().steps.push_back(Step::Outcome(outcome));
    }

    pub fn set_formats(&self, formats: Vec<VideoFormat>) {
        self.script.lock().formats = formats;
    }

    pub fn refuse_format(&self, format: VideoFormat) {
        self.script.lock().refused.push(format);
    }

    pub fn negotiated(&self) -> Option<VideoFormat> {
        self.script.lock().negotiated.clone()
    }

    pub fn pulls(&self) -> usize {
        self.script.lock().pulls
    }

    /// Desired times of repaint pulls.
    pub fn repaints(&self) -> Vec<DesiredTime> {
        self.script.lock().repaints.clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().steps.len()
    }
}

/// Frame source that plays back a script of frames and outcomes.
pub struct ScriptedSource {
    handle: SourceHandle,
}

impl ScriptedSource {
    /// A source offering [`test_format`].
    pub fn new() -> (Self, SourceHandle) {
        let handle = SourceHandle::default();
        handle.set_formats(vec![test_format()]);
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl FrameSource for ScriptedSource {
    fn pull_output(&mut self, frame: &mut Frame) -> PullOutcome {
        let mut script = self.handle.script.lock();
        script.pulls += 1;

        if let Some(desired) = frame.desired_time() {
            script.repaints.push(desired);
            frame.set_timing(desired.start_ns, desired.duration_ns);
            return PullOutcome::Filled;
        }

        match script.steps.pop_front() {
            Some(Step::Frame { start_ns }) => {
                frame.set_timing(start_ns, FRAME_NS);
                frame.data_mut().fill(0x80);
                PullOutcome::Filled
            }
            Some(Step::Outcome(outcome)) => outcome,
            None => PullOutcome::NeedMoreInput,
        }
    }

    fn available_formats(&mut self) -> Vec<VideoFormat> {
        self.handle.script.lock().formats.clone()
    }

    fn negotiate_format(&mut self, candidate: &VideoFormat) -> bool {
        let mut script = self.handle.script.lock();
        if script.refused.contains(candidate) {
            return false;
        }
        script.negotiated = Some(candidate.clone());
        true
    }
}
