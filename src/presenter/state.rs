//! Render and frame-step state.

use std::collections::VecDeque;

use crate::frame::TrackedFrame;

/// Playback state as driven by the presentation clock.
///
/// `Shutdown` is both the state before services are attached and the
/// terminal state after they are released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Started,
    Stopped,
    Paused,
    Shutdown,
}

/// Progress of a frame-step request.
///
/// Ordered: later variants are further along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameStepState {
    /// Not stepping
    None,
    /// Step requested, clock not started yet
    WaitingStart,
    /// Clock started, consuming frames toward the target
    Pending,
    /// Target frame handed to the pacing queue
    Scheduled,
    /// Target frame released by the renderer
    Complete,
}

/// Frame-step bookkeeping.
#[derive(Debug)]
pub(crate) struct FrameStep {
    pub state: FrameStepState,
    /// Steps still to take
    pub steps: u32,
    /// Frames produced while stepping but not yet consumable
    pub deferred: VecDeque<TrackedFrame>,
    /// Identity of the scheduled target frame
    pub frame_id: Option<u64>,
}

impl FrameStep {
    pub fn new() -> Self {
        Self {
            state: FrameStepState::None,
            steps: 0,
            deferred: VecDeque::new(),
            frame_id: None,
        }
    }

    /// True between the request and completion.
    pub fn in_progress(&self) -> bool {
        self.state > FrameStepState::None && self.state < FrameStepState::Complete
    }
}
