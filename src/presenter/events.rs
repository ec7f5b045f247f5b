//! Messages into and events out of the presenter.

/// Notifications sent to the host on the event channel.
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    /// A frame step finished, or was cancelled before finishing
    StepComplete { cancelled: bool },
    /// Stream time of the frame shown by a completed step while scrubbing
    ScrubTime(i64),
    /// All input consumed and every frame released
    EndOfStream,
    /// Playback cannot continue
    ErrorAbort(String),
    /// The display device was reset
    DisplayChanged,
    /// Nanoseconds the source took to fill a frame
    ProcessingLatency(i64),
}

/// Host pipeline messages, dispatched by [`Presenter::process_message`](super::Presenter::process_message).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenterMessage {
    /// Drop everything queued
    Flush,
    /// Renegotiate the output format
    InvalidateFormat,
    /// The source has new input
    InputAvailable,
    BeginStreaming,
    EndStreaming,
    /// No more input will arrive
    EndOfStream,
    /// Advance this many frames
    Step(u32),
    CancelStep,
}

/// Playback direction for rate queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDirection {
    Forward,
    Reverse,
}
