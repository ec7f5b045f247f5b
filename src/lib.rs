//! # Frame Pacer
//!
//! A video presentation core: it pulls decoded frames from an upstream
//! source, holds each one until its presentation time on a shared clock,
//! and hands it to a rendering backend, recycling a small fixed set of
//! frame buffers as it goes.
//!
//! ## Architecture Overview
//!
//! The crate is structured into independent modules:
//!
//! - `presenter`: The controller state machine (clock states, frame step, format)
//! - `scheduler`: The pacing queue and its timing thread
//! - `buffer`: Fixed-capacity frame buffer pool
//! - `frame`: Frame types and the release-notifying `TrackedFrame`
//! - `clock`: Presentation clock trait and implementations
//! - `source`: Frame source trait and video formats
//! - `backend`: Rendering backend trait
//! - `config`: Presenter configuration
//! - `error`: Error types
//!
//! ## Data Flow
//!
//! ```text
//! FrameSource ──► Presenter ──► PacingQueue ──► RenderBackend
//!                    ▲                               │
//!                    └──── buffer released ◄─────────┘
//! ```

// ============================================
// MODULE DECLARATIONS
// ============================================

pub mod backend;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod presenter;
pub mod scheduler;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

// ============================================
// RE-EXPORTS
// ============================================

pub use backend::{BackendError, DeviceHealth, PresentRequest, RenderBackend};
pub use clock::{ClockReading, ManualClock, PresentationClock, SystemClock};
pub use config::PresenterConfig;
pub use error::{ErrorCategory, PresenterError, PresenterResult};
pub use frame::{Frame, FrameBuffer, TrackedFrame};
pub use presenter::{
    FrameStepState, HostEvent, Presenter, PresenterMessage, PresenterStats, RateDirection, RenderState,
};
pub use scheduler::{PacingQueue, PresentCallback, PresentTiming, TimingMode};
pub use source::{FrameRate, FrameSource, PixelFormat, PullOutcome, VideoFormat};

// ============================================
// LOGGING
// ============================================

/// Initialize logging. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::testing::{wait_until, MockBackend, ScriptedSource};

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }

    #[test]
    fn test_plays_against_system_clock() {
        init_logging();
        let backend = Arc::new(MockBackend::new());
        let (presenter, events) = Presenter::new(backend.clone(), PresenterConfig::default()).unwrap();
        let (source, script) = ScriptedSource::new();
        let clock = Arc::new(SystemClock::new());

        presenter.init_services(Box::new(source), Some(clock.clone())).unwrap();
        presenter.begin_streaming().unwrap();
        clock.start(Some(0));
        presenter.on_clock_start(Some(0)).unwrap();

        script.push_frames(5, 0);
        presenter.input_available().unwrap();
        presenter.end_of_stream().unwrap();

        // Five frames at 25 fps take about 160ms
        assert!(wait_until(Duration::from_secs(3), || {
            events.try_iter().any(|e| e == HostEvent::EndOfStream)
        }));
        assert_eq!(backend.presented().len(), 5);
        let stats = presenter.stats();
        assert_eq!(stats.frames_presented + stats.frames_dropped, 5);
        assert_eq!(stats.frames_checked_out, 0);

        presenter.end_streaming().unwrap();
        presenter.release_services();
        assert_eq!(presenter.render_state(), RenderState::Shutdown);
    }
}
