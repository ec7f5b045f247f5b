//! # Presenter Module
//!
//! The presentation controller: a state machine driven by the host's clock
//! notifications that pulls frames from the source, paces them through the
//! [`PacingQueue`], and recycles buffers when the renderer lets go of them.
//!
//! ## Plain English Explanation
//!
//! ```text
//!  host ──input available──► Presenter ──get buffer──► FrameBufferPool
//!                               │  ▲                         ▲
//!                        fill   │  │ release notification    │
//!                               ▼  │                         │
//!                          FrameSource     PacingQueue ──► PresentSink ──► RenderBackend
//! ```
//!
//! 1. The host says "the source has input". We take a free buffer and
//!    ask the source to fill it.
//! 2. The filled frame goes to the pacing queue, which shows it on time.
//! 3. When the frame is dropped after presenting, it comes back to us on
//!    the release channel, goes back into the pool, and we pull again.
//!
//! ## Locking
//!
//! One mutex guards everything the pull loop touches (render state, frame
//! step, format, pool). A second one guards runtime settings. Release
//! notifications can arrive on any thread, including one that already holds
//! the state lock, so they are posted to a channel and drained by whoever
//! holds the lock next. Every lock holder drains before unlocking and checks
//! the channel again after unlocking, so nothing is left behind. Present
//! failures on the pacing thread travel the same way on a fault channel.

mod events;
mod output;
mod sink;
mod state;

pub use events::{HostEvent, PresenterMessage, RateDirection};
pub use sink::{DropPolicy, Verdict};
pub use state::{FrameStepState, RenderState};

use std::sync::{Arc, Weak};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info};
use parking_lot::Mutex;

use crate::backend::{BackendError, RenderBackend};
use crate::buffer::FrameBufferPool;
use crate::clock::PresentationClock;
use crate::config::PresenterConfig;
use crate::error::{PresenterError, PresenterResult};
use crate::frame::{Frame, ReleaseHook};
use crate::scheduler::{PacingQueue, TimingMode};
use crate::source::{FrameSource, VideoFormat};
use sink::{FaultHook, PresentSink};
use state::FrameStep;

// ============================================
// STATS & SETTINGS
// ============================================

/// Snapshot of presenter counters.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenterStats {
    /// Frames the drop policy let through
    pub frames_presented: u64,
    /// Frames replaced by a repaint for being too late
    pub frames_dropped: u64,
    /// Late frames the pacing queue skipped
    pub frames_skipped: u64,
    /// Buffers currently out of the pool
    pub frames_checked_out: usize,
    /// Frames waiting in the pacing queue
    pub frames_queued: usize,
    pub render_state: RenderState,
    pub frame_step_state: FrameStepState,
}

/// Settings that may change during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterSettings {
    pub frame_drop_threshold: i32,
    pub timing_mode: TimingMode,
}

// ============================================
// SHARED STATE
// ============================================

/// Everything guarded by the main state lock.
struct PresenterState {
    render_state: RenderState,
    /// Services were released; shutdown is final
    services_released: bool,
    /// A fatal error was reported; new work is refused
    faulted: bool,
    frame_step: FrameStep,
    rate: f32,
    pool: FrameBufferPool,
    format: Option<VideoFormat>,
    source: Option<Box<dyn FrameSource>>,
    clock: Option<Arc<dyn PresentationClock>>,
    /// The source signaled input and has not yet asked for more
    sample_notify: bool,
    repaint: bool,
    prerolled: bool,
    /// End of stream was signaled and not yet reported
    end_streaming: bool,
}

impl PresenterState {
    fn is_active(&self) -> bool {
        matches!(self.render_state, RenderState::Started | RenderState::Paused)
    }

    fn is_scrubbing(&self) -> bool {
        self.rate == 0.0
    }
}

struct Shared {
    state: Mutex<PresenterState>,
    settings: Mutex<PresenterSettings>,
    release_tx: Sender<Frame>,
    releases: Receiver<Frame>,
    fault_tx: Sender<BackendError>,
    faults: Receiver<BackendError>,
    events: Sender<HostEvent>,
    scheduler: PacingQueue,
    sink: Arc<PresentSink>,
    backend: Arc<dyn RenderBackend>,
    config: PresenterConfig,
    self_ref: Weak<Shared>,
}

impl Shared {
    /// Runs `op` under the state lock, then processes pending releases.
    fn with_state<R>(&self, op: impl FnOnce(&Self, &mut PresenterState) -> R) -> R {
        let result = {
            let mut st = self.state.lock();
            let result = op(self, &mut st);
            self.drain_releases(&mut st);
            result
        };
        self.pump_releases();
        result
    }

    /// Drains the release channel if the state lock is free. Never blocks.
    fn pump_releases(&self) {
        while !self.releases.is_empty() || !self.faults.is_empty() {
            let Some(mut st) = self.state.try_lock() else {
                // The holder drains before it unlocks
                return;
            };
            self.drain_releases(&mut st);
        }
    }

    fn drain_releases(&self, st: &mut PresenterState) {
        while let Ok(error) = self.faults.try_recv() {
            self.report_error(st, &PresenterError::Backend(error));
        }
        while let Ok(frame) = self.releases.try_recv() {
            self.on_frame_released(st, frame);
        }
    }

    fn release_hook(&self) -> Weak<dyn ReleaseHook> {
        let hook: Weak<dyn ReleaseHook> = self.self_ref.clone();
        hook
    }

    fn notify(&self, event: HostEvent) {
        debug!("Host event: {:?}", event);
        // The host may have dropped its receiver
        let _ = self.events.send(event);
    }

    fn check_shutdown(&self, st: &PresenterState) -> PresenterResult<()> {
        if st.render_state == RenderState::Shutdown || st.faulted {
            return Err(PresenterError::Shutdown);
        }
        Ok(())
    }
}

impl ReleaseHook for Shared {
    fn on_release(&self, frame: Frame) {
        if self.release_tx.send(frame).is_ok() {
            self.pump_releases();
        }
    }
}

impl FaultHook for Shared {
    fn on_fault(&self, error: BackendError) {
        if self.fault_tx.send(error).is_ok() {
            self.pump_releases();
        }
    }
}

// ============================================
// PRESENTER
// ============================================

/// The presentation controller.
///
/// ## Lifecycle
///
/// ```text
/// new() ─► init_services() ─► begin_streaming() ─► on_clock_start() ...
///                                                        │
///           release_services() ◄─ end_streaming() ◄──────┘
/// ```
///
/// All methods take `&self`; the presenter can be shared across the
/// host's threads.
pub struct Presenter {
    shared: Arc<Shared>,
}

impl Presenter {
    /// Creates a presenter rendering through `backend`.
    ///
    /// Returns the presenter and the receiving end of its host event channel.
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        config: PresenterConfig,
    ) -> PresenterResult<(Self, Receiver<HostEvent>)> {
        if let Some(error) = config.validate().into_iter().next() {
            return Err(PresenterError::Config(error));
        }

        let (events, host_events) = channel::unbounded();
        let (release_tx, releases) = channel::unbounded();
        let (fault_tx, faults) = channel::unbounded();

        info!(
            "Creating presenter: {} buffers, default {}/{} fps, {:?} timing",
            config.buffer_count,
            config.default_frame_rate.numerator,
            config.default_frame_rate.denominator,
            config.timing_mode
        );

        let shared = Arc::new_cyclic(|self_ref: &Weak<Shared>| {
            let fault_hook: Weak<dyn FaultHook> = self_ref.clone();
            let sink = Arc::new(PresentSink::new(Arc::clone(&backend)).with_fault_hook(fault_hook));
            let scheduler = PacingQueue::new(sink.clone());
            scheduler.set_frame_rate(config.default_frame_rate);
            scheduler.set_rate(config.initial_rate);
            scheduler.set_frame_drop_threshold(config.frame_drop_threshold);
            scheduler.set_timing_mode(config.timing_mode);
            scheduler.set_max_sleep(config.max_sleep());

            Shared {
                state: Mutex::new(PresenterState {
                    render_state: RenderState::Shutdown,
                    services_released: false,
                    faulted: false,
                    frame_step: FrameStep::new(),
                    rate: config.initial_rate,
                    pool: FrameBufferPool::new(),
                    format: None,
                    source: None,
                    clock: None,
                    sample_notify: false,
                    repaint: false,
                    prerolled: false,
                    end_streaming: false,
                }),
                settings: Mutex::new(PresenterSettings {
                    frame_drop_threshold: config.frame_drop_threshold,
                    timing_mode: config.timing_mode,
                }),
                release_tx,
                releases,
                fault_tx,
                faults,
                events,
                scheduler,
                sink,
                backend,
                config,
                self_ref: self_ref.clone(),
            }
        });

        Ok((Self { shared }, host_events))
    }

    // ----------------------------------------
    // SERVICES
    // ----------------------------------------

    /// Attaches the frame source and (optionally) the presentation clock.
    ///
    /// Moves the presenter to `Stopped`. Not allowed while playing or paused.
    pub fn init_services(
        &self,
        source: Box<dyn FrameSource>,
        clock: Option<Arc<dyn PresentationClock>>,
    ) -> PresenterResult<()> {
        self.shared.with_state(|_, st| {
            if st.services_released {
                return Err(PresenterError::Shutdown);
            }
            if st.is_active() {
                return Err(PresenterError::InvalidRequest("cannot attach services while playing"));
            }

            st.source = Some(source);
            st.clock = clock;
            st.render_state = RenderState::Stopped;
            info!("Presenter services attached");
            Ok(())
        })
    }

    /// Shuts the presenter down for good. Safe to call more than once.
    pub fn release_services(&self) {
        self.shared.with_state(|shared, st| {
            if st.services_released {
                return;
            }
            st.render_state = RenderState::Shutdown;
            st.services_released = true;

            shared.flush(st);
            shared.release_format(st);
            shared.scheduler.stop();
            st.source = None;
            st.clock = None;
            info!("Presenter shut down");
        })
    }

    // ----------------------------------------
    // HOST MESSAGES
    // ----------------------------------------

    /// Dispatches a host pipeline message.
    pub fn process_message(&self, message: PresenterMessage) -> PresenterResult<()> {
        trace_message(message);
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;

            match message {
                PresenterMessage::Flush => {
                    shared.flush(st);
                    Ok(())
                }
                PresenterMessage::InvalidateFormat => shared.renegotiate_format(st),
                PresenterMessage::InputAvailable => shared.input_available(st),
                PresenterMessage::BeginStreaming => shared.begin_streaming(st),
                PresenterMessage::EndStreaming => {
                    shared.scheduler.stop();
                    Ok(())
                }
                PresenterMessage::EndOfStream => {
                    st.end_streaming = true;
                    shared.check_end_of_stream(st);
                    Ok(())
                }
                PresenterMessage::Step(count) => {
                    let result = shared.prepare_frame_step(st, count);
                    shared.reported(st, result)
                }
                PresenterMessage::CancelStep => {
                    shared.cancel_frame_step(st);
                    Ok(())
                }
            }
        })
    }

    pub fn flush(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::Flush)
    }

    pub fn invalidate_format(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::InvalidateFormat)
    }

    /// The source has new input: pull until it runs dry or buffers run out.
    pub fn input_available(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::InputAvailable)
    }

    /// Starts the pacing thread.
    pub fn begin_streaming(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::BeginStreaming)
    }

    /// Stops the pacing thread.
    pub fn end_streaming(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::EndStreaming)
    }

    pub fn end_of_stream(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::EndOfStream)
    }

    /// Requests `count` frame steps.
    pub fn step(&self, count: u32) -> PresenterResult<()> {
        self.process_message(PresenterMessage::Step(count))
    }

    pub fn cancel_step(&self) -> PresenterResult<()> {
        self.process_message(PresenterMessage::CancelStep)
    }

    // ----------------------------------------
    // CLOCK NOTIFICATIONS
    // ----------------------------------------

    /// The clock started. `offset_ns` is `Some` for a start from an explicit
    /// position, which acts as a seek when already playing.
    pub fn on_clock_start(&self, offset_ns: Option<i64>) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;

            let was_active = st.is_active();
            st.render_state = RenderState::Started;
            debug!("Clock started (offset {:?})", offset_ns);

            if was_active && offset_ns.is_some() {
                shared.flush(st);
            }
            let result = shared.start_frame_step(st);
            shared.reported(st, result)?;
            shared.process_output_loop(st);
            Ok(())
        })
    }

    /// The clock resumed from pause.
    pub fn on_clock_restart(&self) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            if st.render_state != RenderState::Paused {
                return Err(PresenterError::InvalidRequest("clock restart requires the paused state"));
            }

            st.render_state = RenderState::Started;
            debug!("Clock restarted");
            let result = shared.start_frame_step(st);
            shared.reported(st, result)?;
            shared.process_output_loop(st);
            Ok(())
        })
    }

    pub fn on_clock_stop(&self) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            if st.render_state == RenderState::Stopped {
                return Ok(());
            }

            st.render_state = RenderState::Stopped;
            debug!("Clock stopped");
            shared.flush(st);
            if st.frame_step.state != FrameStepState::None {
                shared.cancel_frame_step(st);
            }
            Ok(())
        })
    }

    pub fn on_clock_pause(&self) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            st.render_state = RenderState::Paused;
            debug!("Clock paused");
            Ok(())
        })
    }

    /// The clock rate changed. Leaving scrubbing (rate 0) cancels any step.
    pub fn on_clock_set_rate(&self, rate: f32) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;

            if st.rate == 0.0 && rate != 0.0 {
                shared.cancel_frame_step(st);
                st.frame_step.deferred.clear();
            }

            st.rate = rate;
            shared.scheduler.set_rate(rate);
            debug!("Clock rate set to {}", rate);
            Ok(())
        })
    }

    // ----------------------------------------
    // FORMAT & REPAINT
    // ----------------------------------------

    /// The negotiated output format.
    pub fn current_format(&self) -> PresenterResult<VideoFormat> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            st.format.clone().ok_or(PresenterError::FormatNotSet)
        })
    }

    /// Sets the output format directly. `None` releases all format resources.
    pub fn set_format(&self, format: Option<VideoFormat>) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| match format {
            Some(format) => shared.set_format(st, format),
            None => {
                shared.release_format(st);
                Ok(())
            }
        })
    }

    /// Re-presents the current picture immediately.
    pub fn repaint(&self) -> PresenterResult<()> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            if st.prerolled {
                st.repaint = true;
                let result = shared.process_output(st);
                shared.reported(st, result)?;
            }
            Ok(())
        })
    }

    // ----------------------------------------
    // RATE SUPPORT
    // ----------------------------------------

    /// Slowest supported rate: scrubbing.
    pub fn slowest_rate(&self, _direction: RateDirection, _thin: bool) -> PresenterResult<f32> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            Ok(0.0)
        })
    }

    /// Fastest rate the display can keep up with.
    pub fn fastest_rate(&self, direction: RateDirection, thin: bool) -> PresenterResult<f32> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            let max = shared.max_rate(st, thin);
            Ok(match direction {
                RateDirection::Forward => max,
                RateDirection::Reverse => -max,
            })
        })
    }

    /// Returns `rate` if supported, otherwise `UnsupportedRate` with the
    /// nearest supported rate.
    pub fn is_rate_supported(&self, thin: bool, rate: f32) -> PresenterResult<f32> {
        self.shared.with_state(|shared, st| {
            shared.check_shutdown(st)?;
            let max = shared.max_rate(st, thin);
            if rate.abs() > max {
                return Err(PresenterError::UnsupportedRate {
                    requested: rate,
                    nearest: max.copysign(rate),
                });
            }
            Ok(rate)
        })
    }

    // ----------------------------------------
    // SETTINGS
    // ----------------------------------------

    pub fn set_frame_drop_threshold(&self, threshold: i32) {
        let mut settings = self.shared.settings.lock();
        settings.frame_drop_threshold = threshold;
        self.shared.scheduler.set_frame_drop_threshold(threshold);
    }

    pub fn frame_drop_threshold(&self) -> i32 {
        self.shared.settings.lock().frame_drop_threshold
    }

    pub fn set_timing_mode(&self, mode: TimingMode) {
        let mut settings = self.shared.settings.lock();
        settings.timing_mode = mode;
        self.shared.scheduler.set_timing_mode(mode);
    }

    pub fn timing_mode(&self) -> TimingMode {
        self.shared.settings.lock().timing_mode
    }

    pub fn settings(&self) -> PresenterSettings {
        *self.shared.settings.lock()
    }

    // ----------------------------------------
    // INTROSPECTION
    // ----------------------------------------

    pub fn render_state(&self) -> RenderState {
        self.shared.with_state(|_, st| st.render_state)
    }

    pub fn frame_step_state(&self) -> FrameStepState {
        self.shared.with_state(|_, st| st.frame_step.state)
    }

    pub fn config(&self) -> &PresenterConfig {
        &self.shared.config
    }

    /// Returns a snapshot of the presenter's counters.
    pub fn stats(&self) -> PresenterStats {
        let (frames_presented, frames_dropped) = self.shared.sink.counters();
        let scheduler = self.shared.scheduler.stats();

        self.shared.with_state(|shared, st| PresenterStats {
            frames_presented,
            frames_dropped,
            frames_skipped: scheduler.skipped,
            frames_checked_out: st.pool.checked_out_count(),
            frames_queued: shared.scheduler.pending_count(),
            render_state: st.render_state,
            frame_step_state: st.frame_step.state,
        })
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.release_services();
    }
}

fn trace_message(message: PresenterMessage) {
    match message {
        // Arrives once per frame
        PresenterMessage::InputAvailable => log::trace!("Message: {:?}", message),
        _ => debug!("Message: {:?}", message),
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::{BackendError, DeviceHealth};
    use crate::clock::ManualClock;
    use crate::config::ConfigError;
    use crate::frame::DesiredTime;
    use crate::source::{FrameRate, PixelFormat, PullOutcome};
    use crate::testing::{
        test_format, wait_until, MockBackend, Presented, ScriptedSource, SourceHandle, FRAME_NS,
    };

    const SECOND: i64 = 1_000_000_000;
    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Fixture {
        presenter: Presenter,
        events: Receiver<HostEvent>,
        backend: Arc<MockBackend>,
        source: SourceHandle,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        /// Host events so far, without latency reports.
        fn events(&self) -> Vec<HostEvent> {
            self.events
                .try_iter()
                .filter(|e| !matches!(e, HostEvent::ProcessingLatency(_)))
                .collect()
        }

        fn play(&self) {
            self.presenter.begin_streaming().unwrap();
            self.presenter.on_clock_start(None).unwrap();
        }
    }

    fn config() -> PresenterConfig {
        PresenterConfig {
            max_sleep_ms: 2,
            ..PresenterConfig::default()
        }
    }

    /// A presenter with services attached, stopped, clock at 0.
    fn fixture() -> Fixture {
        let backend = Arc::new(MockBackend::new());
        let (presenter, events) = Presenter::new(backend.clone(), config()).unwrap();
        let (source, handle) = ScriptedSource::new();
        let clock = Arc::new(ManualClock::new(0));
        presenter
            .init_services(Box::new(source), Some(clock.clone()))
            .unwrap();

        Fixture {
            presenter,
            events,
            backend,
            source: handle,
            clock,
        }
    }

    // ----------------------------------------
    // LIFECYCLE
    // ----------------------------------------

    #[test]
    fn test_initial_state_is_shutdown() {
        let backend = Arc::new(MockBackend::new());
        let (presenter, _events) = Presenter::new(backend, config()).unwrap();

        assert_eq!(presenter.render_state(), RenderState::Shutdown);
        assert!(matches!(presenter.input_available(), Err(PresenterError::Shutdown)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let backend = Arc::new(MockBackend::new());
        let config = PresenterConfig {
            buffer_count: 0,
            ..PresenterConfig::default()
        };

        let result = Presenter::new(backend, config);
        assert!(matches!(
            result,
            Err(PresenterError::Config(ConfigError::BufferCountOutOfRange(0)))
        ));
    }

    #[test]
    fn test_shutdown_is_final() {
        let f = fixture();
        assert_eq!(f.presenter.render_state(), RenderState::Stopped);

        f.presenter.release_services();
        f.presenter.release_services();
        assert_eq!(f.presenter.render_state(), RenderState::Shutdown);

        let (source, _) = ScriptedSource::new();
        assert!(matches!(
            f.presenter.init_services(Box::new(source), None),
            Err(PresenterError::Shutdown)
        ));
        assert!(matches!(f.presenter.on_clock_start(None), Err(PresenterError::Shutdown)));
    }

    #[test]
    fn test_init_rejected_while_playing() {
        let f = fixture();
        f.play();
        assert_eq!(f.presenter.render_state(), RenderState::Started);

        let (source, _) = ScriptedSource::new();
        assert!(matches!(
            f.presenter.init_services(Box::new(source), None),
            Err(PresenterError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_clock_transitions() {
        let f = fixture();

        assert!(matches!(
            f.presenter.on_clock_restart(),
            Err(PresenterError::InvalidRequest(_))
        ));

        f.play();
        f.presenter.on_clock_pause().unwrap();
        assert_eq!(f.presenter.render_state(), RenderState::Paused);

        f.presenter.on_clock_restart().unwrap();
        assert_eq!(f.presenter.render_state(), RenderState::Started);

        f.presenter.on_clock_stop().unwrap();
        f.presenter.on_clock_stop().unwrap();
        assert_eq!(f.presenter.render_state(), RenderState::Stopped);
    }

    // ----------------------------------------
    // FORMAT & PREROLL
    // ----------------------------------------

    #[test]
    fn test_input_negotiates_and_prerolls() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.source.push_frames(3, 0);

        f.presenter.input_available().unwrap();

        assert_eq!(f.source.negotiated(), Some(test_format()));
        assert_eq!(f.presenter.current_format().unwrap(), test_format());
        // Stopped: one frame to preroll, presented at once
        assert_eq!(f.source.pulls(), 1);
        assert_eq!(f.backend.presented_ids(), vec![0]);
        assert_eq!(
            f.backend.presented().last(),
            Some(&Presented::Frame { id: 0, target_ns: 0 })
        );
    }

    #[test]
    fn test_processing_latency_reported() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.source.push_frames(1, 0);

        f.presenter.input_available().unwrap();

        let latencies = f
            .events
            .try_iter()
            .filter(|e| matches!(e, HostEvent::ProcessingLatency(ns) if *ns >= 0))
            .count();
        assert_eq!(latencies, 1);
    }

    #[test]
    fn test_format_not_set_renegotiates() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.source.push_outcome(PullOutcome::FormatNotSet);
        f.source.push_frames(1, 0);

        f.presenter.input_available().unwrap();

        assert_eq!(f.backend.presented_ids().len(), 1);
        assert!(f.events().is_empty());
    }

    #[test]
    fn test_format_changed_drops_format() {
        let f = fixture();
        f.source.push_outcome(PullOutcome::FormatChanged);

        f.presenter.input_available().unwrap();

        assert!(matches!(f.presenter.current_format(), Err(PresenterError::FormatNotSet)));
        assert!(f.backend.resource_releases() >= 2);

        // Next input renegotiates
        f.source.push_frames(1, 0);
        f.presenter.input_available().unwrap();
        assert_eq!(f.presenter.current_format().unwrap(), test_format());
    }

    #[test]
    fn test_no_acceptable_format() {
        let f = fixture();
        f.backend.reject_format(test_format());

        assert!(matches!(
            f.presenter.invalidate_format(),
            Err(PresenterError::NoAcceptableFormat)
        ));
    }

    #[test]
    fn test_skips_formats_source_refuses() {
        let f = fixture();
        let other = VideoFormat::new(8, 8, PixelFormat::Nv12).with_frame_rate(FrameRate::new(50, 1));
        f.source.set_formats(vec![test_format(), other.clone()]);
        f.source.refuse_format(test_format());

        f.presenter.invalidate_format().unwrap();
        assert_eq!(f.presenter.current_format().unwrap(), other);
        assert_eq!(f.presenter.shared.scheduler.frame_duration(), 20_000_000);
    }

    #[test]
    fn test_allocation_failure_leaves_no_format() {
        let f = fixture();
        f.backend.fail_allocation();

        assert!(matches!(
            f.presenter.input_available(),
            Err(PresenterError::Backend(BackendError::Allocation(_)))
        ));
        assert!(matches!(f.presenter.current_format(), Err(PresenterError::FormatNotSet)));
    }

    #[test]
    fn test_invalidate_format_discards_stale_frames() {
        let f = fixture();
        f.play();
        f.source.push_frames(3, SECOND);
        f.presenter.input_available().unwrap();
        assert!(wait_until(TIMEOUT, || f.presenter.stats().frames_checked_out == 3));

        let other = VideoFormat::new(8, 8, PixelFormat::Rgb32);
        f.source.set_formats(vec![other.clone()]);
        f.presenter.invalidate_format().unwrap();

        let stats = f.presenter.stats();
        assert_eq!(stats.frames_checked_out, 0);
        assert_eq!(stats.frames_queued, 0);
        assert_eq!(f.presenter.current_format().unwrap(), other);
        // No frame rate in the format: the configured default applies
        assert_eq!(f.presenter.shared.scheduler.frame_duration(), 33_333_333);
        assert!(!f.events().iter().any(|e| matches!(e, HostEvent::ErrorAbort(_))));
    }

    // ----------------------------------------
    // PLAYBACK
    // ----------------------------------------

    #[test]
    fn test_free_run_presents_in_order() {
        let f = fixture();
        f.play();
        f.clock.set(10 * SECOND);
        f.source.push_frames(6, 0);

        f.presenter.input_available().unwrap();

        assert!(wait_until(TIMEOUT, || f.backend.presented().len() == 6));
        let ids = f.backend.presented_ids();
        assert!(ids.windows(2).all(|w| w[0] != w[1]));
        assert_eq!(f.source.remaining(), 0);

        let stats = f.presenter.stats();
        assert_eq!(stats.frames_presented + stats.frames_dropped, 6);
    }

    #[test]
    fn test_pool_exhaustion_resumes_on_release() {
        let f = fixture();
        f.play();
        f.source.push_frames(5, SECOND);

        f.presenter.input_available().unwrap();

        // Three buffers, all waiting for their time
        assert_eq!(f.source.pulls(), 3);
        assert!(wait_until(TIMEOUT, || f.presenter.stats().frames_queued == 3));

        f.clock.set(SECOND);
        assert!(wait_until(TIMEOUT, || f.source.pulls() == 4));
        assert_eq!(f.backend.presented_ids().len(), 1);
    }

    #[test]
    fn test_seek_flushes_queue() {
        let f = fixture();
        f.play();
        f.source.push_frames(3, SECOND);
        f.presenter.input_available().unwrap();
        assert!(wait_until(TIMEOUT, || f.presenter.stats().frames_queued == 3));

        f.presenter.on_clock_start(Some(0)).unwrap();

        assert_eq!(f.presenter.stats().frames_queued, 0);
        assert_eq!(f.presenter.shared.scheduler.stats().flushed, 3);
        assert!(f.backend.presented_ids().is_empty());
    }

    #[test]
    fn test_flush_when_stopped_presents_blank() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.source.push_frames(1, 0);
        f.presenter.input_available().unwrap();

        f.presenter.flush().unwrap();
        assert_eq!(f.backend.presented().last(), Some(&Presented::Blank));

        f.play();
        let before = f.backend.presented().len();
        f.presenter.flush().unwrap();
        assert_eq!(f.backend.presented().len(), before);
    }

    #[test]
    fn test_repaint_reuses_last_time() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.source.push_frames(1, 10 * FRAME_NS);
        f.presenter.input_available().unwrap();
        let latencies = f.events.try_iter().count();

        f.presenter.repaint().unwrap();

        assert_eq!(
            f.source.repaints(),
            vec![DesiredTime {
                start_ns: 10 * FRAME_NS,
                duration_ns: FRAME_NS,
            }]
        );
        assert_eq!(f.backend.presented_ids().len(), 2);
        // Repaints are not timed
        assert_eq!(latencies, 1);
        assert_eq!(f.events.try_iter().count(), 0);
    }

    #[test]
    fn test_repaint_before_preroll_does_nothing() {
        let f = fixture();
        f.presenter.repaint().unwrap();
        assert_eq!(f.source.pulls(), 0);
    }

    // ----------------------------------------
    // END OF STREAM
    // ----------------------------------------

    #[test]
    fn test_end_of_stream_waits_for_releases() {
        let f = fixture();
        f.play();
        f.source.push_frames(2, SECOND);
        f.presenter.input_available().unwrap();

        f.presenter.end_of_stream().unwrap();
        assert!(f.events().is_empty());

        f.clock.set(2 * SECOND);
        let mut seen = Vec::new();
        assert!(wait_until(TIMEOUT, || {
            seen.extend(f.events());
            seen.contains(&HostEvent::EndOfStream)
        }));

        std::thread::sleep(Duration::from_millis(20));
        seen.extend(f.events());
        assert_eq!(seen.iter().filter(|e| **e == HostEvent::EndOfStream).count(), 1);
    }

    #[test]
    fn test_end_of_stream_when_idle() {
        let f = fixture();
        f.presenter.end_of_stream().unwrap();
        assert_eq!(f.events(), vec![HostEvent::EndOfStream]);

        f.presenter.end_of_stream().unwrap();
        assert_eq!(f.events(), vec![HostEvent::EndOfStream]);
    }

    // ----------------------------------------
    // FRAME STEP
    // ----------------------------------------

    #[test]
    fn test_frame_step_completes_once() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.source.push_frames(6, 0);

        f.presenter.step(3).unwrap();
        assert_eq!(f.presenter.frame_step_state(), FrameStepState::WaitingStart);

        f.presenter.input_available().unwrap();
        f.presenter.on_clock_start(None).unwrap();

        // Third frame (at 80ms) is the target, waiting on the clock
        assert_eq!(f.presenter.frame_step_state(), FrameStepState::Scheduled);
        assert!(f.events().is_empty());

        f.clock.set(2 * FRAME_NS);
        assert!(wait_until(TIMEOUT, || {
            f.presenter.frame_step_state() == FrameStepState::Complete
        }));

        assert_eq!(f.backend.presented_ids(), vec![2]);
        assert!(f
            .backend
            .presented()
            .contains(&Presented::Frame { id: 2, target_ns: 2 * FRAME_NS }));
        assert_eq!(f.events(), vec![HostEvent::StepComplete { cancelled: false }]);
    }

    #[test]
    fn test_cancel_step_notifies_once() {
        let f = fixture();
        f.presenter.step(2).unwrap();

        f.presenter.cancel_step().unwrap();
        f.presenter.cancel_step().unwrap();

        assert_eq!(f.presenter.frame_step_state(), FrameStepState::None);
        assert_eq!(f.events(), vec![HostEvent::StepComplete { cancelled: true }]);
    }

    #[test]
    fn test_huge_step_counts_saturate() {
        let f = fixture();
        f.presenter.step(u32::MAX).unwrap();
        f.presenter.step(u32::MAX).unwrap();

        assert_eq!(f.presenter.frame_step_state(), FrameStepState::WaitingStart);
        f.presenter.cancel_step().unwrap();
        assert_eq!(f.events(), vec![HostEvent::StepComplete { cancelled: true }]);
    }

    #[test]
    fn test_clock_stop_cancels_step() {
        let f = fixture();
        f.play();
        f.presenter.step(1).unwrap();
        assert_eq!(f.presenter.frame_step_state(), FrameStepState::Pending);

        f.presenter.on_clock_stop().unwrap();

        assert_eq!(f.presenter.frame_step_state(), FrameStepState::None);
        assert_eq!(f.events(), vec![HostEvent::StepComplete { cancelled: true }]);
    }

    #[test]
    fn test_scrub_step_reports_time() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.presenter.on_clock_set_rate(0.0).unwrap();
        f.presenter.on_clock_start(None).unwrap();
        f.source.push_frames(3, 0);

        f.presenter.step(1).unwrap();
        f.presenter.input_available().unwrap();

        assert_eq!(f.presenter.frame_step_state(), FrameStepState::Complete);
        assert_eq!(
            f.events(),
            vec![HostEvent::StepComplete { cancelled: false }, HostEvent::ScrubTime(0)]
        );

        // Leaving scrubbing resets the step without a second notification
        f.presenter.on_clock_set_rate(1.0).unwrap();
        assert_eq!(f.presenter.frame_step_state(), FrameStepState::None);
        assert!(f.events().is_empty());
        assert_eq!(f.presenter.shared.scheduler.rate(), 1.0);
    }

    // ----------------------------------------
    // DEVICE & ERRORS
    // ----------------------------------------

    #[test]
    fn test_device_reset_notifies_display_change() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.backend.set_health(DeviceHealth::NeedsReset);
        f.source.push_frames(1, 0);

        f.presenter.input_available().unwrap();

        assert_eq!(f.backend.resets(), 1);
        assert_eq!(f.events(), vec![HostEvent::DisplayChanged]);
        assert_eq!(f.backend.presented_ids().len(), 1);
    }

    #[test]
    fn test_device_removed_aborts() {
        let f = fixture();
        f.presenter.begin_streaming().unwrap();
        f.backend.set_health(DeviceHealth::Fatal);
        f.source.push_frames(2, 0);

        f.presenter.input_available().unwrap();

        let events = f.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HostEvent::ErrorAbort(_)));
        assert!(matches!(f.presenter.input_available(), Err(PresenterError::Shutdown)));
        assert_eq!(f.presenter.render_state(), RenderState::Stopped);
    }

    #[test]
    fn test_device_removed_while_paced_aborts() {
        let f = fixture();
        f.play();
        f.source.push_frames(1, SECOND);
        f.presenter.input_available().unwrap();
        assert!(wait_until(TIMEOUT, || f.presenter.stats().frames_queued == 1));

        f.backend.fail_next_present(BackendError::DeviceRemoved);
        f.clock.set(SECOND);

        let mut events = Vec::new();
        assert!(wait_until(TIMEOUT, || {
            events.extend(f.events());
            events.iter().any(|e| matches!(e, HostEvent::ErrorAbort(_)))
        }));
        std::thread::sleep(Duration::from_millis(20));
        events.extend(f.events());

        let aborts = events.iter().filter(|e| matches!(e, HostEvent::ErrorAbort(_))).count();
        assert_eq!(aborts, 1);
        assert!(matches!(f.presenter.input_available(), Err(PresenterError::Shutdown)));
        assert!(f.backend.presented().is_empty());
    }

    #[test]
    fn test_source_failure_aborts() {
        let f = fixture();
        f.source.push_outcome(PullOutcome::Failed("decoder crashed".to_string()));

        f.presenter.input_available().unwrap();

        let events = f.events();
        assert!(matches!(&events[..], [HostEvent::ErrorAbort(msg)] if msg.contains("decoder crashed")));
    }

    // ----------------------------------------
    // RATES & SETTINGS
    // ----------------------------------------

    #[test]
    fn test_rate_support() {
        let f = fixture();
        assert_eq!(f.presenter.fastest_rate(RateDirection::Forward, false).unwrap(), f32::MAX);

        f.presenter.invalidate_format().unwrap();

        // 60 Hz display, 25 fps content
        let fastest = f.presenter.fastest_rate(RateDirection::Forward, false).unwrap();
        assert!((fastest - 2.4).abs() < 1e-5);
        let reverse = f.presenter.fastest_rate(RateDirection::Reverse, false).unwrap();
        assert!((reverse + 2.4).abs() < 1e-5);
        assert_eq!(f.presenter.fastest_rate(RateDirection::Forward, true).unwrap(), f32::MAX);
        assert_eq!(f.presenter.slowest_rate(RateDirection::Forward, false).unwrap(), 0.0);

        assert_eq!(f.presenter.is_rate_supported(false, 2.0).unwrap(), 2.0);
        match f.presenter.is_rate_supported(false, -3.0) {
            Err(PresenterError::UnsupportedRate { requested, nearest }) => {
                assert_eq!(requested, -3.0);
                assert!((nearest + 2.4).abs() < 1e-5);
            }
            other => panic!("unexpected {:?}", other),
        }

        // 50 Hz display halves the headroom over 25 fps content
        f.backend.set_refresh_rate(50);
        let fastest = f.presenter.fastest_rate(RateDirection::Forward, false).unwrap();
        assert!((fastest - 2.0).abs() < 1e-5);
        assert!(f.presenter.is_rate_supported(false, 2.4).is_err());
    }

    #[test]
    fn test_settings_forwarded() {
        let f = fixture();

        f.presenter.set_frame_drop_threshold(2);
        f.presenter.set_timing_mode(TimingMode::Extrapolated);

        assert_eq!(f.presenter.frame_drop_threshold(), 2);
        assert_eq!(f.presenter.timing_mode(), TimingMode::Extrapolated);
        assert_eq!(
            f.presenter.settings(),
            PresenterSettings {
                frame_drop_threshold: 2,
                timing_mode: TimingMode::Extrapolated,
            }
        );
        assert_eq!(f.presenter.shared.scheduler.frame_drop_threshold(), 2);
        assert_eq!(f.presenter.shared.scheduler.timing_mode(), TimingMode::Extrapolated);
    }
}
