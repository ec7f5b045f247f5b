//! Pull loop, delivery and frame stepping.
//!
//! Everything here runs with the state lock held.

use std::time::Instant;

use log::{debug, error, trace, warn};

use super::state::{FrameStepState, RenderState};
use super::{HostEvent, PresenterState, Shared};
use crate::backend::{BackendError, DeviceHealth};
use crate::buffer::{PoolError, ReturnOutcome};
use crate::error::{ErrorCategory, PresenterError, PresenterResult};
use crate::frame::{Frame, FrameBuffer, TrackedFrame};
use crate::scheduler::{PresentCallback, PresentTiming, SchedulerError};
use crate::source::{PullOutcome, VideoFormat};

/// Result of one pull attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Pulled {
    /// A frame was produced or a recoverable condition handled; pull again
    Processed,
    /// The source is dry
    NeedMoreInput,
    /// Nothing to do until a buffer comes back or the state changes
    Idle,
}

impl Shared {
    // ============================================
    // PULL LOOP
    // ============================================

    /// Pulls frames while the source has input and buffers are free.
    pub(super) fn process_output_loop(&self, st: &mut PresenterState) {
        loop {
            if !st.sample_notify {
                self.check_end_of_stream(st);
                break;
            }

            match self.process_output(st) {
                Ok(Pulled::Processed) => continue,
                Ok(Pulled::NeedMoreInput) => {
                    self.check_end_of_stream(st);
                    break;
                }
                Ok(Pulled::Idle) => break,
                Err(e) => {
                    self.report_error(st, &e);
                    break;
                }
            }
        }
    }

    /// Pulls one frame from the source and hands it on.
    pub(super) fn process_output(&self, st: &mut PresenterState) -> PresenterResult<Pulled> {
        // One frame is enough to preroll while not playing
        if st.render_state != RenderState::Started && !st.repaint && st.prerolled {
            return Ok(Pulled::Idle);
        }

        let mut frame = match st.pool.get_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Pulled::Idle),
            Err(PoolError::NotInitialized) => return Err(PresenterError::FormatNotSet),
            Err(e) => return Err(e.into()),
        };

        let repaint = st.repaint;
        if repaint {
            frame.set_desired_time(self.scheduler.last_sample_time(), self.scheduler.frame_duration());
            st.repaint = false;
        } else {
            frame.clear_desired_time();
        }

        let pull_started = Instant::now();
        let outcome = match st.source.as_mut() {
            Some(source) => source.pull_output(&mut frame),
            None => PullOutcome::Failed("no frame source attached".to_string()),
        };

        match outcome {
            PullOutcome::Filled => {}
            PullOutcome::NeedMoreInput => {
                trace!("Source needs more input");
                self.return_to_pool(st, frame);
                st.sample_notify = false;
                return Ok(Pulled::NeedMoreInput);
            }
            PullOutcome::FormatNotSet => {
                debug!("Source has no output format, renegotiating");
                self.return_to_pool(st, frame);
                self.renegotiate_format(st)?;
                return Ok(Pulled::Processed);
            }
            PullOutcome::FormatChanged => {
                debug!("Source format changed, dropping the output format");
                self.return_to_pool(st, frame);
                self.release_format(st);
                return Ok(Pulled::Idle);
            }
            PullOutcome::Failed(reason) => {
                self.return_to_pool(st, frame);
                return Err(PresenterError::Source(reason));
            }
        }

        if st.clock.is_some() && !repaint {
            let latency = pull_started.elapsed().as_nanos() as i64;
            self.notify(HostEvent::ProcessingLatency(latency));
        }

        trace!("Pulled frame {} at {:?}", frame.id(), frame.start_ns());
        let frame = TrackedFrame::new(frame, self.release_hook());

        if st.frame_step.state == FrameStepState::None || repaint {
            self.deliver_frame(st, frame, repaint)?;
        } else {
            self.deliver_frame_step_frame(st, frame)?;
        }

        st.prerolled = true;
        Ok(Pulled::Processed)
    }

    fn return_to_pool(&self, st: &mut PresenterState, frame: Frame) {
        if let Err(e) = st.pool.return_frame(frame) {
            self.report_error(st, &e.into());
        }
    }

    // ============================================
    // DELIVERY
    // ============================================

    /// Checks the device and schedules `frame`.
    pub(super) fn deliver_frame(
        &self,
        st: &mut PresenterState,
        frame: TrackedFrame,
        repaint: bool,
    ) -> PresenterResult<()> {
        let present_now = st.render_state != RenderState::Started || st.is_scrubbing() || repaint;

        self.check_device()?;

        match self.scheduler.schedule(frame, present_now) {
            // Not streaming yet; the frame is simply released
            Err(SchedulerError::NotStarted) => {
                trace!("Pacing queue not started, frame released");
                Ok(())
            }
            other => other.map_err(PresenterError::from),
        }
    }

    fn check_device(&self) -> PresenterResult<()> {
        match self.backend.check_health() {
            DeviceHealth::Ok => Ok(()),
            DeviceHealth::NeedsReset => {
                warn!("Display device needs a reset");
                self.backend
                    .reset_device()
                    .map_err(PresenterError::DeviceResetFailed)?;
                self.notify(HostEvent::DisplayChanged);
                Ok(())
            }
            DeviceHealth::Fatal => Err(PresenterError::Backend(BackendError::DeviceRemoved)),
        }
    }

    /// Logs `error` by severity. Fatal errors abort playback once.
    pub(super) fn report_error(&self, st: &mut PresenterState, error: &PresenterError) {
        match error.category() {
            ErrorCategory::Fatal | ErrorCategory::Invariant => {
                error!("Presenter error: {}", error);
                if !st.faulted {
                    st.faulted = true;
                    self.notify(HostEvent::ErrorAbort(error.to_string()));
                }
            }
            ErrorCategory::Backpressure => trace!("{}", error),
            ErrorCategory::Negotiation => debug!("{}", error),
            ErrorCategory::Device | ErrorCategory::Usage => warn!("{}", error),
        }
    }

    /// Reports the error in `result`, if any, and passes it on.
    pub(super) fn reported<T>(&self, st: &mut PresenterState, result: PresenterResult<T>) -> PresenterResult<T> {
        if let Err(e) = &result {
            self.report_error(st, e);
        }
        result
    }

    // ============================================
    // FRAME STEP
    // ============================================

    /// Routes a frame produced while a step is armed.
    fn deliver_frame_step_frame(&self, st: &mut PresenterState, frame: TrackedFrame) -> PresenterResult<()> {
        if st.is_scrubbing() {
            if let Some(clock) = &st.clock {
                let now = clock.correlated_time().clock_ns;
                if frame.is_time_passed(now) {
                    trace!("Step frame {} already passed, discarding", frame.id());
                    return Ok(());
                }
            }
        }

        if st.frame_step.state >= FrameStepState::Scheduled {
            st.frame_step.deferred.push_back(frame);
            return Ok(());
        }

        st.frame_step.steps = st.frame_step.steps.saturating_sub(1);
        if st.frame_step.steps > 0 {
            trace!("Stepping over frame {} ({} to go)", frame.id(), st.frame_step.steps);
            return Ok(());
        }

        if st.frame_step.state == FrameStepState::WaitingStart {
            st.frame_step.deferred.push_back(frame);
            return Ok(());
        }

        let id = frame.id();
        self.deliver_frame(st, frame, false)?;
        st.frame_step.frame_id = Some(id);
        st.frame_step.state = FrameStepState::Scheduled;
        debug!("Step target frame {} scheduled", id);
        Ok(())
    }

    /// Arms a step of `count` frames.
    pub(super) fn prepare_frame_step(&self, st: &mut PresenterState, count: u32) -> PresenterResult<()> {
        st.frame_step.steps = st.frame_step.steps.saturating_add(count);
        st.frame_step.state = FrameStepState::WaitingStart;
        debug!("Frame step requested ({} steps)", st.frame_step.steps);

        if st.render_state == RenderState::Started {
            self.start_frame_step(st)?;
        }
        Ok(())
    }

    /// Starts an armed step, or flushes out deferred frames if none is armed.
    pub(super) fn start_frame_step(&self, st: &mut PresenterState) -> PresenterResult<()> {
        match st.frame_step.state {
            FrameStepState::WaitingStart => {
                st.frame_step.state = FrameStepState::Pending;
                while st.frame_step.state == FrameStepState::Pending {
                    let Some(frame) = st.frame_step.deferred.pop_front() else {
                        break;
                    };
                    self.deliver_frame_step_frame(st, frame)?;
                }
            }
            FrameStepState::None => {
                while let Some(frame) = st.frame_step.deferred.pop_front() {
                    self.deliver_frame(st, frame, false)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The step's target frame was released by the renderer.
    fn complete_frame_step(&self, st: &mut PresenterState, frame: &Frame) {
        st.frame_step.state = FrameStepState::Complete;
        st.frame_step.frame_id = None;
        debug!("Frame step complete");
        self.notify(HostEvent::StepComplete { cancelled: false });

        if st.is_scrubbing() {
            let time = frame
                .start_ns()
                .or_else(|| st.clock.as_ref().map(|clock| clock.correlated_time().clock_ns))
                .unwrap_or(0);
            self.notify(HostEvent::ScrubTime(time));
        }
    }

    /// Abandons the current step. Deferred frames stay queued.
    pub(super) fn cancel_frame_step(&self, st: &mut PresenterState) {
        let was_in_progress = st.frame_step.in_progress();

        st.frame_step.state = FrameStepState::None;
        st.frame_step.steps = 0;
        st.frame_step.frame_id = None;

        if was_in_progress {
            debug!("Frame step cancelled");
            self.notify(HostEvent::StepComplete { cancelled: true });
        }
    }

    // ============================================
    // FLUSH, END OF STREAM, RELEASES
    // ============================================

    /// Drops queued and deferred frames. Shows a blank image when stopped.
    pub(super) fn flush(&self, st: &mut PresenterState) {
        st.prerolled = false;
        self.scheduler.flush();
        st.frame_step.deferred.clear();

        if st.render_state == RenderState::Stopped {
            if let Err(e) = self.sink.present_frame(None, PresentTiming::blank()) {
                warn!("Failed to present blank frame: {}", e);
            }
        }
    }

    /// Reports end of stream once the source is dry and every frame is back.
    pub(super) fn check_end_of_stream(&self, st: &mut PresenterState) {
        if !st.end_streaming || st.sample_notify || st.pool.are_frames_pending() {
            return;
        }

        st.end_streaming = false;
        debug!("End of stream reached");
        self.notify(HostEvent::EndOfStream);
    }

    /// A frame came back from the renderer.
    pub(super) fn on_frame_released(&self, st: &mut PresenterState, frame: Frame) {
        if st.frame_step.state == FrameStepState::Scheduled && st.frame_step.frame_id == Some(frame.id()) {
            self.complete_frame_step(st, &frame);
        }

        match st.pool.return_frame(frame) {
            Ok(ReturnOutcome::Recycled) => {
                if st.render_state != RenderState::Shutdown && !st.faulted {
                    self.process_output_loop(st);
                }
            }
            Ok(ReturnOutcome::Discarded) => {}
            Err(e) => self.report_error(st, &e.into()),
        }
    }

    // ============================================
    // FORMAT
    // ============================================

    /// Adopts `format`: new buffers, new pool generation, new pacing rate.
    pub(super) fn set_format(&self, st: &mut PresenterState, format: VideoFormat) -> PresenterResult<()> {
        self.check_shutdown(st)?;
        if st.format.as_ref() == Some(&format) {
            return Ok(());
        }

        self.release_format(st);

        let result = self.allocate_frames(st, &format);
        if let Err(e) = result {
            warn!("Failed to set output format {:?}: {}", format, e);
            self.release_format(st);
            return Err(e);
        }

        let frame_rate = format.frame_rate.unwrap_or(self.config.default_frame_rate);
        self.scheduler.set_frame_rate(frame_rate);
        debug!(
            "Output format set: {}x{} {:?}",
            format.width, format.height, format.pixel_format
        );
        st.format = Some(format);
        Ok(())
    }

    fn allocate_frames(&self, st: &mut PresenterState, format: &VideoFormat) -> PresenterResult<()> {
        let buffers: Vec<FrameBuffer> = self.backend.create_frames(format, self.config.buffer_count)?;
        st.pool.initialize(buffers)?;
        Ok(())
    }

    /// Drops the output format and everything allocated for it.
    pub(super) fn release_format(&self, st: &mut PresenterState) {
        st.format = None;
        st.pool.clear();
        self.flush(st);
        self.backend.release_resources();
    }

    /// Finds a format both the source and the backend accept.
    pub(super) fn renegotiate_format(&self, st: &mut PresenterState) -> PresenterResult<()> {
        let candidates = match st.source.as_mut() {
            Some(source) => source.available_formats(),
            None => return Err(PresenterError::InvalidRequest("no frame source attached")),
        };

        for candidate in candidates {
            if !self.backend.supports_format(&candidate) {
                trace!("Backend does not support {:?}", candidate);
                continue;
            }

            let accepted = st
                .source
                .as_mut()
                .map(|source| source.negotiate_format(&candidate))
                .unwrap_or(false);
            if accepted {
                return self.set_format(st, candidate);
            }
        }

        self.release_format(st);
        Err(PresenterError::NoAcceptableFormat)
    }

    // ============================================
    // MESSAGE HANDLERS
    // ============================================

    pub(super) fn input_available(&self, st: &mut PresenterState) -> PresenterResult<()> {
        st.sample_notify = true;
        if st.format.is_none() {
            self.renegotiate_format(st)?;
        }
        self.process_output_loop(st);
        Ok(())
    }

    pub(super) fn begin_streaming(&self, st: &mut PresenterState) -> PresenterResult<()> {
        self.scheduler.set_rate(st.rate);
        match self.scheduler.start(st.clock.clone()) {
            Ok(()) | Err(SchedulerError::AlreadyRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Largest rate the display keeps up with at the current format.
    pub(super) fn max_rate(&self, st: &PresenterState, thin: bool) -> f32 {
        if thin {
            return f32::MAX;
        }

        let refresh = self.backend.refresh_rate_hz();
        match st.format.as_ref().and_then(|format| format.frame_rate) {
            Some(rate) if rate.numerator > 0 && rate.denominator > 0 && refresh > 0 => {
                refresh as f32 * rate.denominator as f32 / rate.numerator as f32
            }
            _ => f32::MAX,
        }
    }
}
