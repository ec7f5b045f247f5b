//! # Frame Pacer Demo
//!
//! This example plays a short synthetic clip through the presenter.
//! A generated source produces frames at 25 fps, a console backend
//! "displays" them, and a system clock drives playback.
//!
//! Run with: `cargo run --example demo`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use parking_lot::Mutex;

use frame_pacer::{
    BackendError, DeviceHealth, Frame, FrameBuffer, FrameRate, FrameSource, HostEvent, PixelFormat,
    PresentRequest, Presenter, PresenterConfig, PullOutcome, RenderBackend, SystemClock, VideoFormat,
};

const FRAME_COUNT: u32 = 50;

fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    frame_pacer::init_logging();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           Frame Pacer Demo                                 ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║ This demo plays 2 seconds of generated 25 fps video        ║");
    println!("║ against a wall clock and reports how each frame landed.    ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let config = PresenterConfig::default();
    println!("📹 Configuration:");
    println!("   Buffers: {}", config.buffer_count);
    println!("   Timing mode: {:?}", config.timing_mode);
    println!("   Max sleep: {} ms", config.max_sleep_ms);
    println!();

    let backend = Arc::new(ConsoleBackend::new());
    let (presenter, events) = Presenter::new(backend.clone(), config).context("creating presenter")?;
    let clock = Arc::new(SystemClock::new());

    presenter
        .init_services(Box::new(GradientSource::new(FRAME_COUNT)), Some(clock.clone()))
        .context("attaching services")?;
    presenter.begin_streaming()?;

    println!("▶️  Playing...");
    clock.start(Some(0));
    presenter.on_clock_start(Some(0))?;
    presenter.input_available()?;
    presenter.end_of_stream()?;

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(HostEvent::EndOfStream) => break,
            Ok(HostEvent::ErrorAbort(reason)) => bail!("playback aborted: {}", reason),
            Ok(_) | Err(_) => {}
        }
        if Instant::now() > deadline {
            bail!("timed out waiting for end of stream");
        }
    }

    println!();
    println!("📊 Final Statistics:");
    let stats = presenter.stats();
    println!("   Frames presented: {}", stats.frames_presented);
    println!("   Frames repainted (late): {}", stats.frames_dropped);
    println!("   Frames skipped: {}", stats.frames_skipped);
    println!("   Worst lateness: {:.1} ms", backend.worst_lateness_ms());
    println!();

    presenter.end_streaming()?;
    presenter.release_services();

    println!("👋 Demo complete!");
    Ok(())
}

/// Source that paints a moving gradient into each frame.
struct GradientSource {
    format: VideoFormat,
    next: u32,
    total: u32,
}

impl GradientSource {
    fn new(total: u32) -> Self {
        Self {
            format: VideoFormat::new(64, 36, PixelFormat::Rgb32).with_frame_rate(FrameRate::new(25, 1)),
            next: 0,
            total,
        }
    }
}

impl FrameSource for GradientSource {
    fn pull_output(&mut self, frame: &mut Frame) -> PullOutcome {
        let duration = self.format.frame_rate.and_then(|r| r.frame_duration_ns()).unwrap_or(40_000_000);

        if let Some(desired) = frame.desired_time() {
            frame.set_timing(desired.start_ns, desired.duration_ns);
            return PullOutcome::Filled;
        }
        if self.next >= self.total {
            return PullOutcome::NeedMoreInput;
        }

        let shade = (self.next * 5 % 256) as u8;
        for (i, byte) in frame.data_mut().iter_mut().enumerate() {
            *byte = shade.wrapping_add(i as u8);
        }
        frame.set_timing(self.next as i64 * duration, duration);
        self.next += 1;
        PullOutcome::Filled
    }

    fn available_formats(&mut self) -> Vec<VideoFormat> {
        vec![self.format.clone()]
    }

    fn negotiate_format(&mut self, candidate: &VideoFormat) -> bool {
        *candidate == self.format
    }
}

/// Backend that prints a line every 25 presented frames.
struct ConsoleBackend {
    started: Mutex<Option<Instant>>,
    presented: AtomicU64,
    worst_lateness_ns: AtomicU64,
}

impl ConsoleBackend {
    fn new() -> Self {
        Self {
            started: Mutex::new(None),
            presented: AtomicU64::new(0),
            worst_lateness_ns: AtomicU64::new(0),
        }
    }

    fn worst_lateness_ms(&self) -> f64 {
        self.worst_lateness_ns.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

impl RenderBackend for ConsoleBackend {
    fn present(&self, request: PresentRequest<'_>, target_ns: i64) -> Result<(), BackendError> {
        let started = *self.started.lock().get_or_insert_with(Instant::now);
        let wall_ns = started.elapsed().as_nanos() as i64;

        if let PresentRequest::Frame(frame) = request {
            let late = (wall_ns - target_ns).max(0) as u64;
            self.worst_lateness_ns.fetch_max(late, Ordering::Relaxed);

            let count = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 25 == 0 {
                println!(
                    "   ⏱️  buffer {} at {:>6.1} ms (due {:>6.1} ms)",
                    frame.id(),
                    wall_ns as f64 / 1e6,
                    target_ns as f64 / 1e6
                );
            }
        }
        Ok(())
    }

    fn check_health(&self) -> DeviceHealth {
        DeviceHealth::Ok
    }

    fn reset_device(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn create_frames(&self, format: &VideoFormat, count: usize) -> Result<Vec<FrameBuffer>, BackendError> {
        Ok((0..count).map(|_| FrameBuffer::for_format(format)).collect())
    }

    fn release_resources(&self) {}

    fn refresh_rate_hz(&self) -> u32 {
        60
    }

    fn display_width(&self) -> u32 {
        1920
    }

    fn display_height(&self) -> u32 {
        1080
    }
}
