//! # Frame Source Module
//!
//! The upstream stage that fills frame buffers (a video mixer, a decoder,
//! a test pattern generator) and the video format it negotiates with us.
//!
//! ## Plain English Explanation
//!
//! The presenter never decodes anything itself. It hands an empty buffer
//! to the source and says "fill this with your next picture". The source
//! either fills it, or answers with one of a few well-known reasons why it
//! couldn't (nothing to give yet, format not agreed, format changed).

use crate::frame::Frame;

// ============================================
// FRAME RATE
// ============================================

/// Nanoseconds in one second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// An exact frame rate expressed as a ratio (e.g. 30000/1001).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Duration of one frame in nanoseconds, or `None` for a zero rate.
    pub fn frame_duration_ns(&self) -> Option<i64> {
        if self.numerator == 0 || self.denominator == 0 {
            return None;
        }
        Some(NANOS_PER_SECOND * self.denominator as i64 / self.numerator as i64)
    }

    /// Frames per second as a float, for logging and rate math.
    pub fn as_f32(&self) -> f32 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f32 / self.denominator as f32
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(30, 1)
    }
}

// ============================================
// VIDEO FORMAT
// ============================================

/// Pixel layout of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit BGRX
    Rgb32,
    /// Packed 4:2:2
    Yuy2,
    /// Planar 4:2:0
    Nv12,
}

impl PixelFormat {
    /// Bytes needed for one `width` x `height` image.
    pub fn image_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgb32 => pixels * 4,
            Self::Yuy2 => pixels * 2,
            Self::Nv12 => pixels * 3 / 2,
        }
    }
}

/// The output format agreed between the source and the presenter.
///
/// Two formats are the same format iff they compare equal; setting an
/// equal format again is a no-op.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Nominal frame rate, if the stream declares one
    pub frame_rate: Option<FrameRate>,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            frame_rate: None,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Bytes per frame buffer for this format.
    pub fn image_size(&self) -> usize {
        self.pixel_format.image_size(self.width, self.height)
    }
}

// ============================================
// FRAME SOURCE
// ============================================

/// What happened when the presenter asked the source for a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PullOutcome {
    /// The buffer now holds the next frame (times set on the frame)
    Filled,
    /// Nothing to give until more input arrives
    NeedMoreInput,
    /// No output format has been negotiated yet
    FormatNotSet,
    /// The stream's format changed; the current output format is stale
    FormatChanged,
    /// Unrecoverable source failure
    Failed(String),
}

/// The upstream stage that produces frames.
///
/// Called only with the presenter's state lock held, so implementations
/// never see two calls at once.
pub trait FrameSource: Send {
    /// Fill `frame` with the next output picture.
    ///
    /// When `frame.desired_time()` is set the source should reproduce the
    /// picture for that time instead of advancing (repaint).
    fn pull_output(&mut self, frame: &mut Frame) -> PullOutcome;

    /// Formats the source can produce, most preferred first.
    fn available_formats(&mut self) -> Vec<VideoFormat>;

    /// Ask the source to switch its output to `candidate`.
    fn negotiate_format(&mut self, candidate: &VideoFormat) -> bool;
}

// ============================================
// TESTS
// ============================================
