//! # Frame Types
//!
//! Structures for the reusable frame buffers cycled between the pool,
//! the frame source, the pacing queue and the rendering backend.
//!
//! ## Plain English Explanation
//!
//! A `FrameBuffer` is just storage (pixels). A `Frame` is that storage
//! after the pool has issued it: it carries an identity, the generation it
//! was issued in, and the timing the frame source wrote into it.
//! A `TrackedFrame` is a filled frame on its way to the screen; when it is
//! dropped, the presenter hears about it and recycles the buffer.

mod tracked;

pub use tracked::TrackedFrame;
pub(crate) use tracked::ReleaseHook;

use crate::source::VideoFormat;

// ============================================
// FRAME BUFFER
// ============================================

/// Raw image storage created by the rendering backend.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBuffer {
    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Pixel bytes, laid out per the negotiated format
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Allocates a zeroed buffer sized for `format`.
    pub fn for_format(format: &VideoFormat) -> Self {
        Self {
            width: format.width,
            height: format.height,
            data: vec![0u8; format.image_size()],
        }
    }
}

// ============================================
// DESIRED TIME
// ============================================

/// Asks the frame source to reproduce the picture for a past time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DesiredTime {
    pub start_ns: i64,
    pub duration_ns: i64,
}

// ============================================
// FRAME
// ============================================

/// A pool-issued frame buffer plus its presentation timing.
#[derive(Debug)]
pub struct Frame {
    id: u64,
    generation: u64,
    buffer: FrameBuffer,
    start_ns: Option<i64>,
    duration_ns: Option<i64>,
    desired: Option<DesiredTime>,
}

impl Frame {
    /// Wraps backend storage. Only the pool creates frames.
    pub(crate) fn from_buffer(id: u64, generation: u64, buffer: FrameBuffer) -> Self {
        Self {
            id,
            generation,
            buffer,
            start_ns: None,
            duration_ns: None,
            desired: None,
        }
    }

    /// Identity of this buffer, unique for the pool's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The liveness generation this frame was issued in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Presentation start time, if the source set one.
    pub fn start_ns(&self) -> Option<i64> {
        self.start_ns
    }

    pub fn duration_ns(&self) -> Option<i64> {
        self.duration_ns
    }

    /// Sets presentation start time and duration (called by the source).
    pub fn set_timing(&mut self, start_ns: i64, duration_ns: i64) {
        self.start_ns = Some(start_ns);
        self.duration_ns = Some(duration_ns);
    }

    /// Removes timing so the frame presents as soon as it is scheduled.
    pub fn clear_timing(&mut self) {
        self.start_ns = None;
        self.duration_ns = None;
    }

    /// Repaint request, if any. See [`DesiredTime`].
    pub fn desired_time(&self) -> Option<DesiredTime> {
        self.desired
    }

    pub(crate) fn set_desired_time(&mut self, start_ns: i64, duration_ns: i64) {
        self.desired = Some(DesiredTime {
            start_ns,
            duration_ns,
        });
    }

    pub(crate) fn clear_desired_time(&mut self) {
        self.desired = None;
    }

    /// True when the frame's end time (start + duration) is before `now_ns`.
    ///
    /// Frames without timing never count as passed.
    pub fn is_time_passed(&self, now_ns: i64) -> bool {
        match (self.start_ns, self.duration_ns) {
            (Some(start), Some(duration)) => start.saturating_add(duration) < now_ns,
            _ => false,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width
    }

    pub fn height(&self) -> u32 {
        self.buffer.height
    }

    /// Pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.buffer.data
    }

    /// Mutable pixel bytes, for the source to fill.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.data
    }
}

// ============================================
// TESTS
// ============================================
