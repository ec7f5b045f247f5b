//! # Frame Buffer Pool
//!
//! Fixed-capacity pool of reusable frame buffers with generation-based
//! invalidation.

use std::collections::{HashSet, VecDeque};

use crate::frame::{Frame, FrameBuffer};

// ============================================
// POOL ERRORS
// ============================================

/// Misuse of the pool. Exhaustion is not an error (see [`FrameBufferPool::get_frame`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("frame pool is not initialized")]
    NotInitialized,

    #[error("frame pool is already initialized; clear it first")]
    AlreadyInitialized,

    /// Never issued, or returned twice
    #[error("frame {id} was not checked out from this pool")]
    UnknownFrame { id: u64 },
}

/// What happened to a returned frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Back on the free list
    Recycled,
    /// From an old generation; freed instead of reused
    Discarded,
}

// ============================================
// FRAME BUFFER POOL
// ============================================

/// Bounded pool of frame buffers partitioned into free and checked-out.
///
/// ## Plain English
///
/// Think of a coat check with a fixed number of hangers. You can only hand
/// out a hanger that is free; when every hanger is out, the answer is
/// "come back later", not "something broke". When the venue changes
/// (new output format) every ticket from before becomes void: coats
/// returned with an old ticket are thrown out instead of re-hung.
///
/// The pool is not synchronized; the presenter keeps it under its state lock.
#[derive(Debug)]
pub struct FrameBufferPool {
    free: VecDeque<Frame>,
    checked_out: HashSet<u64>,
    capacity: usize,
    generation: u64,
    next_id: u64,
    initialized: bool,
}

impl FrameBufferPool {
    /// Creates an empty, uninitialized pool.
    pub fn new() -> Self {
        Self {
            free: VecDeque::new(),
            checked_out: HashSet::new(),
            capacity: 0,
            generation: 0,
            next_id: 0,
            initialized: false,
        }
    }

    /// Fills the pool with `buffers`, all free, stamped with the current generation.
    pub fn initialize(&mut self, buffers: Vec<FrameBuffer>) -> Result<(), PoolError> {
        if self.initialized {
            return Err(PoolError::AlreadyInitialized);
        }

        self.free.clear();
        self.checked_out.clear();
        for buffer in buffers {
            let frame = Frame::from_buffer(self.next_id, self.generation, buffer);
            self.next_id += 1;
            self.free.push_back(frame);
        }
        self.capacity = self.free.len();
        self.initialized = true;

        log::debug!(
            "Frame pool initialized: {} buffers, generation {}",
            self.capacity,
            self.generation
        );
        Ok(())
    }

    /// Checks out a free frame with no timing.
    ///
    /// Returns `Ok(None)` when every buffer is checked out. That is
    /// backpressure: try again after the next release.
    pub fn get_frame(&mut self) -> Result<Option<Frame>, PoolError> {
        if !self.initialized {
            return Err(PoolError::NotInitialized);
        }

        let Some(mut frame) = self.free.pop_front() else {
            log::trace!("Frame pool empty ({} checked out)", self.checked_out.len());
            return Ok(None);
        };

        frame.set_generation(self.generation);
        frame.clear_timing();
        self.checked_out.insert(frame.id());
        Ok(Some(frame))
    }

    /// Takes a frame back.
    ///
    /// Stale-generation frames are dropped without touching the counts.
    ///
    /// # Panics
    ///
    /// In debug builds, on a frame that is not checked out. Release builds
    /// and this crate's unit tests get [`PoolError::UnknownFrame`] instead.
    pub fn return_frame(&mut self, frame: Frame) -> Result<ReturnOutcome, PoolError> {
        if frame.generation() != self.generation {
            log::trace!(
                "Discarding frame {} from generation {} (current {})",
                frame.id(),
                frame.generation(),
                self.generation
            );
            return Ok(ReturnOutcome::Discarded);
        }

        if !self.checked_out.remove(&frame.id()) {
            log::error!("Frame {} returned but was not checked out", frame.id());
            if cfg!(all(debug_assertions, not(test))) {
                panic!("frame {} returned to the pool but was not checked out", frame.id());
            }
            return Err(PoolError::UnknownFrame { id: frame.id() });
        }

        self.free.push_back(frame);
        Ok(ReturnOutcome::Recycled)
    }

    /// True while any current-generation frame is checked out.
    pub fn are_frames_pending(&self) -> bool {
        !self.checked_out.is_empty()
    }

    /// Voids every outstanding frame and frees the pool storage.
    ///
    /// Does not wait for outstanding frames; they are discarded on return.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.free.clear();
        self.checked_out.clear();
        self.capacity = 0;
        self.initialized = false;

        log::debug!("Frame pool cleared, now generation {}", self.generation);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.checked_out.len()
    }

    /// The current liveness generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Default for FrameBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// TESTS
// ============================================
