//! # Frame Buffer Module
//!
//! This module provides the pool of reusable frame buffers.
//!
//! ## Plain English Explanation
//!
//! Video frames are big, so we never allocate one per picture. Instead a
//! handful of buffers (three by default) circulate:
//! 1. The presenter takes a free buffer from the pool
//! 2. The frame source paints the next picture into it
//! 3. The pacing queue holds it until its presentation time
//! 4. The renderer shows it and lets go, and it goes back to the pool
//!
//! If all buffers are busy, the presenter simply waits for step 4.

mod pool;

pub use pool::{FrameBufferPool, PoolError, ReturnOutcome};
