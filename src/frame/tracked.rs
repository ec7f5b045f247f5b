//! Release-notifying frame wrapper.

use std::fmt;
use std::ops::Deref;
use std::sync::Weak;

use super::Frame;

/// Receives frames whose last user has let go of them.
///
/// Implementations must not block: `on_release` runs on whichever thread
/// dropped the frame, which may already hold the receiver's locks.
pub(crate) trait ReleaseHook: Send + Sync {
    fn on_release(&self, frame: Frame);
}

/// A filled frame on its way to the screen.
///
/// Dropping it hands the inner [`Frame`] back to the presenter that issued
/// it. If that presenter is gone the frame is simply freed.
pub struct TrackedFrame {
    frame: Option<Frame>,
    hook: Weak<dyn ReleaseHook>,
}

impl TrackedFrame {
    pub(crate) fn new(frame: Frame, hook: Weak<dyn ReleaseHook>) -> Self {
        Self {
            frame: Some(frame),
            hook,
        }
    }
}

impl Deref for TrackedFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        // Only `drop` takes the frame out.
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("tracked frame accessed after release"),
        }
    }
}

impl fmt::Debug for TrackedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedFrame")
            .field("frame", &self.frame)
            .finish()
    }
}

impl Drop for TrackedFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            match self.hook.upgrade() {
                Some(hook) => hook.on_release(frame),
                None => log::trace!("Frame {} released after its presenter went away", frame.id()),
            }
        }
    }
}
