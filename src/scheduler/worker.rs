//! The pacing thread.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use super::QueueShared;

/// Messages to the pacing thread.
pub(super) enum Command {
    /// A frame was appended to the queue
    Schedule,
    /// Discard everything queued, then acknowledge
    Flush(Sender<()>),
    Terminate,
}

/// Thread body: wait for a command or for the head frame to come due.
pub(super) fn run(shared: Arc<QueueShared>, commands: Receiver<Command>) {
    log::debug!("Pacing thread started");

    // None = nothing queued, sleep until told otherwise
    let mut wait: Option<Duration> = None;

    loop {
        let command = match wait {
            Some(timeout) => match commands.recv_timeout(timeout) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Terminate) => break,
            Some(Command::Flush(ack)) => {
                shared.discard_all();
                let _ = ack.send(());
                wait = None;
            }
            Some(Command::Schedule) | None => {
                wait = shared.process_queue();
            }
        }
    }

    log::debug!("Pacing thread exiting");
}
