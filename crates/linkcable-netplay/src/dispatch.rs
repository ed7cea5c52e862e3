//! Thread that runs observer notifications and list callbacks.
//!
//! The connection worker only posts here and never waits for the work to
//! finish. User code may therefore call back into the client, and even block
//! on a full outbound queue, while the worker keeps draining that queue.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error};

use crate::error::NetplayError;

type Job = Box<dyn FnOnce() + Send>;

/// Posts work to the dispatch thread. The thread exits once every notifier
/// is dropped and the backlog has run.
#[derive(Clone)]
pub(crate) struct Notifier {
    jobs: Sender<Job>,
}

impl Notifier {
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            debug!("dispatch thread gone, notification dropped");
        }
    }
}

/// Start a dispatch thread.
pub(crate) fn spawn() -> Result<(Notifier, JoinHandle<()>), NetplayError> {
    let (jobs, backlog) = unbounded();
    let thread = thread::Builder::new()
        .name("linkcable-dispatch".into())
        .spawn(move || run(backlog))
        .map_err(|e| NetplayError::WorkerSpawn(e.to_string()))?;
    Ok((Notifier { jobs }, thread))
}

fn run(backlog: Receiver<Job>) {
    for job in backlog {
        job();
    }
    debug!("dispatch thread exiting");
}

/// Join `handle` unless it is the calling thread, which will exit on its own.
pub(crate) fn join_unless_current(handle: JoinHandle<()>, name: &str) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        error!("{name} thread panicked");
    }
}
