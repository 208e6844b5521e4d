//! Owner of the poster thread.

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::warn;
use thiserror::Error;

use super::{config::DEFAULT_SHUTDOWN_TIMEOUT, worker::PosterWorker};

const THREAD_NAME: &str = "historian-poster";

/// Failures while stopping the poster thread.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    /// The worker did not acknowledge within the allotted time. It keeps
    /// running detached until its current request finishes.
    #[error("poster did not stop within {0:?}")]
    Timeout(Duration),
    #[error("poster thread panicked")]
    Panicked,
}

/// Handle to a running [`PosterWorker`] thread.
///
/// Dropping the handle stops the worker, waiting at most
/// [`DEFAULT_SHUTDOWN_TIMEOUT`].
pub struct DataPoster {
    shutdown_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DataPoster {
    /// Start `worker` on its own thread.
    pub fn spawn(worker: PosterWorker) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || worker.run(shutdown_rx, done_tx))?;
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the worker and wait up to `timeout` for it to exit.
    ///
    /// After a [`ShutdownError::Timeout`] the handle still owns the thread
    /// and a later call waits again. Once the worker has been joined,
    /// further calls are no-ops.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // A send error means the worker already exited.
            let _ = tx.send(());
        }
        if self.handle.is_none() {
            return Ok(());
        }
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.take() {
                Some(handle) => handle.join().map_err(|_| ShutdownError::Panicked),
                None => Ok(()),
            },
            Err(RecvTimeoutError::Timeout) => Err(ShutdownError::Timeout(timeout)),
        }
    }
}

impl Drop for DataPoster {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT) {
            warn!("historian poster: {err}");
        }
    }
}

impl std::fmt::Debug for DataPoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPoster")
            .field("running", &self.is_running())
            .finish()
    }
}
