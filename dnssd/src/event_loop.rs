//! Polling of a [`TransactionManager`], either by the caller or on a background thread.

use crate::transaction::TransactionManager;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A handle on something that can be polled for events. Typically, `poll()` is called in a loop
/// to keep transactions running.
pub trait TEventLoop {
    /// Polls for new events, returning the number of replies dispatched.
    fn poll(&self, timeout: Duration) -> Result<usize>;
}

impl TEventLoop for TransactionManager {
    fn poll(&self, timeout: Duration) -> Result<usize> {
        TransactionManager::poll(self, timeout)
    }
}

impl<T: TEventLoop + ?Sized> TEventLoop for Arc<T> {
    fn poll(&self, timeout: Duration) -> Result<usize> {
        (**self).poll(timeout)
    }
}

/// Polls a [`TransactionManager`] on a background thread until shut down or until the daemon
/// connection fails.
#[derive(Debug)]
pub struct EventLoop {
    manager: Arc<TransactionManager>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Starts polling `manager`, waiting at most `tick` per iteration.
    pub fn spawn(manager: Arc<TransactionManager>, tick: Duration) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let manager = manager.clone();
            let shutdown = shutdown.clone();

            thread::Builder::new()
                .name("dnssd-event-loop".to_string())
                .spawn(move || run(&manager, &shutdown, tick))
                .map_err(|e| Error::SystemError {
                    code: e.raw_os_error().unwrap_or(-1),
                    message: format!("could not spawn event loop thread: {e}"),
                })?
        };

        Ok(Self {
            manager,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Returns true while the background thread is polling.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the background thread and waits for it to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = self.manager.wake() {
            warn!("could not wake event loop: {e}");
        }

        thread.join().map_err(|_| Error::SystemError {
            code: -1,
            message: "event loop thread panicked".to_string(),
        })
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop_thread() {
            error!("{e}");
        }
    }
}

fn run(manager: &TransactionManager, shutdown: &AtomicBool, tick: Duration) {
    debug!("event loop started");

    while !shutdown.load(Ordering::SeqCst) {
        match manager.poll(tick) {
            Ok(_) => {}
            Err(e) if e.is_terminal() => {
                debug!("event loop exiting: {e}");
                break;
            }
            Err(e) => warn!("poll failed: {e}"),
        }
    }

    debug!("event loop stopped");
}
