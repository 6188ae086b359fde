//! Background loops shared by the node's maintenance threads

use crate::error::{BlockchainError, Result};
use log::{debug, error};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cloneable stop signal; every loop owning a clone wakes as soon as it fires
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> ShutdownToken {
        ShutdownToken::default()
    }

    pub fn shutdown(&self) {
        let (flag, condvar) = &*self.inner;
        match flag.lock() {
            Ok(mut stopped) => {
                *stopped = true;
                condvar.notify_all();
            }
            Err(_) => error!("Failed to acquire shutdown lock"),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        match self.inner.0.lock() {
            Ok(stopped) => *stopped,
            Err(_) => true,
        }
    }

    /// Sleep for `period`. Returns false if shutdown fired before or during the wait.
    pub fn sleep(&self, period: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + period;
        let mut stopped = match flag.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            stopped = match condvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
        false
    }
}

/// Shortest period a background loop will wait between runs
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Run `task` every `period` (at least `MIN_PERIOD`) on a named thread until `token` fires
pub fn spawn_periodic<F>(
    name: &str,
    period: Duration,
    token: ShutdownToken,
    mut task: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut() + Send + 'static,
{
    let thread_name = name.to_string();
    let period = period.max(MIN_PERIOD);
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            while token.sleep(period) {
                task();
            }
            debug!("Background loop {thread_name} stopped");
        })
        .map_err(|e| BlockchainError::Io(format!("Failed to spawn {name}: {e}")))
}
