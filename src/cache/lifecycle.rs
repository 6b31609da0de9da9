//! Start/stop coordination for the background event loops.

use log::debug;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopped,
}

/// One-way Idle → Running → Stopped. Start is idempotent while running;
/// once stopped, the cache cannot be restarted.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    stop_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(LifecycleState::Idle),
            stop_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    /// Returns whether the caller should spawn the loops: `Ok(true)` on the
    /// first start, `Ok(false)` when already running.
    pub fn begin_start(&self) -> Result<bool, CacheError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            LifecycleState::Idle => {
                *state = LifecycleState::Running;
                Ok(true)
            }
            LifecycleState::Running => Ok(false),
            LifecycleState::Stopped => Err(CacheError::Internal(
                "cache lifecycle: start after stop".to_string(),
            )),
        }
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().unwrap().push(handle);
    }

    /// Signal the stop channel and wait for every registered loop to drain
    /// and acknowledge by exiting.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == LifecycleState::Stopped {
                return;
            }
            *state = LifecycleState::Stopped;
        }
        let _ = self.stop_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("event loops drained");
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
