//! Async timer driver for the engine.
//!
//! `DetectionService` shares an `Engine` between the caller's event path and a
//! tokio task that sleeps until the engine's next timer deadline. Key events
//! are handled synchronously on the caller's thread; each one wakes the task
//! through a `Notify` so it picks up the new schedule. The task exits when
//! `shutdown()` sends a signal over a `tokio::sync::oneshot` channel.
//!
//! All timestamps come from the tokio clock, so a paused test runtime drives
//! the engine deterministically.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::platform::{KeyEvent, MotionEvent};

// ---------------------------------------------------------------------------
// Public struct
// ---------------------------------------------------------------------------

pub struct DetectionService {
    engine: Arc<Mutex<Engine>>,
    wake: Arc<Notify>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DetectionService {
    /// Spawns the timer task. Must be called from within a tokio runtime.
    pub fn start(engine: Engine) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let wake = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(timer_loop(Arc::clone(&engine), Arc::clone(&wake), stop_rx));
        log::info!("service: detection started");
        Self {
            engine,
            wake,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Feeds one physical key event. Returns `true` when it must be swallowed.
    /// Never blocks on the timer task.
    pub fn on_key_event(&self, event: &KeyEvent) -> bool {
        let consumed = lock(&self.engine).on_key_event(event, now());
        self.wake.notify_one();
        consumed
    }

    /// Feeds one game controller HAT motion event. Returns `true` when it must
    /// be swallowed.
    pub fn on_motion_event(&self, event: &MotionEvent) -> bool {
        let consumed = lock(&self.engine).on_motion_event(event, now());
        self.wake.notify_one();
        consumed
    }

    pub fn on_device_disconnected(&self, device_id: i32) {
        lock(&self.engine).on_device_disconnected(device_id, now());
        self.wake.notify_one();
    }

    /// Drops all in-flight matches and stops running actions.
    pub fn reset(&self) {
        lock(&self.engine).reset();
        self.wake.notify_one();
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.engine).is_idle()
    }

    /// Stops the timer task, waits for it to exit and resets the engine.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The task may already be gone.
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("service: timer task ended abnormally: {e}");
            }
        }
        lock(&self.engine).reset();
        log::info!("service: detection stopped");
    }
}

impl Drop for DetectionService {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Timer loop
// ---------------------------------------------------------------------------

fn lock(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn timer_loop(
    engine: Arc<Mutex<Engine>>,
    wake: Arc<Notify>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        let deadline = lock(&engine).next_deadline();
        let sleep = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut stop_rx => {
                log::debug!("service: stop signal received");
                return;
            }
            _ = wake.notified() => {}
            _ = sleep => {
                lock(&engine).advance(now());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
