use std::time::Duration;

use tokio::task::JoinHandle;

/// A repeating task with an explicit start/stop lifecycle. The callback
/// runs once per period and keeps the loop alive by returning `true`.
/// Dropping the handle aborts the task, so every exit path releases the
/// timer.
#[derive(Debug)]
pub struct Periodic {
    handle: Option<JoinHandle<()>>,
}

impl Periodic {
    /// Start a repeating task; the first callback fires one period from now.
    pub fn spawn<F>(period: Duration, tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self::spawn_delayed(Duration::ZERO, period, tick)
    }

    /// Start a repeating task whose first callback fires after
    /// `delay + period`. Used to line up differently-loaded clients on a
    /// shared wall-clock start.
    pub fn spawn_delayed<F>(delay: Duration, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            loop {
                tokio::time::sleep(period).await;
                if !tick() {
                    break;
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A single deferred callback, cancellable before it fires.
#[derive(Debug)]
pub struct OneShot {
    handle: Option<JoinHandle<()>>,
}

impl OneShot {
    pub fn spawn_after<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.stop();
    }
}
