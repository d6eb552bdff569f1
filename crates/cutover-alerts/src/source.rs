//! The alert source seam and its in-process implementations.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use cutover_core::{AlertSignal, ServiceRef};

use crate::error::{AlertError, AlertResult};

/// Boxed future returned by [`AlertSource::firing`].
pub type AlertFuture<'a> = Pin<Box<dyn Future<Output = AlertResult<Vec<AlertSignal>>> + Send + 'a>>;

/// Reports alerts currently firing for a service, injected for
/// testability.
pub trait AlertSource: Send + Sync {
    fn firing<'a>(&'a self, service: &'a ServiceRef) -> AlertFuture<'a>;
}

/// Source used when no alerting backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlerts;

impl AlertSource for NoAlerts {
    fn firing<'a>(&'a self, _service: &'a ServiceRef) -> AlertFuture<'a> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[derive(Default)]
struct Inner {
    firing: Vec<AlertSignal>,
    failures: VecDeque<String>,
}

/// Alerts held in memory. Every poll sees everything fired so far until
/// [`clear`](Self::clear) is called.
#[derive(Default)]
pub struct MemoryAlertSource {
    inner: Mutex<Inner>,
}

impl MemoryAlertSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self, signal: AlertSignal) {
        self.lock().firing.push(signal);
    }

    pub fn clear(&self) {
        self.lock().firing.clear();
    }

    /// Make the next `count` polls fail.
    pub fn fail_next(&self, count: usize, reason: &str) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.failures.push_back(reason.to_string());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AlertSource for MemoryAlertSource {
    fn firing<'a>(&'a self, _service: &'a ServiceRef) -> AlertFuture<'a> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(reason) = inner.failures.pop_front() {
                return Err(AlertError::Unavailable(reason));
            }
            Ok(inner.firing.clone())
        })
    }
}
