//! Subscriber registry.
//!
//! One slot per key. Fan-out invokes every handler in arrival order and spawns
//! the returned future, so it never waits on a handler and a slow handler
//! still sees every later event. Handler errors and panics, whether raised by
//! the call itself or by its future, are caught per invocation and logged.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, warn};

use super::event::UpdateEvent;
use super::stats::FeedStats;
use crate::error::FaultKind;

/// Receives validated feed events.
///
/// Implemented for any `Fn(Arc<UpdateEvent>) -> impl Future<Output = Result<()>>`,
/// so async closures work directly.
pub trait UpdateHandler: Send + Sync + 'static {
    fn on_update(&self, event: Arc<UpdateEvent>) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> UpdateHandler for F
where
    F: Fn(Arc<UpdateEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn on_update(&self, event: Arc<UpdateEvent>) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(event))
    }
}

/// Liveness of one registration.
///
/// Turns inactive when the key is unsubscribed or re-registered. Events
/// dispatched before that still reach the handler; handlers that start
/// follow-up work (a re-fetch, say) check it before applying results.
#[derive(Debug, Clone)]
pub struct Interest {
    key: Arc<str>,
    active: Arc<AtomicBool>,
}

impl Interest {
    fn new(key: &str) -> Self {
        Self {
            key: Arc::from(key),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn revoke(&self) {
        self.active.store(false, Ordering::Release);
    }
}

struct Slot {
    handler: Arc<dyn UpdateHandler>,
    interest: Interest,
}

pub(crate) struct SubscriberRegistry {
    slots: DashMap<String, Slot>,
    stats: Arc<FeedStats>,
}

impl SubscriberRegistry {
    pub fn new(stats: Arc<FeedStats>) -> Self {
        Self {
            slots: DashMap::new(),
            stats,
        }
    }

    /// Register `handler` under `key`, replacing any previous registration.
    pub fn register<H: UpdateHandler>(&self, key: String, handler: H) -> Interest {
        let interest = Interest::new(&key);
        let slot = Slot {
            handler: Arc::new(handler),
            interest: interest.clone(),
        };

        if let Some(previous) = self.slots.insert(key, slot) {
            previous.interest.revoke();
            warn!(key = %interest.key(), "Replacing existing feed subscriber");
        }

        interest
    }

    /// Remove the registration for `key`. Returns whether one existed.
    pub fn unregister(&self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some((_, slot)) => {
                slot.interest.revoke();
                true
            }
            None => false,
        }
    }

    /// Invoke every current subscriber with `event`. Returns how many were invoked.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fan_out(&self, event: &Arc<UpdateEvent>) -> usize {
        // Snapshot first: handlers may subscribe or unsubscribe from inside the call.
        let targets: Vec<(Arc<dyn UpdateHandler>, Interest)> = self
            .slots
            .iter()
            .map(|slot| (Arc::clone(&slot.handler), slot.interest.clone()))
            .collect();

        for (handler, interest) in &targets {
            self.invoke(handler.as_ref(), interest, Arc::clone(event));
        }

        targets.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    fn invoke(&self, handler: &dyn UpdateHandler, interest: &Interest, event: Arc<UpdateEvent>) {
        let pending = match panic::catch_unwind(AssertUnwindSafe(|| handler.on_update(event))) {
            Ok(pending) => pending,
            Err(_) => {
                self.stats.record_failure();
                error!(
                    key = %interest.key(),
                    fault = %FaultKind::Subscriber,
                    "Feed subscriber panicked"
                );
                return;
            }
        };

        let interest = interest.clone();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            match AssertUnwindSafe(pending).catch_unwind().await {
                Ok(Ok(())) => stats.record_delivery(),
                Ok(Err(e)) => {
                    stats.record_failure();
                    warn!(
                        key = %interest.key(),
                        fault = %FaultKind::Subscriber,
                        error = %e,
                        "Feed subscriber failed"
                    );
                }
                Err(_) => {
                    stats.record_failure();
                    error!(
                        key = %interest.key(),
                        fault = %FaultKind::Subscriber,
                        "Feed subscriber panicked"
                    );
                }
            }
        });
    }
}
