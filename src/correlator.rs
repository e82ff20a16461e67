use crate::error::{Result, YeelightError};
use crate::lock;
use crate::protocol::CommandResult;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::timeout;

/// A command waiting for its result
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub id: u32,
    pub method: String,
    pub params: Vec<Value>,
    pub sent_at: Instant,
}

/// Sending half of a call's handoff slot
struct Entry {
    call: PendingCall,
    tx: oneshot::Sender<CommandResult>,
}

/// A call taken out of the pending set whose result has not been handed over yet
pub struct Claim {
    pub call: PendingCall,
    tx: oneshot::Sender<CommandResult>,
}

impl Claim {
    /// Hand the result to whoever waits on this call
    pub fn deliver(self, result: CommandResult) -> PendingCall {
        tracing::debug!(
            "Request {} ({}) answered after {:?}",
            self.call.id,
            self.call.method,
            self.call.sent_at.elapsed()
        );
        // Nobody waiting any more is fine
        let _ = self.tx.send(result);
        self.call
    }
}

/// Receiving half of a call's handoff slot
struct Slot {
    rx: oneshot::Receiver<CommandResult>,
    created: Instant,
}

/// Matches results to the calls that caused them
#[derive(Default)]
pub struct Correlator {
    next_id: AtomicU32,
    calls: Mutex<HashMap<u32, Entry>>,
    slots: Mutex<HashMap<u32, Slot>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next request id
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Track a call until its result arrives
    pub fn register(&self, id: u32, method: &str, params: Vec<Value>) {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        lock(&self.calls).insert(
            id,
            Entry {
                call: PendingCall {
                    id,
                    method: method.to_string(),
                    params,
                    sent_at: now,
                },
                tx,
            },
        );
        lock(&self.slots).insert(id, Slot { rx, created: now });
    }

    /// Drop a call and its slot, e.g. after a failed write
    pub fn forget(&self, id: u32) {
        lock(&self.calls).remove(&id);
        lock(&self.slots).remove(&id);
    }

    /// Number of calls still waiting for a result
    pub fn pending_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Hand a result to its call's slot.
    ///
    /// Returns the resolved call, or `None` when no call is pending under the
    /// result's id; such results are not delivered anywhere.
    #[cfg(test)]
    pub fn resolve(&self, result: CommandResult) -> Option<PendingCall> {
        let claim = self.claim(result.id)?;
        Some(claim.deliver(result))
    }

    /// Take the pending call for `id` out of the set without delivering yet
    pub fn claim(&self, id: u32) -> Option<Claim> {
        match lock(&self.calls).remove(&id) {
            Some(Entry { call, tx }) => Some(Claim { call, tx }),
            None => {
                tracing::warn!("Dropping result for unknown request {}", id);
                None
            }
        }
    }

    /// Wait up to `limit` for the result of `id`
    pub async fn wait(&self, id: u32, limit: Duration) -> Result<CommandResult> {
        let slot = lock(&self.slots).remove(&id).ok_or(YeelightError::UnknownRequest(id))?;

        match timeout(limit, slot.rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(YeelightError::ConnectionClosed),
            Err(_) => {
                lock(&self.calls).remove(&id);
                Err(YeelightError::Timeout)
            }
        }
    }

    /// Discard calls and unclaimed results older than `max_age`
    pub fn prune(&self, max_age: Duration) {
        let now = Instant::now();
        lock(&self.calls).retain(|_, entry| now.duration_since(entry.call.sent_at) < max_age);
        lock(&self.slots).retain(|_, slot| now.duration_since(slot.created) < max_age);
    }

    /// Fail every outstanding call; waiters see [`YeelightError::ConnectionClosed`]
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}
