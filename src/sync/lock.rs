use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("channel {channel} is locked by session {holder}")]
    AlreadyLocked { channel: String, holder: String },
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    acquired_at: Instant,
}

/// Session-scoped exclusive locks, one per channel.
///
/// Held locks are only evicted by [`ChannelLockService::sweep`] once they are
/// older than the TTL, which recovers channels from crashed sessions.
pub struct ChannelLockService {
    locks: Mutex<HashMap<String, LockEntry>>,
    ttl: Duration,
}

impl ChannelLockService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Succeeds when the channel is free or already held by `session`.
    pub fn acquire(&self, channel: &str, session: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        match locks.get_mut(channel) {
            Some(entry) if entry.holder != session => Err(LockError::AlreadyLocked {
                channel: channel.to_string(),
                holder: entry.holder.clone(),
            }),
            Some(entry) => {
                entry.acquired_at = Instant::now();
                Ok(())
            }
            None => {
                locks.insert(
                    channel.to_string(),
                    LockEntry {
                        holder: session.to_string(),
                        acquired_at: Instant::now(),
                    },
                );
                debug!(channel, session, "channel lock acquired");
                Ok(())
            }
        }
    }

    /// Only the holder can release. Returns whether a lock was removed.
    pub fn release(&self, channel: &str, session: &str) -> bool {
        let mut locks = self.locks.lock();
        if locks
            .get(channel)
            .is_some_and(|entry| entry.holder == session)
        {
            locks.remove(channel);
            debug!(channel, session, "channel lock released");
            true
        } else {
            false
        }
    }

    pub fn holder(&self, channel: &str) -> Option<String> {
        self.locks.lock().get(channel).map(|entry| entry.holder.clone())
    }

    pub fn sweep(&self) -> usize {
        self.sweep_expired(Instant::now())
    }

    fn sweep_expired(&self, now: Instant) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|channel, entry| {
            let keep = now.saturating_duration_since(entry.acquired_at) < self.ttl;
            if !keep {
                info!(channel = %channel, session = %entry.holder, "evicting stale channel lock");
            }
            keep
        });
        before - locks.len()
    }

    /// Acquires and returns a guard that releases the lock when dropped, so the
    /// lock goes away on every exit path of a channel's processing.
    pub fn guard(
        self: &Arc<Self>,
        channel: &str,
        session: &str,
    ) -> Result<ChannelLockGuard, LockError> {
        self.acquire(channel, session)?;
        Ok(ChannelLockGuard {
            service: self.clone(),
            channel: channel.to_string(),
            session: session.to_string(),
        })
    }

    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let evicted = self.sweep();
                if evicted > 0 {
                    info!(evicted, "lock sweep finished");
                }
            }
        })
    }
}

pub struct ChannelLockGuard {
    service: Arc<ChannelLockService>,
    channel: String,
    session: String,
}

impl ChannelLockGuard {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for ChannelLockGuard {
    fn drop(&mut self) {
        self.service.release(&self.channel, &self.session);
    }
}
