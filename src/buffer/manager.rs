//! Buffer manager: per-conversation quiet-period timers and the orphan sweep.
//!
//! The in-memory timer is a latency optimization only — both the timer and
//! the periodic sweep funnel into the same claim-and-drain sequence, and the
//! persisted lease decides who wins. A worker that loses the claim walks away
//! silently.

use crate::buffer::store::BufferStore;
use crate::error::Result;
use crate::{ConversationKey, InboundAction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;

/// Hook invoked with the coalesced fragments once a buffer is claimed.
#[async_trait]
pub trait DrainHandler: Send + Sync {
    async fn drain(&self, key: ConversationKey, fragments: Vec<String>) -> Result<()>;
}

/// Owns the per-key timers and the sweep; all cross-worker coordination goes
/// through the persisted buffer row.
pub struct BufferManager {
    store: BufferStore,
    drain: Arc<dyn DrainHandler>,
    timers: Arc<RwLock<HashMap<ConversationKey, tokio::task::JoinHandle<()>>>>,
    lease: Duration,
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager").finish_non_exhaustive()
    }
}

impl BufferManager {
    pub fn new(store: BufferStore, drain: Arc<dyn DrainHandler>, lease: Duration) -> Self {
        Self {
            store,
            drain,
            timers: Arc::new(RwLock::new(HashMap::new())),
            lease,
        }
    }

    /// Handle one inbound fragment: create or extend the buffer and rearm the
    /// quiet-period timer. A zero quiet period bypasses buffering entirely
    /// and drains the single fragment inline.
    pub async fn on_fragment(
        &self,
        key: ConversationKey,
        text: String,
        quiet_period: Duration,
    ) -> Result<InboundAction> {
        if quiet_period.is_zero() {
            self.drain.drain(key, vec![text]).await?;
            return Ok(InboundAction::Responded);
        }

        let outcome = self.store.append_fragment(&key, &text, quiet_period).await?;

        if outcome.claimed {
            // A worker holds the lease right now; this fragment either rides
            // along with the in-flight drain or seeds the next buffer. Either
            // way the sweep picks up whatever remains.
            tracing::debug!(%key, pending = outcome.fragment_count, "fragment queued behind live claim");
            return Ok(InboundAction::Queued { pending: outcome.fragment_count });
        }

        self.arm_timer(key, outcome.buffer_id, outcome.expires_at).await;

        Ok(InboundAction::Buffered { pending: outcome.fragment_count })
    }

    /// Arm (or rearm) the quiet-period timer for a key. The timer fires at
    /// the latest `expires_at`; rearming aborts the previous task.
    async fn arm_timer(
        &self,
        key: ConversationKey,
        buffer_id: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) {
        let store = self.store.clone();
        let drain = self.drain.clone();
        let lease = self.lease;

        let handle = tokio::spawn(async move {
            let wait = (expires_at - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            claim_and_drain(&store, drain.as_ref(), lease, &buffer_id).await;
        });

        let mut timers = self.timers.write().await;
        if let Some(previous) = timers.insert(key, handle) {
            previous.abort();
        }
    }

    /// Run the periodic sweep that recovers buffers orphaned by a process
    /// restart. The first pass runs immediately on startup.
    pub fn start_sweep(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let drain = self.drain.clone();
        let lease = self.lease;

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;

                let expired = match store.find_expired().await {
                    Ok(expired) => expired,
                    Err(error) => {
                        tracing::error!(%error, "buffer sweep scan failed");
                        continue;
                    }
                };

                for buffer in expired {
                    tracing::debug!(key = %buffer.key, buffer_id = %buffer.buffer_id, "sweep found expired buffer");
                    claim_and_drain(&store, drain.as_ref(), lease, &buffer.buffer_id).await;
                }
            }
        })
    }

    /// Abort every armed timer. Buffered conversations survive in the store
    /// and are recovered by the next process's sweep.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.write().await;
        for (key, handle) in timers.drain() {
            handle.abort();
            tracing::debug!(%key, "buffer timer stopped");
        }
    }
}

/// Claim the buffer, take its fragments, and hand them to the drain hook.
///
/// Losing the claim is an expected no-op. A drain failure after the take is
/// logged and swallowed: the row is already gone and the burst is not
/// replayed — the conversation simply gets no automated reply.
async fn claim_and_drain(
    store: &BufferStore,
    drain: &dyn DrainHandler,
    lease: Duration,
    buffer_id: &str,
) {
    match store.try_claim(buffer_id, lease).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(buffer_id, "claim lost to another worker");
            return;
        }
        Err(error) => {
            tracing::error!(%error, buffer_id, "claim attempt failed");
            return;
        }
    }

    let taken = match store.take_fragments(buffer_id).await {
        Ok(Some(taken)) => taken,
        Ok(None) => {
            tracing::debug!(buffer_id, "buffer already drained");
            return;
        }
        Err(error) => {
            tracing::error!(%error, buffer_id, "failed to take claimed fragments");
            return;
        }
    };

    let key = taken.key.clone();
    let count = taken.fragments.len();
    if let Err(error) = drain.drain(taken.key, taken.fragments).await {
        tracing::error!(%error, %key, fragments = count, "drain failed; burst dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tokio::sync::Mutex;

    /// Records every drain call for assertions.
    #[derive(Default)]
    struct RecordingDrain {
        calls: Mutex<Vec<(ConversationKey, Vec<String>)>>,
    }

    #[async_trait]
    impl DrainHandler for RecordingDrain {
        async fn drain(&self, key: ConversationKey, fragments: Vec<String>) -> Result<()> {
            self.calls.lock().await.push((key, fragments));
            Ok(())
        }
    }

    async fn setup(lease: Duration) -> (BufferManager, Arc<RecordingDrain>) {
        let pool = db::in_memory().await.expect("pool");
        let store = BufferStore::new(pool);
        store.initialize().await.expect("schema");
        let drain = Arc::new(RecordingDrain::default());
        (BufferManager::new(store, drain.clone(), lease), drain)
    }

    #[tokio::test]
    async fn burst_within_quiet_period_drains_once_in_order() {
        let (manager, drain) = setup(Duration::from_secs(120)).await;
        let key = ConversationKey::new("t1", "+51911111111");
        let quiet = Duration::from_millis(150);

        let first = manager
            .on_fragment(key.clone(), "Hola".into(), quiet)
            .await
            .expect("fragment");
        assert_eq!(first, InboundAction::Buffered { pending: 1 });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = manager
            .on_fragment(key.clone(), "tienes motos?".into(), quiet)
            .await
            .expect("fragment");
        assert_eq!(second, InboundAction::Buffered { pending: 2 });

        tokio::time::sleep(Duration::from_millis(400)).await;

        let calls = drain.calls.lock().await;
        assert_eq!(calls.len(), 1, "one coalesced drain expected");
        assert_eq!(calls[0].0, key);
        assert_eq!(calls[0].1, vec!["Hola", "tienes motos?"]);
    }

    #[tokio::test]
    async fn gap_longer_than_quiet_period_drains_twice() {
        let (manager, drain) = setup(Duration::from_secs(120)).await;
        let key = ConversationKey::new("t1", "+51922222222");
        let quiet = Duration::from_millis(80);

        manager
            .on_fragment(key.clone(), "primero".into(), quiet)
            .await
            .expect("fragment");
        tokio::time::sleep(Duration::from_millis(300)).await;

        manager
            .on_fragment(key.clone(), "segundo".into(), quiet)
            .await
            .expect("fragment");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let calls = drain.calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, vec!["primero"]);
        assert_eq!(calls[1].1, vec!["segundo"]);
    }

    #[tokio::test]
    async fn zero_quiet_period_bypasses_buffering() {
        let (manager, drain) = setup(Duration::from_secs(120)).await;
        let key = ConversationKey::new("t1", "+51933333333");

        let action = manager
            .on_fragment(key.clone(), "ya mismo".into(), Duration::ZERO)
            .await
            .expect("fragment");
        assert_eq!(action, InboundAction::Responded);

        let calls = drain.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec!["ya mismo"]);
    }

    #[tokio::test]
    async fn sweep_recovers_orphaned_buffer() {
        let pool = db::in_memory().await.expect("pool");
        let store = BufferStore::new(pool);
        store.initialize().await.expect("schema");
        let key = ConversationKey::new("t1", "+51944444444");

        // Simulate a buffer left behind by a crashed process: expired, no
        // lease, and no in-memory timer armed for it.
        store
            .append_fragment(&key, "quedó pendiente", Duration::ZERO)
            .await
            .expect("append");

        let drain = Arc::new(RecordingDrain::default());
        let manager = BufferManager::new(store, drain.clone(), Duration::from_secs(120));
        let sweep = manager.start_sweep(Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(300)).await;
        sweep.abort();

        let calls = drain.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec!["quedó pendiente"]);
    }

    #[tokio::test]
    async fn rearmed_timer_does_not_fire_early() {
        let (manager, drain) = setup(Duration::from_secs(120)).await;
        let key = ConversationKey::new("t1", "+51955555555");
        let quiet = Duration::from_millis(200);

        manager
            .on_fragment(key.clone(), "uno".into(), quiet)
            .await
            .expect("fragment");
        tokio::time::sleep(Duration::from_millis(120)).await;
        manager
            .on_fragment(key.clone(), "dos".into(), quiet)
            .await
            .expect("fragment");

        // The original deadline has passed, but the rearmed one has not.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(drain.calls.lock().await.is_empty(), "must wait for the rearmed deadline");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let calls = drain.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec!["uno", "dos"]);
    }
}
