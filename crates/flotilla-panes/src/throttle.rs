//! Global multiplexer RPC gate.
//!
//! One mutex serializes every RPC system-wide; the holder sleeps out the
//! remainder of the minimum gap before issuing its call. Callers that cannot
//! tolerate the wait should not be talking to the multiplexer.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const MIN_RPC_GAP: Duration = Duration::from_millis(200);

pub struct RpcGate {
    last: Mutex<Option<Instant>>,
    gap: Duration,
}

impl Default for RpcGate {
    fn default() -> Self {
        Self::new(MIN_RPC_GAP)
    }
}

impl RpcGate {
    pub fn new(gap: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            gap,
        }
    }

    /// Wait for our turn and for the minimum gap since the previous RPC.
    /// The returned guard must be held for the duration of the RPC.
    pub async fn pass(&self) -> GatePass<'_> {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.gap {
                tokio::time::sleep(self.gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        GatePass { _guard: last }
    }
}

/// Holding this keeps the gate closed to other callers.
pub struct GatePass<'a> {
    _guard: tokio::sync::MutexGuard<'a, Option<Instant>>,
}
