use crate::logger::{self, LogTag};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

// ═══════════════════════════════════════════════════════════════════════════════
// SHUTDOWN MANAGEMENT SYSTEM
// ═══════════════════════════════════════════════════════════════════════════════
//
// Ensures a safe and complete shutdown by:
// 1. Refusing new publishes once shutdown is requested
// 2. Tracking and waiting for in-flight delivery attempts
// 3. Flushing logs before exit
//
// SHUTDOWN PHASES:
// Phase 1: Signal received - stop accepting new publishes
// Phase 2: Wait for in-flight deliveries to settle (bounded)
// Phase 3: Stop webserver, flush logs
// Phase 4: Exit cleanly
// ═══════════════════════════════════════════════════════════════════════════════

pub static SHUTDOWN_MANAGER: Lazy<ShutdownManager> = Lazy::new(ShutdownManager::new);

/// Global shutdown state management
pub struct ShutdownManager {
    /// Primary shutdown flag - refuses new publishes
    shutdown_requested: AtomicBool,

    /// In-flight delivery attempt counter
    active_deliveries: AtomicU32,

    /// Woken whenever a delivery settles or shutdown is requested
    notify: Arc<Notify>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_requested: AtomicBool::new(false),
            active_deliveries: AtomicU32::new(0),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Whether new publishes should still be accepted
    pub fn should_accept_publishes(&self) -> bool {
        !self.is_shutdown_requested()
    }

    /// Request shutdown (phase 1)
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.notify.notify_waiters();
        logger::info(LogTag::System, "Shutdown requested - refusing new publishes");
    }

    /// Notify handle for tasks that park until shutdown
    pub fn notified(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Track a delivery attempt; decremented by the returned guard
    pub fn delivery_started(&self) -> DeliveryGuard {
        self.active_deliveries.fetch_add(1, Ordering::AcqRel);
        DeliveryGuard
    }

    pub fn active_delivery_count(&self) -> u32 {
        self.active_deliveries.load(Ordering::Acquire)
    }

    /// Phase 2: wait until in-flight deliveries settle or the timeout passes
    pub async fn drain_deliveries(&self, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;

        while self.active_delivery_count() > 0 {
            let remaining = self.active_delivery_count();
            logger::info(
                LogTag::System,
                &format!("Waiting for {} in-flight deliveries...", remaining),
            );

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                logger::warning(
                    LogTag::System,
                    &format!(
                        "Shutdown drain timed out with {} deliveries still in flight",
                        self.active_delivery_count()
                    ),
                );
                return;
            }
        }

        logger::info(LogTag::System, "All deliveries settled");
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight delivery attempt
pub struct DeliveryGuard;

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        SHUTDOWN_MANAGER
            .active_deliveries
            .fetch_sub(1, Ordering::AcqRel);
        SHUTDOWN_MANAGER.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_guards_balance() {
        // The counter is global and other tests hold guards concurrently,
        // so only the guard lifecycle itself is asserted here
        let _g1 = SHUTDOWN_MANAGER.delivery_started();
        let _g2 = SHUTDOWN_MANAGER.delivery_started();
        assert!(SHUTDOWN_MANAGER.active_delivery_count() >= 2);
        drop(_g1);
        drop(_g2);
    }

    #[tokio::test]
    async fn test_drain_returns_when_idle() {
        let manager = ShutdownManager::new();
        manager
            .drain_deliveries(std::time::Duration::from_millis(50))
            .await;
    }
}
