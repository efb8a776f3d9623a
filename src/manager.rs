//! Single-slot effect facade
//!
//! Event sources that only ever want "the one global effect" (build status,
//! test results) go through [`EffectManager`] instead of managing registry
//! ids themselves. It keeps one tracked global slot, arbitrates by priority,
//! and clears its tracking after a timed effect runs out. Targeted
//! per-LED effects pass straight through to the compositor registry under
//! caller-chosen ids and are never touched by the global slot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::compositor::{CompositorHandle, CompositorHandleError};
use crate::connection::ConnectionHandle;
use crate::effects::RgbEffect;
use crate::models::CompositorConfig;

/// Slack after a timed effect's expiry before the tracking resets
const CLEANUP_SLACK: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct GlobalSlot {
    id: Option<String>,
    priority: i32,
}

impl GlobalSlot {
    fn new() -> Self {
        Self {
            id: None,
            priority: -1,
        }
    }

    fn reset(&mut self) {
        self.id = None;
        self.priority = -1;
    }
}

#[derive(Clone)]
pub struct EffectManager {
    enabled: bool,
    default_duration_ms: u64,
    connection: ConnectionHandle,
    compositor: CompositorHandle,
    global: Arc<Mutex<GlobalSlot>>,
}

impl EffectManager {
    pub fn new(
        config: &CompositorConfig,
        connection: ConnectionHandle,
        compositor: CompositorHandle,
    ) -> Self {
        Self {
            enabled: config.enabled,
            default_duration_ms: config.effect_duration_ms,
            connection,
            compositor,
            global: Arc::new(Mutex::new(GlobalSlot::new())),
        }
    }

    /// Apply a global effect, replacing the current one
    ///
    /// No-op while disabled or disconnected. An incoming effect with a lower
    /// priority than the tracked one is skipped. `timeout_ms` of `None`
    /// falls back to the configured default duration; zero makes the effect
    /// persistent.
    pub async fn apply_effect(
        &self,
        effect: RgbEffect,
        timeout_ms: Option<u64>,
    ) -> Result<(), CompositorHandleError> {
        if !self.enabled || !self.connection.is_connected() {
            return Ok(());
        }

        let mut global = self.global.lock().await;

        if global.id.is_some() && global.priority > effect.priority {
            debug!(
                effect = %effect.name,
                priority = %effect.priority,
                current = %global.priority,
                "effect skipped by priority"
            );
            return Ok(());
        }

        if let Some(previous) = global.id.take() {
            self.compositor.remove_effect(previous).await?;
        }

        let id = format!("global:{}:{}", effect.name, Utc::now().timestamp_millis());
        let duration = timeout_ms.unwrap_or(self.default_duration_ms);

        info!(effect = %effect.name, priority = %effect.priority, "applying effect");

        global.id = Some(id.clone());
        global.priority = effect.priority;

        self.compositor.add_effect(id.clone(), effect, duration).await?;

        if duration > 0 {
            self.schedule_global_cleanup(id, duration);
        }

        Ok(())
    }

    /// Apply with the configured default duration
    pub async fn apply_temporary(&self, effect: RgbEffect) -> Result<(), CompositorHandleError> {
        self.apply_effect(effect, None).await
    }

    /// Apply until replaced or removed
    pub async fn apply_persistent(&self, effect: RgbEffect) -> Result<(), CompositorHandleError> {
        self.apply_effect(effect, Some(0)).await
    }

    /// Drop the global slot and render the result
    ///
    /// Targeted effects keep rendering; only the global slot goes away.
    pub async fn return_to_idle(&self) -> Result<(), CompositorHandleError> {
        {
            let mut global = self.global.lock().await;
            if let Some(previous) = global.id.take() {
                self.compositor.remove_effect(previous).await?;
            }
            global.reset();
        }

        self.compositor.render_once().await
    }

    /// Drop the global slot without forcing a render
    pub async fn clear_effect(&self) -> Result<(), CompositorHandleError> {
        let mut global = self.global.lock().await;
        if let Some(previous) = global.id.take() {
            self.compositor.remove_effect(previous).await?;
        }
        global.reset();

        Ok(())
    }

    /// Re-render whatever the registry currently holds
    pub async fn restore_current_effect(&self) -> Result<(), CompositorHandleError> {
        self.compositor.render_once().await
    }

    /// Register an effect under a caller-chosen id
    pub async fn add_targeted_effect(
        &self,
        id: impl Into<String>,
        effect: RgbEffect,
        timeout_ms: u64,
    ) -> Result<(), CompositorHandleError> {
        if !self.enabled || !self.connection.is_connected() {
            return Ok(());
        }

        self.compositor.add_effect(id, effect, timeout_ms).await
    }

    pub async fn remove_targeted_effect(
        &self,
        id: impl Into<String>,
    ) -> Result<(), CompositorHandleError> {
        self.compositor.remove_effect(id).await
    }

    pub async fn has_targeted_effect(
        &self,
        id: impl Into<String>,
    ) -> Result<bool, CompositorHandleError> {
        self.compositor.has_effect(id).await
    }

    fn schedule_global_cleanup(&self, id: String, duration_ms: u64) {
        let global = Arc::clone(&self.global);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms) + CLEANUP_SLACK).await;

            let mut global = global.lock().await;
            if global.id.as_deref() == Some(id.as_str()) {
                trace!(id = %id, "global effect tracking cleared");
                global.reset();
            }
        });
    }
}
