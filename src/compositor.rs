//! Effect compositor: registry, render loop, frame assembly
//!
//! [`CompositorService`] owns the effect registry and renders it at a fixed
//! cadence. Every mutation goes through the service channel, so mutations
//! are serialized with render ticks and each tick sees a consistent registry.
//!
//! A tick resolves every registered effect to concrete LED indices and
//! paints them over an idle-colored frame in ascending priority order, so
//! the rendered color at any LED is the highest-priority effect covering
//! it. Identical consecutive frames are not re-sent.
//!
//! The loop rests (no timer armed) while no registered entry is
//! time-varying and nothing is pending expiry; adding an effect or a
//! reconnect arms it again.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::effects::{compute_colors, ActiveEffect, EffectKind, EffectTarget, RgbEffect};
use crate::models::{Color, CompositorConfig};
use crate::protocol::DeviceInfo;

#[derive(Debug)]
enum CompositorMessage {
    AddEffect {
        id: String,
        effect: RgbEffect,
        timeout_ms: u64,
    },
    RemoveEffect {
        id: String,
    },
    HasEffect {
        id: String,
        response: oneshot::Sender<bool>,
    },
    SetProgress {
        id: String,
        progress: f32,
    },
    ClearAll,
    RenderOnce,
    Stop(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompositorControl {
    Continue,
    Break,
}

#[derive(Debug, Error)]
pub enum CompositorHandleError {
    #[error("the compositor service is no longer running")]
    Dropped,
}

impl<T> From<mpsc::error::SendError<T>> for CompositorHandleError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Dropped
    }
}

impl From<oneshot::error::RecvError> for CompositorHandleError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Dropped
    }
}

/// Cloneable handle to a running [`CompositorService`]
#[derive(Clone)]
pub struct CompositorHandle {
    tx: mpsc::Sender<CompositorMessage>,
}

impl CompositorHandle {
    /// Register or replace an effect slot
    ///
    /// The slot's clock restarts now. `timeout_ms` of zero means the effect
    /// stays until removed.
    pub async fn add_effect(
        &self,
        id: impl Into<String>,
        effect: RgbEffect,
        timeout_ms: u64,
    ) -> Result<(), CompositorHandleError> {
        Ok(self
            .tx
            .send(CompositorMessage::AddEffect {
                id: id.into(),
                effect,
                timeout_ms,
            })
            .await?)
    }

    /// Remove a slot and render the result immediately
    pub async fn remove_effect(&self, id: impl Into<String>) -> Result<(), CompositorHandleError> {
        Ok(self
            .tx
            .send(CompositorMessage::RemoveEffect { id: id.into() })
            .await?)
    }

    pub async fn has_effect(&self, id: impl Into<String>) -> Result<bool, CompositorHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(CompositorMessage::HasEffect {
                id: id.into(),
                response: tx,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Update the completion ratio of a registered progress effect
    pub async fn set_progress(
        &self,
        id: impl Into<String>,
        progress: f32,
    ) -> Result<(), CompositorHandleError> {
        Ok(self
            .tx
            .send(CompositorMessage::SetProgress {
                id: id.into(),
                progress,
            })
            .await?)
    }

    /// Drop every slot and render the idle frame
    pub async fn clear_all(&self) -> Result<(), CompositorHandleError> {
        Ok(self.tx.send(CompositorMessage::ClearAll).await?)
    }

    /// Render one frame outside the fixed cadence
    pub async fn render_once(&self) -> Result<(), CompositorHandleError> {
        Ok(self.tx.send(CompositorMessage::RenderOnce).await?)
    }

    /// Stop the render loop
    pub async fn stop(&self) -> Result<(), CompositorHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(CompositorMessage::Stop(tx)).await?;
        Ok(rx.await?)
    }
}

pub struct CompositorService {
    config: CompositorConfig,
    render_interval: Duration,
    connection: ConnectionHandle,
    connection_rx: watch::Receiver<ConnectionState>,
    rx: mpsc::Receiver<CompositorMessage>,
    registry: HashMap<String, ActiveEffect>,
    /// Last frame actually sent, the dirty-check baseline
    last_frame: Option<Vec<Color>>,
    /// Next scheduled tick, `None` while resting
    tick_at: Option<Instant>,
}

impl CompositorService {
    pub fn new(config: CompositorConfig, connection: ConnectionHandle) -> (Self, CompositorHandle) {
        let (tx, rx) = mpsc::channel(32);
        let connection_rx = connection.subscribe();
        let render_interval = Duration::from_millis(config.render_interval_ms);

        (
            Self {
                config,
                render_interval,
                connection,
                connection_rx,
                rx,
                registry: HashMap::new(),
                last_frame: None,
                tick_at: None,
            },
            CompositorHandle { tx },
        )
    }

    pub async fn run(mut self) {
        loop {
            select! {
                message = self.rx.recv() => {
                    match message {
                        Some(message) => {
                            if self.handle_message(message).await == CompositorControl::Break {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                changed = self.connection_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            // The device may carry stale colors after a
                            // reconnect, so the baseline no longer holds
                            if self.connection_rx.borrow_and_update().connected {
                                self.last_frame = None;
                                self.tick_at = Some(Instant::now());
                            }
                        }
                        Err(_) => break,
                    }
                }
                _ = Self::tick_timer(self.tick_at) => {
                    self.render_tick().await;
                    self.reschedule();
                }
            }
        }
    }

    async fn handle_message(&mut self, message: CompositorMessage) -> CompositorControl {
        match message {
            CompositorMessage::AddEffect {
                id,
                effect,
                timeout_ms,
            } => {
                debug!(id = %id, effect = %effect.name, timeout_ms = %timeout_ms, "effect added");
                self.registry.insert(id, ActiveEffect::new(effect, timeout_ms));
                if self.tick_at.is_none() {
                    self.tick_at = Some(Instant::now());
                }
            }
            CompositorMessage::RemoveEffect { id } => {
                if self.registry.remove(&id).is_some() {
                    debug!(id = %id, "effect removed");
                }
                self.render_tick().await;
                self.reschedule();
            }
            CompositorMessage::HasEffect { id, response } => {
                response.send(self.registry.contains_key(&id)).ok();
            }
            CompositorMessage::SetProgress { id, progress } => {
                if let Some(entry) = self.registry.get_mut(&id) {
                    if let EffectKind::Progress { progress: value, .. } = &mut entry.effect.kind {
                        *value = progress;
                        if self.tick_at.is_none() {
                            self.tick_at = Some(Instant::now());
                        }
                    }
                }
            }
            CompositorMessage::ClearAll => {
                self.registry.clear();
                self.render_tick().await;
                self.reschedule();
            }
            CompositorMessage::RenderOnce => {
                self.render_tick().await;
                self.reschedule();
            }
            CompositorMessage::Stop(tx) => {
                self.registry.clear();
                tx.send(()).ok();
                return CompositorControl::Break;
            }
        }

        CompositorControl::Continue
    }

    /// One render pass: sweep expired entries, assemble the frame, send it
    /// if it differs from the baseline
    ///
    /// Failures are logged and leave the loop running.
    async fn render_tick(&mut self) {
        if !self.config.enabled || !self.connection.is_connected() {
            return;
        }

        let devices = self.connection.devices();
        let device = match devices.get(self.config.device_index as usize) {
            Some(device) if device.num_leds > 0 => device,
            _ => {
                trace!(device = %self.config.device_index, "device not available, skipping tick");
                return;
            }
        };

        let now = std::time::Instant::now();
        self.registry.retain(|id, entry| {
            if entry.is_expired(now) {
                debug!(id = %id, "effect expired");
                false
            } else {
                true
            }
        });

        let frame = render_frame(&self.registry, device, self.config.idle_color, now);

        if self.last_frame.as_ref() == Some(&frame) {
            return;
        }

        if let Err(error) = self.connection.push_frame(frame.clone()).await {
            warn!(error = %error, "failed to push frame");
            return;
        }

        self.last_frame = Some(frame);
    }

    fn reschedule(&mut self) {
        if self.registry.values().any(|entry| entry.needs_ticking()) {
            self.tick_at = Some(Instant::now() + self.render_interval);
        } else {
            if self.tick_at.is_some() {
                trace!("render loop resting");
            }
            self.tick_at = None;
        }
    }

    async fn tick_timer(deadline: Option<Instant>) {
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await
        } else {
            futures::future::pending::<()>().await
        }
    }
}

/// Assemble one frame from the registry
///
/// Effects paint in ascending priority order, so at every LED the last
/// write is the highest-priority effect covering it. Positions nothing
/// covers keep the idle color.
fn render_frame(
    registry: &HashMap<String, ActiveEffect>,
    device: &DeviceInfo,
    idle_color: Color,
    now: std::time::Instant,
) -> Vec<Color> {
    let mut frame = vec![idle_color; device.num_leds];

    let mut entries: Vec<&ActiveEffect> = registry.values().collect();
    entries.sort_by_key(|entry| entry.effect.priority);

    for entry in entries {
        let indices = resolve_indices(&entry.effect.target, device);
        if indices.is_empty() {
            continue;
        }

        let colors = compute_colors(
            &entry.effect,
            entry.elapsed_ms(now),
            indices.len(),
            device.num_leds,
            idle_color,
        );

        for (position, index) in indices.into_iter().enumerate() {
            frame[index] = colors[position];
        }
    }

    frame
}

/// Resolve a target to concrete LED indices on a device
///
/// Out-of-range indices and unknown zones resolve to nothing rather than
/// erroring; devices shrink across reconnects.
fn resolve_indices(target: &EffectTarget, device: &DeviceInfo) -> Vec<usize> {
    match target {
        EffectTarget::AllLeds => (0..device.num_leds).collect(),
        EffectTarget::SingleLed(index) => {
            if *index < device.num_leds {
                vec![*index]
            } else {
                Vec::new()
            }
        }
        EffectTarget::LedSet(indices) => indices
            .iter()
            .copied()
            .filter(|&index| index < device.num_leds)
            .collect(),
        EffectTarget::Zone(zone_index) => device
            .zone_led_range(*zone_index)
            .map(|range| range.collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::tests::spawn_server;
    use crate::connection::ConnectionService;
    use crate::models::{Config, MultiDeviceConfig, ServerConfig};
    use crate::protocol::{Packet, ZoneInfo, PACKET_UPDATE_LEDS};

    fn test_device(num_leds: usize, zone_counts: &[usize]) -> DeviceInfo {
        DeviceInfo {
            device_type: 5,
            name: "unit".to_owned(),
            vendor: String::new(),
            description: String::new(),
            num_leds,
            led_names: (0..num_leds).map(|index| format!("LED {}", index)).collect(),
            zones: zone_counts
                .iter()
                .enumerate()
                .map(|(index, &count)| ZoneInfo {
                    name: format!("Zone {}", index),
                    zone_type: 2,
                    leds_count: count,
                })
                .collect(),
            colors: vec![Color::new(0, 0, 0); num_leds],
        }
    }

    fn registry_of(entries: Vec<(&str, RgbEffect)>) -> HashMap<String, ActiveEffect> {
        entries
            .into_iter()
            .map(|(id, effect)| (id.to_owned(), ActiveEffect::new(effect, 0)))
            .collect()
    }

    fn idle() -> Color {
        Color::new(9, 9, 9)
    }

    #[test]
    fn overlapping_targets_resolve_by_priority_not_insertion_order() {
        let device = test_device(4, &[]);
        let red = Color::new(255, 0, 0);
        let blue = Color::new(0, 0, 255);

        let forwards = registry_of(vec![
            ("low", RgbEffect::static_color(blue).with_priority(1)),
            ("high", RgbEffect::static_color(red).with_priority(9)),
        ]);
        let backwards = registry_of(vec![
            ("high", RgbEffect::static_color(red).with_priority(9)),
            ("low", RgbEffect::static_color(blue).with_priority(1)),
        ]);

        let now = std::time::Instant::now();
        assert_eq!(render_frame(&forwards, &device, idle(), now), vec![red; 4]);
        assert_eq!(render_frame(&backwards, &device, idle(), now), vec![red; 4]);
    }

    #[test]
    fn disjoint_targets_coexist() {
        let device = test_device(4, &[]);
        let red = Color::new(255, 0, 0);
        let green = Color::new(0, 255, 0);

        let registry = registry_of(vec![
            (
                "left",
                RgbEffect::static_color(red)
                    .with_priority(9)
                    .with_target(EffectTarget::LedSet(vec![0, 1])),
            ),
            (
                "right",
                RgbEffect::static_color(green)
                    .with_priority(1)
                    .with_target(EffectTarget::LedSet(vec![2, 3])),
            ),
        ]);

        let frame = render_frame(&registry, &device, idle(), std::time::Instant::now());
        assert_eq!(frame, vec![red, red, green, green]);
    }

    #[test]
    fn partial_overlap_yields_higher_priority_on_overlap_only() {
        let device = test_device(3, &[]);
        let red = Color::new(255, 0, 0);
        let green = Color::new(0, 255, 0);

        let registry = registry_of(vec![
            (
                "wide",
                RgbEffect::static_color(green)
                    .with_priority(1)
                    .with_target(EffectTarget::LedSet(vec![0, 1])),
            ),
            (
                "narrow",
                RgbEffect::static_color(red)
                    .with_priority(5)
                    .with_target(EffectTarget::LedSet(vec![1, 2])),
            ),
        ]);

        let frame = render_frame(&registry, &device, idle(), std::time::Instant::now());
        assert_eq!(frame, vec![green, red, red]);
    }

    #[test]
    fn zone_target_covers_cumulative_range() {
        let device = test_device(5, &[2, 3]);
        let yellow = Color::new(255, 255, 0);

        let registry = registry_of(vec![(
            "zone",
            RgbEffect::static_color(yellow).with_target(EffectTarget::Zone(1)),
        )]);

        let frame = render_frame(&registry, &device, idle(), std::time::Instant::now());
        assert_eq!(frame, vec![idle(), idle(), yellow, yellow, yellow]);
    }

    #[test]
    fn out_of_range_targets_render_nothing() {
        let device = test_device(2, &[2]);
        let red = Color::new(255, 0, 0);

        let registry = registry_of(vec![
            (
                "led",
                RgbEffect::static_color(red).with_target(EffectTarget::SingleLed(9)),
            ),
            (
                "zone",
                RgbEffect::static_color(red).with_target(EffectTarget::Zone(7)),
            ),
            (
                "set",
                RgbEffect::static_color(red).with_target(EffectTarget::LedSet(vec![5, 6])),
            ),
        ]);

        let frame = render_frame(&registry, &device, idle(), std::time::Instant::now());
        assert_eq!(frame, vec![idle(), idle()]);
    }

    #[test]
    fn progress_on_all_leds_uses_device_extent() {
        let device = test_device(10, &[]);
        let color = Color::new(0, 200, 0);

        let registry = registry_of(vec![("progress", RgbEffect::progress(color, 0.5))]);
        let frame = render_frame(&registry, &device, idle(), std::time::Instant::now());

        assert_eq!(frame.iter().filter(|&&led| led == color).count(), 5);
        assert_eq!(frame[..5], vec![color; 5][..]);
    }

    #[test]
    fn empty_registry_renders_idle_frame() {
        let device = test_device(3, &[]);
        let frame = render_frame(&HashMap::new(), &device, idle(), std::time::Instant::now());
        assert_eq!(frame, vec![idle(); 3]);
    }

    // End-to-end tests against a fake SDK server; the test device reported
    // by the server has two LEDs.

    fn red() -> Color {
        Color::new(255, 0, 0)
    }

    /// Idle color from `CompositorConfig::default`
    pub(crate) fn default_idle() -> Color {
        Color::new(0x26, 0x32, 0x38)
    }

    pub(crate) async fn start_stack(
        compositor_config: CompositorConfig,
    ) -> (CompositorHandle, ConnectionHandle, mpsc::UnboundedReceiver<Packet>) {
        let (port, seen) = spawn_server(1).await;

        let config = Config {
            server: ServerConfig {
                port,
                request_timeout_ms: 500,
                ..ServerConfig::default()
            },
            compositor: compositor_config,
            multi_device: MultiDeviceConfig::default(),
        };

        let (service, connection) = ConnectionService::new(&config);
        tokio::spawn(service.run());
        connection.connect().await.unwrap();

        let mut state = connection.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if state.borrow_and_update().connected {
                    break;
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let (service, compositor) = CompositorService::new(config.compositor, connection.clone());
        tokio::spawn(service.run());

        (compositor, connection, seen)
    }

    pub(crate) fn fast_compositor() -> CompositorConfig {
        CompositorConfig {
            render_interval_ms: 20,
            ..CompositorConfig::default()
        }
    }

    pub(crate) fn decode_update(payload: &[u8]) -> Vec<Color> {
        let count = u16::from_le_bytes([payload[4], payload[5]]) as usize;
        let mut colors = Vec::with_capacity(count);

        for led in 0..count {
            let at = 6 + led * 4;
            colors.push(Color::new(payload[at], payload[at + 1], payload[at + 2]));
        }

        colors
    }

    pub(crate) async fn next_update_frame(seen: &mut mpsc::UnboundedReceiver<Packet>) -> Vec<Color> {
        loop {
            let packet = tokio::time::timeout(Duration::from_secs(2), seen.recv())
                .await
                .expect("timed out waiting for an LED update")
                .expect("server task stopped");

            if packet.header.packet_id == PACKET_UPDATE_LEDS {
                return decode_update(&packet.payload);
            }
        }
    }

    #[tokio::test]
    async fn renders_registered_effect_to_the_device() {
        let (compositor, _connection, mut seen) = start_stack(fast_compositor()).await;

        compositor
            .add_effect("status", RgbEffect::static_color(red()), 0)
            .await
            .unwrap();

        assert_eq!(next_update_frame(&mut seen).await, vec![red(), red()]);
    }

    #[tokio::test]
    async fn higher_priority_wins_until_removed() {
        let (compositor, _connection, mut seen) = start_stack(fast_compositor()).await;
        let blue = Color::new(0, 0, 255);

        compositor
            .add_effect("low", RgbEffect::static_color(blue).with_priority(1), 0)
            .await
            .unwrap();
        assert_eq!(next_update_frame(&mut seen).await, vec![blue, blue]);

        compositor
            .add_effect("high", RgbEffect::static_color(red()).with_priority(10), 0)
            .await
            .unwrap();
        assert_eq!(next_update_frame(&mut seen).await, vec![red(), red()]);

        compositor.remove_effect("high").await.unwrap();
        assert_eq!(next_update_frame(&mut seen).await, vec![blue, blue]);
    }

    #[tokio::test]
    async fn identical_frames_are_sent_once() {
        let (compositor, _connection, mut seen) = start_stack(fast_compositor()).await;

        // A flash is time-varying, so the loop keeps ticking, but its frame
        // stays constant until the flash duration elapses
        compositor
            .add_effect("flash", RgbEffect::flash(red()), 0)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut updates = 0;
        while let Ok(packet) = seen.try_recv() {
            if packet.header.packet_id == PACKET_UPDATE_LEDS {
                updates += 1;
            }
        }

        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn timed_effect_expires_and_reverts_to_idle() {
        let (compositor, _connection, mut seen) = start_stack(fast_compositor()).await;

        compositor
            .add_effect("blip", RgbEffect::static_color(red()), 150)
            .await
            .unwrap();
        assert!(compositor.has_effect("blip").await.unwrap());

        assert_eq!(next_update_frame(&mut seen).await, vec![red(), red()]);
        assert_eq!(
            next_update_frame(&mut seen).await,
            vec![default_idle(), default_idle()]
        );
        assert!(!compositor.has_effect("blip").await.unwrap());
    }

    #[tokio::test]
    async fn remove_renders_immediately_while_resting() {
        let (compositor, _connection, mut seen) = start_stack(fast_compositor()).await;

        // An untimed static effect renders once, then the loop rests
        compositor
            .add_effect("steady", RgbEffect::static_color(red()), 0)
            .await
            .unwrap();
        assert_eq!(next_update_frame(&mut seen).await, vec![red(), red()]);

        compositor.remove_effect("steady").await.unwrap();
        assert_eq!(
            next_update_frame(&mut seen).await,
            vec![default_idle(), default_idle()]
        );
    }

    #[tokio::test]
    async fn progress_updates_render_new_frames() {
        let (compositor, _connection, mut seen) = start_stack(fast_compositor()).await;
        let green = Color::new(0, 200, 0);
        let background = Color::new(20, 20, 20);

        compositor
            .add_effect("build", RgbEffect::progress(green, 0.0), 0)
            .await
            .unwrap();
        assert_eq!(
            next_update_frame(&mut seen).await,
            vec![background, background]
        );

        compositor.set_progress("build", 1.0).await.unwrap();
        assert_eq!(next_update_frame(&mut seen).await, vec![green, green]);
    }

    #[tokio::test]
    async fn disabled_compositor_never_writes() {
        let config = CompositorConfig {
            enabled: false,
            ..fast_compositor()
        };
        let (compositor, _connection, mut seen) = start_stack(config).await;

        compositor
            .add_effect("ignored", RgbEffect::static_color(red()), 0)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        while let Ok(packet) = seen.try_recv() {
            assert_ne!(packet.header.packet_id, PACKET_UPDATE_LEDS);
        }
    }
}
