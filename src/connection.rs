//! Connection lifecycle management
//!
//! [`ConnectionService`] is an actor owning the [`OpenRgbClient`]. Every
//! outbound command flows through its channel, so commands execute in
//! submission order and never race on the socket. Connection state and the
//! cached device list fan out through a watch channel, which keeps
//! [`ConnectionHandle::is_connected`] a plain memory read.
//!
//! On any I/O failure the client is dropped and, when enabled, reconnect
//! attempts run on a fixed schedule: one initial delay, then a constant
//! interval until a connect succeeds or `disconnect` cancels it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::client::{ClientError, OpenRgbClient};
use crate::models::{Color, Config, MultiDeviceConfig, ServerConfig};
use crate::protocol::DeviceInfo;

/// Pause between mirrored device updates
const MIRROR_PAUSE: Duration = Duration::from_millis(10);

/// Snapshot of the connection published to observers
///
/// The device cache is refreshed wholesale on connect and on
/// [`ConnectionHandle::refresh_devices`]; it is read-only in between.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub connected: bool,
    pub devices: Arc<Vec<DeviceInfo>>,
}

#[derive(Debug)]
enum ConnectionMessage {
    Connect,
    Disconnect(oneshot::Sender<()>),
    RefreshDevices,
    SetAllLeds { device_index: u32, color: Color },
    SetAllLedsMirrored { color: Color },
    UpdateLeds { device_index: u32, colors: Vec<Color> },
    UpdateZoneLeds { device_index: u32, zone_index: u32, colors: Vec<Color> },
    UpdateSingleLed { device_index: u32, led_index: u32, color: Color },
    PushFrame(Vec<Color>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnectionControl {
    Continue,
    Break,
}

#[derive(Debug, Error)]
pub enum ConnectionHandleError {
    #[error("the connection service is no longer running")]
    Dropped,
}

impl<T> From<mpsc::error::SendError<T>> for ConnectionHandleError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Dropped
    }
}

impl From<oneshot::error::RecvError> for ConnectionHandleError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Dropped
    }
}

/// Cloneable handle to a running [`ConnectionService`]
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<ConnectionMessage>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Fast connectivity check, never blocks on I/O
    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Cached device list
    pub fn devices(&self) -> Arc<Vec<DeviceInfo>> {
        self.state.borrow().devices.clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Enqueue a connect attempt; returns as soon as it is queued
    pub async fn connect(&self) -> Result<(), ConnectionHandleError> {
        Ok(self.tx.send(ConnectionMessage::Connect).await?)
    }

    /// Disconnect and cancel any pending reconnect
    pub async fn disconnect(&self) -> Result<(), ConnectionHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(ConnectionMessage::Disconnect(tx)).await?;
        Ok(rx.await?)
    }

    /// Re-fetch and republish the device list
    pub async fn refresh_devices(&self) -> Result<(), ConnectionHandleError> {
        Ok(self.tx.send(ConnectionMessage::RefreshDevices).await?)
    }

    /// Fill one device with a single color
    pub async fn set_all_leds(
        &self,
        device_index: u32,
        color: Color,
    ) -> Result<(), ConnectionHandleError> {
        Ok(self
            .tx
            .send(ConnectionMessage::SetAllLeds { device_index, color })
            .await?)
    }

    /// Fill every enabled device with a single color
    pub async fn set_all_leds_mirrored(&self, color: Color) -> Result<(), ConnectionHandleError> {
        Ok(self
            .tx
            .send(ConnectionMessage::SetAllLedsMirrored { color })
            .await?)
    }

    pub async fn update_leds(
        &self,
        device_index: u32,
        colors: Vec<Color>,
    ) -> Result<(), ConnectionHandleError> {
        Ok(self
            .tx
            .send(ConnectionMessage::UpdateLeds { device_index, colors })
            .await?)
    }

    pub async fn update_zone_leds(
        &self,
        device_index: u32,
        zone_index: u32,
        colors: Vec<Color>,
    ) -> Result<(), ConnectionHandleError> {
        Ok(self
            .tx
            .send(ConnectionMessage::UpdateZoneLeds {
                device_index,
                zone_index,
                colors,
            })
            .await?)
    }

    pub async fn update_single_led(
        &self,
        device_index: u32,
        led_index: u32,
        color: Color,
    ) -> Result<(), ConnectionHandleError> {
        Ok(self
            .tx
            .send(ConnectionMessage::UpdateSingleLed {
                device_index,
                led_index,
                color,
            })
            .await?)
    }

    /// Send a rendered frame to the primary device, mirroring it when
    /// multi-device is enabled
    pub async fn push_frame(&self, colors: Vec<Color>) -> Result<(), ConnectionHandleError> {
        Ok(self.tx.send(ConnectionMessage::PushFrame(colors)).await?)
    }

    /// Reset the hardware to the idle color, disconnect and stop the service
    pub async fn shutdown(&self) -> Result<(), ConnectionHandleError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(ConnectionMessage::Shutdown(tx)).await?;
        Ok(rx.await?)
    }
}

pub struct ConnectionService {
    server: ServerConfig,
    multi_device: MultiDeviceConfig,
    primary_device_index: u32,
    idle_color: Color,
    rx: mpsc::Receiver<ConnectionMessage>,
    state_tx: watch::Sender<ConnectionState>,
    client: Option<OpenRgbClient>,
    reconnect_at: Option<Instant>,
    reconnecting: bool,
    /// Devices switched to custom mode in the current connection epoch
    custom_mode_set: HashSet<u32>,
    /// Devices already warned about a frame length mismatch this epoch
    notified_led_mismatch: HashSet<u32>,
}

impl ConnectionService {
    pub fn new(config: &Config) -> (Self, ConnectionHandle) {
        let (tx, rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        (
            Self {
                server: config.server.clone(),
                multi_device: config.multi_device.clone(),
                primary_device_index: config.compositor.device_index,
                idle_color: config.compositor.idle_color,
                rx,
                state_tx,
                client: None,
                reconnect_at: None,
                reconnecting: false,
                custom_mode_set: HashSet::new(),
                notified_led_mismatch: HashSet::new(),
            },
            ConnectionHandle { tx, state: state_rx },
        )
    }

    pub async fn run(mut self) {
        loop {
            select! {
                message = self.rx.recv() => {
                    match message {
                        Some(message) => {
                            if self.handle_message(message).await == ConnectionControl::Break {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = Self::reconnect_timer(self.reconnect_at) => {
                    debug!("reconnect timer fired");
                    self.reconnect_at = None;
                    self.try_connect().await;
                }
            }
        }

        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
    }

    async fn handle_message(&mut self, message: ConnectionMessage) -> ConnectionControl {
        match message {
            ConnectionMessage::Connect => {
                self.reconnecting = false;
                self.try_connect().await;
            }
            ConnectionMessage::Disconnect(tx) => {
                self.disconnect().await;
                tx.send(()).ok();
            }
            ConnectionMessage::RefreshDevices => {
                self.refresh_devices().await;
            }
            ConnectionMessage::SetAllLeds { device_index, color } => {
                if let Err(error) = self.set_all(device_index, color).await {
                    self.command_failed("set all leds", error);
                }
            }
            ConnectionMessage::SetAllLedsMirrored { color } => {
                if let Err(error) = self.set_all_mirrored(color).await {
                    self.command_failed("mirrored set all leds", error);
                }
            }
            ConnectionMessage::UpdateLeds { device_index, colors } => {
                if let Err(error) = self.update_device(device_index, &colors).await {
                    self.command_failed("update leds", error);
                }
            }
            ConnectionMessage::UpdateZoneLeds {
                device_index,
                zone_index,
                colors,
            } => {
                if let Err(error) = self.update_zone(device_index, zone_index, &colors).await {
                    self.command_failed("update zone leds", error);
                }
            }
            ConnectionMessage::UpdateSingleLed {
                device_index,
                led_index,
                color,
            } => {
                if let Err(error) = self.update_single(device_index, led_index, color).await {
                    self.command_failed("update single led", error);
                }
            }
            ConnectionMessage::PushFrame(colors) => {
                if let Err(error) = self.push_frame(&colors).await {
                    self.command_failed("push frame", error);
                }
            }
            ConnectionMessage::Shutdown(tx) => {
                self.reset_to_idle().await;
                self.disconnect().await;
                tx.send(()).ok();
                return ConnectionControl::Break;
            }
        }

        ConnectionControl::Continue
    }

    async fn try_connect(&mut self) {
        if self.client.is_some() {
            return;
        }

        debug!(host = %self.server.host, port = %self.server.port, "connecting");

        let connected = OpenRgbClient::connect(
            &self.server.host,
            self.server.port,
            &self.server.client_name,
            Duration::from_millis(self.server.request_timeout_ms),
        )
        .await;

        let mut client = match connected {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "connection failed");
                self.schedule_reconnect();
                return;
            }
        };

        match client.get_all_devices().await {
            Ok(devices) => {
                info!(devices = %devices.len(), "connected");
                self.client = Some(client);
                self.reconnecting = false;
                self.reconnect_at = None;
                self.custom_mode_set.clear();
                self.notified_led_mismatch.clear();
                self.state_tx.send_replace(ConnectionState {
                    connected: true,
                    devices: Arc::new(devices),
                });
            }
            Err(error) => {
                warn!(error = %error, "device enumeration failed");
                self.schedule_reconnect();
            }
        }
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.reconnecting = false;
        self.custom_mode_set.clear();
        self.notified_led_mismatch.clear();

        if let Some(client) = self.client.take() {
            client.shutdown().await;
            info!("disconnected");
        }

        self.publish_disconnected();
    }

    async fn refresh_devices(&mut self) {
        if let Some(client) = self.client.as_mut() {
            match client.get_all_devices().await {
                Ok(devices) => {
                    info!(devices = %devices.len(), "discovered devices");
                    self.state_tx.send_replace(ConnectionState {
                        connected: true,
                        devices: Arc::new(devices),
                    });
                }
                Err(error) => {
                    self.command_failed("refresh devices", error);
                }
            }
        }
    }

    async fn set_all(&mut self, device_index: u32, color: Color) -> Result<(), ClientError> {
        if let Some(client) = self.client.as_mut() {
            client.set_all_leds(device_index, color).await?;
            self.custom_mode_set.insert(device_index);
        }

        Ok(())
    }

    async fn set_all_mirrored(&mut self, color: Color) -> Result<(), ClientError> {
        if !self.multi_device.enabled || self.multi_device.devices.is_empty() {
            return self.set_all(self.primary_device_index, color).await;
        }

        let slots = self.multi_device.devices.clone();
        for slot in slots.into_iter().filter(|slot| slot.enabled) {
            self.set_all(slot.device_index, color).await?;
            tokio::time::sleep(MIRROR_PAUSE).await;
        }

        Ok(())
    }

    /// Switch a device to custom mode once per connection epoch
    async fn ensure_custom_mode(&mut self, device_index: u32) -> Result<(), ClientError> {
        if self.custom_mode_set.contains(&device_index) {
            return Ok(());
        }

        if let Some(client) = self.client.as_mut() {
            client.set_custom_mode(device_index).await?;
            self.custom_mode_set.insert(device_index);
        }

        Ok(())
    }

    async fn update_device(&mut self, device_index: u32, colors: &[Color]) -> Result<(), ClientError> {
        if self.client.is_none() {
            return Ok(());
        }

        self.ensure_custom_mode(device_index).await?;
        if let Some(client) = self.client.as_mut() {
            client.update_leds(device_index, colors).await?;
        }

        Ok(())
    }

    async fn update_zone(
        &mut self,
        device_index: u32,
        zone_index: u32,
        colors: &[Color],
    ) -> Result<(), ClientError> {
        if self.client.is_none() {
            return Ok(());
        }

        self.ensure_custom_mode(device_index).await?;
        if let Some(client) = self.client.as_mut() {
            client.update_zone_leds(device_index, zone_index, colors).await?;
        }

        Ok(())
    }

    async fn update_single(
        &mut self,
        device_index: u32,
        led_index: u32,
        color: Color,
    ) -> Result<(), ClientError> {
        if self.client.is_none() {
            return Ok(());
        }

        self.ensure_custom_mode(device_index).await?;
        if let Some(client) = self.client.as_mut() {
            client.update_single_led(device_index, led_index, color).await?;
        }

        Ok(())
    }

    async fn push_frame(&mut self, colors: &[Color]) -> Result<(), ClientError> {
        if !self.multi_device.enabled || self.multi_device.devices.is_empty() {
            return self.update_device(self.primary_device_index, colors).await;
        }

        let slots = self.multi_device.devices.clone();
        for slot in slots.into_iter().filter(|slot| slot.enabled) {
            let adapted = self.adapt_frame(slot.device_index, colors);
            self.update_device(slot.device_index, &adapted).await?;
            tokio::time::sleep(MIRROR_PAUSE).await;
        }

        Ok(())
    }

    /// Fit a frame to a mirrored device's LED count: truncate when the
    /// mirror is smaller, pad by repeating the last color when it is larger
    fn adapt_frame(&mut self, device_index: u32, colors: &[Color]) -> Vec<Color> {
        let devices = self.state_tx.borrow().devices.clone();
        let num_leds = match devices.get(device_index as usize) {
            Some(device) => device.num_leds,
            None => return colors.to_vec(),
        };

        if num_leds == colors.len() {
            return colors.to_vec();
        }

        if self.notified_led_mismatch.insert(device_index) {
            warn!(
                device = %device_index,
                frame = %colors.len(),
                leds = %num_leds,
                "frame length does not match device, adapting"
            );
        }

        if num_leds < colors.len() {
            colors[..num_leds].to_vec()
        } else {
            let pad = colors.last().copied().unwrap_or_else(|| Color::new(0, 0, 0));
            let mut adapted = colors.to_vec();
            adapted.resize(num_leds, pad);
            adapted
        }
    }

    async fn reset_to_idle(&mut self) {
        if self.client.is_none() {
            return;
        }

        if let Err(error) = self.set_all_mirrored(self.idle_color).await {
            debug!(error = %error, "idle reset failed");
        }
    }

    fn command_failed(&mut self, what: &'static str, error: ClientError) {
        warn!(error = %error, "{} failed", what);
        self.client = None;
        self.custom_mode_set.clear();
        self.notified_led_mismatch.clear();
        self.publish_disconnected();
        self.schedule_reconnect();
    }

    fn publish_disconnected(&mut self) {
        let devices = self.state_tx.borrow().devices.clone();
        self.state_tx.send_replace(ConnectionState {
            connected: false,
            devices,
        });
    }

    fn schedule_reconnect(&mut self) {
        if !self.server.auto_reconnect {
            return;
        }

        let delay = if self.reconnecting {
            Duration::from_millis(self.server.reconnect_interval_ms)
        } else {
            self.reconnecting = true;
            Duration::from_millis(self.server.reconnect_initial_delay_ms)
        };

        self.reconnect_at = Some(Instant::now() + delay);
        debug!(delay = ?delay, "reconnect scheduled");
    }

    async fn reconnect_timer(deadline: Option<Instant>) {
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await
        } else {
            futures::future::pending::<()>().await
        }
    }
}
