//! OpenRGB SDK client
//!
//! One [`OpenRgbClient`] owns one TCP connection. The protocol has no request
//! ids, so requests and responses must alternate strictly; exclusive `&mut`
//! access is what serializes them here. The connection actor in
//! [`crate::connection`] is the single owner in the running system.

use std::time::Duration;

use futures::prelude::*;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::models::Color;
use crate::protocol::{self, DeviceInfo, OrgbCodec, OrgbCodecError, Packet, ProtocolError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] futures_io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] OrgbCodecError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("timed out waiting for a response to packet {0}")]
    Timeout(i32),
    #[error("connection closed by server")]
    Closed,
}

pub struct OpenRgbClient {
    framed: Framed<TcpStream, OrgbCodec>,
    request_timeout: Duration,
}

impl OpenRgbClient {
    /// Connect to an SDK server and perform the handshake
    ///
    /// Negotiates the protocol version, then announces `client_name`. On any
    /// failure the partial connection is dropped.
    #[instrument(skip(request_timeout))]
    pub async fn connect(
        host: &str,
        port: u16,
        client_name: &str,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            framed: Framed::new(stream, OrgbCodec::new()),
            request_timeout,
        };

        client.negotiate_protocol_version().await?;
        client.set_client_name(client_name).await?;

        Ok(client)
    }

    /// Close the connection
    ///
    /// Shutdown failures are ignored, the peer may already be gone.
    pub async fn shutdown(mut self) {
        use tokio::io::AsyncWriteExt;

        let _ = self.framed.get_mut().shutdown().await;
    }

    async fn negotiate_protocol_version(&mut self) -> Result<(), ClientError> {
        let response = self
            .request(Packet::new(
                0,
                protocol::PACKET_REQUEST_PROTOCOL_VERSION,
                protocol::encode_protocol_version(protocol::PROTOCOL_VERSION),
            ))
            .await?;

        match protocol::parse_i32_response(&response.payload) {
            Some(version) => debug!(version = %version, "server protocol version"),
            None => debug!("server did not report a protocol version"),
        }

        Ok(())
    }

    async fn set_client_name(&mut self, name: &str) -> Result<(), ClientError> {
        self.framed
            .send(Packet::new(
                0,
                protocol::PACKET_SET_CLIENT_NAME,
                protocol::encode_client_name(name),
            ))
            .await?;

        Ok(())
    }

    pub async fn get_controller_count(&mut self) -> Result<u32, ClientError> {
        let response = self
            .request(Packet::empty(0, protocol::PACKET_REQUEST_CONTROLLER_COUNT))
            .await?;

        protocol::parse_i32_response(&response.payload)
            .map(|count| count.max(0) as u32)
            .ok_or(ClientError::Protocol(ProtocolError::UnexpectedEof(
                "controller count",
            )))
    }

    pub async fn get_controller_data(&mut self, device_index: u32) -> Result<DeviceInfo, ClientError> {
        let response = self
            .request(Packet::new(
                device_index as i32,
                protocol::PACKET_REQUEST_CONTROLLER_DATA,
                protocol::encode_protocol_version(protocol::PROTOCOL_VERSION),
            ))
            .await?;

        let mut payload = response.payload;
        Ok(protocol::parse_controller_data(&mut payload)?)
    }

    /// Fetch every controller's descriptor, one request at a time
    pub async fn get_all_devices(&mut self) -> Result<Vec<DeviceInfo>, ClientError> {
        let count = self.get_controller_count().await?;
        let mut devices = Vec::with_capacity(count as usize);

        for device_index in 0..count {
            devices.push(self.get_controller_data(device_index).await?);
        }

        Ok(devices)
    }

    /// Switch a device to its externally-controllable mode
    ///
    /// Header-only write, the server sends no response. Must precede LED
    /// updates on a device that is not already in such a mode.
    pub async fn set_custom_mode(&mut self, device_index: u32) -> Result<(), ClientError> {
        self.framed
            .send(Packet::empty(
                device_index as i32,
                protocol::PACKET_SET_CUSTOM_MODE,
            ))
            .await?;

        Ok(())
    }

    pub async fn update_leds(&mut self, device_index: u32, colors: &[Color]) -> Result<(), ClientError> {
        self.framed
            .send(Packet::new(
                device_index as i32,
                protocol::PACKET_UPDATE_LEDS,
                protocol::encode_update_leds(colors),
            ))
            .await?;

        Ok(())
    }

    pub async fn update_zone_leds(
        &mut self,
        device_index: u32,
        zone_index: u32,
        colors: &[Color],
    ) -> Result<(), ClientError> {
        self.framed
            .send(Packet::new(
                device_index as i32,
                protocol::PACKET_UPDATE_ZONE_LEDS,
                protocol::encode_update_zone_leds(zone_index, colors),
            ))
            .await?;

        Ok(())
    }

    pub async fn update_single_led(
        &mut self,
        device_index: u32,
        led_index: u32,
        color: Color,
    ) -> Result<(), ClientError> {
        self.framed
            .send(Packet::new(
                device_index as i32,
                protocol::PACKET_UPDATE_SINGLE_LED,
                protocol::encode_update_single_led(led_index, color),
            ))
            .await?;

        Ok(())
    }

    /// Fill a whole device with one color
    ///
    /// Fetches a fresh descriptor for the LED count, then issues custom mode
    /// plus a full update.
    pub async fn set_all_leds(&mut self, device_index: u32, color: Color) -> Result<(), ClientError> {
        let device = self.get_controller_data(device_index).await?;
        let colors = vec![color; device.num_leds];

        self.set_custom_mode(device_index).await?;
        self.update_leds(device_index, &colors).await
    }

    async fn request(&mut self, request: Packet) -> Result<Packet, ClientError> {
        let packet_id = request.header.packet_id;
        self.framed.send(request).await?;

        loop {
            let next = tokio::time::timeout(self.request_timeout, self.framed.next())
                .await
                .map_err(|_| ClientError::Timeout(packet_id))?;

            match next {
                Some(Ok(packet)) => {
                    // The server pushes device list notifications at any
                    // time, they are never the response
                    if packet.header.packet_id == protocol::PACKET_DEVICE_LIST_UPDATED {
                        trace!("skipping device list notification during a request");
                        continue;
                    }

                    return Ok(packet);
                }
                Some(Err(error)) => return Err(error.into()),
                None => return Err(ClientError::Closed),
            }
        }
    }
}
