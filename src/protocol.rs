//! OpenRGB SDK wire protocol
//!
//! Every packet starts with a 16 byte header: the 4 byte ASCII magic followed
//! by three little-endian `i32` fields (device index, packet id, payload
//! size). The payload layout depends on the packet id; the largest one is the
//! controller data descriptor parsed by [`parse_controller_data`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::models::Color;

mod codec;
pub use codec::*;

/// 4-byte signature opening every packet
pub const MAGIC: &[u8; 4] = b"ORGB";

/// Fixed size of the packet header
pub const HEADER_SIZE: usize = 16;

/// SDK protocol version implemented by this client
pub const PROTOCOL_VERSION: i32 = 4;

/// Request the number of controllers
pub const PACKET_REQUEST_CONTROLLER_COUNT: i32 = 0;
/// Request one controller's full descriptor
pub const PACKET_REQUEST_CONTROLLER_DATA: i32 = 1;
/// Protocol version negotiation
pub const PACKET_REQUEST_PROTOCOL_VERSION: i32 = 40;
/// Announce the client's display name
pub const PACKET_SET_CLIENT_NAME: i32 = 50;
/// Server notification that the device list changed
pub const PACKET_DEVICE_LIST_UPDATED: i32 = 100;
/// Update every LED of a device
pub const PACKET_UPDATE_LEDS: i32 = 1050;
/// Update every LED of one zone
pub const PACKET_UPDATE_ZONE_LEDS: i32 = 1051;
/// Update a single LED
pub const PACKET_UPDATE_SINGLE_LED: i32 = 1052;
/// Switch a device to its externally-controllable mode
pub const PACKET_SET_CUSTOM_MODE: i32 = 1100;

/// Wire format violations
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid packet magic: {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unexpected end of data reading {0}")]
    UnexpectedEof(&'static str),
    #[error("invalid payload size: {0}")]
    InvalidSize(i32),
}

/// Decoded fixed-size packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub device_index: i32,
    pub packet_id: i32,
    pub data_size: i32,
}

/// One framed packet: header plus its raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, deriving the header size field from the payload
    pub fn new(device_index: i32, packet_id: i32, payload: Bytes) -> Self {
        let header = PacketHeader {
            device_index,
            packet_id,
            data_size: payload.len() as i32,
        };

        Self { header, payload }
    }

    /// Create a packet with no payload
    pub fn empty(device_index: i32, packet_id: i32) -> Self {
        Self::new(device_index, packet_id, Bytes::new())
    }
}

/// Zone descriptor retained from the controller data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInfo {
    pub name: String,
    pub zone_type: i32,
    pub leds_count: usize,
}

/// Device descriptor retained from the controller data
///
/// Zones and LEDs are positional: the LED index space is contiguous and a
/// zone's range is the sum of the preceding zones' LED counts. The wire
/// format does not guarantee that the zone counts sum to `num_leds`, so
/// [`DeviceInfo::zone_led_range`] clips instead of trusting the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device_type: i32,
    pub name: String,
    pub vendor: String,
    pub description: String,
    pub num_leds: usize,
    pub led_names: Vec<String>,
    pub zones: Vec<ZoneInfo>,
    pub colors: Vec<Color>,
}

impl DeviceInfo {
    /// LED index range covered by a zone, clipped to the device's LED count
    pub fn zone_led_range(&self, zone_index: usize) -> Option<std::ops::Range<usize>> {
        let zone = self.zones.get(zone_index)?;
        let start: usize = self.zones[..zone_index]
            .iter()
            .map(|zone| zone.leds_count)
            .sum();
        let end = (start + zone.leds_count).min(self.num_leds);

        Some(start.min(self.num_leds)..end)
    }
}

/// Write a packet header to `dst`
pub fn write_header(dst: &mut BytesMut, device_index: i32, packet_id: i32, data_size: i32) {
    dst.reserve(HEADER_SIZE);
    dst.put_slice(MAGIC);
    dst.put_i32_le(device_index);
    dst.put_i32_le(packet_id);
    dst.put_i32_le(data_size);
}

/// Read a packet header from `src`
///
/// Fails if fewer than [`HEADER_SIZE`] bytes are available or the magic does
/// not match.
pub fn read_header(src: &mut impl Buf) -> Result<PacketHeader, ProtocolError> {
    if src.remaining() < HEADER_SIZE {
        return Err(ProtocolError::UnexpectedEof("packet header"));
    }

    let mut magic = [0u8; 4];
    src.copy_to_slice(&mut magic);

    if &magic != MAGIC {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    Ok(PacketHeader {
        device_index: src.get_i32_le(),
        packet_id: src.get_i32_le(),
        data_size: src.get_i32_le(),
    })
}

/// Read exactly `size` payload bytes from `src`
///
/// A zero size yields an empty buffer without touching `src`.
pub fn read_payload(src: &mut impl Buf, size: usize) -> Result<Bytes, ProtocolError> {
    if size == 0 {
        return Ok(Bytes::new());
    }

    if src.remaining() < size {
        return Err(ProtocolError::UnexpectedEof("packet payload"));
    }

    Ok(src.copy_to_bytes(size))
}

fn read_i32(src: &mut impl Buf, what: &'static str) -> Result<i32, ProtocolError> {
    if src.remaining() < 4 {
        return Err(ProtocolError::UnexpectedEof(what));
    }

    Ok(src.get_i32_le())
}

fn read_u16(src: &mut impl Buf, what: &'static str) -> Result<u16, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof(what));
    }

    Ok(src.get_u16_le())
}

/// Read a length-prefixed ASCII string
///
/// The `u16` length includes the null terminator; the decoded string stops at
/// the first null byte, or takes the full length when none is present.
pub fn read_string(src: &mut impl Buf, what: &'static str) -> Result<String, ProtocolError> {
    let len = read_u16(src, what)? as usize;

    if src.remaining() < len {
        return Err(ProtocolError::UnexpectedEof(what));
    }

    let raw = src.copy_to_bytes(len);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());

    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Parse a controller data payload into a [`DeviceInfo`]
///
/// Mode records, the zone matrix and per-LED values are consumed but not
/// retained. Any short read fails the whole parse; no partial descriptor is
/// returned.
pub fn parse_controller_data(src: &mut impl Buf) -> Result<DeviceInfo, ProtocolError> {
    // Leading duplicate of the payload size
    read_i32(src, "data size")?;

    let device_type = read_i32(src, "device type")?;
    let name = read_string(src, "device name")?;
    let vendor = read_string(src, "device vendor")?;
    let description = read_string(src, "device description")?;
    read_string(src, "device version")?;
    read_string(src, "device serial")?;
    read_string(src, "device location")?;

    let num_modes = read_u16(src, "mode count")?;
    read_i32(src, "active mode")?;

    for _ in 0..num_modes {
        read_string(src, "mode name")?;

        // value, flags, speed min/max, brightness min/max, colors min/max,
        // speed, brightness, direction, color mode
        for _ in 0..12 {
            read_i32(src, "mode field")?;
        }

        let num_mode_colors = read_u16(src, "mode color count")?;
        for _ in 0..num_mode_colors {
            read_i32(src, "mode color")?;
        }
    }

    let num_zones = read_u16(src, "zone count")?;
    let mut zones = Vec::with_capacity(num_zones as usize);

    for _ in 0..num_zones {
        let zone_name = read_string(src, "zone name")?;
        let zone_type = read_i32(src, "zone type")?;
        read_i32(src, "zone leds min")?;
        read_i32(src, "zone leds max")?;
        let leds_count = read_i32(src, "zone leds count")?.max(0) as usize;

        let matrix_size = read_u16(src, "zone matrix size")?;
        if matrix_size > 0 {
            let height = read_i32(src, "zone matrix height")?.max(0) as usize;
            let width = read_i32(src, "zone matrix width")?.max(0) as usize;

            for _ in 0..height.saturating_mul(width) {
                read_i32(src, "zone matrix entry")?;
            }
        }

        zones.push(ZoneInfo {
            name: zone_name,
            zone_type,
            leds_count,
        });
    }

    let num_leds = read_u16(src, "led count")? as usize;
    let mut led_names = Vec::with_capacity(num_leds);

    for _ in 0..num_leds {
        led_names.push(read_string(src, "led name")?);
        read_i32(src, "led value")?;
    }

    let num_colors = read_u16(src, "color count")?;
    let mut colors = Vec::with_capacity(num_colors as usize);

    for _ in 0..num_colors {
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof("color"));
        }

        let (r, g, b) = (src.get_u8(), src.get_u8(), src.get_u8());
        src.get_u8();
        colors.push(Color::new(r, g, b));
    }

    Ok(DeviceInfo {
        device_type,
        name,
        vendor,
        description,
        num_leds,
        led_names,
        zones,
        colors,
    })
}

/// Decode an `i32` response payload (controller count, protocol version)
pub fn parse_i32_response(mut payload: &[u8]) -> Option<i32> {
    if payload.len() < 4 {
        return None;
    }

    Some(payload.get_i32_le())
}

fn put_color(dst: &mut BytesMut, color: Color) {
    dst.put_u8(color.red);
    dst.put_u8(color.green);
    dst.put_u8(color.blue);
    dst.put_u8(0);
}

/// Encode an update-all-LEDs payload
///
/// The leading size field counts the whole payload, itself included.
pub fn encode_update_leds(colors: &[Color]) -> Bytes {
    let data_size = 4 + 2 + colors.len() * 4;
    let mut dst = BytesMut::with_capacity(data_size);

    dst.put_i32_le(data_size as i32);
    dst.put_u16_le(colors.len() as u16);
    for &color in colors {
        put_color(&mut dst, color);
    }

    dst.freeze()
}

/// Encode an update-zone-LEDs payload
pub fn encode_update_zone_leds(zone_index: u32, colors: &[Color]) -> Bytes {
    let data_size = 4 + 4 + 2 + colors.len() * 4;
    let mut dst = BytesMut::with_capacity(data_size);

    dst.put_i32_le(data_size as i32);
    dst.put_i32_le(zone_index as i32);
    dst.put_u16_le(colors.len() as u16);
    for &color in colors {
        put_color(&mut dst, color);
    }

    dst.freeze()
}

/// Encode an update-single-LED payload: LED index plus one color, no leading
/// size field
pub fn encode_update_single_led(led_index: u32, color: Color) -> Bytes {
    let mut dst = BytesMut::with_capacity(8);

    dst.put_i32_le(led_index as i32);
    put_color(&mut dst, color);

    dst.freeze()
}

/// Encode a set-client-name payload: ASCII plus a null terminator
pub fn encode_client_name(name: &str) -> Bytes {
    let mut dst = BytesMut::with_capacity(name.len() + 1);

    for c in name.chars() {
        dst.put_u8(if c.is_ascii() { c as u8 } else { b'?' });
    }
    dst.put_u8(0);

    dst.freeze()
}

/// Encode a protocol version payload
pub fn encode_protocol_version(version: i32) -> Bytes {
    let mut dst = BytesMut::with_capacity(4);
    dst.put_i32_le(version);
    dst.freeze()
}
