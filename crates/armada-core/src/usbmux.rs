//! Physical device discovery via Apple's `usbmuxd` daemon.
//!
//! Enumerates attached iOS devices (USB or network-paired) so the registry
//! can carry them alongside simulators. Deeper device control goes through
//! host tools keyed by udid; this module only answers "what is attached".

use std::fmt;
use std::net::IpAddr;

use idevice::usbmuxd::{Connection, UsbmuxdConnection};

use crate::error::PlatformError;

// ---------------------------------------------------------------------------
// PhysicalDevice
// ---------------------------------------------------------------------------

/// A physical iOS device discovered via usbmuxd.
#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    /// Unique Device Identifier (UDID).
    pub udid: String,
    /// The usbmuxd-assigned numeric device ID.
    pub device_id: u32,
    /// How the device is connected.
    pub connection: DeviceConnection,
}

impl PhysicalDevice {
    /// Display name derived from the connection, since usbmuxd does not
    /// report device names.
    pub fn display_name(&self) -> String {
        match &self.connection {
            DeviceConnection::Usb => "Apple device (USB)".to_string(),
            DeviceConnection::Network(_) => "Apple device (network)".to_string(),
            DeviceConnection::Unknown(_) => "Apple device".to_string(),
        }
    }
}

/// How a physical device is connected to the host.
#[derive(Debug, Clone)]
pub enum DeviceConnection {
    /// Connected via USB cable.
    Usb,
    /// Connected via the network (WiFi).
    Network(IpAddr),
    /// Unknown connection type.
    Unknown(String),
}

impl fmt::Display for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConnection::Usb => write!(f, "USB"),
            DeviceConnection::Network(ip) => write!(f, "Network ({ip})"),
            DeviceConnection::Unknown(s) => write!(f, "Unknown ({s})"),
        }
    }
}

impl From<Connection> for DeviceConnection {
    fn from(conn: Connection) -> Self {
        match conn {
            Connection::Usb => DeviceConnection::Usb,
            Connection::Network(ip) => DeviceConnection::Network(ip),
            Connection::Unknown(s) => DeviceConnection::Unknown(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// List all physical iOS devices currently visible to usbmuxd.
///
/// # Errors
///
/// [`PlatformError::Unavailable`] when the usbmuxd daemon cannot be reached;
/// callers that tolerate device-less hosts should treat that as an empty set.
pub async fn list_devices() -> Result<Vec<PhysicalDevice>, PlatformError> {
    let mut muxd = UsbmuxdConnection::default()
        .await
        .map_err(|e| PlatformError::Unavailable(format!("usbmuxd: {e}")))?;

    let devices = muxd
        .get_devices()
        .await
        .map_err(|e| PlatformError::Unavailable(format!("usbmuxd: {e}")))?;

    Ok(devices
        .into_iter()
        .map(|d| PhysicalDevice {
            udid: d.udid,
            device_id: d.device_id,
            connection: d.connection_type.into(),
        })
        .collect())
}
