//! Auto-connect shared types
//!
//! This crate provides the data model, the per-profile device queue and the
//! settings codec used by the auto-connect daemon. Nothing in here performs I/O.

pub mod codec;
pub mod queue;

mod error;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use codec::CodecError;
pub use error::{ConnectorError, PriorityError};
pub use queue::ProfileQueue;

/// Connection policy parameters
pub mod policy {
    /// Failed attempts on the same device before moving to the next one
    pub const MAX_CONNECT_RETRIES: u32 = 1;

    /// Time to wait for a profile to report the outcome of a connect call
    pub const CONNECTION_TIMEOUT_MS: u64 = 8000;

    /// Concurrent hands-free and phonebook connections the stack is tested with
    pub const NUM_SUPPORTED_PHONE_CONNECTIONS: usize = 2;

    /// Concurrent audio-sink connections
    pub const NUM_SUPPORTED_MUSIC_CONNECTIONS: usize = 1;

    /// Concurrent messaging connections
    pub const NUM_SUPPORTED_MSG_CONNECTIONS: usize = 1;
}

/// A class of communication channel with its own concurrency limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Profile {
    /// Hands-free (phone calls)
    HandsFree,
    /// Audio sink (media streaming from the phone)
    AudioSink,
    /// Phonebook access (contact sync)
    PhoneBook,
    /// Message access
    Messaging,
}

impl Profile {
    /// All profiles, in the default connection order
    pub const ALL: [Profile; 4] = [
        Profile::HandsFree,
        Profile::AudioSink,
        Profile::PhoneBook,
        Profile::Messaging,
    ];

    /// Number of concurrent connections supported on this profile
    pub fn default_max_connections(self) -> usize {
        match self {
            Profile::HandsFree | Profile::PhoneBook => policy::NUM_SUPPORTED_PHONE_CONNECTIONS,
            Profile::AudioSink => policy::NUM_SUPPORTED_MUSIC_CONNECTIONS,
            Profile::Messaging => policy::NUM_SUPPORTED_MSG_CONNECTIONS,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::HandsFree => write!(f, "HFP"),
            Profile::AudioSink => write!(f, "A2DP-Sink"),
            Profile::PhoneBook => write!(f, "PBAP"),
            Profile::Messaging => write!(f, "MAP"),
        }
    }
}

/// A remote peer, identified by its Bluetooth address
///
/// Addresses compare case-insensitively; they are stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Device(String);

impl Device {
    /// Wrap an address without validating its format
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    /// The device address
    pub fn address(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Device {
    type Err = CodecError;

    /// Parse a `XX:XX:XX:XX:XX:XX` address
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let octets: Vec<&str> = s.split(':').collect();
        let well_formed = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(CodecError::InvalidAddress(s.to_string()));
        }
        Ok(Device::new(s))
    }
}

impl TryFrom<String> for Device {
    type Error = CodecError;

    fn try_from(address: String) -> Result<Self, Self::Error> {
        address.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.0
    }
}

/// Connection state of a device on one profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Pinned head-of-queue slot set by an administrative override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriorityTag {
    Primary,
    Secondary,
}

impl PriorityTag {
    /// Both tags, Primary first
    pub const ALL: [PriorityTag; 2] = [PriorityTag::Primary, PriorityTag::Secondary];

    /// Index of the slot this tag pins a device to
    pub fn slot(self) -> usize {
        match self {
            PriorityTag::Primary => 0,
            PriorityTag::Secondary => 1,
        }
    }
}

impl fmt::Display for PriorityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityTag::Primary => write!(f, "Primary"),
            PriorityTag::Secondary => write!(f, "Secondary"),
        }
    }
}

/// A device known on a profile, with its connection state and optional tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device: Device,
    pub state: ConnectionState,
    pub tag: Option<PriorityTag>,
}

impl DeviceRecord {
    /// Create a disconnected, untagged record
    pub fn new(device: Device) -> Self {
        Self {
            device,
            state: ConnectionState::Disconnected,
            tag: None,
        }
    }
}

/// The single (profile, device) connection request in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    pub profile: Profile,
    pub device: Device,
}

impl ConnectionAttempt {
    pub fn new(profile: Profile, device: Device) -> Self {
        Self { profile, device }
    }
}

impl fmt::Display for ConnectionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.device, self.profile)
    }
}
