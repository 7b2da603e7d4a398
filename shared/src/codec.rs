//! Settings codec for persisted device lists
//!
//! The settings file is a JSON object with one entry per profile key:
//! ```text
//! {
//!   "bluetooth_autoconnect_phone_devices": {
//!     "devices": ["AA:BB:CC:DD:EE:FF", "00:11:22:33:44:55"],
//!     "primary": "AA:BB:CC:DD:EE:FF"
//!   }
//! }
//! ```
//! Device order is preference order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Device, PriorityTag};

/// Upper bound on a settings file, to refuse reading something that is clearly not ours
pub const MAX_SETTINGS_SIZE: usize = 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid device address: {0:?}")]
    InvalidAddress(String),

    #[error("Malformed settings: {0}")]
    Malformed(String),

    #[error("Settings too large: {0} bytes (max: {MAX_SETTINGS_SIZE})")]
    TooLarge(usize),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Malformed(err.to_string())
    }
}

/// Persisted state of one profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProfile {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Device>,
}

impl StoredProfile {
    pub fn tag(&self, tag: PriorityTag) -> Option<&Device> {
        match tag {
            PriorityTag::Primary => self.primary.as_ref(),
            PriorityTag::Secondary => self.secondary.as_ref(),
        }
    }

    pub fn set_tag(&mut self, tag: PriorityTag, device: Option<Device>) {
        match tag {
            PriorityTag::Primary => self.primary = device,
            PriorityTag::Secondary => self.secondary = device,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.primary.is_none() && self.secondary.is_none()
    }
}

/// Whole settings file, keyed by profile store key
pub type StoredSettings = BTreeMap<String, StoredProfile>;

/// Encode settings as pretty-printed JSON
pub fn encode_settings(settings: &StoredSettings) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(settings)?)
}

/// Decode settings
///
/// Duplicate addresses in a device list keep their first position.
pub fn decode_settings(text: &str) -> Result<StoredSettings, CodecError> {
    if text.len() > MAX_SETTINGS_SIZE {
        return Err(CodecError::TooLarge(text.len()));
    }
    if text.trim().is_empty() {
        return Ok(StoredSettings::new());
    }

    let mut settings: StoredSettings = serde_json::from_str(text)?;
    for stored in settings.values_mut() {
        let mut seen = Vec::with_capacity(stored.devices.len());
        stored.devices.retain(|d| {
            if seen.contains(d) {
                false
            } else {
                seen.push(d.clone());
                true
            }
        });
    }
    Ok(settings)
}
