//! Error types shared by the scheduler and its collaborators

use thiserror::Error;

use crate::{Device, Profile};

/// Administrative priority override rejected before any state changed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriorityError {
    #[error("Secondary priority on {profile} requires a Primary device")]
    SecondaryWithoutPrimary { profile: Profile },

    #[error("Device {device} already holds Primary on {profile}")]
    AlreadyPrimary { profile: Profile, device: Device },

    #[error("Device {0} is not bonded")]
    UnknownDevice(Device),

    #[error("Profile {0} is not configured for auto-connect")]
    UnknownProfile(Profile),
}

/// Failure of a connect call issued to the profile stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Remote call failed: {0}")]
    Remote(String),
}
