//! Profile connector abstraction for pluggable Bluetooth stacks

use anyhow::Result;
use async_trait::async_trait;
use autoconnect_shared::{ConnectorError, Device, Profile};

/// Auto-connect priority advertised to the profile stack for a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePriority {
    /// Never connect
    Off,
    /// Connections accepted when initiated by either side
    On,
    /// Preferred for auto-connection
    AutoConnect,
}

impl RemotePriority {
    /// Numeric value understood by profile stacks that use priority levels
    pub fn value(self) -> i32 {
        match self {
            RemotePriority::Off => 0,
            RemotePriority::On => 100,
            RemotePriority::AutoConnect => 1000,
        }
    }
}

/// Executes profile connect calls on behalf of the scheduler
///
/// `connect` only issues the request. The outcome is reported later as a
/// profile state change through the service's event sink.
#[async_trait]
pub trait ProfileConnector: Send + Sync {
    /// Whether the local adapter is powered
    async fn adapter_enabled(&self) -> bool;

    /// Whether the local stack can currently serve `profile`
    async fn is_available(&self, profile: Profile) -> bool;

    /// Issue a connect request for `device` on `profile`
    async fn connect(&self, profile: Profile, device: &Device) -> Result<(), ConnectorError>;

    /// Best-effort update of the device's auto-connect priority
    async fn set_remote_priority(
        &self,
        profile: Profile,
        device: &Device,
        priority: RemotePriority,
    ) -> Result<()>;

    /// Devices currently bonded with the local adapter
    async fn bonded_devices(&self) -> Result<Vec<Device>, ConnectorError>;

    /// Human-readable name for this connector
    fn name(&self) -> &'static str;
}
