//! Persistence abstraction for per-profile device lists

use anyhow::Result;
use async_trait::async_trait;
use autoconnect_shared::{Device, PriorityTag, Profile};

/// Durable storage for device preference order and priority tags
///
/// Absence of a value means "nothing stored yet" and is not an error.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Replace the stored device list of a profile
    async fn write_device_list(&self, profile: Profile, devices: &[Device]) -> Result<()>;

    /// Stored device list of a profile, in preference order
    async fn read_device_list(&self, profile: Profile) -> Result<Vec<Device>>;

    /// Store the holder of a priority tag. `None` clears the tag.
    async fn write_priority_tag(
        &self,
        profile: Profile,
        tag: PriorityTag,
        device: Option<&Device>,
    ) -> Result<()>;

    /// Stored holder of a priority tag
    async fn read_priority_tag(&self, profile: Profile, tag: PriorityTag) -> Result<Option<Device>>;

    /// Human-readable name for this store
    fn name(&self) -> &'static str;
}
