//! In-memory store, used when no settings file is configured

use super::traits::PersistenceStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use autoconnect_shared::{Device, PriorityTag, Profile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Volatile store with failure injection
#[derive(Default)]
pub struct MemoryStore {
    lists: RwLock<HashMap<Profile, Vec<Device>>>,
    tags: RwLock<HashMap<(Profile, PriorityTag), Device>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail
    #[cfg(test)]
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store is read-only"));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store is unreadable"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn write_device_list(&self, profile: Profile, devices: &[Device]) -> Result<()> {
        self.check_write()?;
        self.lists.write().await.insert(profile, devices.to_vec());
        Ok(())
    }

    async fn read_device_list(&self, profile: Profile) -> Result<Vec<Device>> {
        self.check_read()?;
        Ok(self.lists.read().await.get(&profile).cloned().unwrap_or_default())
    }

    async fn write_priority_tag(
        &self,
        profile: Profile,
        tag: PriorityTag,
        device: Option<&Device>,
    ) -> Result<()> {
        self.check_write()?;
        let mut tags = self.tags.write().await;
        match device {
            Some(device) => {
                tags.insert((profile, tag), device.clone());
            }
            None => {
                tags.remove(&(profile, tag));
            }
        }
        Ok(())
    }

    async fn read_priority_tag(&self, profile: Profile, tag: PriorityTag) -> Result<Option<Device>> {
        self.check_read()?;
        Ok(self.tags.read().await.get(&(profile, tag)).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_values() {
        let store = MemoryStore::new();
        assert!(store.read_device_list(Profile::HandsFree).await.unwrap().is_empty());
        assert_eq!(
            store
                .read_priority_tag(Profile::HandsFree, PriorityTag::Primary)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        let device = Device::new("00:11:22:33:44:55");
        store
            .write_device_list(Profile::AudioSink, &[device.clone()])
            .await
            .unwrap();

        store.set_fail_writes(true);
        assert!(store.write_device_list(Profile::AudioSink, &[]).await.is_err());
        assert_eq!(
            store.read_device_list(Profile::AudioSink).await.unwrap(),
            vec![device]
        );

        store.set_fail_reads(true);
        assert!(store.read_device_list(Profile::AudioSink).await.is_err());
    }
}
