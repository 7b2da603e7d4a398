//! Settings-file store
//!
//! Every profile has a base key taken from the profile table. The file is the
//! JSON document described in `autoconnect_shared::codec`.

use super::traits::PersistenceStore;
use crate::config::ProfileConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use autoconnect_shared::codec::{self, StoredProfile, StoredSettings};
use autoconnect_shared::{Device, PriorityTag, Profile};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Store backed by a JSON settings file
pub struct FileStore {
    path: PathBuf,
    keys: HashMap<Profile, String>,
    /// Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, profiles: &[ProfileConfig]) -> Self {
        Self {
            path: path.into(),
            keys: profiles
                .iter()
                .map(|p| (p.profile, p.store_key.clone()))
                .collect(),
            lock: Mutex::new(()),
        }
    }

    fn key(&self, profile: Profile) -> Result<&str> {
        self.keys
            .get(&profile)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("No settings key for {}", profile))
    }

    async fn load(&self) -> Result<StoredSettings> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => codec::decode_settings(&text)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoredSettings::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn store(&self, settings: &StoredSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, codec::encode_settings(settings)?).await?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    async fn update(
        &self,
        profile: Profile,
        apply: impl FnOnce(&mut StoredProfile) + Send,
    ) -> Result<()> {
        let key = self.key(profile)?;
        let _guard = self.lock.lock().await;
        let mut settings = self.load().await?;
        let stored = settings.entry(key.to_string()).or_default();
        apply(stored);
        if stored.is_empty() {
            settings.remove(key);
        }
        self.store(&settings).await
    }

    async fn get(&self, profile: Profile) -> Result<StoredProfile> {
        let key = self.key(profile)?;
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key).unwrap_or_default())
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn write_device_list(&self, profile: Profile, devices: &[Device]) -> Result<()> {
        debug!("[STORE] {} <- {} devices", profile, devices.len());
        self.update(profile, |stored| stored.devices = devices.to_vec())
            .await
    }

    async fn read_device_list(&self, profile: Profile) -> Result<Vec<Device>> {
        Ok(self.get(profile).await?.devices)
    }

    async fn write_priority_tag(
        &self,
        profile: Profile,
        tag: PriorityTag,
        device: Option<&Device>,
    ) -> Result<()> {
        self.update(profile, |stored| stored.set_tag(tag, device.cloned()))
            .await
    }

    async fn read_priority_tag(&self, profile: Profile, tag: PriorityTag) -> Result<Option<Device>> {
        Ok(self.get(profile).await?.tag(tag).cloned())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoConnectConfig;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_path(name: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!("autoconnect-test-{}-{}", std::process::id(), n))
            .join(name)
    }

    fn store_at(path: &Path) -> FileStore {
        FileStore::new(path, &AutoConnectConfig::default().profiles)
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let store = store_at(&scratch_path("devices.json"));
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
    async fn test_lists_and_tags_persist() {
        let path = scratch_path("devices.json");
        let a = Device::new("00:11:22:33:44:55");
        let b = Device::new("AA:BB:CC:DD:EE:FF");

        let store = store_at(&path);
        store
            .write_device_list(Profile::HandsFree, &[b.clone(), a.clone()])
            .await
            .unwrap();
        store
            .write_device_list(Profile::AudioSink, &[a.clone()])
            .await
            .unwrap();
        store
            .write_priority_tag(Profile::HandsFree, PriorityTag::Primary, Some(&b))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let settings = codec::decode_settings(&text).unwrap();
        let phone = &settings["bluetooth_autoconnect_phone_devices"];
        assert_eq!(phone.devices, vec![b.clone(), a.clone()]);
        assert_eq!(phone.primary.as_ref(), Some(&b));
        assert_eq!(settings["bluetooth_autoconnect_music_devices"].devices, vec![a.clone()]);

        // A fresh store sees the same data
        let reopened = store_at(&path);
        assert_eq!(
            reopened.read_device_list(Profile::HandsFree).await.unwrap(),
            vec![b.clone(), a.clone()]
        );
        assert_eq!(
            reopened.read_device_list(Profile::AudioSink).await.unwrap(),
            vec![a]
        );
        assert_eq!(
            reopened
                .read_priority_tag(Profile::HandsFree, PriorityTag::Primary)
                .await
                .unwrap(),
            Some(b)
        );

        reopened
            .write_priority_tag(Profile::HandsFree, PriorityTag::Primary, None)
            .await
            .unwrap();
        assert_eq!(
            reopened
                .read_priority_tag(Profile::HandsFree, PriorityTag::Primary)
                .await
                .unwrap(),
            None
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_list_is_an_error() {
        let path = scratch_path("devices.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"bluetooth_autoconnect_music_devices": {"devices": ["garbage"]}}"#,
        )
        .unwrap();

        let store = store_at(&path);
        assert!(store.read_device_list(Profile::AudioSink).await.is_err());
        assert!(store.read_device_list(Profile::HandsFree).await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_profile_is_an_error() {
        let path = scratch_path("devices.json");
        let store = FileStore::new(&path, &[ProfileConfig::new(Profile::HandsFree, "phone")]);
        assert!(store.read_device_list(Profile::Messaging).await.is_err());
        assert!(store
            .write_device_list(Profile::Messaging, &[])
            .await
            .is_err());
    }
}
