//! Recording connector for scheduler tests

use super::traits::{ProfileConnector, RemotePriority};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use autoconnect_shared::{ConnectorError, Device, Profile};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    adapter_off: bool,
    unavailable: HashSet<Profile>,
    failing: HashMap<(Profile, Device), ConnectorError>,
    bonded: Option<Vec<Device>>,
    connects: Vec<(Profile, Device)>,
    priorities: Vec<(Profile, Device, RemotePriority)>,
}

/// Connector that records every call and never talks to a real stack
#[derive(Default)]
pub struct FakeConnector {
    inner: Mutex<Inner>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_adapter_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().adapter_off = !enabled;
    }

    pub fn set_unavailable(&self, profile: Profile) {
        self.inner.lock().unwrap().unavailable.insert(profile);
    }

    pub fn fail_connect(&self, profile: Profile, device: &Device) {
        self.inner.lock().unwrap().failing.insert(
            (profile, device.clone()),
            ConnectorError::Remote("br-connection-refused".into()),
        );
    }

    /// Restrict the bonded set. Without this every device counts as bonded.
    pub fn set_bonded(&self, devices: &[Device]) {
        self.inner.lock().unwrap().bonded = Some(devices.to_vec());
    }

    pub fn connects(&self) -> Vec<(Profile, Device)> {
        self.inner.lock().unwrap().connects.clone()
    }

    pub fn priorities(&self) -> Vec<(Profile, Device, RemotePriority)> {
        self.inner.lock().unwrap().priorities.clone()
    }
}

#[async_trait]
impl ProfileConnector for FakeConnector {
    async fn adapter_enabled(&self) -> bool {
        !self.inner.lock().unwrap().adapter_off
    }

    async fn is_available(&self, profile: Profile) -> bool {
        !self.inner.lock().unwrap().unavailable.contains(&profile)
    }

    async fn connect(&self, profile: Profile, device: &Device) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects.push((profile, device.clone()));
        match inner.failing.get(&(profile, device.clone())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn set_remote_priority(
        &self,
        profile: Profile,
        device: &Device,
        priority: RemotePriority,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.adapter_off {
            return Err(anyhow!("adapter is off"));
        }
        inner.priorities.push((profile, device.clone(), priority));
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>, ConnectorError> {
        let inner = self.inner.lock().unwrap();
        match &inner.bonded {
            Some(devices) => Ok(devices.clone()),
            None => Err(ConnectorError::Remote("bonded set not configured".into())),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
