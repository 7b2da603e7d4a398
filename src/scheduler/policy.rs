//! Connection scheduler
//!
//! Owns one `ProfileQueue` per configured profile and decides which
//! (profile, device) pair to try next. Scheduler state sits behind a short
//! `RwLock`; the lock is never held across a connector call or store I/O.

use crate::config::AutoConnectConfig;
use crate::connector::{ProfileConnector, RemotePriority};
use crate::store::PersistenceStore;
use autoconnect_shared::{
    ConnectionAttempt, ConnectionState, Device, DeviceRecord, PriorityError, PriorityTag, Profile,
    ProfileQueue,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct SchedulerState {
    queues: HashMap<Profile, ProfileQueue>,
    /// The connect request currently in flight, if any
    in_flight: Option<ConnectionAttempt>,
    adapter_enabled: bool,
}

/// Point-in-time view of one profile queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStatus {
    pub profile: Profile,
    pub records: Vec<DeviceRecord>,
    pub cursor: usize,
    pub retry_count: u32,
    pub active_connections: usize,
    pub max_connections: usize,
    pub available_to_connect: bool,
}

impl From<&ProfileQueue> for ProfileStatus {
    fn from(queue: &ProfileQueue) -> Self {
        Self {
            profile: queue.profile(),
            records: queue.records().to_vec(),
            cursor: queue.cursor(),
            retry_count: queue.retry_count(),
            active_connections: queue.active_connections(),
            max_connections: queue.max_connections(),
            available_to_connect: queue.is_available_to_connect(),
        }
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} [{}/{}] cursor={} retries={}{}",
            self.profile,
            self.active_connections,
            self.max_connections,
            self.cursor,
            self.retry_count,
            if self.available_to_connect { "" } else { " exhausted" }
        )?;
        for record in &self.records {
            write!(f, "    {} {:?}", record.device, record.state)?;
            if let Some(tag) = record.tag {
                write!(f, " ({})", tag)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Multi-profile auto-connect policy
pub struct ConnectionScheduler {
    /// Profiles in the order they are tried
    profiles: Vec<Profile>,
    max_retries: u32,
    connector: Arc<dyn ProfileConnector>,
    store: Arc<dyn PersistenceStore>,
    state: RwLock<SchedulerState>,
}

impl ConnectionScheduler {
    /// Build the scheduler with one empty queue per configured profile
    pub fn new(
        config: &AutoConnectConfig,
        connector: Arc<dyn ProfileConnector>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        let queues = config
            .profiles
            .iter()
            .map(|p| (p.profile, ProfileQueue::new(p.profile, p.max_connections)))
            .collect();

        Self {
            profiles: config.profiles.iter().map(|p| p.profile).collect(),
            max_retries: config.max_retries,
            connector,
            store,
            state: RwLock::new(SchedulerState {
                queues,
                in_flight: None,
                adapter_enabled: true,
            }),
        }
    }

    /// Configured profiles, in connection order
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub async fn adapter_enabled(&self) -> bool {
        self.state.read().await.adapter_enabled
    }

    pub async fn set_adapter_enabled(&self, enabled: bool) {
        self.state.write().await.adapter_enabled = enabled;
    }

    /// Restore device lists and priority tags from the store
    ///
    /// Only devices that are still bonded are restored. If the bonded set
    /// cannot be queried, everything stored is restored.
    pub async fn load_from_store(&self) {
        let bonded: Option<HashSet<Device>> = match self.connector.bonded_devices().await {
            Ok(devices) => Some(devices.into_iter().collect()),
            Err(e) => {
                warn!("[SCHED] Bonded devices unknown, restoring unfiltered: {}", e);
                None
            }
        };
        let is_bonded = |device: &Device| bonded.as_ref().map_or(true, |b| b.contains(device));

        for &profile in &self.profiles {
            let devices = match self.store.read_device_list(profile).await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!("[STORE] Failed to read {} device list: {}", profile, e);
                    Vec::new()
                }
            };

            // Outer None: read failed, leave the in-memory tag alone
            let mut tags: Vec<(PriorityTag, Option<Option<Device>>)> = Vec::new();
            for tag in PriorityTag::ALL {
                match self.store.read_priority_tag(profile, tag).await {
                    Ok(device) => tags.push((tag, Some(device.filter(|d| is_bonded(d))))),
                    Err(e) => {
                        warn!("[STORE] Failed to read {} {} tag: {}", profile, tag, e);
                        tags.push((tag, None));
                    }
                }
            }

            let mut state = self.state.write().await;
            let Some(queue) = state.queues.get_mut(&profile) else {
                continue;
            };
            for device in devices {
                if !is_bonded(&device) {
                    debug!("[SCHED] Skipping unbonded {} on {}", device, profile);
                    continue;
                }
                queue.add_device(device);
            }
            for (tag, stored) in tags {
                match stored {
                    Some(Some(device)) => {
                        if let Err(e) = queue.set_priority(device, tag) {
                            warn!("[SCHED] Ignoring stored tag: {}", e);
                        }
                    }
                    Some(None) => {
                        queue.clear_priority(tag);
                    }
                    None => {}
                }
            }
            info!("[SCHED] Restored {} {} devices", queue.len(), profile);
        }
    }

    /// Persist one profile's list and tags. Returns false if anything failed
    /// to save; in-memory state stays authoritative either way.
    pub async fn save_to_store(&self, profile: Profile) -> bool {
        let snapshot = {
            let state = self.state.read().await;
            state.queues.get(&profile).map(|queue| {
                (
                    queue.devices(),
                    PriorityTag::ALL.map(|tag| queue.device_with_tag(tag).cloned()),
                )
            })
        };
        let Some((devices, tags)) = snapshot else {
            warn!("[STORE] {} is not configured, not saving", profile);
            return false;
        };

        let mut saved = true;
        if let Err(e) = self.store.write_device_list(profile, &devices).await {
            warn!("[STORE] Failed to save {} device list: {}", profile, e);
            saved = false;
        }
        for (tag, device) in PriorityTag::ALL.into_iter().zip(tags) {
            if let Err(e) = self
                .store
                .write_priority_tag(profile, tag, device.as_ref())
                .await
            {
                warn!("[STORE] Failed to save {} {} tag: {}", profile, tag, e);
                saved = false;
            }
        }
        saved
    }

    /// Persist every profile
    pub async fn save_all(&self) -> bool {
        let mut saved = true;
        for &profile in &self.profiles {
            saved &= self.save_to_store(profile).await;
        }
        saved
    }

    /// Re-arm every queue for a new connect trigger.
    ///
    /// Returns false (nothing to do) when the adapter is off or no device is
    /// known on any profile.
    pub async fn initiate_connection(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.adapter_enabled {
            info!("[SCHED] Adapter off, ignoring connect trigger");
            return false;
        }
        if state.queues.values().all(ProfileQueue::is_empty) {
            info!("[SCHED] No known devices, ignoring connect trigger");
            return false;
        }
        for queue in state.queues.values_mut() {
            queue.reset_for_new_trigger();
        }
        info!("[SCHED] Connect trigger accepted");
        true
    }

    async fn mark_unavailable(&self, profile: Profile) {
        if let Some(queue) = self.state.write().await.queues.get_mut(&profile) {
            queue.set_available_to_connect(false);
        }
    }

    /// Issue a connect for the next candidate, walking profiles in order.
    ///
    /// Profiles whose connector is unavailable, that have no candidate left or
    /// whose connect call fails are closed for the rest of the trigger cycle.
    pub async fn find_device_to_connect(&self) -> Option<ConnectionAttempt> {
        loop {
            let profile = {
                let state = self.state.read().await;
                if !state.adapter_enabled {
                    return None;
                }
                self.profiles
                    .iter()
                    .copied()
                    .find(|p| state.queues.get(p).is_some_and(ProfileQueue::connectable))
            };
            let Some(profile) = profile else {
                debug!("[SCHED] No profile left to connect");
                return None;
            };

            if !self.connector.is_available(profile).await {
                info!("[SCHED] {} unavailable on {}", profile, self.connector.name());
                self.mark_unavailable(profile).await;
                continue;
            }

            let attempt = {
                let mut guard = self.state.write().await;
                let state = &mut *guard;
                let Some(queue) = state.queues.get_mut(&profile) else {
                    continue;
                };
                match queue.next_candidate() {
                    Some(device) => {
                        queue.mark_connecting(&device);
                        let attempt = ConnectionAttempt::new(profile, device);
                        state.in_flight = Some(attempt.clone());
                        attempt
                    }
                    None => {
                        debug!("[SCHED] {} exhausted", profile);
                        queue.set_available_to_connect(false);
                        continue;
                    }
                }
            };

            info!("[SCHED] Connecting {}", attempt);
            match self.connector.connect(profile, &attempt.device).await {
                Ok(()) => return Some(attempt),
                Err(e) => {
                    warn!("[SCHED] Connect {} failed: {}", attempt, e);
                    self.update_connection_status(profile, &attempt.device, false)
                        .await;
                    self.mark_unavailable(profile).await;
                }
            }
        }
    }

    /// Record a connection outcome and persist the profile
    ///
    /// Returns false if the profile is not configured.
    pub async fn update_connection_status(
        &self,
        profile: Profile,
        device: &Device,
        success: bool,
    ) -> bool {
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let Some(queue) = state.queues.get_mut(&profile) else {
                warn!("[SCHED] Status for unconfigured profile {}", profile);
                return false;
            };

            match &state.in_flight {
                Some(attempt) if attempt.profile == profile && attempt.device == *device => {
                    state.in_flight = None;
                }
                Some(attempt) if attempt.profile == profile => {
                    info!(
                        "[SCHED] {} reported on {} while {} is in flight",
                        device, profile, attempt.device
                    );
                }
                _ => {}
            }

            let retry_allowed = queue.retry_count() < self.max_retries;
            queue.record_outcome(device, success, retry_allowed);
            if success && queue.active_connections() > queue.max_connections() {
                warn!(
                    "[SCHED] {} over capacity: {}/{} connected",
                    profile,
                    queue.active_connections(),
                    queue.max_connections()
                );
            }
            debug!(
                "[SCHED] {} {} on {} (cursor={} retries={} active={})",
                device,
                if success { "connected" } else { "disconnected" },
                profile,
                queue.cursor(),
                queue.retry_count(),
                queue.active_connections()
            );
        }
        self.save_to_store(profile).await;
        true
    }

    /// Drop an in-flight attempt without recording an outcome
    pub async fn abandon_attempt(&self, attempt: &ConnectionAttempt) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if let Some(queue) = state.queues.get_mut(&attempt.profile) {
            queue.cancel_connecting(&attempt.device);
        }
        if state.in_flight.as_ref() == Some(attempt) {
            state.in_flight = None;
        }
    }

    /// A device was bonded: allow the peer to auto-connect on every profile
    pub async fn on_device_bonded(&self, device: &Device) {
        for &profile in &self.profiles {
            if let Err(e) = self
                .connector
                .set_remote_priority(profile, device, RemotePriority::On)
                .await
            {
                debug!("[SCHED] Could not raise {} priority on {}: {}", device, profile, e);
            }
        }
    }

    /// A device was unbonded: forget it on every profile
    pub async fn on_device_unbonded(&self, device: &Device) -> bool {
        let affected: Vec<Profile> = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if state.in_flight.as_ref().is_some_and(|a| a.device == *device) {
                state.in_flight = None;
            }
            self.profiles
                .iter()
                .copied()
                .filter(|p| {
                    state
                        .queues
                        .get_mut(p)
                        .is_some_and(|queue| queue.remove_device(device))
                })
                .collect()
        };

        if affected.is_empty() {
            return false;
        }
        info!("[SCHED] Forgot {} on {} profile(s)", device, affected.len());
        for profile in affected {
            self.save_to_store(profile).await;
        }
        true
    }

    /// Forget all connection state, keeping device order (adapter off)
    pub async fn reset_all_connections(&self) {
        let mut state = self.state.write().await;
        for queue in state.queues.values_mut() {
            queue.reset_all_connections();
        }
        state.in_flight = None;
    }

    /// Pin a bonded device to a priority slot on one profile
    pub async fn set_priority(
        &self,
        profile: Profile,
        device: Device,
        tag: PriorityTag,
    ) -> Result<(), PriorityError> {
        if !self.profiles.contains(&profile) {
            return Err(PriorityError::UnknownProfile(profile));
        }
        match self.connector.bonded_devices().await {
            Ok(bonded) if !bonded.contains(&device) => {
                return Err(PriorityError::UnknownDevice(device));
            }
            Ok(_) => {}
            Err(e) => warn!("[SCHED] Cannot verify bond state of {}: {}", device, e),
        }

        {
            let mut state = self.state.write().await;
            let queue = state
                .queues
                .get_mut(&profile)
                .ok_or(PriorityError::UnknownProfile(profile))?;
            queue.set_priority(device.clone(), tag)?;
        }
        info!("[SCHED] {} is {} on {}", device, tag, profile);

        self.save_to_store(profile).await;
        if let Err(e) = self
            .connector
            .set_remote_priority(profile, &device, RemotePriority::AutoConnect)
            .await
        {
            debug!("[SCHED] Could not raise {} priority on {}: {}", device, profile, e);
        }
        Ok(())
    }

    /// Clear a priority slot on one profile, returning the previous holder
    pub async fn clear_priority(
        &self,
        profile: Profile,
        tag: PriorityTag,
    ) -> Result<Option<Device>, PriorityError> {
        let cleared = {
            let mut state = self.state.write().await;
            let queue = state
                .queues
                .get_mut(&profile)
                .ok_or(PriorityError::UnknownProfile(profile))?;
            queue.clear_priority(tag)
        };

        if let Some(device) = &cleared {
            info!("[SCHED] Cleared {} on {} (was {})", tag, profile, device);
            self.save_to_store(profile).await;
            if let Err(e) = self
                .connector
                .set_remote_priority(profile, device, RemotePriority::On)
                .await
            {
                debug!("[SCHED] Could not lower {} priority on {}: {}", device, profile, e);
            }
        }
        Ok(cleared)
    }

    /// Forget every device on every profile and persist the empty lists
    pub async fn reset_profile_device_lists(&self) {
        {
            let mut state = self.state.write().await;
            for queue in state.queues.values_mut() {
                queue.clear_devices();
            }
            state.in_flight = None;
        }
        info!("[SCHED] Device lists reset");
        self.save_all().await;
    }

    pub async fn connected_devices(&self, profile: Profile) -> Vec<Device> {
        self.state
            .read()
            .await
            .queues
            .get(&profile)
            .map(ProfileQueue::connected_devices)
            .unwrap_or_default()
    }

    pub async fn is_connected(&self, profile: Profile, device: &Device) -> bool {
        self.state
            .read()
            .await
            .queues
            .get(&profile)
            .and_then(|queue| queue.state_of(device))
            == Some(ConnectionState::Connected)
    }

    pub async fn current_attempt(&self) -> Option<ConnectionAttempt> {
        self.state.read().await.in_flight.clone()
    }

    /// Status of every profile, in connection order
    pub async fn snapshot(&self) -> Vec<ProfileStatus> {
        let state = self.state.read().await;
        self.profiles
            .iter()
            .filter_map(|p| state.queues.get(p))
            .map(ProfileStatus::from)
            .collect()
    }
}
