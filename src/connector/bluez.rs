//! BlueZ-backed profile connector and adapter monitor

use super::traits::{ProfileConnector, RemotePriority};
use crate::scheduler::EventSink;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use autoconnect_shared::{ConnectionState, ConnectorError, Device, Profile};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty, Uuid};
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Expand a 16-bit assigned number into a full Bluetooth base UUID
const fn bt_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Service the remote device must expose for us to connect the profile
pub fn remote_uuid(profile: Profile) -> Uuid {
    match profile {
        Profile::HandsFree => bt_uuid(0x111f), // HFP audio gateway
        Profile::AudioSink => bt_uuid(0x110a), // A2DP source
        Profile::PhoneBook => bt_uuid(0x112f), // PBAP server
        Profile::Messaging => bt_uuid(0x1132), // MAP server
    }
}

/// Service the local adapter registers when it can serve the profile
pub fn local_uuid(profile: Profile) -> Uuid {
    match profile {
        Profile::HandsFree => bt_uuid(0x111e),
        Profile::AudioSink => bt_uuid(0x110b),
        Profile::PhoneBook => bt_uuid(0x112e),
        Profile::Messaging => bt_uuid(0x1133),
    }
}

fn parse_address(device: &Device) -> Result<Address, ConnectorError> {
    device
        .address()
        .parse()
        .map_err(|_| ConnectorError::InvalidAddress(device.to_string()))
}

fn to_device(address: Address) -> Device {
    Device::new(address.to_string())
}

/// Profiles among `profiles` whose remote service the device advertises
fn offered_profiles(uuids: &HashSet<Uuid>, profiles: &[Profile]) -> Vec<Profile> {
    profiles
        .iter()
        .copied()
        .filter(|&p| uuids.contains(&remote_uuid(p)))
        .collect()
}

/// Connector issuing `ConnectProfile` calls through bluetoothd
pub struct BluezConnector {
    adapter: Adapter,
    sink: EventSink,
}

impl BluezConnector {
    /// Create a connector reporting connect outcomes to `sink`
    pub fn new(adapter: Adapter, sink: EventSink) -> Self {
        Self { adapter, sink }
    }
}

#[async_trait]
impl ProfileConnector for BluezConnector {
    async fn adapter_enabled(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn is_available(&self, profile: Profile) -> bool {
        match self.adapter.uuids().await {
            Ok(Some(uuids)) => uuids.contains(&local_uuid(profile)),
            // Adapter does not publish its services; let the connect call decide
            Ok(None) => true,
            Err(e) => {
                warn!("[BT] Failed to read adapter services: {}", e);
                false
            }
        }
    }

    async fn connect(&self, profile: Profile, device: &Device) -> Result<(), ConnectorError> {
        let address = parse_address(device)?;
        let remote = self
            .adapter
            .device(address)
            .map_err(|e| ConnectorError::Remote(e.to_string()))?;

        let uuid = remote_uuid(profile);
        let sink = self.sink.clone();
        let device = device.clone();

        // ConnectProfile blocks until the profile is up or fails; report the
        // outcome as a profile state change instead of waiting here.
        tokio::spawn(async move {
            let state = match remote.connect_profile(&uuid).await {
                Ok(()) => {
                    info!("[BT] {} connected on {}", device, profile);
                    ConnectionState::Connected
                }
                Err(e) => {
                    warn!("[BT] {} failed on {}: {}", device, profile, e);
                    ConnectionState::Disconnected
                }
            };
            if let Err(e) = sink.notify_profile_state(profile, device, state).await {
                debug!("[BT] Dropping connect outcome: {}", e);
            }
        });

        Ok(())
    }

    /// BlueZ has no per-profile priority; anything above Off maps to Trusted.
    async fn set_remote_priority(
        &self,
        profile: Profile,
        device: &Device,
        priority: RemotePriority,
    ) -> Result<()> {
        let address = parse_address(device)?;
        let remote = self.adapter.device(address)?;
        let trusted = priority != RemotePriority::Off;
        remote.set_trusted(trusted).await?;
        debug!(
            "[BT] {} priority {} on {} (trusted={})",
            device,
            priority.value(),
            profile,
            trusted
        );
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>, ConnectorError> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| ConnectorError::Remote(e.to_string()))?;

        let mut bonded = Vec::new();
        for address in addresses {
            let Ok(remote) = self.adapter.device(address) else {
                continue;
            };
            if let Ok(true) = remote.is_paired().await {
                bonded.push(to_device(address));
            }
        }
        Ok(bonded)
    }

    fn name(&self) -> &'static str {
        "bluez"
    }
}

type DeviceEvents = BoxStream<'static, (Address, DeviceEvent)>;

/// Forwards adapter power, bonding and peer connection changes into the event queue
pub struct BluezMonitor {
    adapter: Adapter,
    sink: EventSink,
    profiles: Vec<Profile>,
}

impl BluezMonitor {
    pub fn new(adapter: Adapter, sink: EventSink, profiles: Vec<Profile>) -> Self {
        Self {
            adapter,
            sink,
            profiles,
        }
    }

    /// Spawn the monitor task
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("[BT] Adapter monitor stopped: {}", e);
            }
        })
    }

    async fn watch(
        &self,
        address: Address,
        watched: &mut HashSet<Address>,
        streams: &mut SelectAll<DeviceEvents>,
    ) {
        if !watched.insert(address) {
            return;
        }
        let events = match self.adapter.device(address) {
            Ok(remote) => remote.events().await,
            Err(e) => Err(e),
        };
        match events {
            Ok(events) => streams.push(events.map(move |event| (address, event)).boxed()),
            Err(e) => {
                warn!("[BT] Cannot watch {}: {}", address, e);
                watched.remove(&address);
            }
        }
    }

    /// A peer finished connecting: report every profile it serves so that
    /// devices the phone connected on its own join the queues.
    async fn services_resolved(&self, address: Address) -> Result<()> {
        let uuids = match self.adapter.device(address) {
            Ok(remote) => remote.uuids().await,
            Err(e) => Err(e),
        };
        let uuids = match uuids {
            Ok(Some(uuids)) => uuids,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("[BT] Failed to read services of {}: {}", address, e);
                return Ok(());
            }
        };
        for profile in offered_profiles(&uuids, &self.profiles) {
            debug!("[BT] {} up on {}", address, profile);
            self.sink
                .notify_profile_state(profile, to_device(address), ConnectionState::Connected)
                .await?;
        }
        Ok(())
    }

    async fn run(self) -> Result<()> {
        let adapter_events = self.adapter.events().await?;
        tokio::pin!(adapter_events);
        let mut device_events: SelectAll<DeviceEvents> = SelectAll::new();
        let mut watched = HashSet::new();

        for address in self.adapter.device_addresses().await? {
            self.watch(address, &mut watched, &mut device_events).await;
        }
        info!(
            "[BT] Monitoring adapter {} ({} devices)",
            self.adapter.name(),
            watched.len()
        );

        loop {
            tokio::select! {
                event = adapter_events.next() => {
                    let Some(event) = event else {
                        return Err(anyhow!("adapter event stream ended"));
                    };
                    match event {
                        AdapterEvent::DeviceAdded(address) => {
                            self.watch(address, &mut watched, &mut device_events).await;
                        }
                        AdapterEvent::DeviceRemoved(address) => {
                            watched.remove(&address);
                            info!("[BT] {} removed", address);
                            self.sink.notify_bond_state(to_device(address), false).await?;
                        }
                        AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                            info!("[BT] Adapter powered={}", powered);
                            self.sink.notify_adapter_state(powered).await?;
                        }
                        _ => {}
                    }
                }
                Some((address, event)) = device_events.next(), if !device_events.is_empty() => {
                    match event {
                        DeviceEvent::PropertyChanged(DeviceProperty::Paired(paired)) => {
                            info!("[BT] {} paired={}", address, paired);
                            self.sink.notify_bond_state(to_device(address), paired).await?;
                        }
                        DeviceEvent::PropertyChanged(DeviceProperty::ServicesResolved(true)) => {
                            self.services_resolved(address).await?;
                        }
                        DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => {
                            debug!("[BT] {} link lost", address);
                            self.sink.notify_link_lost(to_device(address)).await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
