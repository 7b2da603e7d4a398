//! Auto-connect service
//!
//! Every external callback (triggers, profile and bond changes, adapter
//! power, administrative calls) is funnelled into one mpsc queue consumed by a
//! single worker task, which drives the state machine. Read-only queries go
//! straight to the scheduler under its short lock.

use super::policy::{ConnectionScheduler, ProfileStatus};
use super::state_machine::{ConnectionStateMachine, MachineEvent, Transition};
use crate::config::AutoConnectConfig;
use crate::connector::ProfileConnector;
use crate::store::PersistenceStore;
use anyhow::{anyhow, Result};
use autoconnect_shared::{
    ConnectionAttempt, ConnectionState, Device, PriorityError, PriorityTag, Profile,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

/// Messages consumed by the worker
#[derive(Debug)]
pub enum AutoConnectEvent {
    /// Attempt connection now (ignition, door unlock, adapter on)
    Trigger,
    /// A profile changed state for a device
    ProfileStateChanged {
        profile: Profile,
        device: Device,
        state: ConnectionState,
    },
    /// The link to a device dropped, taking every profile with it
    LinkLost { device: Device },
    /// A device was bonded or unbonded
    BondStateChanged { device: Device, bonded: bool },
    /// The local adapter was powered on or off
    AdapterStateChanged { enabled: bool },
    SetPriority {
        profile: Profile,
        device: Device,
        tag: PriorityTag,
        reply: oneshot::Sender<Result<(), PriorityError>>,
    },
    ClearPriority {
        profile: Profile,
        tag: PriorityTag,
        reply: oneshot::Sender<Result<Option<Device>, PriorityError>>,
    },
    ResetDeviceLists { reply: oneshot::Sender<()> },
    /// Persist everything and stop the worker
    Release { reply: oneshot::Sender<()> },
}

/// Cloneable producer side of the event queue
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AutoConnectEvent>,
}

/// Consumer side of the event queue, handed to `AutoConnectService::start`
pub struct EventQueue {
    rx: mpsc::Receiver<AutoConnectEvent>,
    sink: EventSink,
}

/// Create the serialized event queue
pub fn event_channel(capacity: usize) -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    let sink = EventSink { tx };
    (sink.clone(), EventQueue { rx, sink })
}

impl EventQueue {
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<AutoConnectEvent> {
        self.rx.try_recv().ok()
    }
}

impl EventSink {
    /// Queue an event for the worker
    pub async fn send(&self, event: AutoConnectEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("Auto-connect service stopped"))
    }

    pub async fn trigger(&self) -> Result<()> {
        self.send(AutoConnectEvent::Trigger).await
    }

    pub async fn notify_profile_state(
        &self,
        profile: Profile,
        device: Device,
        state: ConnectionState,
    ) -> Result<()> {
        self.send(AutoConnectEvent::ProfileStateChanged {
            profile,
            device,
            state,
        })
        .await
    }

    pub async fn notify_link_lost(&self, device: Device) -> Result<()> {
        self.send(AutoConnectEvent::LinkLost { device }).await
    }

    pub async fn notify_bond_state(&self, device: Device, bonded: bool) -> Result<()> {
        self.send(AutoConnectEvent::BondStateChanged { device, bonded })
            .await
    }

    pub async fn notify_adapter_state(&self, enabled: bool) -> Result<()> {
        self.send(AutoConnectEvent::AdapterStateChanged { enabled })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AutoConnectEvent,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response
            .await
            .map_err(|_| anyhow!("Auto-connect service stopped before replying"))
    }
}

/// Handle to a running service
pub struct AutoConnectHandle {
    sink: EventSink,
    scheduler: Arc<ConnectionScheduler>,
    worker: JoinHandle<()>,
}

impl AutoConnectHandle {
    /// Event sink for triggers and profile stack callbacks
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Pin a bonded device to a priority slot
    pub async fn set_priority(
        &self,
        profile: Profile,
        device: Device,
        tag: PriorityTag,
    ) -> Result<()> {
        self.sink
            .request(|reply| AutoConnectEvent::SetPriority {
                profile,
                device,
                tag,
                reply,
            })
            .await??;
        Ok(())
    }

    /// Clear a priority slot, returning the previous holder
    pub async fn clear_priority(
        &self,
        profile: Profile,
        tag: PriorityTag,
    ) -> Result<Option<Device>> {
        let cleared = self
            .sink
            .request(|reply| AutoConnectEvent::ClearPriority {
                profile,
                tag,
                reply,
            })
            .await??;
        Ok(cleared)
    }

    /// Forget every device on every profile
    pub async fn reset_profile_device_lists(&self) -> Result<()> {
        self.sink
            .request(|reply| AutoConnectEvent::ResetDeviceLists { reply })
            .await
    }

    pub async fn connected_devices(&self, profile: Profile) -> Vec<Device> {
        self.scheduler.connected_devices(profile).await
    }

    pub async fn is_connected(&self, profile: Profile, device: &Device) -> bool {
        self.scheduler.is_connected(profile, device).await
    }

    pub async fn current_attempt(&self) -> Option<ConnectionAttempt> {
        self.scheduler.current_attempt().await
    }

    pub async fn snapshot(&self) -> Vec<ProfileStatus> {
        self.scheduler.snapshot().await
    }

    /// Persist all profiles and stop the worker. Queued events are dropped.
    pub async fn release(self) -> Result<()> {
        self.sink
            .request(|reply| AutoConnectEvent::Release { reply })
            .await?;
        self.worker.await?;
        Ok(())
    }
}

/// Worker owning the state machine
pub struct AutoConnectService {
    scheduler: Arc<ConnectionScheduler>,
    fsm: ConnectionStateMachine,
    rx: mpsc::Receiver<AutoConnectEvent>,
}

impl AutoConnectService {
    /// Build the scheduler, restore it from the store and spawn the worker
    pub async fn start(
        config: &AutoConnectConfig,
        connector: Arc<dyn ProfileConnector>,
        store: Arc<dyn PersistenceStore>,
        queue: EventQueue,
    ) -> AutoConnectHandle {
        info!(
            "[SCHED] Starting with {} connector, {} store",
            connector.name(),
            store.name()
        );

        let scheduler = Arc::new(ConnectionScheduler::new(config, connector.clone(), store));
        scheduler
            .set_adapter_enabled(connector.adapter_enabled().await)
            .await;
        scheduler.load_from_store().await;

        let service = Self {
            scheduler: scheduler.clone(),
            fsm: ConnectionStateMachine::new(scheduler.clone(), config.connect_timeout),
            rx: queue.rx,
        };
        let worker = tokio::spawn(service.run());

        AutoConnectHandle {
            sink: queue.sink,
            scheduler,
            worker,
        }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.fsm.deadline();
            let timeout = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        info!("[SCHED] Event queue closed");
                        break;
                    };
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                _ = timeout => {
                    self.dispatch(MachineEvent::ConnectTimeout).await;
                }
            }
        }
        info!("[SCHED] Worker stopped");
    }

    /// Feed an event to the state machine, resuming the connect loop after
    /// an attempt completes.
    async fn dispatch(&mut self, event: MachineEvent) {
        let mut event = event;
        loop {
            match self.fsm.process_event(event).await {
                Transition::Completed { .. } => event = MachineEvent::Connect,
                Transition::Started(attempt) => {
                    debug!("[SCHED] Waiting on {}", attempt);
                    return;
                }
                Transition::TimedOut(_) | Transition::Ignored => return,
            }
        }
    }

    /// Returns false when the worker must stop
    async fn handle_event(&mut self, event: AutoConnectEvent) -> bool {
        match event {
            AutoConnectEvent::Trigger => {
                if self.scheduler.initiate_connection().await {
                    self.dispatch(MachineEvent::Connect).await;
                }
            }

            AutoConnectEvent::ProfileStateChanged {
                profile,
                device,
                state,
            } => match state {
                ConnectionState::Connected => {
                    self.dispatch(MachineEvent::DeviceConnected { profile, device })
                        .await
                }
                ConnectionState::Disconnected => {
                    self.dispatch(MachineEvent::DeviceDisconnected { profile, device })
                        .await
                }
                ConnectionState::Connecting => {
                    debug!("[SCHED] {} connecting on {}", device, profile);
                }
            },

            AutoConnectEvent::LinkLost { device } => {
                for profile in self.scheduler.profiles().to_vec() {
                    if self.scheduler.is_connected(profile, &device).await {
                        self.dispatch(MachineEvent::DeviceDisconnected {
                            profile,
                            device: device.clone(),
                        })
                        .await;
                    }
                }
            }

            AutoConnectEvent::BondStateChanged { device, bonded: true } => {
                self.scheduler.on_device_bonded(&device).await;
            }
            AutoConnectEvent::BondStateChanged {
                device,
                bonded: false,
            } => {
                if self.fsm.attempt().is_some_and(|a| a.device == device) {
                    self.fsm.cancel_attempt().await;
                }
                self.scheduler.on_device_unbonded(&device).await;
            }

            AutoConnectEvent::AdapterStateChanged { enabled: true } => {
                info!("[SCHED] Adapter on");
                self.scheduler.set_adapter_enabled(true).await;
                self.scheduler.load_from_store().await;
                if self.scheduler.initiate_connection().await {
                    self.dispatch(MachineEvent::Connect).await;
                }
            }
            AutoConnectEvent::AdapterStateChanged { enabled: false } => {
                info!("[SCHED] Adapter off");
                self.scheduler.save_all().await;
                self.scheduler.set_adapter_enabled(false).await;
                self.fsm.cancel_attempt().await;
                self.scheduler.reset_all_connections().await;
            }

            AutoConnectEvent::SetPriority {
                profile,
                device,
                tag,
                reply,
            } => {
                let result = self.scheduler.set_priority(profile, device, tag).await;
                if let Err(e) = &result {
                    warn!("[SCHED] Priority rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            AutoConnectEvent::ClearPriority {
                profile,
                tag,
                reply,
            } => {
                let _ = reply.send(self.scheduler.clear_priority(profile, tag).await);
            }
            AutoConnectEvent::ResetDeviceLists { reply } => {
                self.fsm.cancel_attempt().await;
                self.scheduler.reset_profile_device_lists().await;
                let _ = reply.send(());
            }

            AutoConnectEvent::Release { reply } => {
                info!("[SCHED] Releasing");
                self.scheduler.save_all().await;
                self.fsm.cancel_attempt().await;
                self.rx.close();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}
