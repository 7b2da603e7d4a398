//! Connection state machine
//!
//! Serializes connection attempts: at most one (profile, device) connect is in
//! flight, guarded by a timeout. The machine does not own a timer; the worker
//! sleeps until `deadline()` and feeds `ConnectTimeout` back in.
//!
//! ```text
//!            Connect (candidate found)
//!   Idle ───────────────────────────────▶ Processing
//!     ▲                                        │
//!     └─── DeviceConnected / DeviceDisconnected / ConnectTimeout
//! ```

use super::policy::ConnectionScheduler;
use autoconnect_shared::{ConnectionAttempt, Device, Profile};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Events processed by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    /// Try the next candidate
    Connect,
    /// The in-flight attempt did not report back in time
    ConnectTimeout,
    /// A profile reported a device as connected
    DeviceConnected { profile: Profile, device: Device },
    /// A profile reported a device as disconnected
    DeviceDisconnected { profile: Profile, device: Device },
}

#[derive(Debug, Clone)]
enum MachineState {
    Idle,
    Processing {
        attempt: ConnectionAttempt,
        deadline: Instant,
    },
}

/// Result of processing an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Idle -> Processing, a connect was issued
    Started(ConnectionAttempt),
    /// Processing -> Idle, the profile reported back
    Completed {
        attempt: ConnectionAttempt,
        success: bool,
    },
    /// Processing -> Idle, recorded as a failure
    TimedOut(ConnectionAttempt),
    /// No state change
    Ignored,
}

/// Idle / Processing sequencer over the scheduler
pub struct ConnectionStateMachine {
    scheduler: Arc<ConnectionScheduler>,
    connect_timeout: Duration,
    state: MachineState,
}

impl ConnectionStateMachine {
    pub fn new(scheduler: Arc<ConnectionScheduler>, connect_timeout: Duration) -> Self {
        Self {
            scheduler,
            connect_timeout,
            state: MachineState::Idle,
        }
    }

    /// The attempt being waited on
    pub fn attempt(&self) -> Option<&ConnectionAttempt> {
        match &self.state {
            MachineState::Idle => None,
            MachineState::Processing { attempt, .. } => Some(attempt),
        }
    }

    /// When the in-flight attempt times out
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            MachineState::Idle => None,
            MachineState::Processing { deadline, .. } => Some(*deadline),
        }
    }

    /// Process a single event
    pub async fn process_event(&mut self, event: MachineEvent) -> Transition {
        match (self.attempt().cloned(), event) {
            (None, MachineEvent::Connect) => match self.scheduler.find_device_to_connect().await {
                Some(attempt) => {
                    info!("[FSM] Idle -> Processing ({})", attempt);
                    self.state = MachineState::Processing {
                        attempt: attempt.clone(),
                        deadline: Instant::now() + self.connect_timeout,
                    };
                    Transition::Started(attempt)
                }
                None => {
                    debug!("[FSM] Nothing to connect, staying idle");
                    Transition::Ignored
                }
            },

            // Profile changes outside an attempt still update the queues
            (None, MachineEvent::DeviceConnected { profile, device }) => {
                self.scheduler
                    .update_connection_status(profile, &device, true)
                    .await;
                Transition::Ignored
            }
            (None, MachineEvent::DeviceDisconnected { profile, device }) => {
                self.scheduler
                    .update_connection_status(profile, &device, false)
                    .await;
                Transition::Ignored
            }
            (None, MachineEvent::ConnectTimeout) => Transition::Ignored,

            (Some(attempt), MachineEvent::Connect) => {
                debug!("[FSM] {} in flight, ignoring connect", attempt);
                Transition::Ignored
            }
            (Some(attempt), MachineEvent::ConnectTimeout) => {
                warn!("[FSM] {} timed out", attempt);
                self.state = MachineState::Idle;
                self.scheduler
                    .update_connection_status(attempt.profile, &attempt.device, false)
                    .await;
                Transition::TimedOut(attempt)
            }
            (Some(attempt), MachineEvent::DeviceConnected { profile, device }) => {
                self.report(attempt, profile, device, true).await
            }
            (Some(attempt), MachineEvent::DeviceDisconnected { profile, device }) => {
                self.report(attempt, profile, device, false).await
            }
        }
    }

    async fn report(
        &mut self,
        attempt: ConnectionAttempt,
        profile: Profile,
        device: Device,
        success: bool,
    ) -> Transition {
        if profile != attempt.profile {
            // Another profile changed state; keep waiting for ours
            self.scheduler
                .update_connection_status(profile, &device, success)
                .await;
            return Transition::Ignored;
        }

        self.state = MachineState::Idle;
        self.scheduler
            .update_connection_status(profile, &device, success)
            .await;

        if device != attempt.device {
            info!(
                "[FSM] Expected {} on {} but {} reported",
                attempt.device, profile, device
            );
            self.scheduler.abandon_attempt(&attempt).await;
        }
        info!("[FSM] Processing -> Idle ({}, success={})", attempt, success);
        Transition::Completed { attempt, success }
    }

    /// Drop the in-flight attempt without recording an outcome
    pub async fn cancel_attempt(&mut self) -> Option<ConnectionAttempt> {
        let attempt = self.attempt().cloned()?;
        self.state = MachineState::Idle;
        self.scheduler.abandon_attempt(&attempt).await;
        info!("[FSM] Cancelled {}", attempt);
        Some(attempt)
    }
}
