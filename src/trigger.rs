//! Connect trigger sources
//!
//! The daemon has no ignition or door-lock input, so `SIGUSR1` stands in for
//! "try to connect now". Adapter power-on triggers are handled by the service.

use crate::scheduler::EventSink;
use anyhow::Result;
use futures::{Stream, StreamExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Forward every item of `triggers` as a connect trigger until either side closes.
/// Returns the number of triggers forwarded.
pub async fn forward_triggers<S>(triggers: S, sink: EventSink) -> usize
where
    S: Stream<Item = ()> + Unpin,
{
    let mut triggers = triggers;
    let mut forwarded = 0;
    while triggers.next().await.is_some() {
        if let Err(e) = sink.trigger().await {
            debug!("[TRIGGER] {}", e);
            break;
        }
        forwarded += 1;
    }
    forwarded
}

/// Spawn a task turning `SIGUSR1` into connect triggers
pub fn spawn_signal_trigger(sink: EventSink) -> Result<JoinHandle<usize>> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let triggers = futures::stream::poll_fn(move |cx| usr1.poll_recv(cx)).map(|()| {
        info!("[TRIGGER] SIGUSR1 received");
    });
    Ok(tokio::spawn(forward_triggers(triggers, sink)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::event_channel;
    use crate::scheduler::service::AutoConnectEvent;

    #[tokio::test]
    async fn test_forward_triggers() {
        let (sink, queue) = event_channel(8);
        let forwarded = forward_triggers(futures::stream::iter(vec![(), (), ()]), sink).await;
        assert_eq!(forwarded, 3);
        drop(queue);
    }

    #[tokio::test]
    async fn test_forward_stops_when_service_gone() {
        let (sink, queue) = event_channel(8);
        drop(queue);
        let forwarded = forward_triggers(futures::stream::iter(vec![(), ()]), sink).await;
        assert_eq!(forwarded, 0);
    }

    #[tokio::test]
    async fn test_triggers_reach_the_queue() {
        let (sink, mut queue) = event_channel(8);
        forward_triggers(futures::stream::iter(vec![()]), sink).await;
        assert!(matches!(queue.try_recv(), Some(AutoConnectEvent::Trigger)));
    }
}
