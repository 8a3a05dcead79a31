//! Session event streams as server-sent events.

use std::time::Duration;

use axum::response::sse::Event as SseEvent;
use futures::{Stream, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tern_core::events::Event;
use tern_core::ids::SessionId;
use tern_engine::EventStream;

/// Interleave `heartbeat` events into a session's event stream.
///
/// Ends when the session's channel closes or `shutdown` fires.
pub fn with_heartbeat(
    events: EventStream,
    session_id: SessionId,
    period: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Event> + Send + 'static {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    futures::stream::unfold(
        (events, ticker, session_id, shutdown),
        |(mut events, mut ticker, session_id, shutdown)| async move {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                next = events.next() => next?,
                _ = ticker.tick() => Event::heartbeat(session_id.clone()),
            };
            Some((event, (events, ticker, session_id, shutdown)))
        },
    )
}

/// One frame per event: `event:` is the event type, `data:` the JSON body.
pub fn to_frame(event: &Event) -> Result<SseEvent, axum::Error> {
    SseEvent::default().event(event.event_type()).json_data(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::ids::MessageId;
    use tern_core::messages::Role;
    use tern_engine::EventBus;

    fn created(sid: &SessionId) -> Event {
        Event::MessageCreated {
            session_id: sid.clone(),
            message_id: MessageId::new(),
            role: Role::User,
            index: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_emits_heartbeats() {
        let bus = EventBus::new(8);
        let sid = SessionId::new();
        let stream = with_heartbeat(bus.subscribe(&sid), sid.clone(), Duration::from_secs(15), CancellationToken::new());
        futures::pin_mut!(stream);

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type(), "heartbeat");
        assert_eq!(first.session_id(), &sid);
    }

    #[tokio::test(start_paused = true)]
    async fn events_pass_through_and_stream_ends_on_close() {
        let bus = EventBus::new(8);
        let sid = SessionId::new();
        let stream = with_heartbeat(bus.subscribe(&sid), sid.clone(), Duration::from_secs(15), CancellationToken::new());
        futures::pin_mut!(stream);

        bus.publish(created(&sid));
        bus.close(&sid);
        assert_eq!(stream.next().await.unwrap().event_type(), "message.created");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_ends_stream() {
        let bus = EventBus::new(8);
        let sid = SessionId::new();
        let shutdown = CancellationToken::new();
        let stream = with_heartbeat(bus.subscribe(&sid), sid, Duration::from_secs(60), shutdown.clone());
        futures::pin_mut!(stream);

        shutdown.cancel();
        assert!(stream.next().await.is_none());
    }
}
