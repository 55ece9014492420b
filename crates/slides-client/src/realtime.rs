//! Change feed over the realtime service's Phoenix channel protocol.
//!
//! One socket per subscription. The socket joins topic
//! `realtime:presentation_{id}` with a `postgres_changes` config covering the
//! presentation's members and slides, keeps the connection alive with a
//! heartbeat on the `phoenix` topic, and forwards each row change as a
//! [`ChangeEvent`]. Events are passed on in arrival order.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use slides_types::events::{ChangeEvent, ChannelMessage, PostgresChangesPayload, Table};

use crate::backend::Subscription;
use crate::config::BackendConfig;
use crate::error::ClientError;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;

/// Tables watched for every presentation.
const WATCHED: [Table; 2] = [Table::PresentationUsers, Table::Slides];

pub fn channel_topic(presentation_id: Uuid) -> String {
    format!("realtime:presentation_{}", presentation_id)
}

pub fn join_message(presentation_id: Uuid, access_token: &str, reference: &str) -> ChannelMessage {
    let filter = format!("presentation_id=eq.{}", presentation_id);
    let changes: Vec<Value> = WATCHED
        .iter()
        .map(|table| {
            json!({
                "event": "*",
                "schema": "public",
                "table": table.as_str(),
                "filter": filter,
            })
        })
        .collect();

    ChannelMessage {
        topic: channel_topic(presentation_id),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
        join_ref: Some(reference.to_string()),
    }
}

pub fn heartbeat_message(reference: &str) -> ChannelMessage {
    ChannelMessage {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

pub fn leave_message(presentation_id: Uuid, reference: &str) -> ChannelMessage {
    ChannelMessage {
        topic: channel_topic(presentation_id),
        event: "phx_leave".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

/// What an incoming frame means to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Change(ChangeEvent),
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    ChannelError(String),
    Closed,
    Ignored,
}

/// Classify one text frame from the socket.
pub fn decode_frame(text: &str, presentation_id: Uuid) -> Result<Frame, ClientError> {
    let msg: ChannelMessage = serde_json::from_str(text)?;

    let frame = match msg.event.as_str() {
        "postgres_changes" => {
            let payload: PostgresChangesPayload = serde_json::from_value(msg.payload)?;
            match payload.data.into_event(presentation_id) {
                Some(event) => Frame::Change(event),
                None => Frame::Ignored,
            }
        }
        "phx_reply" => Frame::Reply {
            reference: msg.reference,
            ok: msg.payload.get("status").and_then(Value::as_str) == Some("ok"),
            response: msg.payload.get("response").cloned().unwrap_or(Value::Null),
        },
        "phx_error" => Frame::ChannelError(msg.payload.to_string()),
        "phx_close" => Frame::Closed,
        "system" if msg.payload.get("status").and_then(Value::as_str) == Some("error") => {
            Frame::ChannelError(msg.payload.to_string())
        }
        _ => Frame::Ignored,
    };
    Ok(frame)
}

fn encode(msg: &ChannelMessage) -> Result<Message, ClientError> {
    Ok(Message::Text(serde_json::to_string(msg)?.into()))
}

async fn send_heartbeat<S>(sink: &mut S, reference: &str) -> bool
where
    S: Sink<Message> + Unpin,
{
    match encode(&heartbeat_message(reference)) {
        Ok(msg) => sink.send(msg).await.is_ok(),
        Err(_) => false,
    }
}

async fn leave_channel<S>(sink: &mut S, presentation_id: Uuid, reference: &str)
where
    S: Sink<Message> + Unpin,
{
    if let Ok(msg) = encode(&leave_message(presentation_id, reference)) {
        let _ = sink.send(msg).await;
    }
    let _ = sink.close().await;
    debug!("Left channel for presentation {}", presentation_id);
}

async fn wait_for_join<S>(stream: &mut S, join_ref: &str, presentation_id: Uuid) -> Result<(), ClientError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        match decode_frame(text.as_str(), presentation_id)? {
            Frame::Reply { reference, ok, response } if reference.as_deref() == Some(join_ref) => {
                if ok {
                    return Ok(());
                }
                return Err(ClientError::Realtime(format!("join refused: {}", response)));
            }
            Frame::ChannelError(reason) => {
                return Err(ClientError::Realtime(format!("join failed: {}", reason)));
            }
            _ => {}
        }
    }
    Err(ClientError::Realtime("socket closed during join".into()))
}

/// Connect, join the presentation's channel and spawn the feed task.
///
/// Returns once the service has acknowledged the join.
pub async fn subscribe(config: &BackendConfig, presentation_id: Uuid) -> Result<Subscription, ClientError> {
    let url = config.realtime_url()?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let mut next_ref: u64 = 1;
    let join_ref = next_ref.to_string();
    sink.send(encode(&join_message(presentation_id, &config.anon_key, &join_ref))?)
        .await?;

    // Hand out the subscription only once the service has acknowledged the join.
    tokio::time::timeout(JOIN_TIMEOUT, wait_for_join(&mut stream, &join_ref, presentation_id))
        .await
        .map_err(|_| ClientError::Realtime("timed out joining channel".into()))??;

    info!("Subscribed to changes for presentation {}", presentation_id);

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let (leave_tx, mut leave_rx) = oneshot::channel::<()>();
    let heartbeat_every = config.heartbeat;

    let task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_every);
        heartbeat.tick().await;

        'feed: loop {
            tokio::select! {
                biased;
                _ = &mut leave_rx => {
                    next_ref += 1;
                    leave_channel(&mut sink, presentation_id, &next_ref.to_string()).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    if !send_heartbeat(&mut sink, &next_ref.to_string()).await {
                        warn!("Realtime heartbeat failed for presentation {}", presentation_id);
                        break;
                    }
                }
                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Realtime socket closed for presentation {}", presentation_id);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("Realtime socket error: {}", e);
                            break;
                        }
                    };

                    let event = match decode_frame(text.as_str(), presentation_id) {
                        Ok(Frame::Change(event)) => event,
                        Ok(Frame::ChannelError(reason)) => {
                            warn!("Realtime channel error: {}", reason);
                            break;
                        }
                        Ok(Frame::Closed) => break,
                        Ok(_) => {
                            trace!("Realtime frame ignored");
                            continue;
                        }
                        Err(e) => {
                            warn!("Undecodable realtime frame: {}", e);
                            continue;
                        }
                    };

                    debug!("{:?} on {} for {}", event.kind, event.table, event.presentation_id);

                    // The subscriber may not be reading. Leaving and the
                    // heartbeat keep working while the event waits for room.
                    let mut pending = std::pin::pin!(events_tx.send(event));
                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut leave_rx => {
                                next_ref += 1;
                                leave_channel(&mut sink, presentation_id, &next_ref.to_string()).await;
                                break 'feed;
                            }
                            sent = &mut pending => {
                                if sent.is_err() {
                                    break 'feed;
                                }
                                break;
                            }
                            _ = heartbeat.tick() => {
                                next_ref += 1;
                                if !send_heartbeat(&mut sink, &next_ref.to_string()).await {
                                    warn!("Realtime heartbeat failed for presentation {}", presentation_id);
                                    break 'feed;
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    Ok(Subscription::new(presentation_id, events_rx).with_task(leave_tx, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slides_types::events::ChangeKind;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[test]
    fn join_watches_members_and_slides_of_one_presentation() {
        let id = Uuid::new_v4();
        let msg = join_message(id, "anon", "1");
        assert_eq!(msg.topic, format!("realtime:presentation_{}", id));
        assert_eq!(msg.event, "phx_join");

        let changes = msg.payload["config"]["postgres_changes"].as_array().unwrap();
        let tables: Vec<&str> = changes.iter().map(|c| c["table"].as_str().unwrap()).collect();
        assert_eq!(tables, vec!["presentation_users", "slides"]);
        for change in changes {
            assert_eq!(change["event"], "*");
            assert_eq!(change["filter"], format!("presentation_id=eq.{}", id));
        }

        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["ref"], "1");
        assert_eq!(wire["join_ref"], "1");
    }

    #[test]
    fn heartbeat_goes_to_phoenix_topic() {
        let wire = serde_json::to_value(heartbeat_message("7")).unwrap();
        assert_eq!(wire["topic"], "phoenix");
        assert_eq!(wire["event"], "heartbeat");
        assert_eq!(wire["ref"], "7");
        assert!(wire.get("join_ref").is_none());
    }

    #[test]
    fn decodes_change_push() {
        let id = Uuid::new_v4();
        let text = json!({
            "topic": channel_topic(id),
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "table": "presentation_users",
                    "type": "INSERT",
                    "schema": "public",
                    "record": {"presentation_id": id, "nickname": "ada", "role": "viewer"}
                }
            }
        })
        .to_string();

        let frame = decode_frame(&text, Uuid::nil()).unwrap();
        assert_eq!(
            frame,
            Frame::Change(ChangeEvent {
                table: Table::PresentationUsers,
                kind: ChangeKind::Insert,
                presentation_id: id,
            })
        );
    }

    #[test]
    fn decodes_join_reply() {
        let id = Uuid::new_v4();
        let text = json!({
            "topic": channel_topic(id),
            "event": "phx_reply",
            "ref": "1",
            "payload": {"status": "ok", "response": {"postgres_changes": []}}
        })
        .to_string();

        match decode_frame(&text, id).unwrap() {
            Frame::Reply { reference, ok, .. } => {
                assert_eq!(reference.as_deref(), Some("1"));
                assert!(ok);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn presence_and_unknown_events_are_ignored() {
        let text = json!({"topic": "x", "event": "presence_state", "payload": {}}).to_string();
        assert_eq!(decode_frame(&text, Uuid::nil()).unwrap(), Frame::Ignored);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(decode_frame("not json", Uuid::nil()).is_err());
    }

    // -- Live socket --

    const LONG_HEARTBEAT: Duration = Duration::from_secs(60);

    fn change_frame(presentation_id: Uuid, table: &str, kind: &str) -> String {
        json!({
            "topic": channel_topic(presentation_id),
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "data": {
                    "table": table,
                    "type": kind,
                    "record": {"presentation_id": presentation_id}
                }
            }
        })
        .to_string()
    }

    /// A realtime service on a loopback port. It answers the join, pushes
    /// `pushes` right after, and reports the event name of every frame the
    /// client sends.
    async fn realtime_service(
        accept_join: bool,
        pushes: Vec<String>,
        heartbeat: Duration,
    ) -> (BackendConfig, UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else {
                    continue;
                };
                let frame: ChannelMessage = serde_json::from_str(text.as_str()).unwrap();
                let _ = seen_tx.send(frame.event.clone());
                if frame.event != "phx_join" {
                    continue;
                }

                let status = if accept_join { "ok" } else { "error" };
                let reply = json!({
                    "topic": frame.topic,
                    "event": "phx_reply",
                    "ref": frame.reference,
                    "payload": {"status": status, "response": {}}
                });
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
                for push in &pushes {
                    if ws.send(Message::Text(push.clone().into())).await.is_err() {
                        return;
                    }
                }
            }
        });

        let mut config = BackendConfig::new(format!("http://{}", addr), "anon");
        config.heartbeat = heartbeat;
        (config, seen_rx)
    }

    async fn next_seen(seen: &mut UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .expect("service heard nothing")
            .expect("service stopped")
    }

    #[tokio::test]
    async fn feed_delivers_changes_in_order_and_leaves_on_close() {
        let id = Uuid::new_v4();
        let pushes = vec![
            change_frame(id, "slides", "INSERT"),
            change_frame(id, "presentation_users", "UPDATE"),
            change_frame(id, "slides", "DELETE"),
        ];
        let (config, mut seen) = realtime_service(true, pushes, LONG_HEARTBEAT).await;

        let mut sub = subscribe(&config, id).await.unwrap();
        assert_eq!(next_seen(&mut seen).await, "phx_join");

        let expected = [
            (Table::Slides, ChangeKind::Insert),
            (Table::PresentationUsers, ChangeKind::Update),
            (Table::Slides, ChangeKind::Delete),
        ];
        for (table, kind) in expected {
            assert_eq!(
                sub.next().await,
                Some(ChangeEvent {
                    table,
                    kind,
                    presentation_id: id,
                })
            );
        }

        tokio::time::timeout(Duration::from_secs(5), sub.close())
            .await
            .expect("close hung");
        assert_eq!(next_seen(&mut seen).await, "phx_leave");
    }

    #[tokio::test]
    async fn dropping_the_subscription_leaves_the_channel() {
        let id = Uuid::new_v4();
        let (config, mut seen) =
            realtime_service(true, vec![change_frame(id, "slides", "UPDATE")], LONG_HEARTBEAT).await;

        let mut sub = subscribe(&config, id).await.unwrap();
        assert_eq!(next_seen(&mut seen).await, "phx_join");
        assert!(sub.next().await.is_some());

        drop(sub);
        assert_eq!(next_seen(&mut seen).await, "phx_leave");
    }

    #[tokio::test]
    async fn refused_join_yields_no_subscription() {
        let (config, _seen) = realtime_service(false, Vec::new(), LONG_HEARTBEAT).await;
        let result = subscribe(&config, Uuid::new_v4()).await;
        match result {
            Err(ClientError::Realtime(reason)) => assert!(reason.starts_with("join refused")),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("join should have been refused"),
        }
    }

    #[tokio::test]
    async fn heartbeat_keeps_the_socket_alive() {
        let (config, mut seen) = realtime_service(true, Vec::new(), Duration::from_millis(50)).await;

        let sub = subscribe(&config, Uuid::new_v4()).await.unwrap();
        assert_eq!(next_seen(&mut seen).await, "phx_join");
        assert_eq!(next_seen(&mut seen).await, "heartbeat");
        assert_eq!(next_seen(&mut seen).await, "heartbeat");

        sub.close().await;
    }

    #[tokio::test]
    async fn close_does_not_wait_on_unread_events() {
        let id = Uuid::new_v4();
        let pushes = (0..EVENT_BUFFER + 20)
            .map(|_| change_frame(id, "slides", "UPDATE"))
            .collect();
        let (config, mut seen) = realtime_service(true, pushes, LONG_HEARTBEAT).await;

        let sub = subscribe(&config, id).await.unwrap();
        assert_eq!(next_seen(&mut seen).await, "phx_join");

        // Let the feed fill the buffer and stall on the next event.
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(5), sub.close())
            .await
            .expect("close hung on a full buffer");
        assert_eq!(next_seen(&mut seen).await, "phx_leave");
    }

    #[tokio::test]
    async fn heartbeat_continues_while_the_buffer_is_full() {
        let id = Uuid::new_v4();
        let pushes = (0..EVENT_BUFFER + 5)
            .map(|_| change_frame(id, "slides", "UPDATE"))
            .collect();
        let (config, mut seen) = realtime_service(true, pushes, Duration::from_millis(100)).await;

        let sub = subscribe(&config, id).await.unwrap();
        assert_eq!(next_seen(&mut seen).await, "phx_join");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(next_seen(&mut seen).await, "heartbeat");
        assert_eq!(next_seen(&mut seen).await, "heartbeat");
        sub.close().await;
    }
}
