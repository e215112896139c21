//! Websocket subscriber adapter (spec.md §4.9/§4.6): bridges the
//! [`Subscriber`] contract to a live websocket connection via two
//! cooperating halves sharing a lock-protected outbound queue — a read side
//! that parses `ADDSUB`/`DELSUB` control text, and a periodic flush that
//! drains the queue to binary/JSON frames. Mirrors the receiver service's
//! split between its incoming-message loop and its ack-reply path, generic
//! over the websocket stream type so it never depends on the framework that
//! accepted the connection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::serial::TrackerId;
use crate::subscriber::{Subscriber, SubscriberId};
use crate::sublist::SublistMap;

/// Caps how many distinct tracker ids one websocket client may subscribe to.
pub const MAX_SUBSCRIPTIONS_PER_CLIENT: usize = 256;

const ACTIVE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const IDLE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_AFTER: Duration = Duration::from_secs(5);

struct WsSubscriberInner {
    outbound: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

/// The [`Subscriber`] side of the bridge: appends to the outbound queue
/// under a lock and reports the closed flag, never blocking the sublist's
/// fanout loop on network I/O.
struct WsSubscriber {
    inner: Arc<WsSubscriberInner>,
}

impl WsSubscriber {
    fn new() -> Self {
        Self { inner: Arc::new(WsSubscriberInner { outbound: Mutex::new(Vec::new()), closed: AtomicBool::new(false) }) }
    }
}

impl Subscriber for WsSubscriber {
    fn push(&self, _tid: TrackerId, payload: Bytes) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            return true;
        }
        self.inner.outbound.lock().expect("ws subscriber outbound mutex poisoned").push(payload);
        false
    }
}

fn next_subscriber_id() -> SubscriberId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Drives one already-authenticated websocket client end to end until it
/// disconnects, then unsubscribes it from every tracker id it was
/// subscribed to.
pub async fn run_subscriber_session<S>(mut ws: S, sublist_map: Arc<SublistMap>)
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let id = next_subscriber_id();
    let sub = Arc::new(WsSubscriber::new());
    let mut subscribed: HashSet<TrackerId> = HashSet::new();
    let mut flush_interval = ACTIVE_FLUSH_INTERVAL;
    let mut last_activity = tokio::time::Instant::now();

    loop {
        let flush = tokio::time::sleep(flush_interval);
        tokio::select! {
            biased;
            msg = ws.next() => {
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        last_activity = tokio::time::Instant::now();
                        handle_control_message(&text, &sublist_map, &sub, id, &mut subscribed);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
            () = flush => {
                let batch = std::mem::take(&mut *sub.inner.outbound.lock().expect("ws subscriber outbound mutex poisoned"));
                let mut send_failed = false;
                for payload in batch {
                    if ws.send(Message::Binary(payload.to_vec().into())).await.is_err() {
                        send_failed = true;
                        break;
                    }
                }
                if send_failed {
                    sub.inner.closed.store(true, Ordering::SeqCst);
                    break;
                }
                flush_interval = if last_activity.elapsed() > IDLE_AFTER { IDLE_FLUSH_INTERVAL } else { ACTIVE_FLUSH_INTERVAL };
            }
        }
    }

    sub.inner.closed.store(true, Ordering::SeqCst);
    for tid in subscribed {
        if let Some(list) = sublist_map.get(tid, false) {
            list.unsubscribe(id);
        }
    }
}

fn handle_control_message(
    text: &str,
    sublist_map: &Arc<SublistMap>,
    sub: &Arc<WsSubscriber>,
    id: SubscriberId,
    subscribed: &mut HashSet<TrackerId>,
) {
    let Some((verb, rest)) = text.trim().split_once(' ') else { return };
    let ids: Vec<TrackerId> = rest.split(',').filter_map(|s| s.trim().parse::<i64>().ok()).map(TrackerId).collect();
    match verb {
        "ADDSUB" => {
            for tid in ids {
                if subscribed.len() >= MAX_SUBSCRIPTIONS_PER_CLIENT {
                    break;
                }
                if subscribed.insert(tid) {
                    if let Some(list) = sublist_map.get(tid, true) {
                        list.subscribe(id, sub.clone() as Arc<dyn Subscriber>);
                    }
                }
            }
        }
        "DELSUB" => {
            for tid in ids {
                if subscribed.remove(&tid) {
                    if let Some(list) = sublist_map.get(tid, false) {
                        list.unsubscribe(id);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_message_parses_comma_separated_ids() {
        let sublist_map = Arc::new(SublistMap::new());
        let sub = Arc::new(WsSubscriber::new());
        let mut subscribed = HashSet::new();
        handle_control_message("ADDSUB 1,2,3", &sublist_map, &sub, 1, &mut subscribed);
        assert_eq!(subscribed.len(), 3);
        handle_control_message("DELSUB 2", &sublist_map, &sub, 1, &mut subscribed);
        assert_eq!(subscribed.len(), 2);
        assert!(!subscribed.contains(&TrackerId(2)));
    }

    #[test]
    fn subscription_count_is_capped_per_client() {
        let sublist_map = Arc::new(SublistMap::new());
        let sub = Arc::new(WsSubscriber::new());
        let mut subscribed = HashSet::new();
        let ids: String = (0..(MAX_SUBSCRIPTIONS_PER_CLIENT as i64 + 10))
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(",");
        handle_control_message(&format!("ADDSUB {ids}"), &sublist_map, &sub, 1, &mut subscribed);
        assert_eq!(subscribed.len(), MAX_SUBSCRIPTIONS_PER_CLIENT);
    }
}
