//! Process-scoped registry connecting transient listeners to in-progress
//! generations.
//!
//! One entry per conversation with an active (or recently finished) cycle:
//! events are fanned out to live subscribers and kept in a bounded replay
//! buffer so late joiners catch up. This layer is auxiliary — the branching
//! data model is correct with zero listeners attached.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

/// Events delivered to listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        content: String,
    },
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        output: serde_json::Value,
    },
    Complete,
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Streaming,
    Complete,
    Error,
}

/// What a subscriber gets: everything buffered so far plus a live receiver.
pub struct StreamSubscription {
    pub replay: Vec<StreamEvent>,
    pub live: broadcast::Receiver<StreamEvent>,
    pub status: StreamStatus,
}

struct ActiveStream {
    status: StreamStatus,
    buffer: Vec<StreamEvent>,
    tx: broadcast::Sender<StreamEvent>,
    created_at: Instant,
}

/// Replay buffer bound; when exceeded the buffer is trimmed to the most
/// recent half of the cap.
const BUFFER_CAP: usize = 1000;
const BUFFER_TRIM: usize = 500;

const BROADCAST_CAPACITY: usize = 256;

/// Finished streams are pruned after this long.
pub const STREAM_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<String, ActiveStream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh stream for a conversation, replacing any previous
    /// one. A superseded stream's subscribers see their channel close.
    pub fn register(&self, conversation_id: &str) {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        self.streams.insert(
            conversation_id.to_string(),
            ActiveStream {
                status: StreamStatus::Streaming,
                buffer: Vec::new(),
                tx,
                created_at: Instant::now(),
            },
        );
        tracing::debug!(conversation_id = %conversation_id, "stream registered");
    }

    /// Buffer the event for late joiners and fan it out to live subscribers.
    pub fn broadcast(&self, conversation_id: &str, event: StreamEvent) {
        let Some(mut stream) = self.streams.get_mut(conversation_id) else {
            tracing::warn!(conversation_id = %conversation_id, "broadcast to unregistered stream");
            return;
        };

        stream.buffer.push(event.clone());
        if stream.buffer.len() > BUFFER_CAP {
            let excess = stream.buffer.len() - BUFFER_TRIM;
            stream.buffer.drain(..excess);
        }

        // A send error only means nobody is listening right now.
        let _ = stream.tx.send(event);
    }

    /// Mark the stream complete and notify subscribers.
    pub fn complete(&self, conversation_id: &str) {
        self.finish(conversation_id, StreamStatus::Complete, StreamEvent::Complete);
    }

    /// Mark the stream failed and notify subscribers.
    pub fn error(&self, conversation_id: &str, message: impl Into<String>) {
        self.finish(
            conversation_id,
            StreamStatus::Error,
            StreamEvent::Error {
                error: message.into(),
            },
        );
    }

    fn finish(&self, conversation_id: &str, status: StreamStatus, event: StreamEvent) {
        let Some(mut stream) = self.streams.get_mut(conversation_id) else {
            return;
        };
        stream.status = status;
        stream.buffer.push(event.clone());
        let _ = stream.tx.send(event);
        tracing::debug!(conversation_id = %conversation_id, status = ?status, "stream finished");
    }

    /// Subscribe to a conversation's stream; `None` when no stream is (or
    /// recently was) active. The replay snapshot already contains the
    /// terminal event for finished streams.
    pub fn subscribe(&self, conversation_id: &str) -> Option<StreamSubscription> {
        let stream = self.streams.get(conversation_id)?;
        Some(StreamSubscription {
            replay: stream.buffer.clone(),
            live: stream.tx.subscribe(),
            status: stream.status,
        })
    }

    pub fn status(&self, conversation_id: &str) -> Option<StreamStatus> {
        self.streams.get(conversation_id).map(|s| s.status)
    }

    /// Drop finished streams older than `ttl`. In-flight streams are never
    /// pruned.
    pub fn prune_finished(&self, ttl: Duration) {
        self.streams.retain(|conversation_id, stream| {
            let keep = stream.status == StreamStatus::Streaming
                || stream.created_at.elapsed() <= ttl;
            if !keep {
                tracing::debug!(conversation_id = %conversation_id, "pruned finished stream");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_joiner_replays_buffered_events() {
        let registry = StreamRegistry::new();
        registry.register("conv-1");
        registry.broadcast(
            "conv-1",
            StreamEvent::TextDelta {
                content: "hel".into(),
            },
        );
        registry.broadcast(
            "conv-1",
            StreamEvent::TextDelta {
                content: "lo".into(),
            },
        );
        registry.complete("conv-1");

        let subscription = registry.subscribe("conv-1").expect("stream present");
        assert_eq!(subscription.status, StreamStatus::Complete);
        assert_eq!(subscription.replay.len(), 3);
        assert!(matches!(subscription.replay[2], StreamEvent::Complete));
    }

    #[test]
    fn buffer_is_bounded() {
        let registry = StreamRegistry::new();
        registry.register("conv-1");
        for i in 0..(BUFFER_CAP + 10) {
            registry.broadcast(
                "conv-1",
                StreamEvent::TextDelta {
                    content: i.to_string(),
                },
            );
        }

        let subscription = registry.subscribe("conv-1").expect("stream present");
        assert!(subscription.replay.len() <= BUFFER_CAP);
        // The newest events survive the trim.
        match subscription.replay.last() {
            Some(StreamEvent::TextDelta { content }) => {
                assert_eq!(content, &(BUFFER_CAP + 9).to_string());
            }
            other => panic!("unexpected tail event: {other:?}"),
        }
    }

    #[test]
    fn register_replaces_previous_stream() {
        let registry = StreamRegistry::new();
        registry.register("conv-1");
        registry.broadcast(
            "conv-1",
            StreamEvent::TextDelta {
                content: "old".into(),
            },
        );
        registry.register("conv-1");

        let subscription = registry.subscribe("conv-1").expect("stream present");
        assert!(subscription.replay.is_empty());
        assert_eq!(subscription.status, StreamStatus::Streaming);
    }

    #[test]
    fn prune_keeps_in_flight_streams() {
        let registry = StreamRegistry::new();
        registry.register("live");
        registry.register("done");
        registry.complete("done");

        registry.prune_finished(Duration::from_secs(0));

        assert!(registry.status("live").is_some());
        assert!(registry.status("done").is_none());
    }

    #[test]
    fn subscribe_unknown_stream_is_none() {
        let registry = StreamRegistry::new();
        assert!(registry.subscribe("nope").is_none());
    }
}
