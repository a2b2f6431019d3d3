//! The request logger: a bounded FIFO ring of request log entries with
//! filtering and non-blocking live subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

const DEFAULT_CAPACITY: usize = 1000;
const SUBSCRIBER_BUFFER: usize = 64;

/// Protocol tag on a [`RequestLogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP
    Http,
    /// Server-Sent Events stream
    Sse,
    /// WebSocket connection
    WebSocket,
    /// gRPC call
    Grpc,
    /// MQTT publish/subscribe
    Mqtt,
    /// SOAP operation
    Soap,
    /// GraphQL operation
    GraphQl,
    /// OAuth/OIDC endpoint
    OAuth,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Http
    }
}

/// Protocol-specific fields that don't fit the common entry shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolDetail {
    /// gRPC service name
    #[serde(default)]
    pub grpc_service: Option<String>,
    /// MQTT topic
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    /// MQTT client id
    #[serde(default)]
    pub mqtt_client_id: Option<String>,
    /// SOAP operation name
    #[serde(default)]
    pub soap_operation: Option<String>,
    /// GraphQL operation type: query/mutation/subscription
    #[serde(default)]
    pub graphql_op_type: Option<String>,
    /// WS/SSE connection id
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// A near-miss record attached to an unmatched request's log entry.
pub use crate::matcher::NearMiss;

/// One entry in the request log ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// Short base-36 ID assigned at append time
    pub id: String,
    /// Wall-clock timestamp assigned at append time
    pub timestamp: DateTime<Utc>,
    /// Protocol tag
    #[serde(default)]
    pub protocol: Protocol,
    /// HTTP method, or protocol-equivalent verb
    pub method: String,
    /// Request path
    pub path: String,
    /// Raw query string
    #[serde(default)]
    pub query: String,
    /// Captured request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Captured request body, bounded
    #[serde(default)]
    pub body: Option<String>,
    /// Remote socket address
    #[serde(default)]
    pub remote_addr: Option<String>,
    /// Matched mock ID, `stateful:<name>`, `__mockd:health`, or empty for no match
    #[serde(default)]
    pub matched_mock_id: String,
    /// Response status code
    pub status: u16,
    /// Handler duration in milliseconds
    pub duration_ms: u64,
    /// Protocol-specific extra fields
    #[serde(default)]
    pub detail: Option<ProtocolDetail>,
    /// Near-misses, populated only when there was no match
    #[serde(default)]
    pub near_misses: Vec<NearMiss>,
}

/// AND-combined filter fields for [`RequestLogger::list`]. Deserializable
/// directly from a management-API query string (`GET /requests`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    /// Restrict to entries of this protocol
    #[serde(default)]
    pub protocol: Option<Protocol>,
    /// Restrict to entries with this method (case-insensitive)
    #[serde(default)]
    pub method: Option<String>,
    /// Restrict to entries whose `matched_mock_id` equals this value exactly
    #[serde(default)]
    pub mock_id: Option<String>,
    /// Restrict to entries whose path starts with this prefix
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Restrict to entries with this status code
    #[serde(default)]
    pub status: Option<u16>,
    /// Restrict to entries that did/did not produce an error status (>= 400)
    #[serde(default)]
    pub has_error: Option<bool>,
    /// gRPC service name filter
    #[serde(default)]
    pub grpc_service: Option<String>,
    /// MQTT topic filter, supporting `+`/`#` wildcards
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    /// MQTT client id filter
    #[serde(default)]
    pub mqtt_client_id: Option<String>,
    /// SOAP operation name filter
    #[serde(default)]
    pub soap_operation: Option<String>,
    /// GraphQL operation type filter
    #[serde(default)]
    pub graphql_op_type: Option<String>,
    /// WS/SSE connection id filter
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Skip this many matching entries before collecting results
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of entries to return; `None` means unbounded
    #[serde(default)]
    pub limit: Option<usize>,
}

fn mqtt_topic_matches(filter: &str, topic: &str) -> bool {
    let filter_levels: Vec<&str> = filter.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();
    for (i, level) in filter_levels.iter().enumerate() {
        if *level == "#" {
            return true;
        }
        if *level == "+" {
            if i >= topic_levels.len() {
                return false;
            }
            continue;
        }
        if topic_levels.get(i) != Some(level) {
            return false;
        }
    }
    filter_levels.len() == topic_levels.len()
}

fn entry_matches(entry: &RequestLogEntry, filter: &LogFilter) -> bool {
    if let Some(p) = filter.protocol {
        if entry.protocol != p {
            return false;
        }
    }
    if let Some(m) = &filter.method {
        if !entry.method.eq_ignore_ascii_case(m) {
            return false;
        }
    }
    if let Some(id) = &filter.mock_id {
        if &entry.matched_mock_id != id {
            return false;
        }
    }
    if let Some(prefix) = &filter.path_prefix {
        if !entry.path.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if entry.status != status {
            return false;
        }
    }
    if let Some(has_error) = filter.has_error {
        if (entry.status >= 400) != has_error {
            return false;
        }
    }
    let detail = entry.detail.as_ref();
    if let Some(svc) = &filter.grpc_service {
        if detail.and_then(|d| d.grpc_service.as_deref()) != Some(svc.as_str()) {
            return false;
        }
    }
    if let Some(topic_filter) = &filter.mqtt_topic {
        match detail.and_then(|d| d.mqtt_topic.as_deref()) {
            Some(topic) if mqtt_topic_matches(topic_filter, topic) => {}
            _ => return false,
        }
    }
    if let Some(client_id) = &filter.mqtt_client_id {
        if detail.and_then(|d| d.mqtt_client_id.as_deref()) != Some(client_id.as_str()) {
            return false;
        }
    }
    if let Some(op) = &filter.soap_operation {
        if detail.and_then(|d| d.soap_operation.as_deref()) != Some(op.as_str()) {
            return false;
        }
    }
    if let Some(op_type) = &filter.graphql_op_type {
        if detail.and_then(|d| d.graphql_op_type.as_deref()) != Some(op_type.as_str()) {
            return false;
        }
    }
    if let Some(conn) = &filter.connection_id {
        if detail.and_then(|d| d.connection_id.as_deref()) != Some(conn.as_str()) {
            return false;
        }
    }
    true
}

/// Opaque handle returned by [`RequestLogger::subscribe`]; pass to
/// [`RequestLogger::unsubscribe`] to stop delivery and close the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Bounded-capacity in-memory request log with filtering and non-blocking
/// live subscriptions.
#[derive(Clone)]
pub struct RequestLogger {
    capacity: usize,
    entries: Arc<RwLock<VecDeque<RequestLogEntry>>>,
    next_id: Arc<AtomicU64>,
    next_subscriber_id: Arc<AtomicU64>,
    subscribers: Arc<RwLock<HashMap<u64, mpsc::Sender<RequestLogEntry>>>>,
}

impl RequestLogger {
    /// Create a logger with the given ring capacity. `0` falls back to the
    /// default of 1000.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: if capacity == 0 { DEFAULT_CAPACITY } else { capacity },
            entries: Arc::new(RwLock::new(VecDeque::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            next_subscriber_id: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn next_base36_id(&self) -> String {
        to_base36(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append an entry, assigning an ID and timestamp if absent, evicting
    /// the oldest entry if at capacity, and fanning the stored copy out to
    /// every live subscriber by non-blocking send.
    pub async fn log(&self, mut entry: RequestLogEntry) {
        if entry.id.is_empty() {
            entry.id = self.next_base36_id();
        }

        {
            let mut guard = self.entries.write().await;
            if guard.len() >= self.capacity {
                guard.pop_back();
            }
            guard.push_front(entry.clone());
        }

        let subs = self.subscribers.read().await;
        for sender in subs.values() {
            // try_send never blocks: a full subscriber channel or a
            // closed receiver just drops this entry for that subscriber.
            let _ = sender.try_send(entry.clone());
        }
    }

    /// List entries newest-first, applying `filter`'s fields as AND
    /// conditions, then offset, then limit.
    pub async fn list(&self, filter: &LogFilter) -> Vec<RequestLogEntry> {
        let guard = self.entries.read().await;
        let matched: Vec<RequestLogEntry> = guard
            .iter()
            .filter(|e| entry_matches(e, filter))
            .cloned()
            .collect();
        drop(guard);
        let after_offset = matched.into_iter().skip(filter.offset);
        match filter.limit {
            Some(limit) => after_offset.take(limit).collect(),
            None => after_offset.collect(),
        }
    }

    /// Linear-scan lookup by entry ID.
    pub async fn get(&self, id: &str) -> Option<RequestLogEntry> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }

    /// Remove every entry whose `matched_mock_id` equals `mock_id`.
    pub async fn clear_by_mock_id(&self, mock_id: &str) {
        self.entries.write().await.retain(|e| e.matched_mock_id != mock_id);
    }

    /// Count of entries whose `matched_mock_id` equals `mock_id`.
    pub async fn count_by_mock_id(&self, mock_id: &str) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.matched_mock_id == mock_id)
            .count()
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Subscribe to the live entry stream, returning the receiving end and
    /// an ID to pass to [`Self::unsubscribe`]. The channel is buffered;
    /// once full, new entries are dropped for this subscriber rather than
    /// blocking the logger.
    pub async fn subscribe(&self) -> (mpsc::Receiver<RequestLogEntry>, SubscriptionId) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.insert(id, tx);
        (rx, SubscriptionId(id))
    }

    /// Remove a subscriber, dropping its sender so the receiver observes
    /// channel closure as its signal to stop.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().await.remove(&id.0);
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(method: &str, path: &str, status: u16, mock_id: &str) -> RequestLogEntry {
        RequestLogEntry {
            id: String::new(),
            timestamp: Utc::now(),
            protocol: Protocol::Http,
            method: method.into(),
            path: path.into(),
            query: String::new(),
            headers: HashMap::new(),
            body: None,
            remote_addr: None,
            matched_mock_id: mock_id.into(),
            status,
            duration_ms: 1,
            detail: None,
            near_misses: Vec::new(),
        }
    }

    #[tokio::test]
    async fn log_assigns_id_and_evicts_when_full() {
        let logger = RequestLogger::new(2);
        logger.log(entry("GET", "/a", 200, "m1")).await;
        logger.log(entry("GET", "/b", 200, "m1")).await;
        logger.log(entry("GET", "/c", 200, "m1")).await;

        let all = logger.list(&LogFilter::default()).await;
        assert_eq!(all.len(), 2);
        // newest-first: /c then /b; /a was evicted
        assert_eq!(all[0].path, "/c");
        assert_eq!(all[1].path, "/b");
        assert!(!all[0].id.is_empty());
    }

    #[tokio::test]
    async fn default_capacity_applies_when_zero() {
        let logger = RequestLogger::new(0);
        assert_eq!(logger.capacity, DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn list_applies_filters_then_offset_then_limit() {
        let logger = RequestLogger::new(10);
        for i in 0..5 {
            logger.log(entry("GET", &format!("/p{i}"), 200, "m1")).await;
        }
        logger.log(entry("POST", "/other", 500, "m2")).await;

        let filter = LogFilter {
            method: Some("get".into()),
            offset: 1,
            limit: Some(2),
            ..Default::default()
        };
        let page = logger.list(&filter).await;
        assert_eq!(page.len(), 2);
        for e in &page {
            assert_eq!(e.method, "GET");
        }
    }

    #[tokio::test]
    async fn clear_by_mock_id_removes_only_matching_entries() {
        let logger = RequestLogger::new(10);
        logger.log(entry("GET", "/a", 200, "m1")).await;
        logger.log(entry("GET", "/b", 200, "m2")).await;
        logger.clear_by_mock_id("m1").await;
        let all = logger.list(&LogFilter::default()).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].matched_mock_id, "m2");
    }

    #[tokio::test]
    async fn subscriber_receives_logged_entry() {
        let logger = RequestLogger::new(10);
        let (mut rx, _id) = logger.subscribe().await;
        logger.log(entry("GET", "/a", 200, "m1")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.path, "/a");
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_channel() {
        let logger = RequestLogger::new(10);
        let (mut rx, id) = logger.subscribe().await;
        logger.unsubscribe(id).await;
        logger.log(entry("GET", "/a", 200, "m1")).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn mqtt_topic_wildcard_matching() {
        assert!(mqtt_topic_matches("sensors/+/temp", "sensors/1/temp"));
        assert!(mqtt_topic_matches("sensors/#", "sensors/1/temp"));
        assert!(!mqtt_topic_matches("sensors/+/temp", "sensors/1/2/temp"));
    }

    #[test]
    fn base36_roundtrip_is_monotone_in_length() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
