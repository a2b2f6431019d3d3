//! Topic tree: subscription bookkeeping, `+`/`#` wildcard matching, and
//! retained-message storage.

use std::collections::HashMap;

use crate::protocol::QoS;

fn segments(topic: &str) -> Vec<&str> {
    topic.split('/').collect()
}

/// Whether `topic` matches subscription `filter`, per MQTT 3.1.1 §4.7's
/// wildcard rules: `+` matches exactly one level, `#` matches the rest of
/// the topic (only legal as the final filter segment).
pub fn matches_filter(topic: &str, filter: &str) -> bool {
    let topic_segments = segments(topic);
    let filter_segments = segments(filter);

    let mut t = topic_segments.iter();
    let mut f = filter_segments.iter().peekable();

    loop {
        match (t.next(), f.next()) {
            (_, Some(&"#")) => return f.peek().is_none(),
            (Some(_), Some(&"+")) => continue,
            (Some(ts), Some(fs)) if ts == fs => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
}

#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Per-client subscriptions and the broker's retained-message store.
#[derive(Default)]
pub struct TopicTree {
    subscriptions: HashMap<String, Vec<Subscription>>,
    retained: HashMap<String, RetainedMessage>,
}

impl TopicTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, client_id: &str, filter: &str, qos: QoS) {
        let entry = self.subscriptions.entry(client_id.to_string()).or_default();
        entry.retain(|s| s.filter != filter);
        entry.push(Subscription { filter: filter.to_string(), qos });
    }

    pub fn unsubscribe(&mut self, client_id: &str, filter: &str) {
        if let Some(subs) = self.subscriptions.get_mut(client_id) {
            subs.retain(|s| s.filter != filter);
        }
    }

    pub fn remove_client(&mut self, client_id: &str) {
        self.subscriptions.remove(client_id);
    }

    /// Every client whose subscription set matches `topic`, with the
    /// subscribed QoS to deliver at (min of publish QoS and subscribe QoS
    /// is the caller's responsibility).
    pub fn matching_clients(&self, topic: &str) -> Vec<(String, QoS)> {
        let mut out = Vec::new();
        for (client_id, subs) in &self.subscriptions {
            if let Some(sub) = subs.iter().find(|s| matches_filter(topic, &s.filter)) {
                out.push((client_id.clone(), sub.qos));
            }
        }
        out
    }

    pub fn retain(&mut self, topic: &str, payload: Vec<u8>, qos: QoS) {
        if payload.is_empty() {
            self.retained.remove(topic);
        } else {
            self.retained.insert(topic.to_string(), RetainedMessage { payload, qos });
        }
    }

    /// Retained messages whose topic matches a freshly installed `filter`,
    /// delivered once right after a SUBSCRIBE per MQTT 3.1.1's
    /// retained-message rule.
    pub fn retained_for_filter(&self, filter: &str) -> Vec<(String, RetainedMessage)> {
        self.retained
            .iter()
            .filter(|(topic, _)| matches_filter(topic, filter))
            .map(|(topic, msg)| (topic.clone(), msg.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_matches_one_level() {
        assert!(matches_filter("sensors/kitchen/temp", "sensors/+/temp"));
        assert!(!matches_filter("sensors/kitchen/hall/temp", "sensors/+/temp"));
    }

    #[test]
    fn hash_matches_remaining_levels() {
        assert!(matches_filter("sensors/kitchen/temp", "sensors/#"));
        assert!(matches_filter("sensors", "sensors/#"));
        assert!(!matches_filter("other/kitchen", "sensors/#"));
    }

    #[test]
    fn exact_match_with_no_wildcards() {
        assert!(matches_filter("a/b/c", "a/b/c"));
        assert!(!matches_filter("a/b/c", "a/b"));
    }

    #[test]
    fn retained_messages_survive_resubscription() {
        let mut tree = TopicTree::new();
        tree.retain("sensors/temp", b"21".to_vec(), QoS::AtMostOnce);
        let matches = tree.retained_for_filter("sensors/+");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "sensors/temp");
    }
}
