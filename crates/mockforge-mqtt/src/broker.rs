//! The in-process broker: one instance per bound port, no
//! persistence or clustering. Tracks subscriptions, retained messages and
//! QoS 0/1/2 acknowledgement bookkeeping, and seeds a mock's fixture
//! payload as a retained message on its configured topic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use mockforge_core::{Protocol, ProtocolDetail, RequestLogEntry, RequestLogger};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::protocol::{self, Packet, PublishPacket, QoS};
use crate::topics::TopicTree;

/// Shared broker state for every connection bound to one port.
pub struct Broker {
    mock_id: String,
    topics: Mutex<TopicTree>,
    clients: Mutex<HashMap<String, mpsc::Sender<Packet>>>,
    next_packet_id: AtomicU16,
    logger: RequestLogger,
}

impl Broker {
    pub fn new(
        mock_id: String,
        fixture_topic: Option<String>,
        fixture_payload: Option<Value>,
        logger: RequestLogger,
    ) -> Arc<Self> {
        let broker = Arc::new(Self {
            mock_id,
            topics: Mutex::new(TopicTree::new()),
            clients: Mutex::new(HashMap::new()),
            next_packet_id: AtomicU16::new(1),
            logger,
        });
        if let (Some(topic), Some(payload)) = (fixture_topic, fixture_payload) {
            let bytes = match &payload {
                Value::String(s) => s.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            };
            let broker = broker.clone();
            tokio::spawn(async move {
                broker.topics.lock().await.retain(&topic, bytes, QoS::AtMostOnce);
            });
        }
        broker
    }

    fn next_id(&self) -> u16 {
        let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.next_packet_id.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    /// Accept and service one client connection until it disconnects.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let (mut reader, writer) = tokio::io::split(stream);
        let client_id = match protocol::read_packet(&mut reader).await {
            Ok(Some(Packet::Connect(connect))) => {
                if connect.client_id.is_empty() {
                    format!("anon-{}", uuid::Uuid::new_v4())
                } else {
                    connect.client_id
                }
            }
            Ok(_) => {
                debug!(mock_id = %self.mock_id, "first packet was not CONNECT, closing");
                return;
            }
            Err(e) => {
                debug!(mock_id = %self.mock_id, error = %e, "failed to read CONNECT");
                return;
            }
        };

        let (tx, rx) = mpsc::channel(64);
        self.clients.lock().await.insert(client_id.clone(), tx);
        let writer_task = tokio::spawn(run_writer(writer, rx));

        self.send_to(&client_id, Packet::Connack { session_present: false, return_code: 0 }).await;
        info!(mock_id = %self.mock_id, %client_id, "mqtt client connected");

        self.read_loop(&mut reader, &client_id).await;

        self.topics.lock().await.remove_client(&client_id);
        self.clients.lock().await.remove(&client_id);
        writer_task.abort();
        info!(mock_id = %self.mock_id, %client_id, "mqtt client disconnected");
    }

    async fn read_loop(&self, reader: &mut ReadHalf<TcpStream>, client_id: &str) {
        loop {
            let packet = match protocol::read_packet(reader).await {
                Ok(Some(p)) => p,
                Ok(None) => return,
                Err(e) => {
                    debug!(mock_id = %self.mock_id, %client_id, error = %e, "malformed packet, closing connection");
                    return;
                }
            };

            match packet {
                Packet::Publish(publish) => self.handle_publish(client_id, publish).await,
                Packet::Subscribe(sub) => self.handle_subscribe(client_id, sub).await,
                Packet::Unsubscribe(unsub) => self.handle_unsubscribe(client_id, unsub).await,
                Packet::Puback { .. } | Packet::Pubrec { .. } | Packet::Pubcomp { .. } => {}
                Packet::Pubrel { packet_id } => {
                    self.send_to(client_id, Packet::Pubcomp { packet_id }).await;
                }
                Packet::Pingreq => self.send_to(client_id, Packet::Pingresp).await,
                Packet::Disconnect => return,
                Packet::Connect(_) => return,
                _ => {}
            }
        }
    }

    async fn handle_publish(&self, client_id: &str, publish: PublishPacket) {
        debug!(mock_id = %self.mock_id, %client_id, topic = %publish.topic, qos = ?publish.qos, "publish received");

        self.logger
            .log(RequestLogEntry {
                id: String::new(),
                timestamp: chrono::Utc::now(),
                protocol: Protocol::Mqtt,
                method: "PUBLISH".to_string(),
                path: publish.topic.clone(),
                query: String::new(),
                headers: HashMap::new(),
                body: Some(String::from_utf8_lossy(&publish.payload).into_owned()),
                remote_addr: None,
                matched_mock_id: self.mock_id.clone(),
                status: 0,
                duration_ms: 0,
                detail: Some(ProtocolDetail {
                    mqtt_topic: Some(publish.topic.clone()),
                    mqtt_client_id: Some(client_id.to_string()),
                    ..Default::default()
                }),
                near_misses: Vec::new(),
            })
            .await;

        match publish.qos {
            QoS::AtLeastOnce => {
                if let Some(id) = publish.packet_id {
                    self.send_to(client_id, Packet::Puback { packet_id: id }).await;
                }
            }
            QoS::ExactlyOnce => {
                if let Some(id) = publish.packet_id {
                    self.send_to(client_id, Packet::Pubrec { packet_id: id }).await;
                }
            }
            QoS::AtMostOnce => {}
        }

        if publish.retain {
            self.topics.lock().await.retain(&publish.topic, publish.payload.clone(), publish.qos);
        }

        let subscribers = self.topics.lock().await.matching_clients(&publish.topic);
        for (subscriber, granted_qos) in subscribers {
            if subscriber == client_id {
                continue;
            }
            let delivered_qos = if (granted_qos as u8) < (publish.qos as u8) { granted_qos } else { publish.qos };
            let packet_id = if matches!(delivered_qos, QoS::AtMostOnce) { None } else { Some(self.next_id()) };
            let out = Packet::Publish(PublishPacket {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
                qos: delivered_qos,
                retain: false,
                dup: false,
                packet_id,
            });
            self.send_to(&subscriber, out).await;
        }
    }

    async fn handle_subscribe(&self, client_id: &str, sub: crate::protocol::SubscribePacket) {
        let mut return_codes = Vec::with_capacity(sub.filters.len());
        let mut retained_deliveries = Vec::new();
        {
            let mut topics = self.topics.lock().await;
            for (filter, qos) in &sub.filters {
                topics.subscribe(client_id, filter, *qos);
                return_codes.push(*qos as u8);
                retained_deliveries.extend(topics.retained_for_filter(filter));
            }
        }
        self.send_to(client_id, Packet::Suback { packet_id: sub.packet_id, return_codes }).await;

        for (topic, retained) in retained_deliveries {
            let packet_id = if matches!(retained.qos, QoS::AtMostOnce) { None } else { Some(self.next_id()) };
            let out = Packet::Publish(PublishPacket {
                topic,
                payload: retained.payload,
                qos: retained.qos,
                retain: true,
                dup: false,
                packet_id,
            });
            self.send_to(client_id, out).await;
        }
    }

    async fn handle_unsubscribe(&self, client_id: &str, unsub: crate::protocol::UnsubscribePacket) {
        {
            let mut topics = self.topics.lock().await;
            for filter in &unsub.filters {
                topics.unsubscribe(client_id, filter);
            }
        }
        self.send_to(client_id, Packet::Unsuback { packet_id: unsub.packet_id }).await;
    }

    async fn send_to(&self, client_id: &str, packet: Packet) {
        let sender = self.clients.lock().await.get(client_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(packet).await;
        }
    }
}

async fn run_writer(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Packet>) {
    while let Some(packet) = rx.recv().await {
        if let Err(e) = protocol::write_packet(&mut writer, &packet).await {
            debug!(error = %e, "failed to write packet, dropping connection");
            let _ = writer.shutdown().await;
            return;
        }
    }
}
