//! In-process implementations of the ports, used by the CLI when no
//! external services are configured and throughout the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaycore::{
    Condition, Delivery, EmailGateway, EmailMessage, FetchOptions, ListQuery, MediaMessage,
    MessagingGateway, RecordPage, RecordStore, StoreError, TransportError,
};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};

/// Record store backed by a map of collections.
///
/// Filters use the same expression language as `logic.if`, evaluated with
/// the record itself as the root, so `flow_id = "abc" && count > 2` works.
#[derive(Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
    updates: RwLock<HashMap<String, usize>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records as-is; an `id` is generated for records without one.
    pub async fn seed(&self, collection: &str, records: impl IntoIterator<Item = Value>) {
        let mut collections = self.collections.write().await;
        let items = collections.entry(collection.to_string()).or_default();
        for mut record in records {
            if let Value::Object(map) = &mut record {
                map.entry("id").or_insert_with(|| json!(new_id()));
            }
            items.push(record);
        }
    }

    /// Snapshot of a collection in insertion order
    pub async fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// How many updates a collection has received
    pub async fn update_count(&self, collection: &str) -> usize {
        self.updates.read().await.get(collection).copied().unwrap_or(0)
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn project(record: &Value, fields: Option<&str>) -> Value {
    let Some(fields) = fields.map(str::trim).filter(|f| !f.is_empty()) else {
        return record.clone();
    };
    let Value::Object(map) = record else {
        return record.clone();
    };
    let picked: Map<String, Value> = fields
        .split(',')
        .map(str::trim)
        .filter_map(|f| map.get(f).map(|v| (f.to_string(), v.clone())))
        .collect();
    Value::Object(picked)
}

/// Parse `-started_at,+name` into `(field, descending)` pairs
fn sort_keys(sort: &str) -> Vec<(&str, bool)> {
    sort.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|key| match key.strip_prefix('-') {
            Some(field) => (field, true),
            None => (key.strip_prefix('+').unwrap_or(key), false),
        })
        .collect()
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<RecordPage, StoreError> {
        let condition = match query.filter.as_deref().map(str::trim) {
            Some(filter) if !filter.is_empty() => {
                Some(Condition::parse(filter).map_err(|e| StoreError::InvalidFilter {
                    filter: filter.to_string(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        let mut matched: Vec<Value> = {
            let collections = self.collections.read().await;
            collections
                .get(collection)
                .map(|items| {
                    items
                        .iter()
                        .filter(|r| condition.as_ref().map_or(true, |c| c.evaluate(r)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if let Some(sort) = query.sort.as_deref() {
            let keys = sort_keys(sort);
            matched.sort_by(|a, b| {
                keys.iter()
                    .map(|(field, desc)| {
                        let ord = compare_field(a.get(*field), b.get(*field));
                        if *desc {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if query.expand.is_some() {
            tracing::debug!("expand is not supported by the in-memory store; ignoring");
        }

        let total = matched.len() as u64;
        let limit = query.limit.max(1) as usize;
        let skip = (query.page.max(1) as usize - 1) * limit;
        let items = matched
            .iter()
            .skip(skip)
            .take(limit)
            .map(|r| project(r, query.fields.as_deref()))
            .collect();

        Ok(RecordPage { items, total })
    }

    async fn get_one(
        &self,
        collection: &str,
        id: &str,
        options: &FetchOptions,
    ) -> Result<Value, StoreError> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .and_then(|items| items.iter().find(|r| r["id"] == id))
            .map(|r| project(r, options.fields.as_deref()))
            .ok_or_else(|| not_found(collection, id))
    }

    async fn create(&self, collection: &str, data: &Value) -> Result<Value, StoreError> {
        let Value::Object(fields) = data else {
            return Err(StoreError::Malformed {
                collection: collection.to_string(),
                reason: "record data must be an object".to_string(),
            });
        };
        let mut record = fields.clone();
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_id(),
        };
        record.insert("id".to_string(), json!(id));
        let record = Value::Object(record);

        let mut collections = self.collections.write().await;
        let items = collections.entry(collection.to_string()).or_default();
        if items.iter().any(|r| r["id"] == id.as_str()) {
            return Err(StoreError::Malformed {
                collection: collection.to_string(),
                reason: format!("id {} is already taken", id),
            });
        }
        items.push(record.clone());
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, data: &Value) -> Result<Value, StoreError> {
        let Value::Object(patch) = data else {
            return Err(StoreError::Malformed {
                collection: collection.to_string(),
                reason: "update data must be an object".to_string(),
            });
        };

        let updated = {
            let mut collections = self.collections.write().await;
            let record = collections
                .get_mut(collection)
                .and_then(|items| items.iter_mut().find(|r| r["id"] == id))
                .ok_or_else(|| not_found(collection, id))?;
            if let Value::Object(existing) = record {
                for (key, value) in patch {
                    if key != "id" {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
            record.clone()
        };

        *self
            .updates
            .write()
            .await
            .entry(collection.to_string())
            .or_insert(0) += 1;
        Ok(updated)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Text { recipient: String, text: String },
    Media { recipient: String, media: MediaMessage },
}

/// Messaging gateway that keeps every message instead of sending it
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    reject: bool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway whose provider acknowledges nothing (`success: false`)
    pub fn rejecting() -> Self {
        Self {
            sent: Mutex::default(),
            reject: true,
        }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    async fn record(&self, message: SentMessage) -> Delivery {
        let mut sent = self.sent.lock().await;
        sent.push(message);
        if self.reject {
            return Delivery {
                success: false,
                provider_message_id: None,
                response: json!({ "error": "rejected" }),
            };
        }
        let id = format!("msg-{}", sent.len());
        Delivery::accepted(Some(id.clone()), json!({ "key": { "id": id } }))
    }
}

#[async_trait]
impl MessagingGateway for RecordingMessenger {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Delivery, TransportError> {
        tracing::info!("[memory] text to {}: {}", recipient, text);
        Ok(self
            .record(SentMessage::Text {
                recipient: recipient.to_string(),
                text: text.to_string(),
            })
            .await)
    }

    async fn send_media(
        &self,
        recipient: &str,
        media: &MediaMessage,
    ) -> Result<Delivery, TransportError> {
        tracing::info!("[memory] {} to {}: {}", media.media_type, recipient, media.url);
        Ok(self
            .record(SentMessage::Media {
                recipient: recipient.to_string(),
                media: media.clone(),
            })
            .await)
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailGateway for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<Delivery, TransportError> {
        tracing::info!("[memory] email to {}: {}", message.to, message.subject);
        let mut sent = self.sent.lock().await;
        sent.push(message.clone());
        Ok(Delivery::accepted(
            Some(format!("mail-{}", sent.len())),
            json!({ "queued": true }),
        ))
    }
}
