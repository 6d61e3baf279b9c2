//! Saved flow definitions, kept in the record store's `flows` collection.

use relaycore::{Canvas, FlowDefinition, FlowStatus, ListQuery, RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const FLOWS_PAGE: u32 = 200;

#[derive(Debug, Serialize, Deserialize)]
struct FlowRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    status: FlowStatus,
    #[serde(default = "first_version")]
    version: u32,
    #[serde(default)]
    canvas_json: Canvas,
}

fn first_version() -> u32 {
    1
}

impl From<&FlowDefinition> for FlowRecord {
    fn from(flow: &FlowDefinition) -> Self {
        Self {
            id: flow.id.clone(),
            name: flow.name.clone(),
            description: flow.description.clone().filter(|d| !d.is_empty()),
            status: flow.status,
            version: flow.version,
            canvas_json: flow.canvas.clone(),
        }
    }
}

impl From<FlowRecord> for FlowDefinition {
    fn from(record: FlowRecord) -> Self {
        FlowDefinition {
            id: record.id,
            name: record.name,
            description: record.description.filter(|d| !d.is_empty()),
            version: record.version,
            status: record.status,
            canvas: record.canvas_json,
        }
    }
}

fn decode(collection: &str, record: serde_json::Value) -> Result<FlowDefinition, StoreError> {
    serde_json::from_value::<FlowRecord>(record)
        .map(FlowDefinition::from)
        .map_err(|e| StoreError::Malformed {
            collection: collection.to_string(),
            reason: e.to_string(),
        })
}

/// Reads and writes flow definitions through a [`RecordStore`]
pub struct FlowStore {
    store: Arc<dyn RecordStore>,
    collection: String,
}

impl FlowStore {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<FlowDefinition>, StoreError> {
        match self.store.get_one(&self.collection, id, &Default::default()).await {
            Ok(record) => decode(&self.collection, record).map(Some),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every saved flow, ordered by name
    pub async fn list(&self) -> Result<Vec<FlowDefinition>, StoreError> {
        self.list_where(None).await
    }

    /// Flows whose status is `active`
    pub async fn list_active(&self) -> Result<Vec<FlowDefinition>, StoreError> {
        self.list_where(Some("status = \"active\"")).await
    }

    async fn list_where(&self, filter: Option<&str>) -> Result<Vec<FlowDefinition>, StoreError> {
        let mut query = ListQuery::default().sorted("+name").limit(FLOWS_PAGE);
        query.filter = filter.map(str::to_string);

        let mut flows = Vec::new();
        loop {
            let page = self.store.list(&self.collection, &query).await?;
            let fetched = page.items.len();
            for item in page.items {
                flows.push(decode(&self.collection, item)?);
            }
            if fetched == 0 || flows.len() as u64 >= page.total {
                break;
            }
            query.page += 1;
        }
        Ok(flows)
    }

    /// Create the flow, or replace the stored one and bump its version.
    ///
    /// A flow without an id gets one from the store.
    pub async fn save(&self, flow: &FlowDefinition) -> Result<FlowDefinition, StoreError> {
        let mut saved = flow.clone();
        let existing = if flow.id.is_empty() {
            None
        } else {
            self.get(&flow.id).await?
        };

        saved.version = existing.as_ref().map_or(1, |current| current.version + 1);
        let record =
            serde_json::to_value(FlowRecord::from(&saved)).map_err(|e| StoreError::Malformed {
                collection: self.collection.clone(),
                reason: e.to_string(),
            })?;

        if existing.is_some() {
            self.store.update(&self.collection, &saved.id, &record).await?;
        } else {
            let created = self.store.create(&self.collection, &record).await?;
            if let Some(id) = created.get("id").and_then(|v| v.as_str()) {
                saved.id = id.to_string();
            }
        }

        tracing::debug!("Stored flow {} v{}", saved.id, saved.version);
        Ok(saved)
    }

    /// Mark a flow archived. Returns false when no such flow exists.
    pub async fn archive(&self, id: &str) -> Result<bool, StoreError> {
        let patch = json!({ "status": FlowStatus::Archived });
        match self.store.update(&self.collection, id, &patch).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;
    use relaycore::CanvasNode;

    fn flow(id: &str, name: &str, status: FlowStatus) -> FlowDefinition {
        let mut flow = FlowDefinition::new(name).with_status(status);
        flow.id = id.to_string();
        flow.add_node(CanvasNode::new("t", "trigger.cron").with_config("schedule", "5m"));
        flow
    }

    #[tokio::test]
    async fn test_save_load_and_version_bump() {
        let store = Arc::new(InMemoryRecordStore::new());
        let flows = FlowStore::new(store.clone(), "flows");

        let saved = flows.save(&flow("f1", "nightly", FlowStatus::Active)).await.unwrap();
        assert_eq!(saved.version, 1);

        let raw = store.records("flows").await;
        assert_eq!(raw[0]["id"], "f1");
        assert_eq!(raw[0]["status"], "active");
        assert_eq!(raw[0]["canvas_json"]["nodes"][0]["type"], "trigger.cron");

        let again = flows.save(&flow("f1", "nightly v2", FlowStatus::Draft)).await.unwrap();
        assert_eq!(again.version, 2);

        let loaded = flows.get("f1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly v2");
        assert_eq!(loaded.status, FlowStatus::Draft);
        assert_eq!(loaded.canvas.nodes[0].config["schedule"], "5m");
        assert!(flows.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_assigns_missing_id() {
        let store = Arc::new(InMemoryRecordStore::new());
        let flows = FlowStore::new(store, "flows");

        let saved = flows.save(&flow("", "fresh", FlowStatus::Draft)).await.unwrap();
        assert!(!saved.id.is_empty());
        assert!(flows.get(&saved.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_active_listing_and_archive() {
        let store = Arc::new(InMemoryRecordStore::new());
        let flows = FlowStore::new(store, "flows");
        flows.save(&flow("b", "beta", FlowStatus::Active)).await.unwrap();
        flows.save(&flow("a", "alpha", FlowStatus::Active)).await.unwrap();
        flows.save(&flow("d", "draft", FlowStatus::Draft)).await.unwrap();

        let names: Vec<_> = flows.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["alpha", "beta", "draft"]);

        assert!(flows.archive("b").await.unwrap());
        assert!(!flows.archive("zzz").await.unwrap());

        let active: Vec<_> = flows.list_active().await.unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(active, vec!["a"]);
    }
}
