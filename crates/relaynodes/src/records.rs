//! Record store nodes: `pb.find`, `pb.getOne`, `pb.create`, `pb.update`.

use async_trait::async_trait;
use relaycore::{
    FetchOptions, ListQuery, Node, NodeContext, NodeError, NodeMetadata, NodeOutput, RecordStore,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn owned(ctx: &NodeContext, name: &str) -> Option<String> {
    ctx.config_str(name).map(str::to_string)
}

fn fetch_options(ctx: &NodeContext) -> FetchOptions {
    FetchOptions {
        expand: owned(ctx, "expand"),
        fields: owned(ctx, "fields"),
    }
}

/// Record payload from `data`, which may arrive as a JSON string
fn record_data(ctx: &NodeContext) -> Result<Value, NodeError> {
    match ctx.config_json("data")? {
        Some(data @ Value::Object(_)) => Ok(data),
        Some(other) => Err(NodeError::InvalidConfig {
            field: "data".to_string(),
            reason: format!("expected an object, got {}", other),
        }),
        None => Err(NodeError::MissingConfig("data".to_string())),
    }
}

fn metadata(description: &str) -> NodeMetadata {
    NodeMetadata {
        description: description.to_string(),
        category: "records".to_string(),
    }
}

pub struct PbFindNode {
    store: Arc<dyn RecordStore>,
}

impl PbFindNode {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Node for PbFindNode {
    fn node_type(&self) -> &str {
        "pb.find"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let collection = ctx.require_str("collection")?;
        let query = ListQuery {
            filter: owned(&ctx, "filter"),
            sort: owned(&ctx, "sort"),
            limit: ctx.config_u32_or("limit", 50)?,
            page: ctx.config_u32_or("page", 1)?,
            expand: owned(&ctx, "expand"),
            fields: owned(&ctx, "fields"),
        };

        let page = self.store.list(collection, &query).await?;
        ctx.events.info(format!(
            "Found {} record(s) in {} ({} on this page)",
            page.total,
            collection,
            page.items.len()
        ));
        Ok(NodeOutput::new(json!({
            "records": page.items,
            "count": page.total,
        })))
    }

    fn metadata(&self) -> NodeMetadata {
        metadata("List records of a collection")
    }
}

pub struct PbGetOneNode {
    store: Arc<dyn RecordStore>,
}

impl PbGetOneNode {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Node for PbGetOneNode {
    fn node_type(&self) -> &str {
        "pb.getOne"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let collection = ctx.require_str("collection")?;
        let options = fetch_options(&ctx);

        if let Some(id) = ctx.config_str("recordId") {
            let record = self.store.get_one(collection, id, &options).await?;
            return Ok(NodeOutput::new(json!({ "record": record, "exists": true })));
        }

        let filter = ctx.config_str("filter").ok_or(NodeError::MissingSelector)?;
        let query = ListQuery {
            filter: Some(filter.to_string()),
            limit: 1,
            page: 1,
            expand: options.expand,
            fields: options.fields,
            ..ListQuery::default()
        };
        let page = self.store.list(collection, &query).await?;
        let output = match page.items.into_iter().next() {
            Some(record) => json!({ "record": record, "exists": true }),
            None => json!({ "record": null, "exists": false }),
        };
        Ok(NodeOutput::new(output))
    }

    fn metadata(&self) -> NodeMetadata {
        metadata("Fetch a single record by id or filter")
    }
}

pub struct PbCreateNode {
    store: Arc<dyn RecordStore>,
}

impl PbCreateNode {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Node for PbCreateNode {
    fn node_type(&self) -> &str {
        "pb.create"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let collection = ctx.require_str("collection")?;
        let data = record_data(&ctx)?;
        let record = self.store.create(collection, &data).await?;
        Ok(NodeOutput::new(json!({ "record": record })))
    }

    fn metadata(&self) -> NodeMetadata {
        metadata("Create a record")
    }
}

pub struct PbUpdateNode {
    store: Arc<dyn RecordStore>,
}

impl PbUpdateNode {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Node for PbUpdateNode {
    fn node_type(&self) -> &str {
        "pb.update"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let collection = ctx.require_str("collection")?;
        let id = ctx.require_str("id")?;
        let data = record_data(&ctx)?;
        let record = self.store.update(collection, id, &data).await?;
        Ok(NodeOutput::new(json!({ "record": record })))
    }

    fn metadata(&self) -> NodeMetadata {
        metadata("Update a record by id")
    }
}
