//! Interfaces to the external collaborators the engine calls into.
//!
//! Implementations live outside this crate (HTTP adapters in `relaynodes`,
//! in-memory ones in `relayruntime`). All of them must be safe to share
//! between concurrently running flows.

use crate::{StoreError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query for [`RecordStore::list`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub limit: u32,
    pub page: u32,
    pub expand: Option<String>,
    pub fields: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort: None,
            limit: 50,
            page: 1,
            expand: None,
            fields: None,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            expand: self.expand.clone(),
            fields: self.fields.clone(),
        }
    }
}

/// Relation expansion and field projection for single-record reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    pub expand: Option<String>,
    pub fields: Option<String>,
}

/// One page of records plus the total match count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub items: Vec<Value>,
    pub total: u64,
}

/// Generic collection-oriented record store.
/// Records are JSON objects carrying a string `id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<RecordPage, StoreError>;

    async fn get_one(
        &self,
        collection: &str,
        id: &str,
        options: &FetchOptions,
    ) -> Result<Value, StoreError>;

    async fn create(&self, collection: &str, data: &Value) -> Result<Value, StoreError>;

    async fn update(&self, collection: &str, id: &str, data: &Value) -> Result<Value, StoreError>;
}

/// Provider acknowledgement of an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub response: Value,
}

impl Delivery {
    pub fn accepted(provider_message_id: Option<String>, response: Value) -> Self {
        Self {
            success: true,
            provider_message_id,
            response,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    pub media_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Chat messaging gateway (WhatsApp and similar channels)
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Delivery, TransportError>;

    async fn send_media(
        &self,
        recipient: &str,
        media: &MediaMessage,
    ) -> Result<Delivery, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<Delivery, TransportError>;
}
