//! HTTP adapters for the ports, plus the settings that select them.

mod evolution;
mod mailer;
mod pocketbase;

pub use evolution::EvolutionGateway;
pub use mailer::HttpMailer;
pub use pocketbase::PocketBaseStore;

use crate::Ports;
use relaycore::TransportError;
use relayruntime::{InMemoryRecordStore, RecordingMailer, RecordingMessenger};
use serde_json::Value;
use std::sync::Arc;

/// Where the external services live. Unset services fall back to the
/// in-memory implementations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewaySettings {
    pub pocketbase_url: Option<String>,
    pub pocketbase_token: Option<String>,
    pub whatsapp_url: Option<String>,
    pub whatsapp_instance: Option<String>,
    pub whatsapp_api_key: Option<String>,
    pub email_url: Option<String>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        Self {
            pocketbase_url: env_value("RELAY_POCKETBASE_URL"),
            pocketbase_token: env_value("RELAY_POCKETBASE_TOKEN"),
            whatsapp_url: env_value("RELAY_WHATSAPP_URL"),
            whatsapp_instance: env_value("RELAY_WHATSAPP_INSTANCE"),
            whatsapp_api_key: env_value("RELAY_WHATSAPP_API_KEY"),
            email_url: env_value("RELAY_EMAIL_URL"),
        }
    }

    pub fn into_ports(self) -> Ports {
        let client = reqwest::Client::new();

        let store: Arc<dyn relaycore::RecordStore> = match self.pocketbase_url {
            Some(url) => {
                tracing::info!("Using PocketBase at {}", url);
                Arc::new(PocketBaseStore::new(client.clone(), url, self.pocketbase_token))
            }
            None => {
                tracing::warn!("RELAY_POCKETBASE_URL not set; records are kept in memory");
                Arc::new(InMemoryRecordStore::new())
            }
        };

        let messaging: Arc<dyn relaycore::MessagingGateway> = match self.whatsapp_url {
            Some(url) => {
                let instance = self.whatsapp_instance.unwrap_or_else(|| "default".to_string());
                tracing::info!("Using Evolution API at {} (instance {})", url, instance);
                Arc::new(EvolutionGateway::new(
                    client.clone(),
                    url,
                    instance,
                    self.whatsapp_api_key,
                ))
            }
            None => {
                tracing::warn!("RELAY_WHATSAPP_URL not set; messages are kept in memory");
                Arc::new(RecordingMessenger::new())
            }
        };

        let email: Arc<dyn relaycore::EmailGateway> = match self.email_url {
            Some(url) => Arc::new(HttpMailer::new(client, url)),
            None => {
                tracing::warn!("RELAY_EMAIL_URL not set; emails are kept in memory");
                Arc::new(RecordingMailer::new())
            }
        };

        Ports {
            store,
            messaging,
            email,
        }
    }
}

fn trim_base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_string()
}

fn request_error(provider: &str, e: reqwest::Error) -> TransportError {
    TransportError::Request {
        provider: provider.to_string(),
        message: e.to_string(),
    }
}

/// Read a JSON body, turning non-2xx statuses into [`TransportError::Status`]
async fn read_json(provider: &str, response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| request_error(provider, e))?;

    if !status.is_success() {
        return Err(TransportError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| TransportError::Decode {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}
