use async_trait::async_trait;
use relaycore::template::{lookup, render};
use relaycore::{
    Delivery, EmailGateway, EmailMessage, MediaMessage, MessagingGateway, Node, NodeContext,
    NodeError, NodeMetadata, NodeOutput, TransportError,
};
use serde_json::json;
use std::sync::Arc;

/// Sends a chat message on any channel (`whatsapp.send`, `sms.send`, ...).
pub struct MessageSendNode {
    gateway: Arc<dyn MessagingGateway>,
}

impl MessageSendNode {
    pub fn new(gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { gateway }
    }
}

/// Work out who receives the message.
///
/// `toPath` takes precedence over `to`. A dotted path is looked up in the
/// current data, an all-digit value is a literal number, and anything else
/// is looked up as a top-level key.
fn recipient(ctx: &NodeContext) -> Option<String> {
    if let Some(path) = ctx.config_str("toPath") {
        if !path.contains('.') && path.chars().all(|c| c.is_ascii_digit()) {
            return Some(path.to_string());
        }
        return lookup(&ctx.data, path)
            .filter(|v| !v.is_null())
            .map(render)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
    }
    ctx.config_str("to").map(str::to_string)
}

fn delivered(provider: &str, delivery: Delivery) -> Result<NodeOutput, NodeError> {
    if !delivery.success {
        return Err(TransportError::Rejected {
            provider: provider.to_string(),
            message: render(&delivery.response),
        }
        .into());
    }
    Ok(NodeOutput::new(json!({
        "sent": true,
        "providerMessageId": delivery.provider_message_id,
        "response": delivery.response,
    })))
}

#[async_trait]
impl Node for MessageSendNode {
    fn node_type(&self) -> &str {
        "*.send"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let to = recipient(&ctx).ok_or(NodeError::MissingRecipient)?;
        let channel = ctx
            .node_type
            .split_once('.')
            .map(|(channel, _)| channel)
            .unwrap_or("messaging");

        let delivery = match ctx.config_str("messageType").unwrap_or("text") {
            "text" => {
                let text = ctx.config_str("template").unwrap_or_default();
                ctx.events.info(format!("Sending {} text to {}", channel, to));
                self.gateway.send_text(&to, text).await?
            }
            _ => {
                let media = MediaMessage {
                    media_type: ctx.config_str("mediaType").unwrap_or("image").to_string(),
                    url: ctx.config_str("mediaUrl").unwrap_or_default().to_string(),
                    caption: ctx.config_str("mediaCaption").map(str::to_string),
                };
                ctx.events
                    .info(format!("Sending {} {} to {}", channel, media.media_type, to));
                self.gateway.send_media(&to, &media).await?
            }
        };

        delivered(channel, delivery)
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Send a text or media message".to_string(),
            category: "messaging".to_string(),
        }
    }
}

pub struct EmailSendNode {
    gateway: Arc<dyn EmailGateway>,
}

impl EmailSendNode {
    pub fn new(gateway: Arc<dyn EmailGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for EmailSendNode {
    fn node_type(&self) -> &str {
        "email.send"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = EmailMessage {
            to: ctx.require_str("to")?.to_string(),
            subject: ctx.config_str("subject").unwrap_or_default().to_string(),
            html: ctx.config_str("html").unwrap_or_default().to_string(),
        };
        ctx.events.info(format!("Sending email to {}", message.to));
        let delivery = self.gateway.send(&message).await?;
        delivered("email", delivery)
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Send an HTML email".to_string(),
            category: "messaging".to_string(),
        }
    }
}
