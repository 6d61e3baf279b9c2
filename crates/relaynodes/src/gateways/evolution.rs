use super::{read_json, request_error, trim_base};
use async_trait::async_trait;
use relaycore::{Delivery, MediaMessage, MessagingGateway, TransportError};
use serde_json::{json, Value};

const PROVIDER: &str = "whatsapp";

/// WhatsApp delivery through an Evolution API instance
pub struct EvolutionGateway {
    client: reqwest::Client,
    base_url: String,
    instance: String,
    api_key: Option<String>,
}

impl EvolutionGateway {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        instance: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            instance: instance.into(),
            api_key,
        }
    }

    async fn post(&self, action: &str, body: Value) -> Result<Delivery, TransportError> {
        let url = format!("{}/message/{}/{}", self.base_url, action, self.instance);
        let mut request = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| request_error(PROVIDER, e))?;
        let response = read_json(PROVIDER, response).await?;
        let message_id = response
            .pointer("/key/id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Delivery::accepted(message_id, response))
    }
}

#[async_trait]
impl MessagingGateway for EvolutionGateway {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Delivery, TransportError> {
        self.post("sendText", json!({ "number": recipient, "text": text }))
            .await
    }

    async fn send_media(
        &self,
        recipient: &str,
        media: &MediaMessage,
    ) -> Result<Delivery, TransportError> {
        self.post(
            "sendMedia",
            json!({
                "number": recipient,
                "mediatype": media.media_type,
                "media": media.url,
                "caption": media.caption.clone().unwrap_or_default(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/shop"))
            .and(header("apikey", "k1"))
            .and(body_json(json!({"number": "5511", "text": "hello"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"key": {"id": "ABC"}, "status": "PENDING"})),
            )
            .mount(&server)
            .await;

        let gateway =
            EvolutionGateway::new(reqwest::Client::new(), server.uri(), "shop", Some("k1".into()));
        let delivery = gateway.send_text("5511", "hello").await.unwrap();
        assert!(delivery.success);
        assert_eq!(delivery.provider_message_id.as_deref(), Some("ABC"));
    }

    #[tokio::test]
    async fn test_send_media_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendMedia/shop"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad number"))
            .mount(&server)
            .await;

        let gateway = EvolutionGateway::new(reqwest::Client::new(), server.uri(), "shop", None);
        let media = MediaMessage {
            media_type: "image".into(),
            url: "https://x/y.png".into(),
            caption: None,
        };
        let err = gateway.send_media("5511", &media).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 400, ref body, .. } if body == "bad number"));
    }
}
