use super::{read_json, request_error, trim_base};
use async_trait::async_trait;
use relaycore::{Delivery, EmailGateway, EmailMessage, TransportError};
use serde_json::Value;

const PROVIDER: &str = "email";

/// Email relay accepting `POST {base}/send` with `{to, subject, html}`
pub struct HttpMailer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMailer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }
}

#[async_trait]
impl EmailGateway for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<Delivery, TransportError> {
        let response = self
            .client
            .post(format!("{}/send", self.base_url))
            .json(message)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;
        let response = read_json(PROVIDER, response).await?;

        let message_id = ["id", "messageId"]
            .iter()
            .find_map(|key| response.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        Ok(Delivery::accepted(message_id, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_json(json!({"to": "a@b.c", "subject": "Hi", "html": "<b>x</b>"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageId": "m-9"})))
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(reqwest::Client::new(), server.uri());
        let delivery = mailer
            .send(&EmailMessage {
                to: "a@b.c".into(),
                subject: "Hi".into(),
                html: "<b>x</b>".into(),
            })
            .await
            .unwrap();
        assert_eq!(delivery.provider_message_id.as_deref(), Some("m-9"));
    }
}
