use super::{read_json, request_error, trim_base};
use async_trait::async_trait;
use relaycore::{FetchOptions, ListQuery, RecordPage, RecordStore, StoreError, TransportError};
use serde_json::Value;

const PROVIDER: &str = "pocketbase";

/// [`RecordStore`] over the PocketBase REST API
pub struct PocketBaseStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl PocketBaseStore {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            token,
        }
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{}/records", self.base_url, collection)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", token),
            None => request,
        }
    }

    async fn send(
        &self,
        collection: &str,
        id: Option<&str>,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;

        match (read_json(PROVIDER, response).await, id) {
            (Err(TransportError::Status { status: 404, .. }), Some(id)) => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            (result, _) => Ok(result?),
        }
    }
}

fn optional_params(params: &mut Vec<(&'static str, String)>, options: &FetchOptions) {
    if let Some(expand) = &options.expand {
        params.push(("expand", expand.clone()));
    }
    if let Some(fields) = &options.fields {
        params.push(("fields", fields.clone()));
    }
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<RecordPage, StoreError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("perPage", query.limit.to_string()),
        ];
        if let Some(filter) = &query.filter {
            params.push(("filter", filter.clone()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }
        optional_params(&mut params, &query.fetch_options());

        let request = self.client.get(self.records_url(collection)).query(&params);
        let body = match self.send(collection, None, request).await {
            // PocketBase answers 400 to filters it cannot parse
            Err(StoreError::Transport(TransportError::Status { status: 400, body, .. })) => {
                return Err(StoreError::InvalidFilter {
                    filter: query.filter.clone().unwrap_or_default(),
                    reason: body,
                })
            }
            other => other?,
        };

        let items = match body.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(StoreError::Malformed {
                    collection: collection.to_string(),
                    reason: "list response has no items".to_string(),
                })
            }
        };
        let total = body
            .get("totalItems")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        Ok(RecordPage { items, total })
    }

    async fn get_one(
        &self,
        collection: &str,
        id: &str,
        options: &FetchOptions,
    ) -> Result<Value, StoreError> {
        let mut params = Vec::new();
        optional_params(&mut params, options);
        let url = format!("{}/{}", self.records_url(collection), id);
        self.send(collection, Some(id), self.client.get(url).query(&params))
            .await
    }

    async fn create(&self, collection: &str, data: &Value) -> Result<Value, StoreError> {
        let request = self.client.post(self.records_url(collection)).json(data);
        self.send(collection, None, request).await
    }

    async fn update(&self, collection: &str, id: &str, data: &Value) -> Result<Value, StoreError> {
        let url = format!("{}/{}", self.records_url(collection), id);
        self.send(collection, Some(id), self.client.patch(url).json(data))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_maps_query_and_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/collections/customers/records"))
            .and(query_param("page", "2"))
            .and(query_param("perPage", "10"))
            .and(query_param("filter", "vip = true"))
            .and(query_param("sort", "-created"))
            .and(header("Authorization", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 2, "perPage": 10, "totalItems": 11,
                "items": [{"id": "c11"}]
            })))
            .mount(&server)
            .await;

        let store = PocketBaseStore::new(
            reqwest::Client::new(),
            format!("{}/", server.uri()),
            Some("secret".into()),
        );
        let query = ListQuery::filtered("vip = true").sorted("-created").limit(10).page(2);
        let page = store.list("customers", &query).await.unwrap();
        assert_eq!(page.total, 11);
        assert_eq!(page.items, vec![json!({"id": "c11"})]);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/collections/customers/records/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "missing"})))
            .mount(&server)
            .await;

        let store = PocketBaseStore::new(reqwest::Client::new(), server.uri(), None);
        let err = store
            .get_one("customers", "nope", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_uses_patch() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/collections/customers/records/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1", "vip": true})))
            .mount(&server)
            .await;

        let store = PocketBaseStore::new(reqwest::Client::new(), server.uri(), None);
        let record = store
            .update("customers", "c1", &json!({"vip": true}))
            .await
            .unwrap();
        assert_eq!(record["vip"], true);
    }

    #[tokio::test]
    async fn test_server_errors_surface_as_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let store = PocketBaseStore::new(reqwest::Client::new(), server.uri(), None);
        let err = store.create("customers", &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transport(TransportError::Status { status: 500, .. })
        ));
    }
}
