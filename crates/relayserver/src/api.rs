use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use relaycore::{Canvas, FlowDefinition, FlowError, FlowId, FlowStatus, TriggerType};
use relayruntime::{validate_canvas, FlowRuntime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Application state shared across handlers.
/// Flows, runs and steps all live in the runtime's record store.
pub struct AppState {
    pub runtime: FlowRuntime,
}

impl AppState {
    pub fn new(runtime: FlowRuntime) -> Self {
        Self { runtime }
    }

    async fn flow(&self, id: &str) -> Result<Option<FlowDefinition>, FlowError> {
        Ok(self.runtime.flows().get(id).await?)
    }
}

/// Body of `POST /api/flows`. Omitting `id` creates a new flow.
#[derive(Debug, Deserialize)]
struct SaveFlowRequest {
    #[serde(default)]
    id: Option<FlowId>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: FlowStatus,
    #[serde(alias = "canvasJson")]
    canvas: Canvas,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRunRequest {
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    test_mode: bool,
    #[serde(default)]
    trigger_type: Option<TriggerType>,
    /// Answer with the finished report instead of the queued run
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message.into(),
    })
}

fn flow_error(e: FlowError) -> HttpResponse {
    use actix_web::http::StatusCode;

    let status = match &e {
        FlowError::RunNotFound(_) => StatusCode::NOT_FOUND,
        FlowError::FlowArchived(_) => StatusCode::CONFLICT,
        FlowError::Canvas(_) | FlowError::NoTriggerNode => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    error_body(status, e.to_string())
}

fn flow_not_found(id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Flow {} not found", id),
    })
}

fn empty_input() -> Value {
    Value::Object(Default::default())
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "relay"
    }))
}

#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let flows = match data.runtime.flows().list().await {
        Ok(flows) => flows,
        Err(e) => return Ok(flow_error(e.into())),
    };
    let summaries: Vec<_> = flows
        .iter()
        .map(|f| {
            json!({
                "id": f.id,
                "name": f.name,
                "description": f.description,
                "status": f.status,
                "version": f.version,
                "nodes": f.canvas.nodes.len(),
                "edges": f.canvas.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(summaries))
}

/// Create a flow, or replace one and bump its version
#[post("/api/flows")]
async fn save_flow(
    data: web::Data<AppState>,
    body: web::Json<SaveFlowRequest>,
) -> ActixResult<impl Responder> {
    let body = body.into_inner();
    if let Err(e) = validate_canvas(&body.canvas) {
        return Ok(flow_error(e.into()));
    }

    let mut flow = FlowDefinition::new(body.name).with_status(body.status);
    flow.id = body.id.unwrap_or_default();
    flow.description = body.description;
    flow.canvas = body.canvas;

    let flow = match data.runtime.flows().save(&flow).await {
        Ok(saved) => saved,
        Err(e) => return Ok(flow_error(e.into())),
    };
    info!("Saved flow: {} ({}) v{}", flow.name, flow.id, flow.version);

    let response = json!({ "id": flow.id, "version": flow.version });
    Ok(if flow.version == 1 {
        HttpResponse::Created().json(response)
    } else {
        HttpResponse::Ok().json(response)
    })
}

#[get("/api/flows/{id}")]
async fn get_flow(data: web::Data<AppState>, path: web::Path<FlowId>) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    Ok(match data.flow(&id).await {
        Ok(Some(flow)) => HttpResponse::Ok().json(flow),
        Ok(None) => flow_not_found(&id),
        Err(e) => flow_error(e),
    })
}

/// Archive a flow. Its runs stay readable and it can still run in test mode.
#[delete("/api/flows/{id}")]
async fn delete_flow(
    data: web::Data<AppState>,
    path: web::Path<FlowId>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    Ok(match data.runtime.flows().archive(&id).await {
        Ok(true) => {
            info!("Archived flow: {}", id);
            HttpResponse::Ok().json(json!({ "message": "Flow archived" }))
        }
        Ok(false) => flow_not_found(&id),
        Err(e) => flow_error(e.into()),
    })
}

/// Start a run. Answers 202 with the queued run unless `wait` is set.
#[post("/api/flows/{id}/runs")]
async fn start_run(
    data: web::Data<AppState>,
    path: web::Path<FlowId>,
    body: Option<web::Json<StartRunRequest>>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let flow = match data.flow(&id).await {
        Ok(Some(flow)) => flow,
        Ok(None) => return Ok(flow_not_found(&id)),
        Err(e) => return Ok(flow_error(e)),
    };

    let trigger = request.trigger_type.unwrap_or(TriggerType::Manual);
    let input = request.input.unwrap_or_else(empty_input);
    let (run, handle) = match data
        .runtime
        .start_run(flow, trigger, input, request.test_mode)
        .await
    {
        Ok(started) => started,
        Err(e) => return Ok(flow_error(e)),
    };
    info!("Started run {} for flow {}", run.id, id);

    if !request.wait {
        return Ok(HttpResponse::Accepted().json(run));
    }
    Ok(match handle.await {
        Ok(Ok(report)) => HttpResponse::Ok().json(json!({
            "run": report.run,
            "data": report.data,
            "executed": report.executed,
        })),
        Ok(Err(e)) => flow_error(e),
        Err(e) => error_body(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("run task aborted: {}", e),
        ),
    })
}

#[get("/api/flows/{id}/runs")]
async fn list_runs(data: web::Data<AppState>, path: web::Path<FlowId>) -> ActixResult<impl Responder> {
    Ok(match data.runtime.list_runs(&path.into_inner()).await {
        Ok(runs) => HttpResponse::Ok().json(runs),
        Err(e) => flow_error(e),
    })
}

#[get("/api/runs/{id}")]
async fn get_run(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<impl Responder> {
    Ok(match data.runtime.get_run(&path.into_inner()).await {
        Ok(run) => HttpResponse::Ok().json(run),
        Err(e) => flow_error(e),
    })
}

#[get("/api/runs/{id}/steps")]
async fn list_run_steps(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    Ok(match data.runtime.list_run_steps(&path.into_inner()).await {
        Ok(steps) => HttpResponse::Ok().json(steps),
        Err(e) => flow_error(e),
    })
}

fn webhook_path(flow: &FlowDefinition) -> Option<&str> {
    flow.canvas
        .trigger_node()
        .filter(|node| node.node_type == "trigger.webhook")
        .and_then(|node| node.config.get("path"))
        .and_then(Value::as_str)
        .map(|path| path.trim_matches('/'))
}

/// Start a webhook run for every active flow listening on `path`
#[post("/api/hooks/{path:.*}")]
async fn receive_webhook(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> ActixResult<impl Responder> {
    let hook = path.into_inner();
    let hook = hook.trim_matches('/');

    let input = if body.is_empty() {
        empty_input()
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(input) => input,
            Err(e) => {
                return Ok(error_body(
                    actix_web::http::StatusCode::BAD_REQUEST,
                    format!("webhook body must be JSON: {}", e),
                ))
            }
        }
    };

    let listeners: Vec<FlowDefinition> = match data.runtime.flows().list_active().await {
        Ok(flows) => flows
            .into_iter()
            .filter(|flow| webhook_path(flow) == Some(hook))
            .collect(),
        Err(e) => return Ok(flow_error(e.into())),
    };
    if listeners.is_empty() {
        return Ok(error_body(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("No active flow listens on /{}", hook),
        ));
    }

    let mut runs = Vec::with_capacity(listeners.len());
    for flow in listeners {
        let flow_id = flow.id.clone();
        match data
            .runtime
            .start_run(flow, TriggerType::Webhook, input.clone(), false)
            .await
        {
            Ok((run, _)) => runs.push(run.id),
            Err(e) => warn!("Webhook /{} could not start flow {}: {}", hook, flow_id, e),
        }
    }

    Ok(HttpResponse::Accepted().json(json!({ "runs": runs })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventFilter {
    run_id: Option<String>,
}

/// WebSocket stream of execution events, optionally for one run
#[get("/api/events")]
async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    filter: web::Query<EventFilter>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let run_filter = filter.into_inner().run_id;

    info!("WebSocket client connected");
    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if run_filter.as_deref().is_some_and(|id| id != event.run_id()) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let nodes: Vec<_> = registry
        .list_node_types()
        .iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(node_type);
            json!({
                "type": node_type,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_flows)
        .service(save_flow)
        .service(get_flow)
        .service(delete_flow)
        .service(start_run)
        .service(list_runs)
        .service(get_run)
        .service(list_run_steps)
        .service(receive_webhook)
        .service(websocket_events)
        .service(list_node_types);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use relaynodes::{standard_registry, Ports};
    use relayruntime::InMemoryRecordStore;
    use std::sync::Arc;

    fn state() -> (web::Data<AppState>, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let ports = Ports {
            store: store.clone(),
            ..Ports::in_memory()
        };
        let registry = Arc::new(standard_registry(&ports));
        let runtime = FlowRuntime::new(registry, store.clone());
        (web::Data::new(AppState::new(runtime)), store)
    }

    fn hook_flow(status: &str) -> Value {
        json!({
            "id": "hook-flow",
            "name": "log signups",
            "status": status,
            "canvas": {
                "nodes": [
                    {"id": "t", "type": "trigger.webhook", "config": {"path": "/signup"}},
                    {"id": "log", "type": "pb.create", "config": {
                        "collection": "signups",
                        "data": "{\"email\": \"{{input.email}}\"}"
                    }}
                ],
                "edges": [{"source": "t", "target": "log"}]
            }
        })
    }

    #[actix_web::test]
    async fn test_save_then_replace_bumps_version() {
        let (data, _) = state();
        let app = test::init_service(App::new().app_data(data.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(hook_flow("active"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(hook_flow("draft"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["version"], 2);

        let req = test::TestRequest::get().uri("/api/flows/hook-flow").to_request();
        let flow: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(flow["status"], "draft");
    }

    #[actix_web::test]
    async fn test_flows_survive_restart_and_delete_archives() {
        let (data, store) = state();
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(hook_flow("active"))
            .to_request();
        test::call_service(&app, req).await;
        assert_eq!(store.records("flows").await[0]["name"], "log signups");

        let ports = Ports {
            store: store.clone(),
            ..Ports::in_memory()
        };
        let restarted = FlowRuntime::new(Arc::new(standard_registry(&ports)), store.clone());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(restarted)))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/flows").to_request();
        let flows: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(flows[0]["id"], "hook-flow");

        let req = test::TestRequest::delete().uri("/api/flows/hook-flow").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/flows/hook-flow").to_request();
        let flow: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(flow["status"], "archived");

        let req = test::TestRequest::delete().uri("/api/flows/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_cyclic_canvas_is_rejected() {
        let (data, _) = state();
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(json!({
                "name": "loop",
                "canvas": {
                    "nodes": [
                        {"id": "t", "type": "trigger.manual"},
                        {"id": "a", "type": "map.transform"},
                        {"id": "b", "type": "map.transform"}
                    ],
                    "edges": [
                        {"source": "t", "target": "a"},
                        {"source": "a", "target": "b"},
                        {"source": "b", "target": "a"}
                    ]
                }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_waited_run_reports_steps() {
        let (data, store) = state();
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(hook_flow("active"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/flows/hook-flow/runs")
            .set_json(json!({"input": {"email": "ada@example.com"}, "wait": true}))
            .to_request();
        let report: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report["run"]["status"], "success");
        assert_eq!(report["executed"], json!(["t", "log"]));
        assert_eq!(store.records("signups").await[0]["email"], "ada@example.com");

        let run_id = report["run"]["id"].as_str().unwrap();
        let req = test::TestRequest::get()
            .uri(&format!("/api/runs/{}/steps", run_id))
            .to_request();
        let steps: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(steps.as_array().unwrap().len(), 2);

        let req = test::TestRequest::get().uri("/api/flows/hook-flow/runs").to_request();
        let runs: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(runs[0]["id"], run_id);
    }

    #[actix_web::test]
    async fn test_archived_flow_only_runs_in_test_mode() {
        let (data, _) = state();
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(hook_flow("archived"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/flows/hook-flow/runs")
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/flows/hook-flow/runs")
            .set_json(json!({"testMode": true, "wait": true}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_webhook_starts_listening_flows() {
        let (data, _) = state();
        let app = test::init_service(App::new().app_data(data.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/hooks/signup")
            .set_json(json!({"email": "ada@example.com"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_json(hook_flow("active"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/hooks/signup")
            .set_json(json!({"email": "ada@example.com"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: Value = test::read_body_json(resp).await;
        let run_id = body["runs"][0].as_str().unwrap();

        let run = data.runtime.get_run(run_id).await.unwrap();
        assert_eq!(run.trigger_type, TriggerType::Webhook);
        assert!(!run.test_mode);
    }

    #[actix_web::test]
    async fn test_unknown_run_is_not_found() {
        let (data, _) = state();
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let req = test::TestRequest::get().uri("/api/runs/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
