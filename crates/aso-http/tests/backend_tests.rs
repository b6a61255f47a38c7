use aso_core::{
    OrchestratorConfig, SessionBackend, SessionEvent, SessionOrchestrator, SessionStatus,
    SourceError, StatusSource,
};
use aso_http::{EndpointTemplates, HttpBackendConfig, HttpSessionBackend};
use aso_session::SessionId;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    format!("http://{addr}")
}

fn backend(base: &str) -> HttpSessionBackend {
    HttpSessionBackend::new(&HttpBackendConfig::new(base)).expect("backend")
}

#[tokio::test]
async fn create_posts_params_and_decodes_record() {
    let app = Router::new().route(
        "/sessions",
        post(|Json(params): Json<Value>| async move {
            Json(json!({
                "id": 17,
                "status": "Generating",
                "progressStep": 0,
                "progressTotal": 4,
                "progressMessage": "queued",
                "project": params["project"],
            }))
        }),
    );
    let backend = backend(&serve(app).await);

    let record = backend.create(&json!({"project": "alpha"})).await.unwrap();

    assert_eq!(record.id, SessionId::new("17"));
    assert_eq!(record.status, SessionStatus::Running);
    assert_eq!(record.stage_label, "Generating");
    assert_eq!(record.progress_total, 4);
    assert_eq!(record.progress_message.as_deref(), Some("queued"));
    assert_eq!(record.payload["project"], json!("alpha"));
}

#[tokio::test]
async fn status_maps_http_failures() {
    let app = Router::new().route(
        "/sessions/{id}",
        get(|Path(id): Path<String>| async move {
            match id.as_str() {
                "missing" => StatusCode::NOT_FOUND.into_response(),
                "busy" => (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response(),
                "locked" => (StatusCode::CONFLICT, "already running").into_response(),
                "garbled" => (StatusCode::OK, "{not json").into_response(),
                "weird" => Json(json!({"id": "weird", "status": "exploded"})).into_response(),
                other => Json(json!({"id": other, "status": "done"})).into_response(),
            }
        }),
    );
    let backend = backend(&serve(app).await);
    let status = |id: &'static str| {
        let backend = backend.clone();
        async move { backend.status(&SessionId::new(id)).await }
    };

    assert_eq!(status("missing").await.unwrap_err(), SourceError::NotFound);

    let busy = status("busy").await.unwrap_err();
    assert_eq!(
        busy,
        SourceError::Rejected {
            status: 503,
            message: "maintenance".to_string()
        }
    );
    assert!(busy.is_transient());

    let locked = status("locked").await.unwrap_err();
    assert!(matches!(locked, SourceError::Rejected { status: 409, .. }));
    assert!(!locked.is_transient());

    assert!(matches!(status("garbled").await, Err(SourceError::Protocol(_))));
    assert!(matches!(status("weird").await, Err(SourceError::Protocol(_))));

    let ok = status("s-1").await.unwrap();
    assert_eq!(ok.status, SessionStatus::Ready);
}

#[tokio::test]
async fn unreachable_backend() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = backend(&format!("http://{addr}"))
        .status(&SessionId::new("s-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Unreachable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_backend_times_out() {
    let app = Router::new().route(
        "/sessions/{id}",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"id": "s-1", "status": "running"}))
        }),
    );
    let config = HttpBackendConfig::new(serve(app).await).with_timeout(Duration::from_secs(1));
    let backend = HttpSessionBackend::new(&config).unwrap();

    let err = backend.status(&SessionId::new("s-1")).await.unwrap_err();
    assert_eq!(err, SourceError::Timeout);
}

#[tokio::test]
async fn triggers_and_delete_hit_their_endpoints() {
    let hits = Arc::new(Mutex::new(Vec::<String>::new()));
    let record = |hits: Arc<Mutex<Vec<String>>>, op: &'static str| {
        move |Path(id): Path<String>| async move {
            hits.lock().unwrap().push(format!("{op} {id}"));
            Json(json!({"id": id, "status": "analyzing", "error_message": null}))
        }
    };
    let deleted = Arc::clone(&hits);
    let app = Router::new()
        .route("/sessions/{id}/analyze", post(record(Arc::clone(&hits), "analyze")))
        .route("/sessions/{id}/retry", post(record(Arc::clone(&hits), "retry")))
        .route(
            "/sessions/{id}",
            axum::routing::delete(move |Path(id): Path<String>| async move {
                deleted.lock().unwrap().push(format!("delete {id}"));
                StatusCode::NO_CONTENT
            }),
        );
    let backend = backend(&serve(app).await);
    let id = SessionId::new("team/a");

    assert_eq!(backend.analyze(&id).await.unwrap().status, SessionStatus::Running);
    assert_eq!(backend.retry(&id).await.unwrap().stage_label, "analyzing");
    backend.delete(&id).await.unwrap();

    assert_eq!(
        *hits.lock().unwrap(),
        vec!["analyze team/a", "retry team/a", "delete team/a"]
    );
}

#[tokio::test]
async fn answer_for_another_session_is_refused() {
    let app = Router::new().route(
        "/sessions/{id}",
        get(|| async { Json(json!({"id": "someone-else", "status": "ready"})) }),
    );
    let err = backend(&serve(app).await)
        .status(&SessionId::new("s-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Protocol(_)));
}

#[tokio::test]
async fn custom_templates_and_envelope() {
    let app = Router::new()
        .route(
            "/api/jobs/{id}/state",
            get(|Path(id): Path<String>| async move {
                Json(json!({
                    "session": {"id": id, "status": "failed", "errorMessage": "quota exceeded"}
                }))
            }),
        )
        .route(
            "/api/jobs/{id}/stories",
            get(|| async { Json(json!([{"title": "Login"}, {"title": "Export"}])) }),
        )
        .route("/api/jobs/{id}/summary", get(|| async { StatusCode::NO_CONTENT }));

    let endpoints = EndpointTemplates {
        status: "/api/jobs/{id}/state".to_string(),
        ..EndpointTemplates::conventional("/api/jobs")
    }
    .with_result("stories", "/api/jobs/{id}/stories")
    .with_result("summary", "/api/jobs/{id}/summary");
    let config = HttpBackendConfig::new(serve(app).await)
        .with_endpoints(endpoints)
        .with_envelope("session");
    let backend = HttpSessionBackend::new(&config).unwrap();
    let id = SessionId::new("j-9");

    let record = backend.status(&id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("quota exceeded"));

    let sources = backend.result_sources();
    let names: Vec<_> = sources.iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["stories", "summary"]);

    let stories = sources[0].fetch(&id).await.unwrap();
    assert_eq!(stories.as_array().map(Vec::len), Some(2));
    assert_eq!(sources[1].fetch(&id).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn orchestrator_over_http_reaches_ready() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polls);
    let app = Router::new()
        .route(
            "/sessions",
            post(|| async { Json(json!({"id": "s-1", "status": "pending"})) }),
        )
        .route(
            "/sessions/{id}",
            get(move |Path(id): Path<String>| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let status = if n >= 2 { "completed" } else { "processing" };
                    Json(json!({
                        "id": id,
                        "status": status,
                        "progress_step": n,
                        "progress_total": 2,
                    }))
                }
            }),
        );
    let backend = Arc::new(backend(&serve(app).await));
    let orchestrator = SessionOrchestrator::new(
        backend,
        OrchestratorConfig::new().with_poll_interval(Duration::from_secs(1)),
    )
    .unwrap();
    let mut events = orchestrator.subscribe();

    let created = orchestrator.create(&json!({})).await.unwrap();
    assert_eq!(created.status, SessionStatus::Draft);

    let ready = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(SessionEvent::BecameReady(record)) = events.recv().await {
                return record;
            }
        }
    })
    .await
    .expect("session became ready");

    assert_eq!(ready.progress_step, 2);
    assert_eq!(ready.stage_label, "completed");
    assert!(!orchestrator.is_polling(&ready.id));
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}
