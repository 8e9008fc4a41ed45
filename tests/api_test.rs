/// HTTP API end-to-end tests.
/// The bucket is a local-disk store in a temp dir (or a wiremock Cloud Storage API);
/// the cloud function is a wiremock server.
use std::{path::Path, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use gcp_console::{
    routes::routes,
    services::{
        function_service::FunctionService, gcp_auth::TokenProvider, gcs_store::GcsStore,
        local_store::LocalStore, storage_service::StorageService,
    },
    state::AppState,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "X-GCP-CONSOLE-TEST-BOUNDARY";
const INDEX_HTML: &str = "<!DOCTYPE html><title>console</title>";

struct TestApp {
    router: Router,
    dir: TempDir,
    function: MockServer,
}

async fn setup() -> TestApp {
    setup_with(|root| {
        StorageService::new(Arc::new(LocalStore::new(root.join("objects"), "test-bucket")))
    })
    .await
}

/// App backed by the Cloud Storage adapter talking to `gcs`.
async fn setup_gcs(gcs: &MockServer) -> TestApp {
    let client = reqwest::Client::new();
    let store = GcsStore::new(
        client.clone(),
        &gcs.uri(),
        "bucket",
        TokenProvider::anonymous(client),
    )
    .unwrap();
    setup_with(|_| StorageService::new(Arc::new(store))).await
}

async fn setup_with(storage: impl FnOnce(&Path) -> StorageService) -> TestApp {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    for sub in ["uploads", "downloads", "public"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }
    std::fs::write(root.join("public/index.html"), INDEX_HTML).unwrap();

    let function = MockServer::start().await;
    let state = AppState {
        storage: storage(root),
        functions: FunctionService::new(reqwest::Client::new(), format!("{}/fn", function.uri())),
        uploads_dir: root.join("uploads"),
        downloads_dir: root.join("downloads"),
    };
    let router = routes::app(state, &root.join("public"), 10 * 1024 * 1024);
    TestApp {
        router,
        dir,
        function,
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, axum::body::Bytes) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

async fn send_json(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// multipart/form-data with one part; `file_name` of `None` makes it a plain field.
fn multipart(field: &str, file_name: Option<&str>, contents: &str) -> Request<Body> {
    let disposition = match file_name {
        Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
        None => format!("form-data; name=\"{}\"", field),
    };
    let body = format!(
        "--{b}\r\nContent-Disposition: {d}\r\nContent-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        d = disposition,
        c = contents
    );
    Request::builder()
        .method("POST")
        .uri("/api/storage/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn empty_bucket_lists_no_files() {
    let app = setup().await;
    let (status, body) = send_json(&app, get("/api/storage/files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "files": []}));
}

#[tokio::test]
async fn upload_then_list_download_and_delete() {
    let app = setup().await;

    let (status, body) = send_json(&app, multipart("file", Some("a.txt"), "hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["fileUrl"].as_str().unwrap().ends_with("a.txt"));
    assert!(dir_is_empty(&app.dir.path().join("uploads")));

    let (_, body) = send_json(&app, get("/api/storage/files")).await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "a.txt");
    assert_eq!(files[0]["size"], 5);
    assert_eq!(files[0]["contentType"], "text/plain");
    assert!(files[0]["updatedAt"].is_string());

    let response = app
        .router
        .clone()
        .oneshot(get("/api/storage/download/a.txt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"a.txt\"")
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello");

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/storage/delete/a.txt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "message": "File a.txt deleted successfully"})
    );

    let (_, body) = send_json(&app, get("/api/storage/files")).await;
    assert_eq!(body["files"], json!([]));
}

#[tokio::test]
async fn deleting_a_missing_object_fails() {
    let app = setup().await;
    let req = Request::builder()
        .method("DELETE")
        .uri("/api/storage/delete/missing.txt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("missing.txt"));
}

#[tokio::test]
async fn downloading_a_missing_object_fails() {
    let app = setup().await;
    let (status, body) = send_json(&app, get("/api/storage/download/nope.bin")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(dir_is_empty(&app.dir.path().join("downloads")));
}

#[tokio::test]
async fn upload_without_a_file_part_is_rejected() {
    let app = setup().await;

    let (status, body) = send_json(&app, multipart("file", None, "just text")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"success": false, "error": "No file uploaded"}));

    let (status, body) = send_json(&app, multipart("other", Some("a.txt"), "x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file uploaded");

    // An empty file input still sends the part, with `filename=""`.
    for blank in ["", "  "] {
        let (status, body) = send_json(&app, multipart("file", Some(blank), "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": "No file uploaded"}));
    }
    assert!(dir_is_empty(&app.dir.path().join("uploads")));

    let req = Request::builder()
        .method("POST")
        .uri("/api/storage/upload")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file uploaded");
}

#[tokio::test]
async fn names_with_double_dots_round_trip() {
    let app = setup().await;

    let (status, body) = send_json(&app, multipart("file", Some("report..v2.txt"), "v2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send_json(&app, get("/api/storage/files")).await;
    assert_eq!(body["files"][0]["name"], "report..v2.txt");

    let (status, bytes) = send(&app, get("/api/storage/download/report..v2.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"v2");
}

#[tokio::test]
async fn bare_dot_dot_is_refused() {
    let app = setup().await;
    let req = Request::builder()
        .method("DELETE")
        .uri("/api/storage/delete/..")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn nested_object_names_reach_cloud_storage() {
    let gcs = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/storage/v1/b/bucket/o/photos%2Fa.jpg"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&gcs)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/bucket/o/photos%2Fa.jpg"))
        .and(query_param("alt", "media"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"jpeg bytes".to_vec(), "image/jpeg"),
        )
        .expect(1)
        .mount(&gcs)
        .await;
    let app = setup_gcs(&gcs).await;

    let response = app
        .router
        .clone()
        .oneshot(get("/api/storage/download/photos%2Fa.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"jpeg bytes");
    assert!(dir_is_empty(&app.dir.path().join("downloads")));

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/storage/delete/photos%2Fa.jpg")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "message": "File photos/a.jpg deleted successfully"})
    );
}

#[tokio::test]
async fn function_call_wraps_the_function_response() {
    let app = setup().await;
    Mock::given(method("POST"))
        .and(path("/fn"))
        .and(body_json(json!({"x": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Cloud Function executed successfully!",
            "receivedData": {"x": 1}
        })))
        .expect(1)
        .mount(&app.function)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/function/call")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"x":1}"#))
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["receivedData"], json!({"x": 1}));
}

#[tokio::test]
async fn function_failure_is_reported() {
    let app = setup().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&app.function)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/function/call")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_function_payload_is_a_bad_request() {
    let app = setup().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/function/call")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_paths_serve_the_index_page() {
    let app = setup().await;
    let (status, root) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&root[..], INDEX_HTML.as_bytes());

    let (status, other) = send(&app, get("/anything/else")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(other, root);
}

#[tokio::test]
async fn health_checks() {
    let app = setup().await;
    let (status, body) = send_json(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send_json(&app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["uploads"]["ok"], true);
}
