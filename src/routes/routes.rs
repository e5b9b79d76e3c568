//! Defines routes for the self-destructing file share.
//!
//! ## Structure
//! - `POST /upload`        multipart upload, returns the download path
//! - `GET  /file/{id}`     spend one download (`?password=` when protected)
//! - `GET  /preview/{id}`  inspect without spending a download
//! - `GET  /meta/{id}`     link-preview metadata
//! - `GET  /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        meta_handlers::get_meta,
        share_handlers::{download_file, preview_file, upload_file},
    },
    services::{lifecycle_service::LifecycleService, policy::MAX_FILE_SIZE},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Headroom for multipart boundaries and the small text fields.
const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE as usize + 1024 * 1024;

/// Build the router. Every handler shares the injected `LifecycleService`.
pub fn routes() -> Router<LifecycleService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/file/{id}", get(download_file))
        .route("/preview/{id}", get(preview_file))
        .route("/meta/{id}", get(get_meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use serde_json::Value;
    use std::{sync::Arc, time::Duration};
    use tower::util::ServiceExt;

    const BOUNDARY: &str = "----self-destruct-test";

    fn app() -> Router {
        let service = LifecycleService::new(Arc::new(MemoryStore::new()), Duration::from_secs(2));
        routes().with_state(service)
    }

    fn upload_request(file_name: &str, data: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    /// Single `file` part carrying its own `Content-Length` header.
    fn upload_request_declaring(declared: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"d.bin\"\r\nContent-Type: application/octet-stream\r\nContent-Length: {declared}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn upload(app: &Router, file_name: &str, data: &[u8], fields: &[(&str, &str)]) -> String {
        let response = app
            .clone()
            .oneshot(upload_request(file_name, data, fields))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        text.trim()
            .rsplit_once("/file/")
            .map(|(_, id)| id.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let response = app().oneshot(get_request("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint_checks_store() {
        let response = app().oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["checks"]["round_trip"]["ok"], true);
    }

    #[tokio::test]
    async fn upload_then_download_until_gone() {
        let app = app();
        let id = upload(
            &app,
            "../../secret.txt",
            b"hello",
            &[("downloads", "2"), ("slug", "my-link")],
        )
        .await;
        assert_eq!(id, "my-link");

        let first = app.clone().oneshot(get_request("/file/my-link")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-downloads-left"], "1");
        assert_eq!(
            first.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"secret.txt\""
        );
        assert_eq!(body_text(first).await, "hello");

        let second = app.clone().oneshot(get_request("/file/my-link")).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()["x-downloads-left"], "0");

        let third = app.clone().oneshot(get_request("/file/my-link")).await.unwrap();
        assert_eq!(third.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generated_id_is_returned() {
        let app = app();
        let id = upload(&app, "a.txt", b"data", &[]).await;
        assert_eq!(id.len(), 12);

        let request = Request::builder()
            .uri(format!("/meta/{id}"))
            .header(header::HOST, "share.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let meta: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(meta["title"], "a.txt - FileOrcha");
        assert_eq!(meta["type"], "website");
        assert_eq!(meta["site_name"], "FileOrcha");
        assert_eq!(
            meta["url"],
            format!("http://share.example.com/download.html?id={id}")
        );
        assert!(meta["image"].as_str().unwrap().ends_with("?text=a.txt+-+Text+File"));
        assert_eq!(meta["file_name"], "a.txt");
        assert_eq!(meta["file_type"], "Text File");
        assert_eq!(meta["downloads_left"], 1);
        assert_eq!(meta["has_password"], false);
        assert!(meta["expires_at"].is_string());
    }

    #[tokio::test]
    async fn taken_slug_conflicts() {
        let app = app();
        upload(&app, "a.txt", b"one", &[("slug", "taken")]).await;

        let response = app
            .oneshot(upload_request("b.txt", b"two", &[("slug", "taken")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected() {
        let app = app();
        let cases: [(&[u8], &[(&str, &str)], StatusCode); 4] = [
            (b"", &[], StatusCode::BAD_REQUEST),
            (b"x", &[("slug", "Not Valid")], StatusCode::BAD_REQUEST),
            (b"x", &[("downloads", "11")], StatusCode::BAD_REQUEST),
            (b"x", &[("expiry", "10081")], StatusCode::BAD_REQUEST),
        ];
        for (data, fields, status) in cases {
            let response = app
                .clone()
                .oneshot(upload_request("f.txt", data, fields))
                .await
                .unwrap();
            assert_eq!(response.status(), status);
        }
    }

    #[tokio::test]
    async fn wrong_password_does_not_spend_a_download() {
        let app = app();
        let id = upload(&app, "p.txt", b"guarded", &[("password", "right")]).await;

        let denied = app
            .clone()
            .oneshot(get_request(&format!("/file/{id}?password=wrong")))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let missing = app
            .clone()
            .oneshot(get_request(&format!("/preview/{id}")))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::FORBIDDEN);

        let preview = app
            .clone()
            .oneshot(get_request(&format!("/preview/{id}?password=right")))
            .await
            .unwrap();
        assert_eq!(preview.status(), StatusCode::OK);
        assert_eq!(preview.headers()["x-file-name"], "p.txt");
        assert_eq!(preview.headers()["x-downloads-left"], "1");

        let granted = app
            .clone()
            .oneshot(get_request(&format!("/file/{id}?password=right")))
            .await
            .unwrap();
        assert_eq!(granted.status(), StatusCode::OK);
        assert_eq!(body_text(granted).await, "guarded");

        let gone = app
            .oneshot(get_request(&format!("/file/{id}?password=right")))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn declared_part_size_is_checked_before_reading() {
        let app = app();

        let zero = app
            .clone()
            .oneshot(upload_request_declaring("0", b"not empty"))
            .await
            .unwrap();
        assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

        let huge = app
            .clone()
            .oneshot(upload_request_declaring(&(MAX_FILE_SIZE + 1).to_string(), b"tiny"))
            .await
            .unwrap();
        assert_eq!(huge.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let honest = app
            .oneshot(upload_request_declaring("5", b"hello"))
            .await
            .unwrap();
        assert_eq!(honest.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let app = app();

        let just_over = vec![b'x'; MAX_FILE_SIZE as usize + 1];
        let response = app
            .clone()
            .oneshot(upload_request("big.bin", &just_over, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let past_body_limit = vec![b'x'; UPLOAD_BODY_LIMIT + 1];
        let response = app
            .oneshot(upload_request("bigger.bin", &past_body_limit, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
