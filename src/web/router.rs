use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::web::{AppState, analyze, auth, pages, storage};

const NO_CACHE: &str =
    "public, no-store, no-cache, must-revalidate, post-check=0, pre-check=0, max-age=0";

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(pages::home_page))
        .route("/url", get(pages::url_page))
        .route("/webcam", get(pages::webcam_page))
        .route(
            "/analyze",
            post(analyze::analyze).fallback(analyze::redirect_home),
        )
        .route(
            "/register",
            get(auth::register_page).post(auth::process_register),
        )
        .route("/login", get(auth::login_page).post(auth::process_login))
        .route("/logout", get(auth::logout))
        .route("/artifacts/:kind/:name", get(storage::serve_artifact))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::map_response(decorate_response))
        .with_state(state)
}

/// Applied to every response: allow credentials and disable client caching.
async fn decorate_response(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );

    if !headers.contains_key(header::CACHE_CONTROL) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
    }

    response
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, Response as HttpResponse},
    };
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::StoragePaths,
        recognition::{
            AnalysisRequest, DetectionOutput, RecognitionError, Recognizer, ReportOutput,
        },
        web::{
            auth::SESSION_COOKIE,
            ingest::remote_fixture::{FixtureBody, RemoteFixture},
            store::memory::MemoryAuthStore,
        },
    };

    const BOUNDARY: &str = "food-recognition-test-boundary";

    #[derive(Default)]
    struct FakeRecognizer {
        requests: Mutex<Vec<AnalysisRequest>>,
        report_calls: AtomicUsize,
        fail: bool,
    }

    impl FakeRecognizer {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn image_calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn report_calls(&self) -> usize {
            self.report_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        async fn process_image(
            &self,
            request: &AnalysisRequest,
        ) -> Result<DetectionOutput, RecognitionError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(RecognitionError::Timeout);
            }
            Ok(DetectionOutput {
                out_name: format!("det_{}", request.filename),
                output_path: format!("storage/detections/det_{}", request.filename),
                output_type: "image".to_string(),
            })
        }

        async fn process_output(
            &self,
            output_path: &str,
        ) -> Result<ReportOutput, RecognitionError> {
            self.report_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReportOutput {
                filename: output_path.rsplit('/').next().unwrap_or_default().to_string(),
                csv_name1: "report_info.csv".to_string(),
                csv_name2: "report_info2.csv".to_string(),
            })
        }
    }

    struct Harness {
        router: Router,
        store: Arc<MemoryAuthStore>,
        recognizer: Arc<FakeRecognizer>,
        dir: TempDir,
    }

    impl Harness {
        fn new(recognizer: FakeRecognizer) -> Self {
            let dir = tempfile::tempdir().expect("temp dir");
            let store = Arc::new(MemoryAuthStore::default());
            let recognizer = Arc::new(recognizer);
            let state = AppState::from_parts(
                store.clone(),
                recognizer.clone(),
                reqwest::Client::builder()
                    .no_proxy()
                    .build()
                    .expect("client"),
                StoragePaths::new(dir.path()),
            );
            Self {
                router: build_router(state, 1024 * 1024),
                store,
                recognizer,
                dir,
            }
        }

        async fn send(&self, request: Request<Body>) -> HttpResponse<Body> {
            self.router
                .clone()
                .oneshot(request)
                .await
                .expect("router response")
        }

        async fn signed_in_cookie(&self) -> String {
            let user_id = auth::register(&*self.store, "tester", "tester@example.com", "pw")
                .await
                .expect("register");
            let cookie = auth::start_session(&*self.store, user_id)
                .await
                .expect("session");
            format!("{}={}", cookie.name(), cookie.value())
        }
    }

    fn form_request(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn upload_request(
        fields: &[(&str, &str)],
        file: (&str, &str, &[u8]),
        cookie: &str,
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        let (filename, content_type, bytes) = file;
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::COOKIE, cookie)
            .body(Body::from(body))
            .unwrap()
    }

    const ANALYZE_FIELDS: &[(&str, &str)] = &[
        ("threshold-range", "80"),
        ("confidence-range", "55"),
        ("model-types", "YOLOv5X"),
        ("seg", "on"),
        ("upload-button", "analyze"),
    ];

    fn location(response: &HttpResponse<Body>) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    fn session_cookie(response: &HttpResponse<Body>) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.starts_with(SESSION_COOKIE) && pair.len() > SESSION_COOKIE.len() + 1)
            .map(str::to_string)
    }

    async fn body_text(response: HttpResponse<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn get_analyze_redirects_home_without_recognition() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness.send(get_request("/analyze", Some(&cookie))).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        assert_eq!(harness.recognizer.image_calls(), 0);
    }

    #[tokio::test]
    async fn register_then_login_over_http() {
        let harness = Harness::new(FakeRecognizer::default());

        let response = harness
            .send(form_request(
                "/register",
                "username=alice&email=alice%40example.com&password=pw",
                None,
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/?status=registered");
        assert!(session_cookie(&response).is_some());

        let response = harness
            .send(form_request(
                "/login",
                "email=alice%40example.com&password=pw",
                None,
            ))
            .await;
        assert_eq!(location(&response), "/?status=logged_in");
        let cookie = session_cookie(&response).expect("login cookie");

        let response = harness.send(get_request("/login", Some(&cookie))).await;
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn duplicate_registration_flashes_error() {
        let harness = Harness::new(FakeRecognizer::default());
        harness.signed_in_cookie().await;

        let response = harness
            .send(form_request(
                "/register",
                "username=other&email=tester%40example.com&password=pw2",
                None,
            ))
            .await;

        assert_eq!(location(&response), "/register?error=duplicate_email");
        assert!(session_cookie(&response).is_none());
        assert_eq!(harness.store.user_count(), 1);
    }

    #[tokio::test]
    async fn wrong_password_flashes_invalid_credentials() {
        let harness = Harness::new(FakeRecognizer::default());
        harness.signed_in_cookie().await;

        let response = harness
            .send(form_request(
                "/login",
                "email=tester%40example.com&password=nope",
                None,
            ))
            .await;
        assert_eq!(location(&response), "/login?error=invalid_credentials");

        let response = harness
            .send(get_request("/login?error=invalid_credentials", None))
            .await;
        assert!(body_text(response).await.contains("Invalid credentials"));
    }

    #[tokio::test]
    async fn logout_then_analyze_requires_login() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness.send(get_request("/logout", Some(&cookie))).await;
        assert_eq!(location(&response), "/?status=logged_out");

        let response = harness
            .send(upload_request(
                ANALYZE_FIELDS,
                ("plate.png", "image/png", &b"png-bytes"[..]),
                &cookie,
            ))
            .await;
        assert_eq!(location(&response), "/login?error=login_required");
        assert_eq!(harness.recognizer.image_calls(), 0);
    }

    #[tokio::test]
    async fn image_upload_runs_pipeline_and_renders_upload_view() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness
            .send(upload_request(
                ANALYZE_FIELDS,
                ("plate.png", "image/png", &b"png-bytes"[..]),
                &cookie,
            ))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains(r#"data-view="detect-upload-file""#));
        assert!(html.contains("/artifacts/csv/report_info.csv"));
        assert!(html.contains("/artifacts/segmentations/det_"));

        let requests = harness.recognizer.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!((request.min_iou - 0.8).abs() < 1e-9);
        assert!((request.min_conf - 0.55).abs() < 1e-9);
        assert_eq!(request.model_types, "yolov5x");
        assert!(request.segmentation);
        assert!(!request.tta);
        assert!(request.filepath.starts_with(&harness.dir.path().display().to_string()));
        assert_eq!(harness.recognizer.report_calls(), 1);
    }

    #[tokio::test]
    async fn non_image_upload_renders_error_without_reports() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness
            .send(upload_request(
                ANALYZE_FIELDS,
                ("clip.mp4", "video/mp4", &b"mp4-bytes"[..]),
                &cookie,
            ))
            .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(response).await.contains("Only images can be analyzed"));
        assert_eq!(harness.recognizer.image_calls(), 0);
        assert_eq!(harness.recognizer.report_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_url_renders_invalid_input_url() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness
            .send(form_request(
                "/analyze",
                "url=ftp%3A%2F%2Fexample.com%2Fa.png&threshold-range=50&confidence-range=50&model-types=yolov5s&url-button=analyze",
                Some(&cookie),
            ))
            .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let html = body_text(response).await;
        assert!(html.contains("Invalid input url!!!"));
        assert!(html.contains(r#"data-view="detect-input-url""#));
        assert_eq!(harness.recognizer.image_calls(), 0);
    }

    #[tokio::test]
    async fn html_behind_url_is_rejected_and_discarded() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;
        let remote =
            RemoteFixture::serve("text/html", FixtureBody::Fixed(b"<html>menu</html>")).await;

        let body = format!(
            "url={}/menu&threshold-range=50&confidence-range=50&model-types=yolov5s&url-button=analyze",
            remote.base_url
        );
        let response = harness
            .send(form_request("/analyze", &body, Some(&cookie)))
            .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(response).await.contains("Invalid input url!!!"));
        assert_eq!(harness.recognizer.image_calls(), 0);
        let uploads = harness.dir.path().join("uploads");
        assert_eq!(std::fs::read_dir(uploads).expect("uploads dir").count(), 0);
    }

    #[tokio::test]
    async fn webcam_capture_runs_pipeline_and_renders_webcam_view() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        // data:image/png;base64,ZmFrZS1wbmc= ("fake-png"), form-encoded
        let response = harness
            .send(form_request(
                "/analyze",
                "capture=data%3Aimage%2Fpng%3Bbase64%2CZmFrZS1wbmc%3D&threshold-range=50&confidence-range=40&model-types=yolov5s&webcam-button=analyze",
                Some(&cookie),
            ))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains(r#"data-view="detect-webcam-capture""#));

        let requests = harness.recognizer.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].filename.starts_with("webcam_"));
        assert!(requests[0].filename.ends_with(".png"));
        assert_eq!(requests[0].filetype, "image");
        assert_eq!(
            std::fs::read(&requests[0].filepath).expect("stored capture"),
            b"fake-png"
        );
        assert_eq!(harness.recognizer.report_calls(), 1);
    }

    #[tokio::test]
    async fn malformed_threshold_redirects_back_to_form() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness
            .send(form_request(
                "/analyze",
                "capture=abc&threshold-range=high&confidence-range=50&model-types=yolov5s&webcam-button=analyze",
                Some(&cookie),
            ))
            .await;

        assert_eq!(location(&response), "/webcam?error=invalid_parameters");
        assert_eq!(harness.recognizer.image_calls(), 0);
    }

    #[tokio::test]
    async fn missing_mode_button_is_reported() {
        let harness = Harness::new(FakeRecognizer::default());
        let cookie = harness.signed_in_cookie().await;

        let response = harness
            .send(form_request(
                "/analyze",
                "threshold-range=50&confidence-range=50&model-types=yolov5s",
                Some(&cookie),
            ))
            .await;

        assert_eq!(location(&response), "/?error=unknown_input_mode");
    }

    #[tokio::test]
    async fn recognition_failure_renders_failure_page() {
        let harness = Harness::new(FakeRecognizer::failing());
        let cookie = harness.signed_in_cookie().await;

        let response = harness
            .send(upload_request(
                ANALYZE_FIELDS,
                ("plate.jpg", "image/jpeg", &b"jpeg-bytes"[..]),
                &cookie,
            ))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.contains("Recognition failed"));
        assert_eq!(harness.recognizer.report_calls(), 0);
    }

    #[tokio::test]
    async fn responses_carry_credential_and_no_cache_headers() {
        let harness = Harness::new(FakeRecognizer::default());

        let response = harness.send(get_request("/", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::CACHE_CONTROL], NO_CACHE);
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers[header::EXPIRES], "-1");

        let response = harness.send(get_request("/healthz", None)).await;
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }

    #[tokio::test]
    async fn serves_stored_artifacts() {
        let harness = Harness::new(FakeRecognizer::default());
        let csv_dir = harness.dir.path().join("csv");
        std::fs::create_dir_all(&csv_dir).unwrap();
        std::fs::write(csv_dir.join("report_info.csv"), "name,kcal\nrice,130\n").unwrap();

        let response = harness
            .send(get_request("/artifacts/csv/report_info.csv", None))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert!(body_text(response).await.contains("rice,130"));

        let response = harness
            .send(get_request("/artifacts/csv/missing.csv", None))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
