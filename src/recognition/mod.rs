use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY_MS: u64 = 500;

/// Parameters handed to the detection pipeline for a single image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub filename: String,
    pub filepath: String,
    pub filetype: String,
    pub model_types: String,
    pub min_iou: f64,
    pub min_conf: f64,
    pub enhanced: bool,
    pub ensemble: bool,
    pub tta: bool,
    pub segmentation: bool,
}

/// Overlay produced by the detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionOutput {
    pub out_name: String,
    pub output_path: String,
    pub output_type: String,
}

/// Derived names produced by report generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportOutput {
    pub filename: String,
    pub csv_name1: String,
    pub csv_name2: String,
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition service timed out")]
    Timeout,
    #[error("recognition service request failed: {0}")]
    Http(reqwest::Error),
    #[error("recognition service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("recognition service returned an unreadable payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RecognitionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RecognitionError::Timeout
        } else {
            RecognitionError::Http(err)
        }
    }
}

impl RecognitionError {
    fn is_retryable(&self) -> bool {
        match self {
            RecognitionError::Timeout | RecognitionError::Http(_) => true,
            RecognitionError::Status { status, .. } => status.is_server_error(),
            RecognitionError::Decode(_) => false,
        }
    }
}

/// External detection and reporting pipeline.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn process_image(
        &self,
        request: &AnalysisRequest,
    ) -> Result<DetectionOutput, RecognitionError>;

    async fn process_output(&self, output_path: &str) -> Result<ReportOutput, RecognitionError>;
}

/// HTTP client for the recognition service.
#[derive(Clone)]
pub struct HttpRecognizer {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct OutputPayload<'a> {
    output_path: &'a str,
}

impl HttpRecognizer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RecognitionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RecognitionError>
    where
        B: Serialize + Sync,
        T: for<'de> Deserialize<'de> + Send,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(RecognitionError::Status {
                status,
                body: preview(&text),
            });
        }

        serde_json::from_str(&text).map_err(|err| RecognitionError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn process_image(
        &self,
        request: &AnalysisRequest,
    ) -> Result<DetectionOutput, RecognitionError> {
        with_retry("process_image", || self.post_json("/process-image", request)).await
    }

    async fn process_output(&self, output_path: &str) -> Result<ReportOutput, RecognitionError> {
        let payload = OutputPayload { output_path };
        with_retry("process_output", || {
            self.post_json("/process-output", &payload)
        })
        .await
    }
}

/// Runs `call` once more after a transient failure.
pub async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> Result<T, RecognitionError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RecognitionError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && err.is_retryable() => {
                warn!(
                    ?err,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    operation,
                    "recognition request failed, will retry"
                );
                sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 500;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_failure_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RecognitionError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.expect("second attempt succeeds"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RecognitionError::Timeout) }
        })
        .await;

        assert!(matches!(result, Err(RecognitionError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RecognitionError::Status {
                    status: StatusCode::BAD_REQUEST,
                    body: "bad".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let text = "é".repeat(400);
        let short = preview(&text);
        assert!(short.ends_with("..."));
        assert!(short.len() <= 503);
    }

    #[test]
    fn analysis_request_carries_every_pipeline_field() {
        let request = AnalysisRequest {
            filename: "plate.jpg".into(),
            filepath: "storage/uploads/plate.jpg".into(),
            filetype: "image".into(),
            model_types: "yolov5s".into(),
            min_iou: 0.45,
            min_conf: 0.25,
            enhanced: false,
            ensemble: true,
            tta: false,
            segmentation: true,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        let object = value.as_object().expect("json object");

        let mut keys = object.keys().map(String::as_str).collect::<Vec<_>>();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "enhanced",
                "ensemble",
                "filename",
                "filepath",
                "filetype",
                "min_conf",
                "min_iou",
                "model_types",
                "segmentation",
                "tta"
            ]
        );
        assert_eq!(object["filetype"], "image");
    }

    #[test]
    fn output_payloads_deserialize() {
        let detection: DetectionOutput = serde_json::from_str(
            r#"{"out_name":"a.jpg","output_path":"storage/detections/a.jpg","output_type":"image"}"#,
        )
        .expect("detection");
        assert_eq!(detection.output_type, "image");

        let report: ReportOutput = serde_json::from_str(
            r#"{"filename":"a.jpg","csv_name1":"a_info.csv","csv_name2":"a_info2.csv"}"#,
        )
        .expect("report");
        assert_eq!(report.csv_name2, "a_info2.csv");
    }
}
