use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use axum::{
    body::Bytes,
    extract::{Form, FromRequest, Multipart, Request},
    http::header,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, Url};
use thiserror::Error;
use uuid::Uuid;

use crate::{config::StoragePaths, web::AppState};

pub const UPLOAD_FIELD: &str = "file";
pub const URL_FIELD: &str = "url";
pub const CAPTURE_FIELD: &str = "capture";

const MAX_REMOTE_BYTES: u64 = 25 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no recognised input button was submitted")]
    UnknownInputMode,
    #[error("{0}")]
    Validation(String),
    #[error("failed to fetch remote input: {0}")]
    Fetch(String),
    #[error("failed to store input: {0}")]
    Io(#[from] std::io::Error),
}

/// Which form button triggered the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Upload,
    Url,
    Webcam,
}

impl InputMode {
    pub fn button_name(self) -> &'static str {
        match self {
            InputMode::Upload => "upload-button",
            InputMode::Url => "url-button",
            InputMode::Webcam => "webcam-button",
        }
    }

    /// Page that hosts the form for this mode.
    pub fn form_path(self) -> &'static str {
        match self {
            InputMode::Upload => "/",
            InputMode::Url => "/url",
            InputMode::Webcam => "/webcam",
        }
    }

    pub fn result_view(self) -> &'static str {
        match self {
            InputMode::Upload => "detect-upload-file",
            InputMode::Url => "detect-input-url",
            InputMode::Webcam => "detect-webcam-capture",
        }
    }

    /// Webcam wins over URL, URL over upload, when several buttons are present.
    pub fn from_submission(submission: &Submission) -> Result<Self, IngestError> {
        [InputMode::Webcam, InputMode::Url, InputMode::Upload]
            .into_iter()
            .find(|mode| submission.has_field(mode.button_name()))
            .ok_or(IngestError::UnknownInputMode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Image,
    Video,
    Other,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Other => "other",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Some(FileType::Image)
        } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            Some(FileType::Video)
        } else {
            None
        }
    }

    pub fn from_mime(content_type: &str) -> Self {
        match content_type.parse::<mime::Mime>() {
            Ok(parsed) if parsed.type_() == mime::IMAGE => FileType::Image,
            Ok(parsed) if parsed.type_() == mime::VIDEO => FileType::Video,
            _ => FileType::Other,
        }
    }

    /// Extension decides first; the declared MIME type is the fallback.
    pub fn classify(filename: &str, content_type: Option<&str>) -> Self {
        extension_of(filename)
            .and_then(|ext| FileType::from_extension(&ext))
            .or_else(|| content_type.map(FileType::from_mime))
            .unwrap_or(FileType::Other)
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Text fields and the optional image file of an analyze form.
#[derive(Debug, Default)]
pub struct Submission {
    fields: HashMap<String, String>,
    file: Option<UploadedFile>,
}

impl Submission {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            file: None,
        }
    }

    #[cfg(test)]
    pub fn with_file(mut self, file: UploadedFile) -> Self {
        self.file = Some(file);
        self
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn file(&self) -> Option<&UploadedFile> {
        self.file.as_ref()
    }
}

/// The normalized `(filename, filepath, filetype)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedInput {
    pub filename: String,
    pub filepath: PathBuf,
    pub filetype: FileType,
}

/// Reads either a multipart or a urlencoded analyze form.
pub async fn read_submission(req: Request, state: &AppState) -> Result<Submission, IngestError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
            .await
            .map_err(|err| IngestError::Validation(err.body_text()))?;
        return Ok(Submission::from_pairs(pairs));
    }

    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|err| IngestError::Validation(err.body_text()))?;

    let mut submission = Submission::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| IngestError::Validation(format!("failed to parse form: {err}")))?
    {
        let name = field.name().unwrap_or("").to_string();

        if let Some(file_name) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|err| IngestError::Validation(format!("failed to read `{name}`: {err}")))?;

            // Browsers send an empty part when no file was chosen.
            if name == UPLOAD_FIELD && !file_name.is_empty() && !bytes.is_empty() {
                submission.file = Some(UploadedFile {
                    original_name: file_name,
                    content_type,
                    bytes,
                });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|err| IngestError::Validation(format!("failed to read `{name}`: {err}")))?;
        submission.fields.insert(name, value);
    }

    Ok(submission)
}

pub async fn ingest(
    mode: InputMode,
    submission: &Submission,
    storage: &StoragePaths,
    fetcher: &Client,
) -> Result<IngestedInput, IngestError> {
    match mode {
        InputMode::Upload => ingest_upload(submission, &storage.uploads()).await,
        InputMode::Url => {
            let raw = submission.text(URL_FIELD).unwrap_or_default();
            ingest_url(raw, &storage.uploads(), fetcher).await
        }
        InputMode::Webcam => {
            let raw = submission.text(CAPTURE_FIELD).unwrap_or_default();
            ingest_webcam(raw, &storage.uploads()).await
        }
    }
}

async fn ingest_upload(submission: &Submission, dest: &Path) -> Result<IngestedInput, IngestError> {
    let file = submission
        .file()
        .ok_or_else(|| IngestError::Validation("no file was uploaded".to_string()))?;

    let filetype = FileType::classify(&file.original_name, file.content_type.as_deref());
    let filename = stored_name(&file.original_name, "upload");
    let filepath = save_input(dest, &filename, &file.bytes).await?;

    Ok(IngestedInput {
        filename,
        filepath,
        filetype,
    })
}

async fn ingest_url(raw: &str, dest: &Path, fetcher: &Client) -> Result<IngestedInput, IngestError> {
    let url = Url::parse(raw.trim())
        .map_err(|_| IngestError::Validation("the URL is not valid".to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(IngestError::Validation(
            "only http and https URLs are supported".to_string(),
        ));
    }

    let remote_name = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .unwrap_or("remote")
        .to_string();

    let mut response = fetcher
        .get(url.clone())
        .send()
        .await
        .map_err(|err| IngestError::Fetch(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::Fetch(format!("{url} answered {status}")));
    }
    if response
        .content_length()
        .is_some_and(|length| length > MAX_REMOTE_BYTES)
    {
        return Err(IngestError::Fetch(format!("{url} is too large")));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    // Chunked bodies carry no length up front, so the limit is enforced while reading.
    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| IngestError::Fetch(err.to_string()))?
    {
        if (bytes.len() + chunk.len()) as u64 > MAX_REMOTE_BYTES {
            return Err(IngestError::Fetch(format!("{url} is too large")));
        }
        bytes.extend_from_slice(&chunk);
    }

    let filetype = FileType::classify(&remote_name, content_type.as_deref());
    let mut filename = stored_name(&remote_name, "remote");
    if extension_of(&filename).is_none() {
        if let Some(ext) = content_type.as_deref().and_then(extension_for_mime) {
            filename = format!("{filename}.{ext}");
        }
    }
    let filepath = save_input(dest, &filename, &bytes).await?;

    Ok(IngestedInput {
        filename,
        filepath,
        filetype,
    })
}

async fn ingest_webcam(raw: &str, dest: &Path) -> Result<IngestedInput, IngestError> {
    let (content_type, bytes) = decode_capture(raw)?;
    let extension = extension_for_mime(&content_type).unwrap_or("jpg");
    let filename = format!("webcam_{}.{extension}", Uuid::new_v4().simple());
    let filepath = save_input(dest, &filename, &bytes).await?;

    Ok(IngestedInput {
        filename,
        filepath,
        filetype: FileType::from_mime(&content_type),
    })
}

/// Accepts `data:<mime>;base64,<payload>` or bare base64 (taken as JPEG).
fn decode_capture(raw: &str) -> Result<(String, Vec<u8>), IngestError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IngestError::Validation("no webcam capture was submitted".to_string()));
    }

    let (content_type, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| IngestError::Validation("malformed capture data".to_string()))?;
            let content_type = meta
                .strip_suffix(";base64")
                .ok_or_else(|| IngestError::Validation("capture must be base64".to_string()))?;
            (content_type.to_string(), payload)
        }
        None => (mime::IMAGE_JPEG.to_string(), raw),
    };

    let bytes = BASE64
        .decode(payload)
        .map_err(|err| IngestError::Validation(format!("capture is not valid base64: {err}")))?;
    if bytes.is_empty() {
        return Err(IngestError::Validation("webcam capture is empty".to_string()));
    }

    Ok((content_type, bytes))
}

fn stored_name(original: &str, fallback: &str) -> String {
    let mut sanitized = sanitize_filename::sanitize(original);
    if sanitized.is_empty() {
        sanitized = fallback.to_string();
    }
    format!("{}_{}", Uuid::new_v4().simple(), sanitized)
}

async fn save_input(dest: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, IngestError> {
    tokio::fs::create_dir_all(dest).await?;
    let path = dest.join(filename);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let parsed = content_type.parse::<mime::Mime>().ok()?;
    if parsed.type_() != mime::IMAGE {
        return None;
    }
    match parsed.subtype().as_str() {
        "jpeg" | "jpg" => Some("jpg"),
        "png" => Some("png"),
        "gif" => Some("gif"),
        "bmp" => Some("bmp"),
        "webp" => Some("webp"),
        _ => None,
    }
}
