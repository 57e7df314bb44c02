use std::path::{Path, PathBuf};

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use tracing::error;

use crate::{
    config::StoragePaths,
    web::{AppState, templates::render_failure_page},
};

const CSV_CONTENT_TYPE: &str = "text/csv";

/// Directories that artifacts may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Uploads,
    Detections,
    Segmentations,
    Csv,
}

impl ArtifactKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "uploads" => Some(ArtifactKind::Uploads),
            "detections" => Some(ArtifactKind::Detections),
            "segmentations" => Some(ArtifactKind::Segmentations),
            "csv" => Some(ArtifactKind::Csv),
            _ => None,
        }
    }

    fn directory(self, storage: &StoragePaths) -> PathBuf {
        match self {
            ArtifactKind::Uploads => storage.uploads(),
            ArtifactKind::Detections => storage.detections(),
            ArtifactKind::Segmentations => storage.segmentations(),
            ArtifactKind::Csv => storage.csv(),
        }
    }
}

/// Resolves a requested artifact to a path inside its directory.
pub fn resolve_artifact(storage: &StoragePaths, kind: &str, name: &str) -> Option<PathBuf> {
    let kind = ArtifactKind::parse(kind)?;
    if name.is_empty() || name.starts_with('.') || sanitize_filename::sanitize(name) != name {
        return None;
    }
    Some(kind.directory(storage).join(name))
}

pub async fn serve_artifact(
    State(state): State<AppState>,
    AxumPath((kind, name)): AxumPath<(String, String)>,
) -> Result<Response, (StatusCode, Html<String>)> {
    let path = resolve_artifact(state.storage(), &kind, &name).ok_or_else(not_found)?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(err) => {
            error!(?err, file = %path.display(), "failed to read artifact");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render_failure_page(
                    "Server error",
                    "The file could not be read.",
                )),
            ));
        }
    };

    let content_type = content_type_for(&path);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

    if content_type == CSV_CONTENT_TYPE {
        let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
            .map_err(|_| not_found())?;
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((headers, bytes).into_response())
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "csv" => CSV_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

fn not_found() -> (StatusCode, Html<String>) {
    (
        StatusCode::NOT_FOUND,
        Html(render_failure_page(
            "Not found",
            "The requested file does not exist.",
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_kinds_only() {
        let storage = StoragePaths::new("/srv/food");
        assert_eq!(
            resolve_artifact(&storage, "csv", "plate_info.csv"),
            Some(PathBuf::from("/srv/food/csv/plate_info.csv"))
        );
        assert_eq!(resolve_artifact(&storage, "secrets", "a.png"), None);
    }

    #[test]
    fn rejects_traversal_and_hidden_names() {
        let storage = StoragePaths::new("/srv/food");
        for name in ["../etc/passwd", "..", ".env", "a/b.png", ""] {
            assert_eq!(resolve_artifact(&storage, "uploads", name), None, "{name}");
        }
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.csv")), "text/csv");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
