use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    recognition::{AnalysisRequest, RecognitionError},
    web::{
        AppState,
        auth::{SessionContext, server_error},
        flash::Flash,
        ingest::{self, FileType, IngestError, InputMode, Submission},
        templates::{
            AnalysisView, InputPage, PageOutcome, render_failure_page, render_input_page,
        },
    },
};

const INVALID_URL_MESSAGE: &str = "Invalid input url!!!";
const UNSUPPORTED_TYPE_MESSAGE: &str = "Only images can be analyzed. Please submit an image file.";

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("`{0}` is required")]
    Missing(&'static str),
    #[error("`{field}` must be a number, got `{value}`")]
    NotANumber { field: &'static str, value: String },
    #[error("`{field}` must be between 0 and 100, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("unsupported file type `{}`", .0.as_str())]
    UnsupportedFileType(FileType),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
}

/// Recognition knobs read from the analyze form.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionParams {
    pub min_iou: f64,
    pub min_conf: f64,
    pub model_types: String,
    pub enhanced: bool,
    pub ensemble: bool,
    pub tta: bool,
    pub segmentation: bool,
}

pub fn parse_params(submission: &Submission) -> Result<RecognitionParams, ValidationError> {
    let min_iou = parse_percentage(submission, "threshold-range")?;
    let min_conf = parse_percentage(submission, "confidence-range")?;
    let model_types = submission
        .text("model-types")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ValidationError::Missing("model-types"))?
        .to_lowercase();

    Ok(RecognitionParams {
        min_iou,
        min_conf,
        model_types,
        enhanced: toggle(submission, "enhanced"),
        ensemble: toggle(submission, "ensemble"),
        tta: toggle(submission, "tta"),
        segmentation: toggle(submission, "seg"),
    })
}

/// Reads a 0-100 percentage field as a 0-1 fraction.
pub fn parse_percentage(
    submission: &Submission,
    field: &'static str,
) -> Result<f64, ValidationError> {
    let raw = submission
        .text(field)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ValidationError::Missing(field))?;

    let value: f64 = raw.parse().map_err(|_| ValidationError::NotANumber {
        field,
        value: raw.to_string(),
    })?;

    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(ValidationError::OutOfRange { field, value });
    }

    Ok(value / 100.0)
}

fn toggle(submission: &Submission, field: &str) -> bool {
    submission.text(field) == Some("on")
}

pub async fn redirect_home() -> Redirect {
    Redirect::to("/")
}

pub async fn analyze(
    State(state): State<AppState>,
    session: SessionContext,
    req: Request,
) -> Response {
    if !session.is_authenticated() {
        return Redirect::to(&Flash::LoginRequired.redirect_target("/login")).into_response();
    }

    let submission = match ingest::read_submission(req, &state).await {
        Ok(submission) => submission,
        Err(err) => {
            warn!(?err, "failed to read analyze form");
            return Redirect::to(&Flash::InvalidInput.redirect_target("/")).into_response();
        }
    };

    let mode = match InputMode::from_submission(&submission) {
        Ok(mode) => mode,
        Err(_) => {
            return Redirect::to(&Flash::UnknownInputMode.redirect_target("/")).into_response();
        }
    };

    info!(user_id = ?session.user_id(), mode = mode.result_view(), "analysis requested");

    match run_analysis(&state, mode, &submission).await {
        Ok(view) => Html(render_input_page(InputPage {
            mode,
            user: session.user(),
            flash: None,
            outcome: Some(PageOutcome::Result(view)),
        }))
        .into_response(),
        Err(err) => error_response(mode, &session, err),
    }
}

pub async fn run_analysis(
    state: &AppState,
    mode: InputMode,
    submission: &Submission,
) -> Result<AnalysisView, AnalyzeError> {
    let params = parse_params(submission)?;
    let input = ingest::ingest(mode, submission, state.storage(), state.fetcher()).await?;

    if input.filetype != FileType::Image {
        if let Err(err) = tokio::fs::remove_file(&input.filepath).await {
            warn!(?err, path = %input.filepath.display(), "failed to discard unsupported input");
        }
        return Err(AnalyzeError::UnsupportedFileType(input.filetype));
    }

    let request = AnalysisRequest {
        filename: input.filename.clone(),
        filepath: input.filepath.display().to_string(),
        filetype: input.filetype.as_str().to_string(),
        model_types: params.model_types,
        min_iou: params.min_iou,
        min_conf: params.min_conf,
        enhanced: params.enhanced,
        ensemble: params.ensemble,
        tta: params.tta,
        segmentation: params.segmentation,
    };

    let recognizer = state.recognizer();
    let detection = recognizer.process_image(&request).await?;
    let report = recognizer.process_output(&detection.output_path).await?;

    info!(
        filename = %input.filename,
        out_name = %detection.out_name,
        mode = mode.result_view(),
        "analysis completed"
    );

    Ok(AnalysisView {
        out_name: detection.out_name,
        segname: detection.output_path,
        fname: report.filename,
        output_type: detection.output_type,
        filetype: input.filetype.as_str().to_string(),
        csv_name: report.csv_name1,
        csv_name2: report.csv_name2,
        segmentation: params.segmentation,
    })
}

fn error_response(mode: InputMode, session: &SessionContext, err: AnalyzeError) -> Response {
    let render_error = |status: StatusCode, message: &str| {
        let html = render_input_page(InputPage {
            mode,
            user: session.user(),
            flash: None,
            outcome: Some(PageOutcome::Error(message.to_string())),
        });
        (status, Html(html)).into_response()
    };

    match err {
        AnalyzeError::Validation(err) => {
            warn!(%err, "rejected analyze parameters");
            Redirect::to(&Flash::InvalidParameters.redirect_target(mode.form_path()))
                .into_response()
        }
        AnalyzeError::Ingest(IngestError::Validation(message) | IngestError::Fetch(message))
            if mode == InputMode::Url =>
        {
            warn!(%message, "rejected URL input");
            render_error(StatusCode::UNPROCESSABLE_ENTITY, INVALID_URL_MESSAGE)
        }
        AnalyzeError::Ingest(IngestError::Io(err)) => {
            error!(?err, "failed to store analyze input");
            server_error().into_response()
        }
        AnalyzeError::Ingest(err) => {
            warn!(%err, "rejected analyze input");
            Redirect::to(&Flash::InvalidInput.redirect_target(mode.form_path())).into_response()
        }
        AnalyzeError::UnsupportedFileType(filetype) => {
            warn!(filetype = filetype.as_str(), "rejected non-image input");
            let message = if mode == InputMode::Url {
                INVALID_URL_MESSAGE
            } else {
                UNSUPPORTED_TYPE_MESSAGE
            };
            render_error(StatusCode::UNPROCESSABLE_ENTITY, message)
        }
        AnalyzeError::Recognition(err) => {
            error!(?err, "recognition pipeline failed");
            (
                StatusCode::BAD_GATEWAY,
                Html(render_failure_page(
                    "Recognition failed",
                    "The food recognition service could not process this image. Please try again.",
                )),
            )
                .into_response()
        }
    }
}
