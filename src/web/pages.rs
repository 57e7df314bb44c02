use axum::{
    extract::Query,
    http::{HeaderValue, header},
    response::{Html, IntoResponse},
};

use crate::web::{
    auth::SessionContext,
    flash::FlashQuery,
    ingest::InputMode,
    templates::{InputPage, render_input_page},
};

pub async fn home_page(session: SessionContext, Query(query): Query<FlashQuery>) -> impl IntoResponse {
    (
        [(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        )],
        input_form(InputMode::Upload, &session, &query),
    )
}

pub async fn url_page(session: SessionContext, Query(query): Query<FlashQuery>) -> Html<String> {
    input_form(InputMode::Url, &session, &query)
}

pub async fn webcam_page(session: SessionContext, Query(query): Query<FlashQuery>) -> Html<String> {
    input_form(InputMode::Webcam, &session, &query)
}

fn input_form(mode: InputMode, session: &SessionContext, query: &FlashQuery) -> Html<String> {
    Html(render_input_page(InputPage {
        mode,
        user: session.user(),
        flash: query.flash(),
        outcome: None,
    }))
}
