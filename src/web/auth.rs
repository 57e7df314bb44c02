use std::{convert::Infallible, sync::OnceLock};

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use axum::{
    extract::{Form, FromRequestParts, Query, State},
    http::{StatusCode, request::Parts},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState,
    flash::{Flash, FlashQuery},
    store::{AuthStore, AuthUser, NewUser, StoreError},
    templates::{render_failure_page, render_login_page, render_register_page},
};

pub const SESSION_COOKIE: &str = "food_session";
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email and password are required")]
    MissingField,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("username, email and password are required")]
    MissingField,
    #[error("a user with that email already exists")]
    DuplicateEmail,
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => RegistrationError::DuplicateEmail,
            other => RegistrationError::Store(other),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Authentication state of the current request, resolved once from the cookie.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    user: Option<AuthUser>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|user| user.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for SessionContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(resolve_session(state.store(), &jar).await)
    }
}

pub async fn resolve_session(store: &dyn AuthStore, jar: &CookieJar) -> SessionContext {
    let Some(token) = session_token(jar) else {
        return SessionContext::anonymous();
    };

    match store.find_session_user(token).await {
        Ok(user) => SessionContext { user },
        Err(err) => {
            error!(?err, "failed to resolve session");
            SessionContext::anonymous()
        }
    }
}

fn session_token(jar: &CookieJar) -> Option<Uuid> {
    let cookie = jar.get(SESSION_COOKIE)?;
    Uuid::parse_str(cookie.value()).ok()
}

pub async fn register(
    store: &dyn AuthStore,
    username: &str,
    email: &str,
    password: &str,
) -> Result<Uuid, RegistrationError> {
    let username = username.trim();
    let email = email.trim();
    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(RegistrationError::MissingField);
    }

    if store.find_user_by_email(email).await?.is_some() {
        return Err(RegistrationError::DuplicateEmail);
    }

    let password_hash =
        hash_password(password).map_err(|err| RegistrationError::Hash(err.to_string()))?;

    let user_id = store
        .insert_user(NewUser {
            username,
            email,
            password_hash: &password_hash,
        })
        .await?;

    info!(%user_id, "registered new user");
    Ok(user_id)
}

pub async fn login(store: &dyn AuthStore, email: &str, password: &str) -> Result<Uuid, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingField);
    }

    let Some(user) = store.find_user_by_email(email).await? else {
        // Unknown emails pay the same Argon2 cost as known ones.
        if let Some(hash) = dummy_hash() {
            verify_password(password, hash);
        }
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(password, &user.password) {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(user.id)
}

/// Creates a server-side session and returns the cookie that carries it.
pub async fn start_session(
    store: &dyn AuthStore,
    user_id: Uuid,
) -> Result<Cookie<'static>, StoreError> {
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);
    let token = store.create_session(user_id, expires_at).await?;

    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));
    Ok(cookie)
}

/// Drops the server-side session, if any, and expires the cookie.
pub async fn end_session(store: &dyn AuthStore, jar: CookieJar) -> CookieJar {
    if let Some(token) = session_token(&jar) {
        if let Err(err) = store.delete_session(token).await {
            error!(?err, "failed to remove session during logout");
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    jar.remove(removal)
}

pub async fn login_page(session: SessionContext, Query(query): Query<FlashQuery>) -> Response {
    if session.is_authenticated() {
        return Redirect::to("/").into_response();
    }
    Html(render_login_page(query.flash())).into_response()
}

pub async fn process_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let user_id = match login(state.store(), &form.email, &form.password).await {
        Ok(user_id) => user_id,
        Err(AuthError::MissingField) => {
            return Redirect::to(&Flash::MissingFields.redirect_target("/login")).into_response();
        }
        Err(AuthError::InvalidCredentials) => {
            return Redirect::to(&Flash::InvalidCredentials.redirect_target("/login"))
                .into_response();
        }
        Err(AuthError::Store(err)) => {
            error!(?err, "failed to fetch user during login");
            return server_error().into_response();
        }
    };

    establish_session(&state, jar, user_id, Flash::LoggedIn).await
}

pub async fn register_page(session: SessionContext, Query(query): Query<FlashQuery>) -> Response {
    if session.is_authenticated() {
        return Redirect::to("/").into_response();
    }
    Html(render_register_page(query.flash())).into_response()
}

pub async fn process_register(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<RegisterForm>,
) -> Response {
    let outcome = register(state.store(), &form.username, &form.email, &form.password).await;
    let user_id = match outcome {
        Ok(user_id) => user_id,
        Err(RegistrationError::MissingField) => {
            return Redirect::to(&Flash::MissingFields.redirect_target("/register"))
                .into_response();
        }
        Err(RegistrationError::DuplicateEmail) => {
            return Redirect::to(&Flash::DuplicateEmail.redirect_target("/register"))
                .into_response();
        }
        Err(err) => {
            error!(?err, "failed to register user");
            return server_error().into_response();
        }
    };

    establish_session(&state, jar, user_id, Flash::Registered).await
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let jar = end_session(state.store(), jar).await;
    (jar, Redirect::to(&Flash::LoggedOut.redirect_target("/")))
}

async fn establish_session(
    state: &AppState,
    jar: CookieJar,
    user_id: Uuid,
    flash: Flash,
) -> Response {
    match start_session(state.store(), user_id).await {
        Ok(cookie) => (jar.add(cookie), Redirect::to(&flash.redirect_target("/"))).into_response(),
        Err(err) => {
            error!(?err, %user_id, "failed to create session");
            server_error().into_response()
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    DUMMY_HASH
        .get_or_init(|| hash_password("food-recognition-unknown-account").ok())
        .as_deref()
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn server_error() -> (StatusCode, Html<String>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(render_failure_page(
            "Server error",
            "Something went wrong on our side. Please try again later.",
        )),
    )
}
