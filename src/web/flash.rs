use serde::Deserialize;

/// Query parameters carrying a one-shot message across a redirect.
#[derive(Debug, Default, Deserialize)]
pub struct FlashQuery {
    pub status: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    Registered,
    LoggedIn,
    LoggedOut,
    MissingFields,
    DuplicateEmail,
    InvalidCredentials,
    LoginRequired,
    InvalidParameters,
    InvalidInput,
    UnknownInputMode,
}

impl Flash {
    pub fn code(self) -> &'static str {
        match self {
            Flash::Registered => "registered",
            Flash::LoggedIn => "logged_in",
            Flash::LoggedOut => "logged_out",
            Flash::MissingFields => "missing_fields",
            Flash::DuplicateEmail => "duplicate_email",
            Flash::InvalidCredentials => "invalid_credentials",
            Flash::LoginRequired => "login_required",
            Flash::InvalidParameters => "invalid_parameters",
            Flash::InvalidInput => "invalid_input",
            Flash::UnknownInputMode => "unknown_input_mode",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Flash::Registered => "Registration successful",
            Flash::LoggedIn => "Login successful",
            Flash::LoggedOut => "You have been logged out",
            Flash::MissingFields => "Please fill out all fields",
            Flash::DuplicateEmail => "A user with that email already exists",
            Flash::InvalidCredentials => "Invalid credentials",
            Flash::LoginRequired => "Please log in to analyze images",
            Flash::InvalidParameters => "Threshold, confidence and model type must be valid",
            Flash::InvalidInput => "The submitted image could not be read",
            Flash::UnknownInputMode => "Choose upload, URL or webcam input",
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, Flash::Registered | Flash::LoggedIn | Flash::LoggedOut)
    }

    fn from_code(code: &str) -> Option<Self> {
        [
            Flash::Registered,
            Flash::LoggedIn,
            Flash::LoggedOut,
            Flash::MissingFields,
            Flash::DuplicateEmail,
            Flash::InvalidCredentials,
            Flash::LoginRequired,
            Flash::InvalidParameters,
            Flash::InvalidInput,
            Flash::UnknownInputMode,
        ]
        .into_iter()
        .find(|flash| flash.code() == code)
    }

    /// Builds `path?status=..` or `path?error=..` for a redirect.
    pub fn redirect_target(self, path: &str) -> String {
        let key = if self.is_error() { "error" } else { "status" };
        format!("{path}?{key}={}", self.code())
    }
}

impl FlashQuery {
    pub fn flash(&self) -> Option<Flash> {
        self.error
            .as_deref()
            .and_then(Flash::from_code)
            .or_else(|| self.status.as_deref().and_then(Flash::from_code))
    }
}
