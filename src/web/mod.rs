pub mod analyze;
pub mod auth;
pub mod flash;
pub mod ingest;
pub mod pages;
pub mod router;
pub mod state;
pub mod storage;
pub mod store;
pub mod templates;

pub use state::AppState;
