/// Core error type for the relay bot.
///
/// Adapter crates map their specific errors into this type so the dispatch
/// layer can handle failures consistently (user-facing denial vs apology vs
/// log-and-continue).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unauthorized user {0}")]
    Unauthorized(i64),

    #[error("model api error: {0}")]
    ModelApi(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, Error>;
