use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(
        "The cross product of different application states is too large to explore \
         (N={states}, max_states={max_states}), either reduce the number of options \
         on the widgets or increase the max_states specified on static export"
    )]
    Capacity { states: usize, max_states: usize },

    #[error("Can only render {expected} models, got {found}")]
    TypeContract { expected: &'static str, found: String },

    #[error("Channel write failed: {0}")]
    Channel(String),

    #[error("Widget {widget:?} rejected value: {reason}")]
    InvalidValue { widget: String, reason: String },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Widget {widget:?} has not been rendered into root {root}")]
    NotRendered { widget: String, root: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
