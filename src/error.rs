use parse_display::Display;

/// Failure reported by a [`Fetcher`](crate::related::Fetcher).
#[derive(Display, Debug, Clone, PartialEq, Eq)]
#[display("failed to read {model} #{id}: {message}")]
pub struct FetchError {
    pub model: String,
    pub id: i64,
    pub message: String,
}
impl FetchError {
    pub fn new(model: impl Into<String>, id: i64, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id,
            message: message.into(),
        }
    }
}

impl std::error::Error for FetchError {}

/// An action event that could not be decoded.
#[non_exhaustive]
#[derive(Display, Debug)]
#[display("invalid action event: {source}")]
pub struct EventParseError {
    source: serde_json::Error,
}
impl EventParseError {
    pub(crate) fn new(source: serde_json::Error) -> Self {
        Self { source }
    }
}

impl std::error::Error for EventParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
