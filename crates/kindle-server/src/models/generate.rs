//! Generation request body.

use serde::Deserialize;

/// Body of `POST /api/v1/ask`.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    /// Older clients send the prompt as `question`.
    #[serde(alias = "question")]
    pub prompt: String,
}
