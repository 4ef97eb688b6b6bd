use thiserror::Error;

#[derive(Debug, Error)]
pub enum CogtError {
    #[error("'{handle}' does not support {capability}")]
    Capability { handle: String, capability: String },

    #[error("SDK type mismatch: {0}")]
    SdkType(String),

    #[error("Completion came back empty: {0}")]
    CompletionEmpty(String),

    #[error("Invalid prompt: {0}")]
    Prompt(String),

    #[error("Prompt factory failed: {0}")]
    PromptFactory(String),

    #[error("Invalid OCR input: {0}")]
    OcrInput(String),

    #[cfg(feature = "llm")]
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Usage registry error: {0}")]
    UsageRegistry(String),
}

impl CogtError {
    pub fn is_capability_error(&self) -> bool {
        matches!(self, CogtError::Capability { .. })
    }
}
