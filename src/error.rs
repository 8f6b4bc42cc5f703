use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.messages[0].role")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, attempt count)
    pub details: Option<String>,
    /// Source of the error (e.g., "recorder", "speculative_session")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the gateway core.
///
/// Only [`Error::InvalidRequest`] and an exhausted [`Error::BackendUnavailable`]
/// are ever surfaced to the caller; everything else degrades toward the best
/// available response and is visible only through tracing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {message}{}", format_context(.context))]
    InvalidRequest {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend unavailable: {message}{}", format_context(.context))]
    BackendUnavailable {
        message: String,
        /// Whether the policy engine may retry this attempt.
        retryable: bool,
        context: ErrorContext,
    },

    #[error("Storage error: {message}{}", format_context(.context))]
    Storage {
        message: String,
        context: ErrorContext,
    },

    #[error("Interceptor '{stage}' degraded: {message}")]
    InterceptorDegraded { stage: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new invalid-request error with structured context
    pub fn invalid_request(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidRequest {
            message: msg.into(),
            context,
        }
    }

    /// Create a new backend-unavailable error; transient failures should be retryable.
    pub fn backend_unavailable(
        msg: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Error::BackendUnavailable {
            message: msg.into(),
            retryable,
            context,
        }
    }

    /// Create a new storage error with structured context
    pub fn storage(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Storage {
            message: msg.into(),
            context,
        }
    }

    /// Create a new degraded-interceptor error (always swallowed by the orchestrator).
    pub fn degraded(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::InterceptorDegraded {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidRequest { context, .. }
            | Error::BackendUnavailable { context, .. }
            | Error::Storage { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether the policy engine may retry the failed attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BackendUnavailable { retryable: true, .. })
    }
}
