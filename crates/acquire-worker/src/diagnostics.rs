//! Non-fatal diagnostics raised while talking to a method.
//!
//! Protocol errors and teardown warnings never abort a dispatch batch; they
//! are recorded here and mirrored to `tracing`. Whoever owns the worker drains
//! them and decides what to show.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    #[error("invalid message from method {method}: {message}")]
    InvalidMessage { method: String, message: String },

    #[error("method {method} gave invalid {code} message: no pending item for its URI")]
    MissingItem { method: String, code: u32 },

    #[error("method {method} general failure: {message}")]
    GeneralFailure { method: String, message: String },

    #[error("method {method} has died unexpectedly")]
    MethodDied { method: String },

    #[error("waited for method {method} but nothing was there")]
    ReapMismatch { method: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ReapMismatch { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Self::InvalidMessage { method, .. }
            | Self::MissingItem { method, .. }
            | Self::GeneralFailure { method, .. }
            | Self::MethodDied { method }
            | Self::ReapMismatch { method } => method,
        }
    }
}

/// Append-only diagnostic stack.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Error => tracing::error!(method = diagnostic.method(), "{diagnostic}"),
            Severity::Warning => tracing::warn!(method = diagnostic.method(), "{diagnostic}"),
        }
        self.entries.push(diagnostic);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity() == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }
}
