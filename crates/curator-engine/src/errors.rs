//! Engine-level error model.
//!
//! Table-level failures are [`curator_types::PipelineError`]s and end up in
//! the directive report. [`EngineError`] is for everything that stops a
//! directive from producing a report at all.

/// Host-side failure outside the table taxonomy.
///
/// `Infrastructure` wraps opaque errors (repair store unavailable, worker
/// task panicked, catalog document unreadable) that are never retried.
#[derive(Debug)]
pub enum EngineError {
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<curator_state::StateError> for EngineError {
    fn from(e: curator_state::StateError) -> Self {
        Self::Infrastructure(anyhow::Error::new(e).context("repair store failure"))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Infrastructure(anyhow::anyhow!("worker task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_keeps_context() {
        let err = EngineError::from(curator_state::StateError::LockPoisoned);
        let msg = err.to_string();
        assert!(msg.contains("repair store failure"), "got: {msg}");
        assert!(msg.contains("lock poisoned"), "got: {msg}");
    }

    #[test]
    fn anyhow_converts_to_infrastructure() {
        let err: EngineError = anyhow::anyhow!("catalog unreadable").into();
        assert!(matches!(err, EngineError::Infrastructure(_)));
        assert_eq!(err.to_string(), "catalog unreadable");
    }
}
