use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WrapError>;

/// Errors raised while preparing or executing a wrapped invocation.
///
/// Every variant is a reason the cache could not handle the command; the
/// driver catches them at its boundary and reports "not handled" so the
/// caller can run the original program unmodified.
#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cache(#[from] stash_cache::CacheError),

    #[error("command cannot be cached: {reason}")]
    Uncacheable { reason: String },

    #[error("preprocessing failed: {reason}")]
    Preprocess { reason: String },

    #[error("cannot determine program identity: {reason}")]
    ProgramId { reason: String },

    #[error("response file {path} cannot be resolved: {reason}")]
    ResponseFile { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_convert() {
        let err = WrapError::from(stash_cache::CacheError::ReadOnly);
        assert!(matches!(err, WrapError::Cache(_)));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn uncacheable_names_the_reason() {
        let err = WrapError::Uncacheable {
            reason: "no -c flag".to_string(),
        };
        assert!(err.to_string().contains("no -c flag"));
    }
}
