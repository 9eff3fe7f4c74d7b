use super::MutationKind;
use crate::config::SyncConfig;
use crate::core::{Document, MirrorError, Result};
use lazy_static::lazy_static;
use log::{error, warn};
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

lazy_static! {
    static ref DEFAULT_TRANSIENT_PATTERNS: RegexSet =
        transient_pattern_set(&SyncConfig::default().transient_patterns)
            .unwrap_or_else(|_| RegexSet::empty());
}

fn transient_pattern_set(patterns: &[String]) -> std::result::Result<RegexSet, regex::Error> {
    RegexSetBuilder::new(patterns).case_insensitive(true).build()
}

/// How failed store calls of a synchronization batch are treated.
///
/// Only an operator switches between the two; nothing changes it automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionPolicy {
    /// Transient failures abort the batch so it can be retried; others are logged.
    #[default]
    RethrowTransient,
    /// Every failure is logged and absorbed.
    CatchAll,
}

impl ExceptionPolicy {
    fn as_u8(self) -> u8 {
        match self {
            Self::RethrowTransient => 0,
            Self::CatchAll => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::CatchAll,
            _ => Self::RethrowTransient,
        }
    }
}

/// Classifies and reports failures of individual store calls.
#[derive(Debug)]
pub struct SyncExceptionHandler {
    policy: AtomicU8,
    transient_patterns: RegexSet,
}

impl Default for SyncExceptionHandler {
    fn default() -> Self {
        Self {
            policy: AtomicU8::new(ExceptionPolicy::default().as_u8()),
            transient_patterns: DEFAULT_TRANSIENT_PATTERNS.clone(),
        }
    }
}

impl SyncExceptionHandler {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let transient_patterns = transient_pattern_set(&config.transient_patterns)
            .map_err(|err| MirrorError::IllegalArgument(format!("transient pattern: {}", err)))?;
        let policy = if config.catch_all {
            ExceptionPolicy::CatchAll
        } else {
            ExceptionPolicy::RethrowTransient
        };
        Ok(Self {
            policy: AtomicU8::new(policy.as_u8()),
            transient_patterns,
        })
    }

    pub fn policy(&self) -> ExceptionPolicy {
        ExceptionPolicy::from_u8(self.policy.load(Ordering::SeqCst))
    }

    /// Operator toggle.
    pub fn set_policy(&self, policy: ExceptionPolicy) {
        let previous = ExceptionPolicy::from_u8(self.policy.swap(policy.as_u8(), Ordering::SeqCst));
        if previous != policy {
            warn!("synchronization exception policy switched from {:?} to {:?}", previous, policy);
        }
    }

    pub fn catch_all(&self) {
        self.set_policy(ExceptionPolicy::CatchAll);
    }

    pub fn rethrow_transient(&self) {
        self.set_policy(ExceptionPolicy::RethrowTransient);
    }

    /// Connectivity problems, timeouts, and messages matching a transient pattern.
    pub fn is_transient(&self, err: &MirrorError) -> bool {
        match err {
            MirrorError::Connectivity(_)
            | MirrorError::Timeout(_)
            | MirrorError::TransientWrite { .. } => true,
            MirrorError::DuplicateDocumentKey { .. }
            | MirrorError::ConversionFailed(_)
            | MirrorError::Serialization(_)
            | MirrorError::UnknownMirroredType(_) => false,
            other => self.transient_patterns.is_match(&other.to_string()),
        }
    }

    /// Reports a failed store call.
    ///
    /// Returns an error only for transient failures under
    /// [`ExceptionPolicy::RethrowTransient`]; the caller then aborts the batch.
    pub fn handle(
        &self,
        operation: MutationKind,
        collection: &str,
        documents: &[Document],
        err: MirrorError,
    ) -> Result<()> {
        let ids: Vec<String> = documents
            .iter()
            .map(|document| {
                document
                    .id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "<no id>".to_string())
            })
            .collect();

        match self.policy() {
            ExceptionPolicy::CatchAll => {
                warn!(
                    "ignoring failed {} on '{}' for {:?}: {}",
                    operation, collection, ids, err
                );
                Ok(())
            }
            ExceptionPolicy::RethrowTransient if self.is_transient(&err) => {
                warn!(
                    "transient failure during {} on '{}' for {:?}: {}",
                    operation, collection, ids, err
                );
                Err(MirrorError::TransientWrite {
                    operation: format!("{} on '{}'", operation, collection),
                    message: err.to_string(),
                })
            }
            ExceptionPolicy::RethrowTransient => {
                error!(
                    "failed {} on '{}' for {:?}: {}",
                    operation, collection, ids, err
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_toggle() {
        assert_eq!(ExceptionPolicy::default(), ExceptionPolicy::RethrowTransient);
        let handler = SyncExceptionHandler::default();
        assert_eq!(handler.policy(), ExceptionPolicy::RethrowTransient);
        handler.catch_all();
        assert_eq!(handler.policy(), ExceptionPolicy::CatchAll);
        handler.rethrow_transient();
        assert_eq!(handler.policy(), ExceptionPolicy::RethrowTransient);
    }

    #[test]
    fn test_message_patterns_are_case_insensitive() {
        let handler = SyncExceptionHandler::default();
        let err = MirrorError::WriteFailed {
            operation: "update".to_string(),
            message: "Not Master and slaveOk=false".to_string(),
        };
        assert!(handler.is_transient(&err));
        let err = MirrorError::WriteFailed {
            operation: "update".to_string(),
            message: "document too large".to_string(),
        };
        assert!(!handler.is_transient(&err));
    }

    #[test]
    fn test_duplicate_key_is_never_transient() {
        let handler = SyncExceptionHandler::default();
        let err = MirrorError::DuplicateDocumentKey {
            collection: "socket_events".to_string(),
            id: "1".to_string(),
        };
        assert!(!handler.is_transient(&err));
    }
}
