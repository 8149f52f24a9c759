// ⚠️ Engine errors - configuration and input-contract failures
// Record store and CLI layers use anyhow; the engine reports typed errors

use thiserror::Error;

/// Result type for rule compilation and clustering runs
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Step fields are zero-based indexes; messages print them one-based
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The rule table has no steps
    #[error("Configuration error: rule table is empty")]
    EmptyRuleTable,

    /// A rule's pattern does not compile
    #[error("Configuration error: step {} ({description}) has an invalid pattern: {source}", .step + 1)]
    InvalidPattern {
        step: usize,
        description: String,
        #[source]
        source: regex::Error,
    },

    /// Two input records share an original name
    #[error("Input contract violation: duplicate leader name {name:?}")]
    DuplicateName { name: String },

    /// A single-step request named a step the table doesn't have
    #[error("Step index {step} out of range (table has {len} steps)")]
    StepOutOfRange { step: usize, len: usize },

    /// The report sink failed while receiving a step report
    #[error("Report sink failed after step {}: {source}", .step + 1)]
    Sink {
        step: usize,
        #[source]
        source: std::io::Error,
    },

    /// The reviewer stopped the run between steps
    #[error("Review aborted by operator after step {}", .step + 1)]
    ReviewAborted { step: usize },
}
