//! Error taxonomy for the engine boundary.
//!
//! Everything a caller can mishandle is a typed variant here; gate failures
//! are deliberately absent — a failed gate is a control-flow outcome (retry,
//! re-render, escalation), never an error. Internal I/O failures travel as
//! `anyhow` context under [`EngineError::Internal`].

use thiserror::Error;

/// Rejections raised before any further processing of a command.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty command")]
    EmptyCommand,

    #[error("malformed JSON envelope: {0}")]
    MalformedEnvelope(String),

    #[error("repetition count must be at least 1, got {count}")]
    RepetitionCount { count: u32 },

    #[error(
        "prompt reference '>{reference}' has a single '>' prefix; this is usually '>>{reference}' mangled by a transport un-escaping pass"
    )]
    PartiallyUnescapedPrefix { reference: String },

    #[error("chain operator has an empty segment at position {position}")]
    EmptyChainSegment { position: usize },
}

/// A prompt reference that resolved to nothing in the catalog.
///
/// Carries up to 3 ranked suggestions (prefix match, edit distance,
/// shared-word overlap); empty when nothing scored above threshold.
#[derive(Debug, Error)]
#[error("unknown prompt '{name}'")]
pub struct UnknownPromptError {
    pub name: String,
    pub suggestions: Vec<String>,
}

/// Resume attempts against sessions that cannot accept them.
///
/// The session record is left untouched in every case.
#[derive(Debug, Error)]
pub enum SessionStateError {
    #[error(
        "session '{session_id}' already finished; issue the command again (optionally with force_restart) instead of resuming"
    )]
    AlreadyFinished { session_id: String },

    #[error("session '{session_id}' expired; issue the command again to start a fresh run")]
    Expired { session_id: String },

    #[error("no session '{session_id}'; check the chain_id or start the chain from the beginning")]
    Unknown { session_id: String },
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    UnknownPrompt(#[from] UnknownPromptError),

    #[error("conflicting parameters: {0}")]
    ConflictingParameters(String),

    #[error(transparent)]
    SessionState(#[from] SessionStateError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown framework '{name}' (known: {})", known.join(", "))]
    UnknownFramework { name: String, known: Vec<String> },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_framework_lists_known_names() {
        let err = EngineError::UnknownFramework {
            name: "nope".to_string(),
            known: vec!["CAGEERF".to_string(), "REACT".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unknown framework 'nope' (known: CAGEERF, REACT)"
        );
    }

    #[test]
    fn partially_unescaped_prefix_names_the_defect() {
        let err = ParseError::PartiallyUnescapedPrefix {
            reference: "research".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'>research'"));
        assert!(msg.contains(">>research"));
    }
}
