use thiserror::Error;

// ---------------------------------------------------------------------------
// Component errors
// ---------------------------------------------------------------------------

/// Why the upstream refused or never received a gated action submission.
///
/// Always recoverable: the controller returns to `Ready` and the operator may
/// retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("story not found: {0}")]
    NotFound(String),

    #[error("conflicting run already active: {0}")]
    Conflict(String),

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("action service unreachable: {0}")]
    Unreachable(String),
}

/// A single status poll failed. Transient; retried until the timeout budget
/// is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("status endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("status endpoint returned HTTP {status}")]
    Http { status: u16 },

    #[error("failed to decode status payload: {0}")]
    Decode(String),
}

/// No terminal status was observed within the poll budget. Fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no terminal status after {attempts} polls in {elapsed_ms}ms")]
pub struct TimeoutError {
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// One test or validation item could not be executed. Local to that item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemRunError {
    #[error("item run rejected: {0}")]
    Rejected(String),

    #[error("test service unreachable: {0}")]
    Unreachable(String),

    #[error("failed to decode item outcome: {0}")]
    Decode(String),
}

/// Read-side failures of the story/analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The upstream refused a write, with its `detail` message.
    #[error("upstream rejected the request: {0}")]
    Rejected(String),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecklistError {
    #[error("duplicate checklist item id: {0}")]
    DuplicateItem(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("checklist incomplete, still required: {}", blocking.join(", "))]
    GateClosed { blocking: Vec<String> },

    #[error("an action is already active for story '{story}' ({phase})")]
    Conflict { story: String, phase: String },

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Checklist(#[from] ChecklistError),

    #[error("cannot {action} while {phase}")]
    InvalidState { action: String, phase: String },

    #[error("controller for story '{0}' has been torn down")]
    TornDown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("'{item}' is already running")]
    AlreadyRunning { item: String },

    #[error("test registry for story '{0}' has been torn down")]
    TornDown(String),
}

// ---------------------------------------------------------------------------
// ShipgateError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ShipgateError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid {kind} '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Checklist(#[from] ChecklistError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ShipgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_closed_lists_blocking_items() {
        let err = ControllerError::GateClosed {
            blocking: vec!["pre-deploy-1".into(), "pre-deploy-3".into()],
        };
        assert_eq!(
            err.to_string(),
            "checklist incomplete, still required: pre-deploy-1, pre-deploy-3"
        );
    }

    #[test]
    fn submit_error_is_transparent_through_controller() {
        let err: ControllerError = SubmitError::Conflict("run-7".into()).into();
        assert_eq!(err.to_string(), "conflicting run already active: run-7");
    }

    #[test]
    fn timeout_message_carries_budget() {
        let err = TimeoutError {
            attempts: 10,
            elapsed_ms: 5000,
        };
        assert!(err.to_string().contains("10 polls"));
    }
}
