//! Event vocabulary
//!
//! Event names drive the engine's control flow, so the lifecycle and action
//! kinds are a closed enumeration rather than free-form strings. Domain
//! events ("GitChanged", "received", ...) travel through the open
//! [`EventName::Custom`] category.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque payload attached to a published event.
///
/// Consumed only by handlers; the engine never inspects it beyond logging.
pub type Payload = serde_json::Value;

/// Name of a published event
///
/// Two groups are built in:
/// - *actions* the engine asks handlers to perform (`register`, `activate`,
///   `subscribe`, `run`, `update`, `delete`);
/// - *state notifications* published by the registry's transition primitive,
///   named after the lifecycle state reached (`added`, `registered`,
///   `pending_activation`, `activated`, `failed`, `invalid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    // Actions
    /// Perform registration side effects for a newly added resource
    Register,
    /// Bring a registered resource into operation
    Activate,
    /// A handler has become interested in a resource (late-binding hook)
    Subscribe,
    /// Execute a runnable handler
    Run,
    /// A resource definition changed
    Update,
    /// A resource was removed
    Delete,

    // State notifications
    /// Resource entered `Added`
    Added,
    /// Resource entered `Registered`
    Registered,
    /// Resource entered `PendingActivation`
    PendingActivation,
    /// Resource entered `Activated`
    Activated,
    /// Resource entered `Failed`
    Failed,
    /// Resource entered `Invalid`
    Invalid,

    /// Domain-specific event
    #[serde(untagged)]
    Custom(String),
}

impl EventName {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Register => "register",
            Self::Activate => "activate",
            Self::Subscribe => "subscribe",
            Self::Run => "run",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Added => "added",
            Self::Registered => "registered",
            Self::PendingActivation => "pending_activation",
            Self::Activated => "activated",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
            Self::Custom(name) => name,
        }
    }

    /// Parse a name, folding unknown strings into [`EventName::Custom`]
    pub fn parse(s: &str) -> Self {
        match s {
            "register" => Self::Register,
            "activate" => Self::Activate,
            "subscribe" => Self::Subscribe,
            "run" => Self::Run,
            "update" => Self::Update,
            "delete" => Self::Delete,
            "added" => Self::Added,
            "registered" => Self::Registered,
            "pending_activation" => Self::PendingActivation,
            "activated" => Self::Activated,
            "failed" => Self::Failed,
            "invalid" => Self::Invalid,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Whether this name belongs to the reserved action set
    /// (`run`, `register`, `update`, `delete`, `activate`)
    pub fn is_reserved_action(&self) -> bool {
        matches!(
            self,
            Self::Run | Self::Register | Self::Update | Self::Delete | Self::Activate
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for name in ["register", "activate", "subscribe", "run", "update", "delete"] {
            assert_eq!(EventName::parse(name).as_str(), name);
        }
        assert_eq!(EventName::parse("activated"), EventName::Activated);
        assert_eq!(EventName::parse("pending_activation"), EventName::PendingActivation);
    }

    #[test]
    fn test_unknown_names_are_custom() {
        let event = EventName::parse("GitChanged");
        assert_eq!(event, EventName::Custom("GitChanged".to_string()));
        assert_eq!(event.as_str(), "GitChanged");
    }

    #[test]
    fn test_reserved_action_set() {
        assert!(EventName::Register.is_reserved_action());
        assert!(EventName::Run.is_reserved_action());
        assert!(!EventName::Subscribe.is_reserved_action());
        assert!(!EventName::Activated.is_reserved_action());
        assert!(!EventName::Custom("received".into()).is_reserved_action());
    }
}
