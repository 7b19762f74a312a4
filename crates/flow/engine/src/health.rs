//! Per-node health.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What kind of failure made a node unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Argument expression failed to evaluate or bind.
    Evaluation,
    /// The component could not be built.
    Build,
    /// The component rejected an update.
    Update,
    /// The run loop exited with an error.
    Run,
    /// The node's configuration (declaration, import content) is unusable.
    Config,
}

/// Health of a node as seen by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health {
    #[default]
    Healthy,
    Unhealthy {
        kind: FailureKind,
        message: String,
        since: DateTime<Utc>,
    },
}

impl Health {
    pub fn unhealthy(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Unhealthy {
            kind,
            message: message.into(),
            since: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Healthy => None,
            Self::Unhealthy { kind, .. } => Some(*kind),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Healthy => None,
            Self::Unhealthy { message, .. } => Some(message),
        }
    }

    /// Combine controller health with what the component reports itself.
    ///
    /// Controller-observed failures win.
    pub fn merge(self, reported: Option<Health>) -> Health {
        match (self, reported) {
            (Self::Healthy, Some(reported)) => reported,
            (own, _) => own,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_controller_failure() {
        let own = Health::unhealthy(FailureKind::Update, "rejected");
        let reported = Health::unhealthy(FailureKind::Config, "bad content");
        assert_eq!(own.clone().merge(Some(reported.clone())).kind(), Some(FailureKind::Update));
        assert_eq!(Health::Healthy.merge(Some(reported)).kind(), Some(FailureKind::Config));
        assert!(Health::Healthy.merge(None).is_healthy());
    }

    #[test]
    fn test_serialize_shape() {
        let json = serde_json::to_value(Health::unhealthy(FailureKind::Run, "boom")).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["kind"], "run");
        assert_eq!(json["message"], "boom");
        assert_eq!(serde_json::to_value(Health::Healthy).unwrap()["status"], "healthy");
    }
}
