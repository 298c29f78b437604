//! Incident state machine.
//!
//! The only legal path is `New -> Acknowledged -> InProgress -> Resolved ->
//! Closed`, plus reopening a resolved or closed incident back to `New`.
//! Escalations and comments never change the status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::events::IncidentEventKind;
use crate::models::{IncidentStatus, TimelineKind};

/// Operator requested change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentAction {
    Acknowledge,
    Assign,
    Escalate,
    Resolve,
    Close,
    Reopen,
    Comment,
}

impl IncidentAction {
    /// Status after applying this action to an incident in `current`, or
    /// `None` when the action is not allowed there
    pub fn next_status(self, current: IncidentStatus) -> Option<IncidentStatus> {
        use IncidentStatus::*;

        match (self, current) {
            (IncidentAction::Acknowledge, New) => Some(Acknowledged),
            (IncidentAction::Assign, Acknowledged | InProgress) => Some(InProgress),
            (IncidentAction::Resolve, InProgress) => Some(Resolved),
            (IncidentAction::Close, Resolved) => Some(Closed),
            (IncidentAction::Reopen, Resolved | Closed) => Some(New),
            (IncidentAction::Escalate | IncidentAction::Comment, status) if status.is_open() => Some(status),
            _ => None,
        }
    }

    pub fn timeline_kind(self) -> TimelineKind {
        match self {
            IncidentAction::Acknowledge => TimelineKind::Acknowledged,
            IncidentAction::Assign => TimelineKind::Assigned,
            IncidentAction::Escalate => TimelineKind::Escalated,
            IncidentAction::Resolve => TimelineKind::Resolved,
            IncidentAction::Close => TimelineKind::Closed,
            IncidentAction::Reopen => TimelineKind::Reopened,
            IncidentAction::Comment => TimelineKind::Comment,
        }
    }

    pub fn event_kind(self) -> IncidentEventKind {
        match self {
            IncidentAction::Acknowledge => IncidentEventKind::Acknowledged,
            IncidentAction::Assign => IncidentEventKind::Assigned,
            IncidentAction::Escalate => IncidentEventKind::Escalated,
            IncidentAction::Resolve => IncidentEventKind::Resolved,
            IncidentAction::Close => IncidentEventKind::Closed,
            IncidentAction::Reopen => IncidentEventKind::Reopened,
            IncidentAction::Comment => IncidentEventKind::Commented,
        }
    }
}

impl fmt::Display for IncidentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IncidentAction::Acknowledge => "acknowledge",
            IncidentAction::Assign => "assign",
            IncidentAction::Escalate => "escalate",
            IncidentAction::Resolve => "resolve",
            IncidentAction::Close => "close",
            IncidentAction::Reopen => "reopen",
            IncidentAction::Comment => "comment",
        };
        f.write_str(name)
    }
}

impl FromStr for IncidentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "acknowledge" | "ack" => Ok(IncidentAction::Acknowledge),
            "assign" => Ok(IncidentAction::Assign),
            "escalate" => Ok(IncidentAction::Escalate),
            "resolve" => Ok(IncidentAction::Resolve),
            "close" => Ok(IncidentAction::Close),
            "reopen" => Ok(IncidentAction::Reopen),
            "comment" => Ok(IncidentAction::Comment),
            other => Err(format!("Unknown incident action: {}", other)),
        }
    }
}

/// What happens to an open incident when its resource recovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoResolvePolicy {
    /// Recovery is only noted; operators resolve manually
    Never,
    /// Resolve unless an operator acknowledged or took the incident
    #[default]
    UnlessAcknowledged,
    /// Resolve regardless of ownership
    Always,
}

impl AutoResolvePolicy {
    pub fn allows(self, status: IncidentStatus) -> bool {
        match self {
            AutoResolvePolicy::Never => false,
            AutoResolvePolicy::UnlessAcknowledged => !status.is_owned(),
            AutoResolvePolicy::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IncidentStatus::*;

    #[test]
    fn test_happy_path_is_legal() {
        assert_eq!(IncidentAction::Acknowledge.next_status(New), Some(Acknowledged));
        assert_eq!(IncidentAction::Assign.next_status(Acknowledged), Some(InProgress));
        assert_eq!(IncidentAction::Resolve.next_status(InProgress), Some(Resolved));
        assert_eq!(IncidentAction::Close.next_status(Resolved), Some(Closed));
        assert_eq!(IncidentAction::Reopen.next_status(Closed), Some(New));
    }

    #[test]
    fn test_skipping_steps_is_rejected() {
        assert_eq!(IncidentAction::Resolve.next_status(New), None);
        assert_eq!(IncidentAction::Close.next_status(InProgress), None);
        assert_eq!(IncidentAction::Acknowledge.next_status(Resolved), None);
        assert_eq!(IncidentAction::Reopen.next_status(New), None);
        assert_eq!(IncidentAction::Escalate.next_status(Closed), None);
    }

    #[test]
    fn test_escalate_keeps_status() {
        assert_eq!(IncidentAction::Escalate.next_status(Acknowledged), Some(Acknowledged));
        assert_eq!(IncidentAction::Comment.next_status(New), Some(New));
    }

    #[test]
    fn test_auto_resolve_policy() {
        assert!(AutoResolvePolicy::UnlessAcknowledged.allows(New));
        assert!(!AutoResolvePolicy::UnlessAcknowledged.allows(InProgress));
        assert!(AutoResolvePolicy::Always.allows(Acknowledged));
        assert!(!AutoResolvePolicy::Never.allows(New));
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("ack".parse::<IncidentAction>(), Ok(IncidentAction::Acknowledge));
        assert_eq!("Resolve".parse::<IncidentAction>(), Ok(IncidentAction::Resolve));
        assert!("delete".parse::<IncidentAction>().is_err());
    }
}
