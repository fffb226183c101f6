//! Status codes for coordinator and participant events.
//!
//! Codes are persisted as plain integers, so the numeric mapping is part of the
//! schema and must not change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown {kind} status code {code}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub code: i32,
}

/// Lifecycle of a purchase in the coordinator's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Init,
    Tried,
    Canceled,
    Confirmed,
}

impl EventStatus {
    pub fn code(self) -> i32 {
        match self {
            EventStatus::Init => 0,
            EventStatus::Tried => 1,
            EventStatus::Canceled => 2,
            EventStatus::Confirmed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Canceled | EventStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: EventStatus) -> bool {
        Self::predecessors(next).contains(&self)
    }

    /// Statuses from which `next` may legally be entered.
    pub fn predecessors(next: EventStatus) -> &'static [EventStatus] {
        match next {
            EventStatus::Init => &[],
            EventStatus::Tried => &[EventStatus::Init],
            EventStatus::Canceled => &[EventStatus::Init, EventStatus::Tried],
            EventStatus::Confirmed => &[EventStatus::Tried],
        }
    }

    pub fn predecessor_codes(next: EventStatus) -> Vec<i32> {
        Self::predecessors(next).iter().map(|s| s.code()).collect()
    }
}

impl TryFrom<i32> for EventStatus {
    type Error = UnknownStatus;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(EventStatus::Init),
            1 => Ok(EventStatus::Tried),
            2 => Ok(EventStatus::Canceled),
            3 => Ok(EventStatus::Confirmed),
            _ => Err(UnknownStatus { kind: "event", code }),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventStatus::Init => "init",
            EventStatus::Tried => "tried",
            EventStatus::Canceled => "canceled",
            EventStatus::Confirmed => "confirmed",
        };
        f.write_str(name)
    }
}

/// Per-`biz_id` status kept by each participant.
///
/// There is no `Init`: a participant event either records a successful try or
/// a cancel that arrived before any try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Tried,
    Canceled,
    Confirmed,
}

impl ParticipantStatus {
    pub fn code(self) -> i32 {
        match self {
            ParticipantStatus::Tried => 0,
            ParticipantStatus::Canceled => 1,
            ParticipantStatus::Confirmed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ParticipantStatus::Tried)
    }

    pub fn can_transition_to(self, next: ParticipantStatus) -> bool {
        self == ParticipantStatus::Tried && next.is_terminal()
    }
}

impl TryFrom<i32> for ParticipantStatus {
    type Error = UnknownStatus;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ParticipantStatus::Tried),
            1 => Ok(ParticipantStatus::Canceled),
            2 => Ok(ParticipantStatus::Confirmed),
            _ => Err(UnknownStatus { kind: "participant", code }),
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParticipantStatus::Tried => "tried",
            ParticipantStatus::Canceled => "canceled",
            ParticipantStatus::Confirmed => "confirmed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_EVENT: [EventStatus; 4] = [
        EventStatus::Init,
        EventStatus::Tried,
        EventStatus::Canceled,
        EventStatus::Confirmed,
    ];

    #[test]
    fn event_codes_are_stable() {
        assert_eq!(EventStatus::Init.code(), 0);
        assert_eq!(EventStatus::Tried.code(), 1);
        assert_eq!(EventStatus::Canceled.code(), 2);
        assert_eq!(EventStatus::Confirmed.code(), 3);
        for status in ALL_EVENT {
            assert_eq!(EventStatus::try_from(status.code()), Ok(status));
        }
        assert_eq!(
            EventStatus::try_from(9),
            Err(UnknownStatus { kind: "event", code: 9 })
        );
    }

    #[test]
    fn participant_codes_are_stable() {
        assert_eq!(ParticipantStatus::Tried.code(), 0);
        assert_eq!(ParticipantStatus::Canceled.code(), 1);
        assert_eq!(ParticipantStatus::Confirmed.code(), 2);
        assert!(ParticipantStatus::try_from(3).is_err());
    }

    #[test]
    fn only_documented_event_edges_are_legal() {
        let legal = [
            (EventStatus::Init, EventStatus::Tried),
            (EventStatus::Init, EventStatus::Canceled),
            (EventStatus::Tried, EventStatus::Confirmed),
            (EventStatus::Tried, EventStatus::Canceled),
        ];
        for from in ALL_EVENT {
            for to in ALL_EVENT {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for to in ALL_EVENT {
            assert!(!EventStatus::Canceled.can_transition_to(to));
            assert!(!EventStatus::Confirmed.can_transition_to(to));
        }
        assert!(!ParticipantStatus::Canceled.can_transition_to(ParticipantStatus::Confirmed));
        assert!(!ParticipantStatus::Confirmed.can_transition_to(ParticipantStatus::Canceled));
        assert!(ParticipantStatus::Tried.can_transition_to(ParticipantStatus::Canceled));
    }
}
