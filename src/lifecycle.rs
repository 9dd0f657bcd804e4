//! Trip status vocabulary and the transition table
//!
//! ```text
//! selecting_guide ──select guide──▶ awaiting_call ──end call──▶ awaiting_guide_confirmation
//!                                    ▲      │                        │             │
//!                                    └──────┘ initiate call     accept│       reject│
//!                                                                     ▼             ▼
//!                                                                 confirmed      rejected
//! ```
//!
//! `in_progress`, `completed`, `cancelled` and `archived` exist so that
//! records written by other flows can be represented, but no event in
//! this table leads into or out of them.
use super::error::TripError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum TripStatus {
    #[n(0)]
    SelectingGuide,
    #[n(1)]
    AwaitingCall,
    /// Persisted as `awaiting_guide_confirmation`; `pending_confirmation`
    /// is accepted as an alias when reading.
    #[n(2)]
    AwaitingGuideConfirmation,
    #[n(3)]
    Confirmed,
    #[n(4)]
    InProgress,
    #[n(5)]
    Completed,
    #[n(6)]
    Rejected,
    #[n(7)]
    Cancelled,
    #[n(8)]
    Archived,
}

/// Something an actor asks the trip to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripEvent {
    SelectGuide,
    InitiateCall,
    EndCall,
    AbandonCall,
    GuideAccept,
    GuideReject,
}

impl TripEvent {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SelectGuide => "select guide",
            Self::InitiateCall => "initiate call",
            Self::EndCall => "end call",
            Self::AbandonCall => "abandon call",
            Self::GuideAccept => "guide accept",
            Self::GuideReject => "guide reject",
        }
    }
}

impl TripStatus {
    pub const ALL: [TripStatus; 9] = [
        Self::SelectingGuide,
        Self::AwaitingCall,
        Self::AwaitingGuideConfirmation,
        Self::Confirmed,
        Self::InProgress,
        Self::Completed,
        Self::Rejected,
        Self::Cancelled,
        Self::Archived,
    ];

    /// Canonical name, the only form ever written.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SelectingGuide => "selecting_guide",
            Self::AwaitingCall => "awaiting_call",
            Self::AwaitingGuideConfirmation => "awaiting_guide_confirmation",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        }
    }

    pub fn parse_str(raw: &str) -> Option<Self> {
        match raw {
            "selecting_guide" => Some(Self::SelectingGuide),
            "awaiting_call" => Some(Self::AwaitingCall),
            "awaiting_guide_confirmation" | "pending_confirmation" => {
                Some(Self::AwaitingGuideConfirmation)
            }
            "confirmed" => Some(Self::Confirmed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Maps the pre-redesign status vocabulary. Current names pass through.
    pub fn from_legacy(raw: &str) -> Option<Self> {
        match raw {
            "pending" | "proposal" => Some(Self::AwaitingGuideConfirmation),
            other => Self::parse_str(other),
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Cancelled | Self::Archived
        )
    }

    /// Terminal states off the main path. They keep whatever guide and
    /// price the trip had when it left the main path.
    pub const fn is_side_branch(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Archived)
    }

    pub const fn requires_selected_guide(&self) -> bool {
        matches!(
            self,
            Self::AwaitingCall
                | Self::AwaitingGuideConfirmation
                | Self::Confirmed
                | Self::InProgress
                | Self::Completed
        )
    }

    pub const fn requires_final_price(&self) -> bool {
        matches!(self, Self::Confirmed | Self::InProgress | Self::Completed)
    }

    /// Resolves `event` against the transition table. Anything not in the
    /// table is a conflict; nothing is coerced.
    pub fn apply(self, event: TripEvent) -> Result<TripStatus, TripError> {
        let next = match (self, event) {
            (Self::SelectingGuide, TripEvent::SelectGuide) => Self::AwaitingCall,
            (Self::AwaitingCall, TripEvent::InitiateCall) => Self::AwaitingCall,
            (Self::AwaitingCall, TripEvent::AbandonCall) => Self::AwaitingCall,
            (Self::AwaitingCall, TripEvent::EndCall) => Self::AwaitingGuideConfirmation,
            (Self::AwaitingGuideConfirmation, TripEvent::GuideAccept) => Self::Confirmed,
            (Self::AwaitingGuideConfirmation, TripEvent::GuideReject) => Self::Rejected,
            (from, event) => {
                return Err(TripError::conflict(format!(
                    "cannot {} while trip is {}",
                    event.as_str(),
                    from.as_str()
                )));
            }
        };
        Ok(next)
    }
}
