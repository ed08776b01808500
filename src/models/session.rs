use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Broadcast lifecycle. Ordering follows the only allowed direction of travel,
/// so `a < b` reads as "a precedes b".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Waiting,
    Building,
    Live,
    Ended,
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Waiting
    }
}

impl LifecycleState {
    /// Maps the status strings reported by the rooms service.
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "scheduled" | "waiting" => Some(LifecycleState::Waiting),
            "building" => Some(LifecycleState::Building),
            "live" => Some(LifecycleState::Live),
            "completed" | "ended" => Some(LifecycleState::Ended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Waiting => "waiting",
            LifecycleState::Building => "building",
            LifecycleState::Live => "live",
            LifecycleState::Ended => "ended",
        }
    }

    pub fn precedes(self, target: LifecycleState) -> bool {
        self < target
    }
}

/// Room record as returned by `GET /rooms/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomRecord {
    pub id: Uuid,
    pub status: String,
    pub rakats: u32,
    #[serde(default)]
    pub participant_count: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub ramadan_night: Option<u32>,
    #[serde(default)]
    pub juz_number: Option<u32>,
    #[serde(default)]
    pub juz_half: Option<u8>,
    #[serde(default)]
    pub reciter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub state: LifecycleState,
    pub unit_count: u32,
    pub participant_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub is_private: bool,
    pub creator_id: Option<String>,
    pub ramadan_night: Option<u32>,
    pub juz_number: Option<u32>,
    pub juz_half: Option<u8>,
    pub reciter: Option<String>,
    /// Resolved locally once the session is live, never taken from an event.
    pub stream_url: Option<Url>,
}

impl From<RoomRecord> for Session {
    fn from(record: RoomRecord) -> Self {
        let state = LifecycleState::from_wire(&record.status).unwrap_or_else(|| {
            log::warn!(
                "room {} reported unknown status {:?}; treating as waiting",
                record.id,
                record.status
            );
            LifecycleState::Waiting
        });

        Self {
            id: record.id,
            state,
            unit_count: record.rakats,
            participant_count: record.participant_count,
            started_at: record.started_at,
            is_private: record.is_private,
            creator_id: record.creator_id,
            ramadan_night: record.ramadan_night,
            juz_number: record.juz_number,
            juz_half: record.juz_half,
            reciter: record.reciter,
            stream_url: None,
        }
    }
}

impl Session {
    pub fn is_creator(&self, user_id: Option<&str>) -> bool {
        match (self.creator_id.as_deref(), user_id) {
            (Some(creator), Some(user)) => creator == user,
            _ => false,
        }
    }

    pub fn juz_label(&self) -> Option<String> {
        let juz = self.juz_number?;
        Some(match self.juz_half {
            Some(1) => format!("Juz {juz} (1st half)"),
            Some(2) => format!("Juz {juz} (2nd half)"),
            _ => format!("Juz {juz}"),
        })
    }

    /// A live session whose broadcast began before `now`.
    pub fn is_late_join(&self, now: DateTime<Utc>) -> bool {
        self.state == LifecycleState::Live && self.started_at.map_or(false, |at| at < now)
    }
}
