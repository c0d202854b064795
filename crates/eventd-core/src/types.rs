use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EventdError, Result};

/// Identity of a scheduled event: `(schema, name)`, unique in the catalog.
///
/// Immutable except through an explicit rename, which replaces the whole key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub schema: String,
    pub name: String,
}

impl EventKey {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Owning principal of an event. Opaque to the scheduler; it is recorded
/// and handed to the routine executor, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definer {
    pub user: String,
    pub host: String,
}

impl std::fmt::Display for Definer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Opaque handle to the routine text. The scheduler never inspects it,
/// only passes it to the routine executor for validation and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineBody(String);

impl RoutineBody {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Two-state event status. An event is either eligible for scheduling or not;
/// there are no further substates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Enabled,
    Disabled,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Enabled => "enabled",
            EventStatus::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(EventStatus::Enabled),
            "disabled" => Ok(EventStatus::Disabled),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// What happens to an event once it has no more future executions:
/// delete it from the catalog, or keep it around disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCompletion {
    Preserve,
    Drop,
}

impl std::fmt::Display for OnCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OnCompletion::Preserve => "preserve",
            OnCompletion::Drop => "drop",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OnCompletion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "preserve" => Ok(OnCompletion::Preserve),
            "drop" => Ok(OnCompletion::Drop),
            other => Err(format!("unknown on-completion policy: {other}")),
        }
    }
}

/// Unit for a recurring interval. `Microsecond` exists so the DDL layer can
/// name it in an error, but schedules using it are rejected at validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Microsecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl IntervalUnit {
    /// Units finer than one second are below the scheduler's resolution.
    pub fn is_supported(&self) -> bool {
        !matches!(self, IntervalUnit::Microsecond)
    }
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntervalUnit::Microsecond => "microsecond",
            IntervalUnit::Second => "second",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Quarter => "quarter",
            IntervalUnit::Year => "year",
        };
        write!(f, "{s}")
    }
}

/// When an event fires. Exactly one of the two forms; the enum makes the
/// one-shot/recurring exclusivity a type-level invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSchedule {
    /// Fire once at an absolute UTC instant.
    OneShot { execute_at: DateTime<Utc> },

    /// Fire repeatedly every `interval_value` `interval_unit`s, optionally
    /// bounded by absolute `starts`/`ends` timestamps.
    Recurring {
        interval_value: u32,
        interval_unit: IntervalUnit,
        starts: Option<DateTime<Utc>>,
        ends: Option<DateTime<Utc>>,
    },
}

impl EventSchedule {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, EventSchedule::OneShot { .. })
    }

    /// Reject schedules the engine cannot honour. Called at create/alter
    /// time so bad definitions never reach the catalog.
    pub fn validate(&self) -> Result<()> {
        match self {
            EventSchedule::OneShot { .. } => Ok(()),
            EventSchedule::Recurring {
                interval_value,
                interval_unit,
                starts,
                ends,
            } => {
                if !interval_unit.is_supported() {
                    return Err(EventdError::UnsupportedGranularity {
                        unit: *interval_unit,
                    });
                }
                if *interval_value == 0 {
                    return Err(EventdError::InvalidSchedule(
                        "interval value must be at least 1".to_string(),
                    ));
                }
                if let (Some(s), Some(e)) = (starts, ends) {
                    if e < s {
                        return Err(EventdError::InvalidSchedule(format!(
                            "ends ({e}) precedes starts ({s})"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Persisted event row, mirroring the `events` catalog table column for
/// column. The scheduler's in-memory entity is built from (and written back
/// as) one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub key: EventKey,
    pub definer: Definer,
    pub body: RoutineBody,
    pub schedule: EventSchedule,
    pub status: EventStatus,
    pub on_completion: OnCompletion,
    /// Start instant of the most recent firing, if any.
    pub last_executed: Option<DateTime<Utc>>,
    /// Next planned firing; `None` means the schedule is exhausted.
    pub next_execution: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}
