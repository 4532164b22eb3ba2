use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::errors::{AlarmError, Result};

/// Bus message type for raise, clear and clear-all updates
pub const RIC_ALARM_UPDATE: i32 = 13111;

/// Bus message type reserved for alarm queries (never sent by this client)
pub const RIC_ALARM_QUERY: i32 = 13112;

/// E2 connection to a RAN node lost
pub const E2_CONNECTION_PROBLEM: i32 = 72004;

/// Active alarm count exceeded the configured maximum
pub const ACTIVE_ALARM_EXCEED_MAX_THRESHOLD: i32 = 72007;

/// Alarm history size exceeded the configured maximum
pub const ALARM_HISTORY_EXCEED_MAX_THRESHOLD: i32 = 72008;

/// Perceived severity of an alarm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unspecified,
    Critical,
    Major,
    Minor,
    Warning,
    Cleared,
    Default,
}

impl Severity {
    /// Wire token of the severity
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unspecified => "UNSPECIFIED",
            Severity::Critical => "CRITICAL",
            Severity::Major => "MAJOR",
            Severity::Minor => "MINOR",
            Severity::Warning => "WARNING",
            Severity::Cleared => "CLEARED",
            Severity::Default => "DEFAULT",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the Alarm Manager should do with an alarm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmAction {
    Raise,
    Clear,
    ClearAll,
}

impl Display for AlarmAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmAction::Raise => write!(f, "RAISE"),
            AlarmAction::Clear => write!(f, "CLEAR"),
            AlarmAction::ClearAll => write!(f, "CLEARALL"),
        }
    }
}

/// A fault instance reported by a platform component
///
/// The pair (`specific_problem`, `identifying_info`) together with the
/// managed object and application identities discriminates one alarm
/// from another at the Alarm Manager.
///
/// # Example
///
/// ```rust
/// use ric_alarm::{Alarm, Severity};
///
/// let alarm = Alarm {
///     managed_object_id: "my-pod".to_string(),
///     application_id: "my-app".to_string(),
///     specific_problem: 1234,
///     perceived_severity: Severity::Major,
///     identifying_info: "eth 0 1".to_string(),
///     additional_info: "link flapping".to_string(),
/// };
/// assert_eq!(alarm.perceived_severity.as_str(), "MAJOR");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    /// Deployment unit raising the alarm
    pub managed_object_id: String,

    /// Application within the deployment unit
    pub application_id: String,

    /// Catalog id of the fault
    pub specific_problem: i32,

    pub perceived_severity: Severity,

    /// Human readable discriminator, e.g. an interface name
    pub identifying_info: String,

    /// Free-form context, not length limited
    pub additional_info: String,
}

/// Wire unit exchanged with the Alarm Manager
///
/// The alarm fields are flattened into the message object next to
/// `AlarmAction` and `AlarmTime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmMessage {
    #[serde(flatten)]
    pub alarm: Alarm,

    #[serde(rename = "AlarmAction")]
    pub action: AlarmAction,

    /// Wall-clock nanoseconds since the Unix epoch
    #[serde(rename = "AlarmTime")]
    pub alarm_time: i64,
}

impl AlarmMessage {
    /// Wrap an alarm, stamping the current time
    pub fn new(alarm: Alarm, action: AlarmAction) -> Self {
        Self {
            alarm,
            action,
            alarm_time: now_nanos(),
        }
    }

    /// Encode to the canonical JSON payload
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(AlarmError::Serialize)
    }

    /// Decode a payload received from the bus
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(AlarmError::Decode)
    }
}

impl Display for AlarmMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MOId={} AppId={} SP={} severity={} IA={}",
            self.alarm.managed_object_id,
            self.alarm.application_id,
            self.alarm.specific_problem,
            self.alarm.perceived_severity,
            self.alarm.identifying_info
        )
    }
}

/// Catalog entry describing an alarm id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDefinition {
    pub alarm_id: i32,
    pub alarm_text: String,
    pub event_type: String,
    pub operation_instructions: String,
    /// Seconds the condition must persist before raising
    pub raise_delay: i32,
    /// Seconds the condition must be gone before clearing
    pub clear_delay: i32,
    /// Seconds an active alarm lives before it is cleared automatically
    pub time_to_live: i32,
}

/// Alarm Manager capacity settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmConfigParams {
    #[serde(rename = "maxactivealarms")]
    pub max_active_alarms: i32,
    #[serde(rename = "maxalarmhistory")]
    pub max_alarm_history: i32,
}

fn now_nanos() -> i64 {
    // Out of range only after the year 2262
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
