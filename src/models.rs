use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::ApnsError;

/// Type name of the app's `ActivityAttributes`.
pub const ATTRIBUTES_TYPE: &str = "HeroAttributes";

/// Payload schema shared with the app.
///
/// Records are open: declared fields are type-checked, anything else is kept
/// in `extra` and sent back out unchanged.
pub trait Schema: DeserializeOwned {
    fn validate(&self) -> Result<(), ApnsError>;

    /// Decode an untyped JSON value and check it.
    fn parse(value: Value) -> Result<Self, ApnsError> {
        let parsed: Self = serde_json::from_value(value)
            .map_err(|err| ApnsError::validation(err.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }
}

// Dates are plain numbers: the app decodes `Date` with the default strategy.
// `Number` keeps integer and fractional forms as given.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hero {
    pub id: String,
    pub name: String,
    pub custom_icon: String,
    pub created_by: User,
    pub created_at: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mirrors `ActivityAttributes.ContentState` in the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hero_level: Option<u64>,
    pub last_updated_by: User,
    pub last_updated_at: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAttributes {
    pub hero: Hero,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Plain strings for now; localized title/body would use loc-key objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub sound: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Alert {
    pub fn new(title: impl Into<String>, body: impl Into<String>, sound: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            sound: sound.into(),
            extra: Map::new(),
        }
    }
}

impl Schema for User {
    fn validate(&self) -> Result<(), ApnsError> {
        require_uuid("id", &self.id)
    }
}

impl Schema for Hero {
    fn validate(&self) -> Result<(), ApnsError> {
        require_uuid("hero.id", &self.id)?;
        self.created_by.validate()?;
        require_non_negative("hero.createdAt", &self.created_at)
    }
}

impl Schema for ContentState {
    fn validate(&self) -> Result<(), ApnsError> {
        self.last_updated_by.validate()?;
        require_non_negative("lastUpdatedAt", &self.last_updated_at)
    }
}

impl Schema for ActivityAttributes {
    fn validate(&self) -> Result<(), ApnsError> {
        self.hero.validate()
    }
}

impl Schema for Alert {
    fn validate(&self) -> Result<(), ApnsError> {
        Ok(())
    }
}

fn require_uuid(field: &str, value: &str) -> Result<(), ApnsError> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ApnsError::validation(format!("{field} must be a uuid")))
}

fn require_non_negative(field: &str, value: &Number) -> Result<(), ApnsError> {
    if value.as_f64().is_some_and(|value| value >= 0.0) {
        Ok(())
    } else {
        Err(ApnsError::validation(format!(
            "{field} must be a non-negative number"
        )))
    }
}

/// Whether APNs keeps the latest broadcast for devices that were offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageStoragePolicy {
    NoMessageStored,
    MostRecentMessageStored,
}

impl From<MessageStoragePolicy> for u8 {
    fn from(policy: MessageStoragePolicy) -> Self {
        match policy {
            MessageStoragePolicy::NoMessageStored => 0,
            MessageStoragePolicy::MostRecentMessageStored => 1,
        }
    }
}

impl TryFrom<u8> for MessageStoragePolicy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoMessageStored),
            1 => Ok(Self::MostRecentMessageStored),
            other => Err(format!("unknown message storage policy {other}")),
        }
    }
}

impl std::str::FromStr for MessageStoragePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "0" | "no-message-stored" => Ok(Self::NoMessageStored),
            "1" | "most-recent-message-stored" => Ok(Self::MostRecentMessageStored),
            other => Err(format!("unknown message storage policy {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Start,
    Update,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Low,
    #[default]
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "10",
            Priority::Low => "5",
        }
    }
}

/// Where an update or end goes: one activity's push token, or a broadcast
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Device(String),
    Channel(String),
}

impl Recipient {
    pub fn from_flag(token: impl Into<String>, is_broadcast: bool) -> Self {
        if is_broadcast {
            Self::Channel(token.into())
        } else {
            Self::Device(token.into())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartActivity {
    pub push_to_start_token: String,
    /// Subscribe the new activity to this channel; `None` asks the device
    /// for a per-activity update token instead.
    pub channel_id: Option<String>,
    pub content_state: ContentState,
    pub attributes_type: String,
    pub attributes: ActivityAttributes,
    pub alert: Alert,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateActivity {
    pub recipient: Recipient,
    pub content_state: ContentState,
    pub alert: Option<Alert>,
    pub relevance_score: Number,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndActivity {
    pub recipient: Recipient,
    pub content_state: ContentState,
    /// Unix seconds. In the past dismisses immediately; `None` leaves the
    /// system default (up to four hours on the Lock Screen).
    pub dismissal_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationIntent {
    StartActivity(StartActivity),
    UpdateActivity(UpdateActivity),
    EndActivity(EndActivity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelManagementIntent {
    Create(MessageStoragePolicy),
    Get(String),
    Delete(String),
    List,
}
