//! Request construction for the APNs provider API. No I/O happens here.
//!
//! | Intent | Method | Path |
//! |---|---|---|
//! | start, device update/end | POST | `/3/device/{token}` |
//! | broadcast update/end | POST | `/4/broadcasts/apps/{bundle}` |
//! | create channel | POST | `/1/apps/{bundle}/channels` |
//! | read/delete channel | GET/DELETE | `/1/apps/{bundle}/channels` |
//! | list channels | GET | `/1/apps/{bundle}/all-channels` |

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION},
    Method,
};
use serde::Serialize;
use serde_json::Number;

use crate::{
    error::ApnsError,
    identity::{ProviderIdentity, PASCAL_PUSH_TYPE, PUSH_TYPE},
    models::{
        ActivityAttributes, Alert, ChannelManagementIntent, ContentState, EndActivity, Event,
        MessageStoragePolicy, NotificationIntent, Priority, Recipient, Schema, StartActivity,
        UpdateActivity,
    },
    token::AuthToken,
};

const APNS_PUSH_TYPE: HeaderName = HeaderName::from_static("apns-push-type");
const APNS_TOPIC: HeaderName = HeaderName::from_static("apns-topic");
const APNS_PRIORITY: HeaderName = HeaderName::from_static("apns-priority");
const APNS_EXPIRATION: HeaderName = HeaderName::from_static("apns-expiration");
pub const APNS_CHANNEL_ID: HeaderName = HeaderName::from_static("apns-channel-id");

/// Which APNs host serves the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Notification,
    ChannelManagement,
}

#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub service: Service,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// UTF-8 JSON.
    pub body: Option<String>,
}

impl RequestDescriptor {
    fn new(service: Service, method: Method, path: String) -> Self {
        Self {
            service,
            method,
            path,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Attach the provider token. Replaces any earlier one.
    pub fn authorize(mut self, token: &AuthToken) -> Result<Self, ApnsError> {
        let value = HeaderValue::from_str(&token.bearer())
            .map_err(|err| ApnsError::signing(format!("token is not a valid header: {err}")))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, ApnsError> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| ApnsError::validation(format!("{name} is not a valid header value")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, ApnsError> {
        let body = serde_json::to_string(body)
            .map_err(|err| ApnsError::validation(format!("payload not serializable: {err}")))?;
        self.body = Some(body);
        Ok(self)
    }
}

/// Either kind of request the builder knows about.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Notification(NotificationIntent),
    Channel(ChannelManagementIntent),
}

impl From<NotificationIntent> for Intent {
    fn from(intent: NotificationIntent) -> Self {
        Self::Notification(intent)
    }
}

impl From<ChannelManagementIntent> for Intent {
    fn from(intent: ChannelManagementIntent) -> Self {
        Self::Channel(intent)
    }
}

/// Build any request. `timestamp` stamps the `aps` payload of notifications.
pub fn build(
    intent: &Intent,
    identity: &ProviderIdentity,
    timestamp: i64,
) -> Result<RequestDescriptor, ApnsError> {
    match intent {
        Intent::Notification(intent) => {
            build_notification(intent, identity, timestamp, Priority::High)
        }
        Intent::Channel(intent) => build_channel_request(intent, identity),
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    aps: Aps<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Aps<'a> {
    timestamp: i64,
    event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    relevance_score: Option<&'a Number>,
    content_state: &'a ContentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a ActivityAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'a Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_push_channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_push_token: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dismissal_date: Option<i64>,
}

impl<'a> Aps<'a> {
    fn new(timestamp: i64, event: Event, content_state: &'a ContentState) -> Self {
        Self {
            timestamp,
            event,
            relevance_score: None,
            content_state,
            attributes_type: None,
            attributes: None,
            alert: None,
            input_push_channel: None,
            input_push_token: None,
            dismissal_date: None,
        }
    }
}

pub fn build_notification(
    intent: &NotificationIntent,
    identity: &ProviderIdentity,
    timestamp: i64,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    match intent {
        NotificationIntent::StartActivity(start) => {
            build_start(start, identity, timestamp, priority)
        }
        NotificationIntent::UpdateActivity(update) => {
            build_update(update, identity, timestamp, priority)
        }
        NotificationIntent::EndActivity(end) => build_end(end, identity, timestamp, priority),
    }
}

fn build_start(
    start: &StartActivity,
    identity: &ProviderIdentity,
    timestamp: i64,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    start.content_state.validate()?;
    start.attributes.validate()?;
    start.alert.validate()?;

    let mut aps = Aps::new(timestamp, Event::Start, &start.content_state);
    aps.attributes_type = Some(start.attributes_type.as_str());
    aps.attributes = Some(&start.attributes);
    aps.alert = Some(&start.alert);
    match start.channel_id.as_deref().filter(|id| !id.is_empty()) {
        Some(channel_id) => aps.input_push_channel = Some(channel_id),
        // Ask the device to report an update token for the new activity.
        None => aps.input_push_token = Some(1),
    }

    device_request(&start.push_to_start_token, identity, priority)?.with_json(&Payload { aps })
}

fn build_update(
    update: &UpdateActivity,
    identity: &ProviderIdentity,
    timestamp: i64,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    update.content_state.validate()?;
    if let Some(alert) = &update.alert {
        alert.validate()?;
    }

    let mut aps = Aps::new(timestamp, Event::Update, &update.content_state);
    aps.relevance_score = Some(&update.relevance_score);
    aps.alert = update.alert.as_ref();

    recipient_request(&update.recipient, identity, priority)?.with_json(&Payload { aps })
}

fn build_end(
    end: &EndActivity,
    identity: &ProviderIdentity,
    timestamp: i64,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    end.content_state.validate()?;
    if end.dismissal_date.is_some_and(|date| date < 0) {
        return Err(ApnsError::validation("dismissal-date must be unix seconds"));
    }

    let mut aps = Aps::new(timestamp, Event::End, &end.content_state);
    aps.dismissal_date = end.dismissal_date;

    recipient_request(&end.recipient, identity, priority)?.with_json(&Payload { aps })
}

fn recipient_request(
    recipient: &Recipient,
    identity: &ProviderIdentity,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    match recipient {
        Recipient::Device(token) => device_request(token, identity, priority),
        Recipient::Channel(channel_id) => broadcast_request(channel_id, identity, priority),
    }
}

fn device_request(
    device_token: &str,
    identity: &ProviderIdentity,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    require_path_segment("device token", device_token)?;

    RequestDescriptor::new(
        Service::Notification,
        Method::POST,
        format!("/3/device/{device_token}"),
    )
    .with_header(APNS_PUSH_TYPE, PUSH_TYPE)?
    .with_header(APNS_TOPIC, &identity.topic())?
    .with_header(APNS_PRIORITY, priority.as_str())?
    .with_header(APNS_EXPIRATION, "0")
}

fn broadcast_request(
    channel_id: &str,
    identity: &ProviderIdentity,
    priority: Priority,
) -> Result<RequestDescriptor, ApnsError> {
    require_non_empty("channel id", channel_id)?;

    RequestDescriptor::new(
        Service::Notification,
        Method::POST,
        format!("/4/broadcasts/apps/{}", identity.bundle_id),
    )
    .with_header(APNS_PUSH_TYPE, PUSH_TYPE)?
    .with_header(APNS_PRIORITY, priority.as_str())?
    .with_header(APNS_EXPIRATION, "0")?
    .with_header(APNS_CHANNEL_ID, channel_id)
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct CreateChannelBody {
    message_storage_policy: MessageStoragePolicy,
    push_type: &'static str,
}

pub fn build_channel_request(
    intent: &ChannelManagementIntent,
    identity: &ProviderIdentity,
) -> Result<RequestDescriptor, ApnsError> {
    let channels_path = format!("/1/apps/{}/channels", identity.bundle_id);

    match intent {
        ChannelManagementIntent::Create(policy) => {
            RequestDescriptor::new(Service::ChannelManagement, Method::POST, channels_path)
                .with_json(&CreateChannelBody {
                    message_storage_policy: *policy,
                    push_type: PASCAL_PUSH_TYPE,
                })
        }
        ChannelManagementIntent::Get(channel_id) => {
            require_non_empty("channel id", channel_id)?;
            RequestDescriptor::new(Service::ChannelManagement, Method::GET, channels_path)
                .with_header(APNS_CHANNEL_ID, channel_id)
        }
        ChannelManagementIntent::Delete(channel_id) => {
            require_non_empty("channel id", channel_id)?;
            RequestDescriptor::new(Service::ChannelManagement, Method::DELETE, channels_path)
                .with_header(APNS_CHANNEL_ID, channel_id)
        }
        ChannelManagementIntent::List => Ok(RequestDescriptor::new(
            Service::ChannelManagement,
            Method::GET,
            format!("/1/apps/{}/all-channels", identity.bundle_id),
        )),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ApnsError> {
    if value.trim().is_empty() {
        return Err(ApnsError::validation(format!("{field} required")));
    }
    Ok(())
}

fn require_path_segment(field: &str, value: &str) -> Result<(), ApnsError> {
    require_non_empty(field, value)?;
    if value.contains(['/', '?', '#']) {
        return Err(ApnsError::validation(format!("{field} is not a valid path segment")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Environment, SigningKey};
    use crate::models::User;
    use serde_json::{json, Map, Value};

    const T: i64 = 1_700_000_000;

    fn identity() -> ProviderIdentity {
        ProviderIdentity {
            team_id: "TEAM".to_string(),
            key_id: "KEY".to_string(),
            signing_key: SigningKey::from_pem(Vec::new()),
            bundle_id: "com.example.heroes".to_string(),
            environment: Environment::Development,
        }
    }

    fn state() -> ContentState {
        ContentState {
            current_hero_level: Some(3),
            last_updated_by: User {
                id: "B2EFF797-D144-422A-85AA-2ACE622ED9B4".to_string(),
                name: "Itsuki".to_string(),
                extra: Map::new(),
            },
            last_updated_at: Number::from(1_699_999_000),
            extra: Map::new(),
        }
    }

    fn attributes() -> ActivityAttributes {
        ActivityAttributes::parse(json!({
            "hero": {
                "id": "f8fb6d23-1d74-405b-886c-22372ba998ab",
                "name": "itsuki",
                "customIcon": "star",
                "createdBy": { "id": "B2EFF797-D144-422A-85AA-2ACE622ED9B4", "name": "Itsuki" },
                "createdAt": 1_699_999_000
            }
        }))
        .unwrap()
    }

    fn alert() -> Alert {
        Alert::new("Hero", "a new hero for you!", "default")
    }

    fn start(channel_id: Option<&str>) -> NotificationIntent {
        NotificationIntent::StartActivity(StartActivity {
            push_to_start_token: "starttoken".to_string(),
            channel_id: channel_id.map(str::to_string),
            content_state: state(),
            attributes_type: "HeroAttributes".to_string(),
            attributes: attributes(),
            alert: alert(),
        })
    }

    fn body(descriptor: &RequestDescriptor) -> Value {
        serde_json::from_str(descriptor.body.as_deref().unwrap()).unwrap()
    }

    fn state_json() -> Value {
        serde_json::to_value(state()).unwrap()
    }

    fn assert_device_headers(descriptor: &RequestDescriptor) {
        assert_eq!(descriptor.header("apns-push-type"), Some("liveactivity"));
        assert_eq!(
            descriptor.header("apns-topic"),
            Some("com.example.heroes.push-type.liveactivity")
        );
        assert_eq!(descriptor.header("apns-priority"), Some("10"));
        assert_eq!(descriptor.header("apns-expiration"), Some("0"));
        assert_eq!(descriptor.header("apns-channel-id"), None);
    }

    #[test]
    fn start_targets_push_to_start_token() {
        let descriptor = build(&start(None).into(), &identity(), T).unwrap();

        assert_eq!(descriptor.service, Service::Notification);
        assert_eq!(descriptor.method, Method::POST);
        assert_eq!(descriptor.path, "/3/device/starttoken");
        assert_device_headers(&descriptor);

        let body = body(&descriptor);
        assert_eq!(body["aps"]["timestamp"], T);
        assert_eq!(body["aps"]["event"], "start");
        assert_eq!(body["aps"]["attributes-type"], "HeroAttributes");
        assert_eq!(body["aps"]["attributes"]["hero"]["customIcon"], "star");
        assert_eq!(body["aps"]["alert"]["sound"], "default");
        assert_eq!(body["aps"]["content-state"], state_json());
    }

    #[test]
    fn start_without_channel_requests_a_push_token() {
        let descriptor = build(&start(None).into(), &identity(), T).unwrap();
        let aps = &body(&descriptor)["aps"];
        assert_eq!(aps["input-push-token"], 1);
        assert!(aps.get("input-push-channel").is_none());
    }

    #[test]
    fn start_with_channel_subscribes_to_it() {
        let descriptor = build(&start(Some("bg+ABC==")).into(), &identity(), T).unwrap();
        let aps = &body(&descriptor)["aps"];
        assert_eq!(aps["input-push-channel"], "bg+ABC==");
        assert!(aps.get("input-push-token").is_none());
        // Channel subscription rides in the payload, not the headers.
        assert_eq!(descriptor.path, "/3/device/starttoken");
    }

    #[test]
    fn start_with_empty_channel_falls_back_to_push_token() {
        let descriptor = build(&start(Some("")).into(), &identity(), T).unwrap();
        let aps = &body(&descriptor)["aps"];
        assert_eq!(aps["input-push-token"], 1);
        assert!(aps.get("input-push-channel").is_none());
    }

    #[test]
    fn broadcast_update_without_alert() {
        let intent = NotificationIntent::UpdateActivity(UpdateActivity {
            recipient: Recipient::from_flag("CHANNEL1", true),
            content_state: state(),
            alert: None,
            relevance_score: Number::from(1),
        });
        let descriptor = build(&intent.into(), &identity(), T).unwrap();

        assert_eq!(descriptor.method, Method::POST);
        assert_eq!(descriptor.path, "/4/broadcasts/apps/com.example.heroes");
        assert_eq!(descriptor.header("apns-channel-id"), Some("CHANNEL1"));
        assert_eq!(descriptor.header("apns-push-type"), Some("liveactivity"));
        assert_eq!(descriptor.header("apns-priority"), Some("10"));
        assert_eq!(descriptor.header("apns-expiration"), Some("0"));
        assert_eq!(descriptor.header("apns-topic"), None);

        assert_eq!(
            body(&descriptor),
            json!({
                "aps": {
                    "timestamp": T,
                    "event": "update",
                    "relevance-score": 1,
                    "content-state": state_json()
                }
            })
        );
    }

    #[test]
    fn broadcast_update_sends_numbers_as_given() {
        let content_state = ContentState::parse(json!({
            "currentHeroLevel": 10000,
            "lastUpdatedBy": { "id": "B2EFF797-D144-422A-85AA-2ACE622ED9B4", "name": "Itsuki" },
            "lastUpdatedAt": 1_700_000_000
        }))
        .unwrap();
        let intent = NotificationIntent::UpdateActivity(UpdateActivity {
            recipient: Recipient::from_flag("CHANNEL1", true),
            content_state,
            alert: None,
            relevance_score: Number::from(1),
        });
        let descriptor = build(&intent.into(), &identity(), 5).unwrap();

        let raw = descriptor.body.as_deref().unwrap();
        assert!(raw.contains(r#""relevance-score":1,"#));
        assert!(raw.contains(r#""lastUpdatedAt":1700000000"#));
        assert!(!raw.contains(".0"));
        assert_eq!(
            body(&descriptor),
            json!({
                "aps": {
                    "timestamp": 5,
                    "event": "update",
                    "relevance-score": 1,
                    "content-state": {
                        "currentHeroLevel": 10000,
                        "lastUpdatedBy": {
                            "id": "B2EFF797-D144-422A-85AA-2ACE622ED9B4",
                            "name": "Itsuki"
                        },
                        "lastUpdatedAt": 1_700_000_000
                    }
                }
            })
        );
    }

    #[test]
    fn fractional_relevance_score_stays_fractional() {
        let intent = NotificationIntent::UpdateActivity(UpdateActivity {
            recipient: Recipient::from_flag("activitytoken", false),
            content_state: state(),
            alert: None,
            relevance_score: Number::from_f64(0.5).unwrap(),
        });
        let descriptor = build(&intent.into(), &identity(), T).unwrap();
        assert_eq!(body(&descriptor)["aps"]["relevance-score"], 0.5);
    }

    #[test]
    fn device_update_with_alert() {
        let intent = NotificationIntent::UpdateActivity(UpdateActivity {
            recipient: Recipient::from_flag("activitytoken", false),
            content_state: state(),
            alert: Some(alert()),
            relevance_score: Number::from(50),
        });
        let descriptor = build(&intent.into(), &identity(), T).unwrap();

        assert_eq!(descriptor.path, "/3/device/activitytoken");
        assert_device_headers(&descriptor);
        let aps = &body(&descriptor)["aps"];
        assert_eq!(aps["relevance-score"], 50);
        assert_eq!(aps["alert"]["title"], "Hero");
    }

    #[test]
    fn end_with_dismissal_date() {
        let intent = NotificationIntent::EndActivity(EndActivity {
            recipient: Recipient::from_flag("activitytoken", false),
            content_state: state(),
            dismissal_date: Some(1000),
        });
        let descriptor = build(&intent.into(), &identity(), T).unwrap();

        assert_eq!(descriptor.path, "/3/device/activitytoken");
        assert_eq!(
            body(&descriptor),
            json!({
                "aps": {
                    "timestamp": T,
                    "event": "end",
                    "content-state": state_json(),
                    "dismissal-date": 1000
                }
            })
        );
    }

    #[test]
    fn end_without_dismissal_date_omits_key() {
        let intent = NotificationIntent::EndActivity(EndActivity {
            recipient: Recipient::from_flag("CHANNEL1", true),
            content_state: state(),
            dismissal_date: None,
        });
        let descriptor = build(&intent.into(), &identity(), T).unwrap();

        assert_eq!(descriptor.path, "/4/broadcasts/apps/com.example.heroes");
        let aps = &body(&descriptor)["aps"];
        assert!(aps.get("dismissal-date").is_none());
        assert!(aps.get("relevance-score").is_none());
        assert_eq!(aps["event"], "end");
    }

    #[test]
    fn low_priority_is_five() {
        let intent = NotificationIntent::EndActivity(EndActivity {
            recipient: Recipient::from_flag("activitytoken", false),
            content_state: state(),
            dismissal_date: None,
        });
        let descriptor = build_notification(&intent, &identity(), T, Priority::Low).unwrap();
        assert_eq!(descriptor.header("apns-priority"), Some("5"));
    }

    #[test]
    fn invalid_content_state_is_rejected() {
        let mut bad = state();
        bad.last_updated_by.id = "nope".to_string();
        let intent = NotificationIntent::UpdateActivity(UpdateActivity {
            recipient: Recipient::from_flag("activitytoken", false),
            content_state: bad,
            alert: None,
            relevance_score: Number::from(1),
        });
        let err = build(&intent.into(), &identity(), T).unwrap_err();
        assert!(matches!(err, ApnsError::Validation(_)));
    }

    #[test]
    fn empty_device_token_is_rejected() {
        let intent = NotificationIntent::EndActivity(EndActivity {
            recipient: Recipient::from_flag("", false),
            content_state: state(),
            dismissal_date: None,
        });
        assert!(build(&intent.into(), &identity(), T).is_err());
    }

    #[test]
    fn create_channel_body() {
        let intent = ChannelManagementIntent::Create(MessageStoragePolicy::NoMessageStored);
        let descriptor = build(&intent.into(), &identity(), T).unwrap();

        assert_eq!(descriptor.service, Service::ChannelManagement);
        assert_eq!(descriptor.method, Method::POST);
        assert_eq!(descriptor.path, "/1/apps/com.example.heroes/channels");
        assert_eq!(
            body(&descriptor),
            json!({ "message-storage-policy": 0, "push-type": "LiveActivity" })
        );
    }

    #[test]
    fn get_and_delete_channel_carry_channel_header() {
        for (intent, method) in [
            (ChannelManagementIntent::Get("bg+ABC==".to_string()), Method::GET),
            (ChannelManagementIntent::Delete("bg+ABC==".to_string()), Method::DELETE),
        ] {
            let descriptor = build(&intent.into(), &identity(), T).unwrap();
            assert_eq!(descriptor.method, method);
            assert_eq!(descriptor.path, "/1/apps/com.example.heroes/channels");
            assert_eq!(descriptor.header("apns-channel-id"), Some("bg+ABC=="));
            assert!(descriptor.body.is_none());
        }
    }

    #[test]
    fn list_channels_has_no_body_or_channel_header() {
        let descriptor = build(&ChannelManagementIntent::List.into(), &identity(), T).unwrap();
        assert_eq!(descriptor.method, Method::GET);
        assert_eq!(descriptor.path, "/1/apps/com.example.heroes/all-channels");
        assert!(descriptor.body.is_none());
        assert!(descriptor.headers.is_empty());
    }
}
