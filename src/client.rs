use std::sync::Arc;

use serde_json::Number;
use tracing::info;

use crate::{
    config::Config,
    error::ApnsError,
    identity::{Endpoints, ProviderIdentity},
    models::{
        ActivityAttributes, Alert, ChannelManagementIntent, ContentState, EndActivity,
        MessageStoragePolicy, NotificationIntent, Recipient, StartActivity, UpdateActivity,
        ATTRIBUTES_TYPE,
    },
    request::{build, Intent, Service},
    response::{
        normalize_create_channel, normalize_get_channel, normalize_list_channels,
        CreateChannelResponse, GetChannelResponse, ListChannelsResponse, ServerResponse,
    },
    token::{issue_token, unix_timestamp},
    transport::{dispatch, Connector, Http2Connector},
};

pub const DEFAULT_RELEVANCE_SCORE: u64 = 1;

/// Live Activity pushes and broadcast channel management.
///
/// Every call is one independent round trip: a new token, a new connection,
/// one request. Nothing is shared between calls except the identity.
#[derive(Debug, Clone)]
pub struct LiveActivityClient<C = Http2Connector> {
    identity: Arc<ProviderIdentity>,
    endpoints: Endpoints,
    attributes_type: String,
    connector: C,
}

impl LiveActivityClient<Http2Connector> {
    pub fn new(identity: ProviderIdentity, endpoints: Endpoints) -> Self {
        Self::with_connector(identity, endpoints, Http2Connector)
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ApnsError> {
        Ok(Self::new(cfg.identity()?, cfg.endpoints())
            .with_attributes_type(cfg.attributes_type.clone()))
    }
}

impl<C: Connector> LiveActivityClient<C> {
    pub fn with_connector(identity: ProviderIdentity, endpoints: Endpoints, connector: C) -> Self {
        Self {
            identity: Arc::new(identity),
            endpoints,
            attributes_type: ATTRIBUTES_TYPE.to_string(),
            connector,
        }
    }

    /// Name of the app's `ActivityAttributes` type sent with start events.
    pub fn with_attributes_type(mut self, attributes_type: impl Into<String>) -> Self {
        self.attributes_type = attributes_type.into();
        self
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn send(&self, intent: Intent) -> Result<ServerResponse, ApnsError> {
        let timestamp = unix_timestamp();
        let descriptor = build(&intent, &self.identity, timestamp)?;
        let token = issue_token(&self.identity, timestamp)?;
        let descriptor = descriptor.authorize(&token)?;

        let endpoint = match descriptor.service {
            Service::Notification => &self.endpoints.notification,
            Service::ChannelManagement => &self.endpoints.channel_management,
        };
        dispatch(&self.connector, &descriptor, endpoint).await
    }

    pub async fn create_channel(
        &self,
        policy: MessageStoragePolicy,
    ) -> Result<CreateChannelResponse, ApnsError> {
        let response = self
            .send(ChannelManagementIntent::Create(policy).into())
            .await?;
        let response = normalize_create_channel(response);
        info!(
            status = response.status,
            channel_id = ?response.channel_id,
            "create channel"
        );
        Ok(response)
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<GetChannelResponse, ApnsError> {
        let response = self
            .send(ChannelManagementIntent::Get(channel_id.to_string()).into())
            .await?;
        Ok(normalize_get_channel(response))
    }

    /// 204 on success; an unknown channel comes back as 404 with a reason.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<ServerResponse, ApnsError> {
        self.send(ChannelManagementIntent::Delete(channel_id.to_string()).into())
            .await
    }

    pub async fn list_channels(&self) -> Result<ListChannelsResponse, ApnsError> {
        let response = self.send(ChannelManagementIntent::List.into()).await?;
        Ok(normalize_list_channels(response))
    }

    /// Start a Live Activity remotely with a push-to-start token.
    ///
    /// With `channel_id` the new activity subscribes to that broadcast
    /// channel; without it the device reports a per-activity push token.
    pub async fn start_new_activity(
        &self,
        push_to_start_token: &str,
        channel_id: Option<&str>,
        content_state: ContentState,
        attributes: ActivityAttributes,
        alert: Alert,
    ) -> Result<ServerResponse, ApnsError> {
        info!(
            token_prefix = token_prefix(push_to_start_token),
            channel_id = ?channel_id,
            "start activity"
        );
        let intent = NotificationIntent::StartActivity(StartActivity {
            push_to_start_token: push_to_start_token.to_string(),
            channel_id: channel_id.map(str::to_string),
            content_state,
            attributes_type: self.attributes_type.clone(),
            attributes,
            alert,
        });
        self.send(intent.into()).await
    }

    /// `token` is a channel id when `is_broadcast`, otherwise the activity's
    /// push token. `relevance_score` defaults to 1.
    pub async fn update_activity(
        &self,
        token: &str,
        is_broadcast: bool,
        content_state: ContentState,
        alert: Option<Alert>,
        relevance_score: Option<Number>,
    ) -> Result<ServerResponse, ApnsError> {
        info!(
            token_prefix = token_prefix(token),
            is_broadcast, "update activity"
        );
        let intent = NotificationIntent::UpdateActivity(UpdateActivity {
            recipient: Recipient::from_flag(token, is_broadcast),
            content_state,
            alert,
            relevance_score: relevance_score.unwrap_or_else(|| DEFAULT_RELEVANCE_SCORE.into()),
        });
        self.send(intent.into()).await
    }

    /// `dismissal_date` is unix seconds; `None` keeps the system default.
    pub async fn end_activity(
        &self,
        token: &str,
        is_broadcast: bool,
        content_state: ContentState,
        dismissal_date: Option<i64>,
    ) -> Result<ServerResponse, ApnsError> {
        info!(
            token_prefix = token_prefix(token),
            is_broadcast, "end activity"
        );
        let intent = NotificationIntent::EndActivity(EndActivity {
            recipient: Recipient::from_flag(token, is_broadcast),
            content_state,
            dismissal_date,
        });
        self.send(intent.into()).await
    }
}

fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((index, _)) => &token[..index],
        None => token,
    }
}
