use std::{collections::BTreeMap, ops::Deref};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{error::ApnsError, models::MessageStoragePolicy};

/// A response header; repeated headers keep every value in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValues {
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValues::Single(value) => Some(value),
            HeaderValues::Multiple(values) => values.first().map(String::as_str),
        }
    }

    pub(crate) fn push(&mut self, value: String) {
        match self {
            HeaderValues::Single(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValues::Multiple(vec![first, value]);
            }
            HeaderValues::Multiple(values) => values.push(value),
        }
    }
}

/// Whatever APNs answered. 4xx/5xx land here too, with a JSON `reason` in
/// `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub status: u16,
    pub data: String,
    pub headers: BTreeMap<String, HeaderValues>,
}

impl ServerResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(HeaderValues::first)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelResponse {
    #[serde(flatten)]
    pub response: ServerResponse,
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChannelResponse {
    #[serde(flatten)]
    pub response: ServerResponse,
    pub push_type: Option<String>,
    pub message_storage_policy: Option<MessageStoragePolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListChannelsResponse {
    #[serde(flatten)]
    pub response: ServerResponse,
    pub channels: Vec<String>,
}

macro_rules! deref_to_server_response {
    ($($ty:ty),+) => {
        $(impl Deref for $ty {
            type Target = ServerResponse;

            fn deref(&self) -> &ServerResponse {
                &self.response
            }
        })+
    };
}

deref_to_server_response!(CreateChannelResponse, GetChannelResponse, ListChannelsResponse);

#[derive(Debug, Default, Deserialize)]
struct ChannelList {
    #[serde(default)]
    channels: Vec<String>,
}

/// APNs returns the new id in the `apns-channel-id` response header.
pub fn normalize_create_channel(response: ServerResponse) -> CreateChannelResponse {
    let channel_id = response.header("apns-channel-id").map(str::to_string);
    CreateChannelResponse {
        response,
        channel_id,
    }
}

/// Each field is read on its own; one malformed field leaves the other intact.
pub fn normalize_get_channel(response: ServerResponse) -> GetChannelResponse {
    let info = decode_body::<Value>(&response, "channel info").unwrap_or_default();
    let push_type = info
        .get("push-type")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message_storage_policy = info
        .get("message-storage-policy")
        .and_then(|policy| serde_json::from_value(policy.clone()).ok());
    GetChannelResponse {
        response,
        push_type,
        message_storage_policy,
    }
}

pub fn normalize_list_channels(response: ServerResponse) -> ListChannelsResponse {
    let list = decode_body::<ChannelList>(&response, "channel list").unwrap_or_default();
    ListChannelsResponse {
        response,
        channels: list.channels,
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(
    response: &ServerResponse,
    what: &str,
) -> Result<T, ApnsError> {
    serde_json::from_str(&response.data)
        .map_err(ApnsError::from)
        .inspect_err(|err| {
            warn!(status = response.status, "could not decode {what}: {err}");
        })
}
