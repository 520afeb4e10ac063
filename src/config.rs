use std::env;

use crate::{
    error::ApnsError,
    identity::{Endpoints, Environment, ProviderIdentity, SigningKey},
    models::ATTRIBUTES_TYPE,
};

pub const PRIVATE_KEY_FILE_NAME: &str = "APN_PRIVATE_KEY.p8";

#[derive(Debug, Clone)]
pub struct Config {
    pub key_id: String,
    pub team_id: String,
    pub bundle_id: String,
    pub is_production: bool,
    pub private_key_path: String,
    pub attributes_type: String,
    pub apns_server: Option<String>,
    pub channel_server: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ApnsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApnsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_id = required(&lookup, "KEY_ID")?;
        let team_id = required(&lookup, "TEAM_ID")?;
        let bundle_id = required(&lookup, "BUNDLE_ID")?;
        let is_production = env_or(&lookup, "IS_PRODUCTION", "false") == "true";
        let private_key_path = env_or(&lookup, "PRIVATE_KEY_PATH", PRIVATE_KEY_FILE_NAME);
        let attributes_type = env_or(&lookup, "ATTRIBUTES_TYPE", ATTRIBUTES_TYPE);
        let apns_server = optional(&lookup, "APNS_SERVER");
        let channel_server = optional(&lookup, "APNS_CHANNEL_SERVER");

        if attributes_type.trim().is_empty() {
            return Err(ApnsError::Config("ATTRIBUTES_TYPE must not be empty".into()));
        }

        Ok(Self {
            key_id,
            team_id,
            bundle_id,
            is_production,
            private_key_path,
            attributes_type,
            apns_server,
            channel_server,
        })
    }

    pub fn environment(&self) -> Environment {
        Environment::from_production_flag(self.is_production)
    }

    /// Reads the private key from disk.
    pub fn identity(&self) -> Result<ProviderIdentity, ApnsError> {
        Ok(ProviderIdentity {
            team_id: self.team_id.clone(),
            key_id: self.key_id.clone(),
            signing_key: SigningKey::from_file(&self.private_key_path)?,
            bundle_id: self.bundle_id.clone(),
            environment: self.environment(),
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::for_environment(self.environment());
        Endpoints {
            notification: self.apns_server.clone().unwrap_or(defaults.notification),
            channel_management: self
                .channel_server
                .clone()
                .unwrap_or(defaults.channel_management),
        }
    }
}

fn env_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ApnsError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or_else(|| ApnsError::Config(format!("{key} is required")))
}
