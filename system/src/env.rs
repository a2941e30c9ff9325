use serde::{Deserialize, Serialize};

use crate::{Result, SystemError};

pub const ENV_NODE_NAME: &str = "NODENAME";
pub const ENV_NAMESPACE: &str = "NAMESPACE";
pub const ENV_STORAGE_IP_ANNOTATION_KEY: &str = "NODE_ANNOTATION_KEY_STORAGE_IPV4";
pub const ENV_ENABLE_AUTH: &str = "EnableAuth";
pub const ENV_AUTH_ACCESS_ID: &str = "AuthAccessId";
pub const ENV_AUTH_SECRET_KEY: &str = "AuthSecretKey";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub access_id: String,
    pub secret_key: String,
}

impl AuthConfig {
    /// Everything passes while auth is off.
    pub fn verify(&self, access_id: Option<&str>, secret_key: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        access_id == Some(self.access_id.as_str()) && secret_key == Some(self.secret_key.as_str())
    }
}

/// Process settings taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub node_name: String,
    pub namespace: String,
    /// Cluster-node annotation holding the storage IPv4 address, if configured.
    pub storage_ip_annotation_key: Option<String>,
    pub auth: AuthConfig,
}

impl Environment {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = match lookup(ENV_ENABLE_AUTH) {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                SystemError::Environment(format!("{} must be true or false, got {:?}", ENV_ENABLE_AUTH, raw))
            })?,
        };

        let auth = AuthConfig {
            enabled,
            access_id: lookup(ENV_AUTH_ACCESS_ID).unwrap_or_default(),
            secret_key: lookup(ENV_AUTH_SECRET_KEY).unwrap_or_default(),
        };
        if auth.enabled && (auth.access_id.is_empty() || auth.secret_key.is_empty()) {
            return Err(SystemError::Environment(format!(
                "{} requires {} and {}",
                ENV_ENABLE_AUTH, ENV_AUTH_ACCESS_ID, ENV_AUTH_SECRET_KEY
            )));
        }

        Ok(Self {
            node_name: lookup(ENV_NODE_NAME).unwrap_or_default(),
            namespace: lookup(ENV_NAMESPACE).unwrap_or_default(),
            storage_ip_annotation_key: lookup(ENV_STORAGE_IP_ANNOTATION_KEY).filter(|k| !k.is_empty()),
            auth,
        })
    }

    pub fn require_node_name(&self) -> Result<&str> {
        if self.node_name.is_empty() {
            return Err(SystemError::Environment(format!("{} is not set", ENV_NODE_NAME)));
        }
        Ok(&self.node_name)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" | "" => Some(false),
        _ => None,
    }
}
