//! Agent identity shared across components

use std::sync::RwLock;

use sysinfo::System;
use uuid::Uuid;

use crate::config::AgentConfig;

/// Identity reported with every outbound message.
///
/// All fields are fixed for the process lifetime except the agent id,
/// which the server may reassign exactly once per connection through
/// `auth_success`.
#[derive(Debug)]
pub struct Identity {
    agent_id: RwLock<String>,
    /// Host name at startup
    pub hostname: String,
    /// OS family ("linux", "windows", "macos", ...)
    pub os: String,
    /// OS version string
    pub version: String,
    /// Customer label from configuration
    pub customer: String,
    /// Site label from configuration
    pub site: String,
}

impl Identity {
    /// Build the identity from configuration and the live host.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            agent_id: RwLock::new(Uuid::new_v4().to_string()),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            customer: config.customer.clone(),
            site: config.site.clone(),
        }
    }

    /// Current agent identifier.
    pub fn agent_id(&self) -> String {
        self.agent_id.read().expect("identity lock poisoned").clone()
    }

    /// Replace the agent identifier (server reassignment on auth success).
    pub fn set_agent_id(&self, agent_id: String) {
        *self.agent_id.write().expect("identity lock poisoned") = agent_id;
    }
}
