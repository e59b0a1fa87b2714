use chrono::{DateTime, Utc};

/// Stable identifier of one server instance.
///
/// NOTE: The container name is derived from this id; it is the only key the
/// orchestrator ever uses to address the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (game, rcon) host port assignment. Both halves are unique across the
/// active instance set; rcon = game + (max_port - min_port) / 2.
pub type PortPair = (u16, u16);

/// One provisioned server. Port and credential fields are fixed at creation;
/// runtime state is never stored here, it is re-derived from the container.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    pub fn port_pair(&self) -> PortPair {
        (self.port, self.rcon_port)
    }
}

/// Coarse operational phase of an instance, derived from container state and
/// its recent log tail. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    NotFound,
    Stopped,
    Booting,
    Initializing,
    Starting,
    Ready,
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::NotFound => "not_found",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Booting => "booting",
            ServerStatus::Initializing => "initializing",
            ServerStatus::Starting => "starting",
            ServerStatus::Ready => "ready",
            ServerStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_non_empty() {
        let id = InstanceId::new();
        assert!(!id.0.is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&ServerStatus::NotFound).unwrap();
        assert_eq!(s, "\"not_found\"");
    }
}
