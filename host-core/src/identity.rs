//! Random identifiers of a hosted session.

use uuid::Uuid;

/// Session id and host id, generated once and never changed.
/// Both travel with every message so several sessions can share one discovery channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    session_id: String,
    host_id: String,
}

impl SessionIdentity {
    pub fn generate() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            host_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}
