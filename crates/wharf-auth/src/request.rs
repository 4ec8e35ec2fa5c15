use std::net::IpAddr;

/// The authentication-relevant view of one inbound request, produced by
/// the HTTP layer before calling the chain.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    api_key: Option<String>,
    remote_addr: IpAddr,
    external_roles: Vec<String>,
}

impl FeedRequest {
    pub fn new(remote_addr: IpAddr) -> Self {
        Self {
            api_key: None,
            remote_addr,
            external_roles: Vec::new(),
        }
    }

    /// Attaches a presented API key; blank keys count as absent.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    /// Attaches role names asserted by the host's outer authentication.
    pub fn with_external_roles(mut self, roles: Vec<String>) -> Self {
        self.external_roles = roles;
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn external_roles(&self) -> &[String] {
        &self.external_roles
    }

    /// True when the request originates from the local host.
    pub fn is_local(&self) -> bool {
        self.remote_addr.is_loopback()
    }
}
