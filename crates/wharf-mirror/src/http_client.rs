use std::time::Duration;

use ureq::Agent;

/// HTTP client settings for upstream feed requests.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "wharf-feed".into(),
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Builds an HTTP `Agent` configured from this `ClientConfig`.
    ///
    /// Responses are returned whole regardless of status code so callers
    /// can apply their own not-found vs. unavailable policy.
    pub fn build(&self) -> Agent {
        ureq::Agent::config_builder()
            .timeout_global(self.timeout)
            .user_agent(&self.user_agent)
            .http_status_as_error(false)
            .build()
            .into()
    }
}
