use ctms_auth::SessionToken;

/// Caller metadata captured for every request (used for audit records).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl ClientContext {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// Bearer session token for a request.
///
/// Present on every protected route; validity is decided by the service call
/// that consumes it.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(SessionToken);

impl BearerToken {
    pub fn new(token: SessionToken) -> Self {
        Self(token)
    }

    pub fn token(&self) -> &SessionToken {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}
