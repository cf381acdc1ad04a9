//! Client identity keys for partitioning rate limit state.

use std::fmt;
use std::net::IpAddr;

/// The key used to partition per-client window state.
///
/// An authenticated identity always wins over the source address, so a user
/// cannot evade limits by rotating IPs while logged in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// An authenticated principal, keyed by its stable identifier.
    User(String),
    /// An unauthenticated caller, keyed by source address.
    Ip(IpAddr),
}

impl ClientKey {
    /// Derive a key from the identity sources available on a request.
    ///
    /// Returns `None` only when neither an authenticated principal nor a
    /// client address could be determined.
    pub fn from_identity(user: Option<&str>, ip: Option<IpAddr>) -> Option<Self> {
        match (user, ip) {
            (Some(user), _) => Some(ClientKey::User(user.to_string())),
            (None, Some(ip)) => Some(ClientKey::Ip(ip)),
            (None, None) => None,
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{}", id),
            ClientKey::Ip(addr) => write!(f, "ip:{}", addr),
        }
    }
}
