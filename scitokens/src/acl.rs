use std::fmt;

use serde::{Deserialize, Serialize};

/// An access control entry: an authorization verb over a resource path
///
/// Resources are normalized absolute paths. An entry grants its verb on the
/// resource itself and on every path beneath it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    authz: String,
    resource: String,
}

impl Acl {
    /// Constructs an access control entry
    pub fn new(authz: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            authz: authz.into(),
            resource: resource.into(),
        }
    }

    /// The authorization verb, such as `read` or `storage.create`
    pub fn authz(&self) -> &str {
        &self.authz
    }

    /// The resource path
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Whether this entry permits `authz` on the normalized path `resource`
    pub fn permits(&self, authz: &str, resource: &str) -> bool {
        self.authz == authz && is_within(&self.resource, resource)
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authz, self.resource)
    }
}

fn is_within(granted: &str, requested: &str) -> bool {
    if granted == "/" {
        return requested.starts_with('/');
    }

    match requested.strip_prefix(granted) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
