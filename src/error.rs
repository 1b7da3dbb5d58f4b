//! Error type shared by every part of the engine.

use thiserror::Error;


// Error //////////////////////////////////////////////////////////////////////////////////////////


/// Every failure the engine reports. All of them are fail-fast: callers must treat any error as
/// a denied request.
#[derive(Debug, Error)]
pub enum Error {
    /// No configured loader knows the resource.
    #[error("Missing resource: {0}")]
    ResourceNotFound(String),

    /// The permission is neither a permission nor an entry value of the resource.
    #[error("Missing permission {permission} on resource {resource}")]
    PermissionNotFound {
        resource:   String,
        permission: String,
    },

    /// The entry is unknown to the resource and to every ancestor listed in `visited`.
    #[error("Missing entry {entry} (searched: {})", .visited.join(", "))]
    EntryNotFound {
        entry:   String,
        visited: Vec<String>,
    },

    /// Structural violation while declaring a resource.
    #[error("Invalid permission {permission} on resource {resource}: {reason}")]
    InvalidPermission {
        resource:   String,
        permission: String,
        reason:     &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Logic(String),

    /// The external cache refused an operation. [`MemoryCache`](crate::MemoryCache) never fails;
    /// this is raised by other [`Cache`](crate::Cache) implementations.
    #[error("Cache failure: {0}")]
    Cache(String),

    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
} // enum Error

impl Error {

    pub(crate) fn invalid_permission(resource: &str, permission: &str, reason: &'static str) -> Self {
        Error::InvalidPermission{
            resource:   String::from(resource),
            permission: String::from(permission),
            reason,
        }
    } // invalid_permission

    pub(crate) fn permission_not_found(resource: &str, permission: &str) -> Self {
        Error::PermissionNotFound{
            resource:   String::from(resource),
            permission: String::from(permission),
        }
    } // permission_not_found

    /// Returns true for lookup misses a lenient processor may skip.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::EntryNotFound{..} | Error::PermissionNotFound{..})
    } // is_not_found

} // impl Error

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;


// Tests //////////////////////////////////////////////////////////////////////////////////////////


// mod tests
