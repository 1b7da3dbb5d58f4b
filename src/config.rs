//! Engine settings.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity attribute holding cached decisions.
pub const DEFAULT_ATTRIBUTE: &str = "acl_decisions";

/// Key prefix of resources stored by [`CacheLoader`](crate::CacheLoader).
pub const DEFAULT_CACHE_PREFIX: &str = "acl_resource_";

/// Settings of an [`Acl`](crate::Acl). Missing fields take their defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Identity attribute the decision cache is stored under.
    pub attribute:    String,
    /// Keep loaded resources and required masks for the lifetime of the engine.
    pub memoize:      bool,
    /// Key prefix used by [`CacheLoader::with_config`](crate::CacheLoader::with_config).
    pub cache_prefix: String,
} // struct AclConfig

impl Default for AclConfig {

    fn default() -> Self {
        AclConfig{
            attribute:    String::from(DEFAULT_ATTRIBUTE),
            memoize:      true,
            cache_prefix: String::from(DEFAULT_CACHE_PREFIX),
        } // AclConfig
    } // default

} // impl Default for AclConfig

impl AclConfig {

    pub fn from_json(json: &str) -> Result<Self> {
        let config: AclConfig = serde_json::from_str(json)?;

        debug!("loaded {:?}", config);
        Ok(config)
    } // from_json

} // impl AclConfig


// Tests //////////////////////////////////////////////////////////////////////////////////////////


// mod tests
