pub mod cache;
pub mod client;
pub mod typed;

/// Default user agent for `xns-cache` - automatically uses the package version
///
/// All modules should use `client::new(Some(USER_AGENT))` for consistency.
/// User-agent can be overridden via `XNS_CACHE_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Environment variable overriding [`USER_AGENT`]
pub const USER_AGENT_ENV: &str = "XNS_CACHE_USER_AGENT";
