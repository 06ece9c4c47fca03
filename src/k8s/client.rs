// Client creation with custom user-agent support for kube 2.x
use super::USER_AGENT_ENV;
use crate::error::Result as XnsResult;
use hyper::http::{HeaderName, HeaderValue};
use kube::{Client, Config};
use tracing::warn;

/// Create a new k8s client from the inferred kube config.
///
/// The user agent is `XNS_CACHE_USER_AGENT` when set, otherwise
/// `custom_user_agent` when given.
///
/// # Errors
///
/// Will return `Err` if no kube config can be inferred or the client cannot be built
pub async fn new(custom_user_agent: Option<&str>) -> XnsResult<Client> {
    let mut config = Config::infer().await?;
    let from_env = std::env::var(USER_AGENT_ENV).ok();
    add_user_agent_header(&mut config, from_env.as_deref().or(custom_user_agent));
    Ok(Client::try_from(config)?)
}

/// Push a `user-agent` header onto `config`; invalid values are logged and skipped
pub fn add_user_agent_header(config: &mut Config, user_agent: Option<&str>) {
    let Some(user_agent) = user_agent else {
        return;
    };
    match HeaderValue::from_str(user_agent) {
        Ok(value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), value)),
        Err(e) => warn!("Ignoring invalid user agent {:?}: {}", user_agent, e),
    }
}
