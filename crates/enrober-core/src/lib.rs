//! enrober-core: environment and deployment reconciliation.
//!
//! [`Enrober`] is the context object every operation runs against. It owns
//! the resource store handle, the immutable configuration and the outbound
//! HTTP client, and is shared by every request handler. There is no other
//! process-wide state.

pub mod admin;
pub mod config;
pub mod deployments;
pub mod env_vars;
pub mod environments;
pub mod error;
pub mod hostnames;
pub mod kvm;
pub mod routing;
pub mod secrets;
pub mod template;

use std::sync::Arc;

use enrober_state::ResourceStore;

pub use config::EnroberConfig;
pub use deployments::{DeploymentPatch, NewDeployment};
pub use environments::{Environment, EnvironmentPatch, NewEnvironment};
pub use error::{CascadeStage, EnroberError, EnroberResult, ErrorClass};
pub use routing::RoutingInput;
pub use secrets::Regenerate;

use admin::AdminGate;
use kvm::KvmSynchronizer;
use template::TemplateResolver;

/// What the core needs to know about the inbound HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Value of the `Host` header.
    pub host: String,
    /// Value of the `Authorization` header, forwarded verbatim.
    pub authorization: Option<String>,
}

/// `{org}{sep}{env}`, the identity of an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentId {
    pub org: String,
    pub env: String,
    separator: char,
}

impl EnvironmentId {
    /// Split at the first separator. Both halves must be non-empty.
    pub fn parse(raw: &str, separator: char) -> EnroberResult<Self> {
        match raw.split_once(separator) {
            Some((org, env)) if !org.is_empty() && !env.is_empty() => Ok(Self {
                org: org.to_string(),
                env: env.to_string(),
                separator,
            }),
            _ => Err(EnroberError::InvalidEnvironmentName(raw.to_string())),
        }
    }

    /// The namespace the environment materializes as.
    pub fn namespace(&self) -> String {
        format!("{}{}{}", self.org, self.separator, self.env)
    }
}

pub struct Enrober {
    store: Arc<dyn ResourceStore>,
    config: EnroberConfig,
    http: reqwest::Client,
}

impl Enrober {
    pub fn new(store: Arc<dyn ResourceStore>, config: EnroberConfig) -> Self {
        Self::with_client(store, config, reqwest::Client::new())
    }

    pub fn with_client(
        store: Arc<dyn ResourceStore>,
        config: EnroberConfig,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            config,
            http,
        }
    }

    pub fn config(&self) -> &EnroberConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    pub fn environment_id(&self, raw: &str) -> EnroberResult<EnvironmentId> {
        EnvironmentId::parse(raw, self.config.profile.name_separator.as_char())
    }

    fn admin(&self) -> AdminGate<'_> {
        AdminGate::new(&self.http, &self.config.admin, self.config.profile.hardened)
    }

    fn templates(&self) -> TemplateResolver<'_> {
        TemplateResolver::new(
            &self.http,
            &self.config.pod_template,
            self.config.profile.hardened,
        )
    }

    fn kvm(&self) -> KvmSynchronizer<'_> {
        KvmSynchronizer::new(&self.http, &self.config.kvm)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_id_splits_at_first_separator() {
        let id = EnvironmentId::parse("acme-prod-eu", '-').unwrap();
        assert_eq!(id.org, "acme");
        assert_eq!(id.env, "prod-eu");
        assert_eq!(id.namespace(), "acme-prod-eu");

        let colon = EnvironmentId::parse("acme:prod", ':').unwrap();
        assert_eq!(colon.namespace(), "acme:prod");
    }

    #[test]
    fn environment_id_rejects_missing_halves() {
        for raw in ["acme", "-prod", "acme-", ""] {
            let err = EnvironmentId::parse(raw, '-').unwrap_err();
            assert!(matches!(err, EnroberError::InvalidEnvironmentName(_)), "{raw}");
        }
    }
}
