//! Environment lifecycle: namespace, routing secret, hostnames, KVM mirror.

use enrober_state::{LabelSelector, Namespace, ObjectMeta, Secret};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EnroberError, EnroberResult};
use crate::hostnames::{self, HOST_NAMES_ANNOTATION};
use crate::secrets::{ROUTING_SECRET_NAME, Regenerate, RoutingKeys};
use crate::{Enrober, EnvironmentId, RequestContext};

pub const ORGANIZATION_LABEL: &str = "organization";
pub const ENVIRONMENT_LABEL: &str = "environment";
pub const NETWORK_POLICY_ANNOTATION: &str = "net.beta.kubernetes.io/network-policy";
const DEFAULT_DENY: &str = r#"{"ingress":{"isolation":"DefaultDeny"}}"#;

/// An environment as returned to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    pub host_names: Vec<String>,
    pub public_secret: String,
    pub private_secret: String,
    pub isolated: bool,
}

impl Environment {
    fn from_parts(namespace: &Namespace, secret: Option<&Secret>) -> Self {
        let keys = secret.map(RoutingKeys::from_secret);
        let annotations = &namespace.metadata.annotations;
        Self {
            name: namespace.metadata.name.clone(),
            host_names: annotations
                .get(HOST_NAMES_ANNOTATION)
                .map(|v| hostnames::split_host_names(v))
                .unwrap_or_default(),
            public_secret: keys.as_ref().map(|k| k.public_key.clone()).unwrap_or_default(),
            private_secret: keys.map(|k| k.private_key).unwrap_or_default(),
            isolated: annotations.contains_key(NETWORK_POLICY_ANNOTATION),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewEnvironment {
    /// `{org}{sep}{env}`.
    pub name: String,
    pub host_names: Vec<String>,
    /// Overrides the profile's isolation default.
    pub isolated: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentPatch {
    pub host_names: Option<Vec<String>>,
    pub regenerate: Regenerate,
}

fn is_environment(ns: &Namespace) -> bool {
    ns.metadata.labels.contains_key(ORGANIZATION_LABEL)
}

impl Enrober {
    pub async fn create_environment(
        &self,
        input: NewEnvironment,
        ctx: &RequestContext,
    ) -> EnroberResult<Environment> {
        let id = self.environment_id(&input.name)?;
        self.admin().check(&id.org, ctx.authorization.as_deref()).await?;
        hostnames::validate_host_names(self.store(), &input.host_names, None)?;

        let name = id.namespace();
        let isolated = input
            .isolated
            .unwrap_or(self.config.profile.isolate_namespaces);

        let mut metadata = ObjectMeta::named(&name);
        metadata
            .labels
            .insert(ORGANIZATION_LABEL.to_string(), id.org.clone());
        metadata
            .labels
            .insert(ENVIRONMENT_LABEL.to_string(), id.env.clone());
        metadata.annotations.insert(
            HOST_NAMES_ANNOTATION.to_string(),
            hostnames::join_host_names(&input.host_names),
        );
        if isolated {
            metadata
                .annotations
                .insert(NETWORK_POLICY_ANNOTATION.to_string(), DEFAULT_DENY.to_string());
        }
        let namespace = Namespace { metadata };
        self.store().create_namespace(&namespace)?;
        debug!(namespace = %name, "created namespace");

        let secret = match self.provision_secret(&name) {
            Ok(secret) => secret,
            Err(e) => {
                self.roll_back_namespace(&name);
                return Err(e);
            }
        };

        if self.config.kvm.enabled {
            let keys = RoutingKeys::from_secret(&secret);
            self.kvm()
                .sync(&id.org, &id.env, &keys.public_key, ctx.authorization.as_deref())
                .await?;
        }

        info!(environment = %name, hosts = input.host_names.len(), isolated, "created environment");
        Ok(Environment::from_parts(&namespace, Some(&secret)))
    }

    fn provision_secret(&self, namespace: &str) -> EnroberResult<Secret> {
        let secret = RoutingKeys::generate()?.to_secret(namespace);
        self.store().create_secret(&secret)?;
        Ok(secret)
    }

    /// Compensating delete after a failed secret. Failures are only logged.
    fn roll_back_namespace(&self, namespace: &str) {
        match self.store().delete_namespace(namespace) {
            Ok(_) => warn!(namespace, "rolled back namespace after secret failure"),
            Err(e) => warn!(namespace, error = %e, "failed to roll back namespace"),
        }
    }

    pub(crate) fn load_namespace(&self, id: &EnvironmentId) -> EnroberResult<Namespace> {
        let name = id.namespace();
        self.store()
            .get_namespace(&name)?
            .filter(is_environment)
            .ok_or_else(|| EnroberError::not_found("environment", name))
    }

    pub fn get_environment(&self, raw_id: &str) -> EnroberResult<Environment> {
        let id = self.environment_id(raw_id)?;
        let namespace = self.load_namespace(&id)?;
        let secret = self
            .store()
            .get_secret(&namespace.metadata.name, ROUTING_SECRET_NAME)?;
        Ok(Environment::from_parts(&namespace, secret.as_ref()))
    }

    pub fn list_environments(&self) -> EnroberResult<Vec<Environment>> {
        let store = self.store();
        store
            .list_namespaces(&LabelSelector::everything())?
            .iter()
            .filter(|ns| is_environment(ns))
            .map(|ns| -> EnroberResult<Environment> {
                let secret = store.get_secret(&ns.metadata.name, ROUTING_SECRET_NAME)?;
                Ok(Environment::from_parts(ns, secret.as_ref()))
            })
            .collect()
    }

    /// Update hostnames and/or regenerate keys. Omitted fields are kept.
    pub async fn patch_environment(
        &self,
        raw_id: &str,
        patch: EnvironmentPatch,
        ctx: &RequestContext,
    ) -> EnroberResult<Environment> {
        let id = self.environment_id(raw_id)?;
        self.admin().check(&id.org, ctx.authorization.as_deref()).await?;
        let mut namespace = self.load_namespace(&id)?;
        let name = namespace.metadata.name.clone();

        if let Some(hosts) = &patch.host_names {
            let joined = hostnames::join_host_names(hosts);
            let current = namespace.metadata.annotations.get(HOST_NAMES_ANNOTATION);
            if current == Some(&joined) {
                debug!(environment = %name, "hostnames unchanged");
            } else {
                hostnames::validate_host_names(self.store(), hosts, Some(&name))?;
                namespace
                    .metadata
                    .annotations
                    .insert(HOST_NAMES_ANNOTATION.to_string(), joined);
                self.store().update_namespace(&namespace)?;
                info!(environment = %name, hosts = hosts.len(), "updated hostnames");
            }
        }

        let secret = match self.store().get_secret(&name, ROUTING_SECRET_NAME)? {
            Some(existing) => {
                let current = RoutingKeys::from_secret(&existing);
                let next = current.rotate(patch.regenerate)?;
                if next == current {
                    existing
                } else {
                    let secret = next.to_secret(&name);
                    self.store().update_secret(&secret)?;
                    info!(
                        environment = %name,
                        public = patch.regenerate.public,
                        private = patch.regenerate.private,
                        "regenerated routing keys"
                    );
                    secret
                }
            }
            None => {
                let empty = RoutingKeys {
                    public_key: String::new(),
                    private_key: String::new(),
                };
                let secret = empty.rotate(patch.regenerate)?.to_secret(&name);
                self.store().create_secret(&secret)?;
                warn!(environment = %name, "recreated missing routing secret");
                secret
            }
        };

        Ok(Environment::from_parts(&namespace, Some(&secret)))
    }

    /// Delete the environment and everything inside it.
    pub async fn delete_environment(&self, raw_id: &str, ctx: &RequestContext) -> EnroberResult<()> {
        let id = self.environment_id(raw_id)?;
        self.admin().check(&id.org, ctx.authorization.as_deref()).await?;
        let name = self.load_namespace(&id)?.metadata.name;
        if !self.store().delete_namespace(&name)? {
            return Err(EnroberError::not_found("environment", name));
        }
        info!(environment = %name, "deleted environment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClass;
    use crate::config::EnroberConfig;
    use crate::testing::{FaultyStore, Faults, ctx, enrober};
    use enrober_state::ResourceStore;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn new_env(name: &str, hosts: &[&str]) -> NewEnvironment {
        NewEnvironment {
            name: name.to_string(),
            host_names: hosts.iter().map(|h| h.to_string()).collect(),
            isolated: None,
        }
    }

    #[tokio::test]
    async fn create_provisions_namespace_and_secret() {
        let (enrober, store) = enrober();
        let env = enrober
            .create_environment(new_env("acme-prod", &["a.example.com", "10.0.0.1"]), &ctx())
            .await
            .unwrap();

        assert_eq!(env.name, "acme-prod");
        assert_eq!(env.host_names, ["a.example.com", "10.0.0.1"]);
        assert_eq!(env.public_secret.len(), 44);
        assert_ne!(env.public_secret, env.private_secret);
        assert!(!env.isolated);

        let ns = store.get_namespace("acme-prod").unwrap().unwrap();
        assert_eq!(ns.metadata.labels.get(ORGANIZATION_LABEL).unwrap(), "acme");
        assert_eq!(ns.metadata.labels.get(ENVIRONMENT_LABEL).unwrap(), "prod");
        assert_eq!(
            ns.metadata.annotations.get(HOST_NAMES_ANNOTATION).unwrap(),
            "a.example.com 10.0.0.1"
        );
        assert!(store.get_secret("acme-prod", ROUTING_SECRET_NAME).unwrap().is_some());
    }

    #[tokio::test]
    async fn create_isolated_sets_policy_annotation() {
        let (enrober, store) = enrober();
        let mut input = new_env("acme-prod", &["a.example.com"]);
        input.isolated = Some(true);
        let env = enrober.create_environment(input, &ctx()).await.unwrap();
        assert!(env.isolated);
        let ns = store.get_namespace("acme-prod").unwrap().unwrap();
        assert_eq!(
            ns.metadata.annotations.get(NETWORK_POLICY_ANNOTATION).unwrap(),
            DEFAULT_DENY
        );
    }

    #[tokio::test]
    async fn create_rejects_duplicate_host_without_writing() {
        let (enrober, store) = enrober();
        enrober
            .create_environment(new_env("acme-prod", &["host.example.com", "10.0.0.1"]), &ctx())
            .await
            .unwrap();

        let err = enrober
            .create_environment(new_env("acme-test", &["10.0.0.1"]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, EnroberError::DuplicateHost(_)));
        assert!(store.get_namespace("acme-test").unwrap().is_none());
    }

    #[tokio::test]
    async fn create_existing_environment_conflicts() {
        let (enrober, _store) = enrober();
        enrober
            .create_environment(new_env("acme-prod", &[]), &ctx())
            .await
            .unwrap();
        let err = enrober
            .create_environment(new_env("acme-prod", &[]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);
    }

    #[tokio::test]
    async fn secret_failure_rolls_back_namespace() {
        let store = Arc::new(FaultyStore::new(Faults {
            create_secret: true,
            ..Default::default()
        }));
        let enrober = Enrober::new(store.clone(), EnroberConfig::default());

        let err = enrober
            .create_environment(new_env("acme-prod", &["a.example.com"]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Upstream);
        assert!(store.get_namespace("acme-prod").unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_regenerates_only_requested_key() {
        let (enrober, _store) = enrober();
        let before = enrober
            .create_environment(new_env("acme-prod", &["a.example.com"]), &ctx())
            .await
            .unwrap();

        let after = enrober
            .patch_environment(
                "acme-prod",
                EnvironmentPatch {
                    host_names: None,
                    regenerate: Regenerate {
                        public: false,
                        private: true,
                    },
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(after.public_secret, before.public_secret);
        assert_ne!(after.private_secret, before.private_secret);
        assert_eq!(after.host_names, before.host_names);
    }

    #[tokio::test]
    async fn hostname_only_patch_keeps_both_keys() {
        let (enrober, _store) = enrober();
        let before = enrober
            .create_environment(new_env("acme-prod", &["a.example.com"]), &ctx())
            .await
            .unwrap();

        let after = enrober
            .patch_environment(
                "acme-prod",
                EnvironmentPatch {
                    host_names: Some(vec!["b.example.com".into()]),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(after.host_names, ["b.example.com"]);
        assert_eq!(after.public_secret, before.public_secret);
        assert_eq!(after.private_secret, before.private_secret);
    }

    #[tokio::test]
    async fn patch_may_keep_its_own_hostnames_but_not_steal_others() {
        let (enrober, _store) = enrober();
        for (name, host) in [("acme-prod", "a.example.com"), ("acme-test", "b.example.com")] {
            enrober
                .create_environment(new_env(name, &[host]), &ctx())
                .await
                .unwrap();
        }

        enrober
            .patch_environment(
                "acme-prod",
                EnvironmentPatch {
                    host_names: Some(vec!["a.example.com".into(), "c.example.com".into()]),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap();

        let err = enrober
            .patch_environment(
                "acme-prod",
                EnvironmentPatch {
                    host_names: Some(vec!["b.example.com".into()]),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnroberError::DuplicateHost(h) if h == "b.example.com"));
    }

    #[tokio::test]
    async fn unchanged_hostnames_skip_validation_and_write() {
        let store = Arc::new(FaultyStore::new(Faults {
            update_namespace: true,
            ..Default::default()
        }));
        let enrober = Enrober::new(store.clone(), EnroberConfig::default());
        enrober
            .create_environment(new_env("acme-prod", &["a.example.com", "b.example.com"]), &ctx())
            .await
            .unwrap();
        // Another environment already claims an overlapping token.
        let mut other = enrober_state::ObjectMeta::named("acme-test");
        other
            .labels
            .insert(ORGANIZATION_LABEL.to_string(), "acme".to_string());
        other
            .annotations
            .insert(HOST_NAMES_ANNOTATION.to_string(), "b.example.com".to_string());
        store
            .create_namespace(&enrober_state::Namespace { metadata: other })
            .unwrap();
        let before = store.get_namespace("acme-prod").unwrap();

        let env = enrober
            .patch_environment(
                "acme-prod",
                EnvironmentPatch {
                    host_names: Some(vec!["a.example.com".into(), "b.example.com".into()]),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(env.host_names, vec!["a.example.com", "b.example.com"]);
        assert_eq!(store.get_namespace("acme-prod").unwrap(), before);

        // A real change does reach the store.
        let err = enrober
            .patch_environment(
                "acme-prod",
                EnvironmentPatch {
                    host_names: Some(vec!["c.example.com".into()]),
                    ..Default::default()
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected update namespace failure"));
    }

    #[tokio::test]
    async fn patch_recreates_missing_secret() {
        let (enrober, store) = enrober();
        enrober
            .create_environment(new_env("acme-prod", &[]), &ctx())
            .await
            .unwrap();
        store.delete_secret("acme-prod", ROUTING_SECRET_NAME).unwrap();

        let env = enrober
            .patch_environment("acme-prod", EnvironmentPatch::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(env.public_secret.len(), 44);
        assert_eq!(env.private_secret.len(), 44);
        assert!(store.get_secret("acme-prod", ROUTING_SECRET_NAME).unwrap().is_some());
    }

    #[tokio::test]
    async fn get_list_delete() {
        let (enrober, store) = enrober();
        enrober
            .create_environment(new_env("acme-prod", &["a.example.com"]), &ctx())
            .await
            .unwrap();
        store
            .create_namespace(&Namespace {
                metadata: ObjectMeta::named("kube-system"),
            })
            .unwrap();

        assert_eq!(enrober.get_environment("acme-prod").unwrap().name, "acme-prod");
        let all = enrober.list_environments().unwrap();
        assert_eq!(all.len(), 1);

        enrober.delete_environment("acme-prod", &ctx()).await.unwrap();
        let err = enrober.get_environment("acme-prod").unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
        let err = enrober.delete_environment("acme-prod", &ctx()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn kvm_sync_runs_after_secret_and_failure_is_not_rolled_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/organizations/acme/environments/prod/keyvaluemaps"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = EnroberConfig::default();
        config.kvm.enabled = true;
        config.kvm.base_url = server.uri();
        let (enrober, store) = crate::testing::enrober_with(config);

        let err = enrober
            .create_environment(new_env("acme-prod", &[]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, EnroberError::KvmSync(_)));
        assert!(store.get_namespace("acme-prod").unwrap().is_some());
        assert!(store.get_secret("acme-prod", ROUTING_SECRET_NAME).unwrap().is_some());
    }

    #[tokio::test]
    async fn hardened_mode_checks_admin_before_writing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme/adminCheck"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = EnroberConfig::default();
        config.profile.hardened = true;
        config.admin.check_url = server.uri();
        let (enrober, store) = crate::testing::enrober_with(config);

        let err = enrober
            .create_environment(new_env("acme-prod", &[]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Forbidden);
        assert!(store.get_namespace("acme-prod").unwrap().is_none());
    }
}
