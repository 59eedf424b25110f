//! Deployment lifecycle.
//!
//! Create and patch resolve a pod template, stamp routing metadata on it and
//! merge environment variables before writing. Patch starts from a snapshot
//! of the stored deployment so that anything the caller leaves out
//! (routing annotations, env vars, replica count) survives.
//!
//! Delete is a four-stage cascade: read the deployment, delete its replica
//! sets, delete its pods, delete the deployment. A failing stage stops the
//! cascade and nothing already deleted is restored.

use std::collections::HashMap;

use enrober_state::{Deployment, DeploymentSpec, EnvVar, LabelSelector, ObjectMeta, PodTemplate};
use tracing::{debug, info, warn};

use crate::env_vars;
use crate::error::{CascadeStage, EnroberError, EnroberResult};
use crate::routing::{self, RoutingInput};
use crate::template;
use crate::{Enrober, EnvironmentId, RequestContext};

#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub name: String,
    pub routing: RoutingInput,
    pub replicas: i32,
    pub pts_url: Option<String>,
    pub pts: Option<PodTemplate>,
    pub env_vars: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub routing: RoutingInput,
    /// `None` keeps the stored replica count.
    pub replicas: Option<i32>,
    pub pts_url: Option<String>,
    pub pts: Option<PodTemplate>,
    pub env_vars: Vec<EnvVar>,
}

impl Enrober {
    fn environment_namespace(&self, raw_id: &str) -> EnroberResult<(EnvironmentId, String)> {
        let id = self.environment_id(raw_id)?;
        let namespace = self.load_namespace(&id)?.metadata.name;
        Ok((id, namespace))
    }

    /// The selector a template binds on, under the configured label key.
    fn template_selector(&self, template: &PodTemplate) -> EnroberResult<LabelSelector> {
        let key = self.config.profile.selector_label.key();
        template
            .metadata
            .labels
            .get(key)
            .map(|value| LabelSelector::single(key, value.as_str()))
            .ok_or_else(|| EnroberError::MissingSelectorLabel(key.to_string()))
    }

    fn check_privileges(&self, template: &PodTemplate) -> EnroberResult<()> {
        let profile = &self.config.profile;
        if profile.hardened && !profile.allow_privileged_containers {
            template::ensure_unprivileged(template)?;
        }
        Ok(())
    }

    /// Fail if another deployment in `namespace` already selects on
    /// `selector`. Check-then-act: nothing stops a concurrent create from
    /// passing the same check.
    fn assert_selector_unique(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        exclude: Option<&str>,
    ) -> EnroberResult<()> {
        let taken = self
            .store()
            .list_deployments(namespace, selector)?
            .into_iter()
            .any(|d| Some(d.metadata.name.as_str()) != exclude);
        if taken {
            warn!(namespace, %selector, "rejecting deployment with taken selector");
            return Err(EnroberError::SelectorConflict(selector.to_string()));
        }
        Ok(())
    }

    fn load_deployment(&self, namespace: &str, name: &str) -> EnroberResult<Deployment> {
        self.store()
            .get_deployment(namespace, name)?
            .ok_or_else(|| EnroberError::not_found("deployment", name))
    }

    pub async fn create_deployment(
        &self,
        raw_env_id: &str,
        input: NewDeployment,
        ctx: &RequestContext,
    ) -> EnroberResult<Deployment> {
        let id = self.environment_id(raw_env_id)?;
        self.admin().check(&id.org, ctx.authorization.as_deref()).await?;
        // The name becomes the last segment of the store key and the route.
        if input.name.is_empty() || input.name.contains('/') {
            return Err(EnroberError::InvalidDeploymentName(input.name));
        }
        let namespace = self.load_namespace(&id)?.metadata.name;

        if !input.routing.has_target() {
            return Err(EnroberError::MissingRoutingTarget);
        }

        let mut template = self
            .templates()
            .resolve(input.pts, input.pts_url.as_deref(), None, ctx)
            .await?;
        self.check_privileges(&template)?;
        let selector = self.template_selector(&template)?;

        routing::apply_on_create(&mut template, &input.routing);
        for container in &mut template.spec.containers {
            container.env = env_vars::merge(&container.env, &input.env_vars);
        }

        self.assert_selector_unique(&namespace, &selector, None)?;

        let mut metadata = ObjectMeta::namespaced(&namespace, &input.name);
        metadata.labels = template.metadata.labels.clone();
        let deployment = Deployment {
            metadata,
            spec: DeploymentSpec {
                replicas: input.replicas,
                selector,
                template,
            },
        };
        self.store().create_deployment(&deployment)?;

        info!(
            namespace = %namespace,
            deployment = %input.name,
            replicas = input.replicas,
            "created deployment"
        );
        Ok(deployment)
    }

    pub fn list_deployments(&self, raw_env_id: &str) -> EnroberResult<Vec<Deployment>> {
        let (_, namespace) = self.environment_namespace(raw_env_id)?;
        Ok(self
            .store()
            .list_deployments(&namespace, &LabelSelector::everything())?)
    }

    pub fn get_deployment(&self, raw_env_id: &str, name: &str) -> EnroberResult<Deployment> {
        let (_, namespace) = self.environment_namespace(raw_env_id)?;
        self.load_deployment(&namespace, name)
    }

    pub async fn patch_deployment(
        &self,
        raw_env_id: &str,
        name: &str,
        patch: DeploymentPatch,
        ctx: &RequestContext,
    ) -> EnroberResult<Deployment> {
        let id = self.environment_id(raw_env_id)?;
        self.admin().check(&id.org, ctx.authorization.as_deref()).await?;
        let namespace = self.load_namespace(&id)?.metadata.name;
        let mut deployment = self.load_deployment(&namespace, name)?;

        // Snapshot before the template is replaced.
        let previous = &deployment.spec.template;
        let cached_annotations = previous.metadata.annotations.clone();
        let cached_env: HashMap<String, Vec<EnvVar>> = previous
            .spec
            .containers
            .iter()
            .map(|c| (c.name.clone(), c.env.clone()))
            .collect();

        let mut template = self
            .templates()
            .resolve(patch.pts, patch.pts_url.as_deref(), Some(previous), ctx)
            .await?;
        self.check_privileges(&template)?;
        let selector = self.template_selector(&template)?;
        if selector != deployment.spec.selector {
            self.assert_selector_unique(&namespace, &selector, Some(name))?;
        }

        routing::apply_on_update(&mut template, &patch.routing, &cached_annotations);
        for container in &mut template.spec.containers {
            let base = cached_env
                .get(&container.name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let merged = env_vars::merge(base, &container.env);
            container.env = env_vars::merge(&merged, &patch.env_vars);
        }

        if let Some(replicas) = patch.replicas {
            deployment.spec.replicas = replicas;
        }
        deployment.metadata.labels = template.metadata.labels.clone();
        deployment.spec.selector = selector;
        deployment.spec.template = template;
        self.store().update_deployment(&deployment)?;

        info!(
            namespace = %namespace,
            deployment = %name,
            replicas = deployment.spec.replicas,
            "updated deployment"
        );
        Ok(deployment)
    }

    /// Cascade-delete a deployment with its replica sets and pods.
    pub async fn delete_deployment(
        &self,
        raw_env_id: &str,
        name: &str,
        ctx: &RequestContext,
    ) -> EnroberResult<()> {
        let id = self.environment_id(raw_env_id)?;
        self.admin().check(&id.org, ctx.authorization.as_deref()).await?;
        let namespace = self.load_namespace(&id)?.metadata.name;
        let store = self.store();

        let deployment = self
            .load_deployment(&namespace, name)
            .map_err(|e| EnroberError::cascade(CascadeStage::ReadDeployment, e))?;
        let selector = &deployment.spec.selector;

        // An empty selector would match every object in the namespace.
        if selector.is_empty() {
            warn!(namespace = %namespace, deployment = %name, "deployment has no selector, skipping dependents");
        } else {
            let replica_sets = store
                .list_replica_sets(&namespace, selector)
                .map_err(|e| EnroberError::cascade(CascadeStage::ReplicaSets, e))?;
            for rs in &replica_sets {
                store
                    .delete_replica_set(&namespace, &rs.metadata.name)
                    .map_err(|e| EnroberError::cascade(CascadeStage::ReplicaSets, e))?;
                debug!(namespace = %namespace, replica_set = %rs.metadata.name, "deleted replica set");
            }

            let pods = store
                .list_pods(&namespace, selector)
                .map_err(|e| EnroberError::cascade(CascadeStage::Pods, e))?;
            for pod in &pods {
                store
                    .delete_pod(&namespace, &pod.metadata.name)
                    .map_err(|e| EnroberError::cascade(CascadeStage::Pods, e))?;
                debug!(namespace = %namespace, pod = %pod.metadata.name, "deleted pod");
            }
            debug!(
                replica_sets = replica_sets.len(),
                pods = pods.len(),
                "deleted deployment dependents"
            );
        }

        store
            .delete_deployment(&namespace, name)
            .map_err(|e| EnroberError::cascade(CascadeStage::Deployment, e))?;
        info!(namespace = %namespace, deployment = %name, "deleted deployment");
        Ok(())
    }

    /// Log lines of every pod behind a deployment. `tail` keeps only the
    /// last N lines of each pod.
    pub fn deployment_logs(
        &self,
        raw_env_id: &str,
        name: &str,
        tail: Option<usize>,
    ) -> EnroberResult<String> {
        let (_, namespace) = self.environment_namespace(raw_env_id)?;
        let deployment = self.load_deployment(&namespace, name)?;
        if deployment.spec.selector.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::new();
        for pod in self
            .store()
            .list_pods(&namespace, &deployment.spec.selector)?
        {
            let skip = tail.map_or(0, |n| pod.logs.len().saturating_sub(n));
            for line in &pod.logs[skip..] {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out)
    }
}
