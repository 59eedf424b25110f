//! Object types held by the Enrober resource store.
//!
//! The shapes follow the orchestration substrate's JSON (camelCase keys,
//! `metadata` blocks) but only the fields the reconciliation core reads or
//! writes are typed. Everything else inside a pod spec or container rides
//! along in flattened maps so that a template fetched from a URL survives a
//! store round trip untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Label or annotation map. Ordered so serialized objects are stable.
pub type Labels = BTreeMap<String, String>;

// ── Metadata ──────────────────────────────────────────────────────

/// Identity and free-form metadata shared by every object kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Labels,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }
}

// ── Label selectors ───────────────────────────────────────────────

/// Equality-based label selector (`k=v,k2=v2`).
///
/// An empty selector matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: Labels,
}

impl LabelSelector {
    /// Selector that matches every object.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector on a single `key=value` pair.
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = Labels::new();
        match_labels.insert(key.into(), value.into());
        Self { match_labels }
    }

    /// Parse a comma-separated list of `key=value` requirements.
    pub fn parse(expr: &str) -> StateResult<Self> {
        let mut match_labels = Labels::new();
        for term in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .ok_or_else(|| StateError::Read(format!("invalid label selector term: {term}")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StateError::Read(format!(
                    "invalid label selector term: {term}"
                )));
            }
            match_labels.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { match_labels })
    }

    /// True when every requirement is present in `labels` with an equal value.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&terms.join(","))
    }
}

// ── Namespace ─────────────────────────────────────────────────────

/// A substrate namespace. One per environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

// ── Secret ────────────────────────────────────────────────────────

/// Opaque key/value secret. Values are already-encoded credential strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default = "default_secret_type", rename = "type")]
    pub secret_type: String,
}

fn default_secret_type() -> String {
    "Opaque".to_string()
}

// ── Pod template ──────────────────────────────────────────────────

/// Name/value environment variable on a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A container inside a pod spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Fields this service does not interpret (ports, resources, probes…).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Container {
    /// Whether `securityContext.privileged` is set to true.
    pub fn is_privileged(&self) -> bool {
        self.extra
            .get("securityContext")
            .and_then(|ctx| ctx.get("privileged"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Pod spec: the container list plus everything else, untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The workload template applied to every replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

// ── Deployment chain ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub replicas: i32,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplate,
}

/// A named, replica-counted workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
}

/// Replica set owned by a deployment (matched by selector label).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    pub metadata: ObjectMeta,
}

/// A running replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    /// Captured container output, oldest line first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

// ── Keys ──────────────────────────────────────────────────────────

/// Objects that live inside a namespace.
pub trait Namespaced {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    /// Build the composite key for the object's table.
    fn table_key(&self) -> String {
        crate::tables::object_key(self.namespace(), self.name())
    }
}

macro_rules! namespaced {
    ($ty:ty, $kind:literal) => {
        impl Namespaced for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }
        }
    };
}

namespaced!(Secret, "secret");
namespaced!(Deployment, "deployment");
namespaced!(ReplicaSet, "replicaset");
namespaced!(Pod, "pod");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parse_and_display() {
        let sel = LabelSelector::parse("app=web, tier=front").unwrap();
        assert_eq!(sel.match_labels.len(), 2);
        assert_eq!(sel.to_string(), "app=web,tier=front");
    }

    #[test]
    fn selector_rejects_bare_key() {
        assert!(LabelSelector::parse("app").is_err());
        assert!(LabelSelector::parse("=web").is_err());
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = LabelSelector::parse("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&Labels::new()));
    }

    #[test]
    fn selector_requires_every_label() {
        let sel = LabelSelector::parse("app=web,tier=front").unwrap();
        let mut labels = Labels::new();
        labels.insert("app".into(), "web".into());
        assert!(!sel.matches(&labels));
        labels.insert("tier".into(), "front".into());
        labels.insert("extra".into(), "x".into());
        assert!(sel.matches(&labels));
    }

    #[test]
    fn pod_template_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "metadata": { "labels": { "app": "web" } },
            "spec": {
                "restartPolicy": "Always",
                "containers": [{
                    "name": "web",
                    "image": "nginx:1",
                    "ports": [{ "containerPort": 80 }],
                    "env": [{ "name": "A", "value": "1" }]
                }]
            }
        });
        let pts: PodTemplate = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(pts.spec.containers[0].env, vec![EnvVar::new("A", "1")]);
        assert_eq!(serde_json::to_value(&pts).unwrap(), raw);
    }

    #[test]
    fn privileged_flag_is_read_from_security_context() {
        let c: Container = serde_json::from_value(serde_json::json!({
            "name": "x",
            "securityContext": { "privileged": true }
        }))
        .unwrap();
        assert!(c.is_privileged());
        assert!(!Container::default().is_privileged());
    }
}
