//! enrober.toml configuration.
//!
//! Every section is optional. After the file is parsed, process environment
//! variables are layered on top (`apply_env`), matching how the service is
//! configured inside a cluster. The resulting value is immutable for the
//! lifetime of the server and travels inside [`crate::Enrober`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EnroberError, EnroberResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnroberConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub profile: ProfileConfig,
    pub kvm: KvmConfig,
    pub admin: AdminConfig,
    pub pod_template: PodTemplateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Path prefix every route is nested under.
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            api_prefix: "/beeswax/deploy/api/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/enrober"),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("enrober.redb")
    }
}

/// Deployment-profile switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileConfig {
    /// Production hardening: admin gate, pod-template origin check.
    pub hardened: bool,
    /// Separator between organization and environment in resource names.
    pub name_separator: NameSeparator,
    /// Label a deployment's selector binds on.
    pub selector_label: SelectorLabel,
    /// Default network isolation for new environments.
    pub isolate_namespaces: bool,
    pub allow_privileged_containers: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            hardened: false,
            name_separator: NameSeparator::Dash,
            selector_label: SelectorLabel::App,
            isolate_namespaces: false,
            allow_privileged_containers: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NameSeparator {
    #[serde(rename = "-")]
    Dash,
    #[serde(rename = ":")]
    Colon,
}

impl NameSeparator {
    pub fn as_char(self) -> char {
        match self {
            NameSeparator::Dash => '-',
            NameSeparator::Colon => ':',
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectorLabel {
    App,
    Component,
}

impl SelectorLabel {
    pub fn key(self) -> &'static str {
        match self {
            SelectorLabel::App => "app",
            SelectorLabel::Component => "component",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KvmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub map_name: String,
    pub entry_name: String,
}

impl Default for KvmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.enterprise.apigee.com/v1".to_string(),
            map_name: "routing".to_string(),
            entry_name: "x-routing-api-key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Base URL; the org admin check is `GET {check_url}/{org}/adminCheck`.
    pub check_url: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            check_url: "https://api.enterprise.apigee.com/v1/organizations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PodTemplateConfig {
    /// Public host whose template fetches are redirected to the internal router.
    pub shipyard_host: String,
    pub internal_router_host: String,
    pub routing_key_header: String,
    pub shipyard_private_secret: String,
}

impl Default for PodTemplateConfig {
    fn default() -> Self {
        Self {
            shipyard_host: String::new(),
            internal_router_host: String::new(),
            routing_key_header: "X-ROUTING-API-KEY".to_string(),
            shipyard_private_secret: String::new(),
        }
    }
}

impl EnroberConfig {
    pub fn from_file(path: &Path) -> EnroberResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EnroberError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> EnroberResult<Self> {
        toml::from_str(content).map_err(|e| EnroberError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> EnroberResult<String> {
        toml::to_string_pretty(self).map_err(|e| EnroberError::Config(e.to_string()))
    }

    /// Load the file (if any), then overlay the process environment.
    pub fn load(path: Option<&Path>) -> EnroberResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// `DEPLOY_STATE=PROD` switches on the hardened profile; the isolation,
    /// privileged-container and KVM switches are only honored in that mode.
    pub fn apply_env<F>(&mut self, lookup: F) -> EnroberResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).is_some_and(|v| v == "true");

        if lookup("DEPLOY_STATE").as_deref() == Some("PROD") {
            self.profile.hardened = true;
            if flag("ISOLATE_NAMESPACE") {
                self.profile.isolate_namespaces = true;
            }
            if flag("ALLOW_PRIV_CONTAINERS") {
                self.profile.allow_privileged_containers = true;
            }
            if flag("APIGEE_KVM") {
                self.kvm.enabled = true;
            }
        }

        if let Some(port) = lookup("ENROBER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| EnroberError::Config(format!("ENROBER_PORT is not a port: {port}")))?;
        }
        if let Some(dir) = lookup("ENROBER_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("KVM_BASE_URL") {
            self.kvm.base_url = url;
        }
        if let Some(host) = lookup("AUTH_API_HOST") {
            self.admin.check_url = format!("https://{host}/v1/organizations");
        }

        let pts = &mut self.pod_template;
        if let Some(v) = lookup("SHIPYARD_HOST") {
            pts.shipyard_host = v;
        }
        if let Some(v) = lookup("INTERNAL_ROUTER_HOST") {
            pts.internal_router_host = v;
        }
        if let Some(v) = lookup("SHIPYARD_PRIVATE_SECRET") {
            pts.shipyard_private_secret = v;
        }
        if let Some(v) = lookup("API_ROUTING_KEY_HEADER").filter(|v| !v.is_empty()) {
            pts.routing_key_header = v;
        }
        Ok(())
    }
}
