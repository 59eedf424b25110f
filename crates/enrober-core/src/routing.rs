//! Routing metadata on a deployment's pod template.
//!
//! The downstream router keys off two things on every pod: the
//! `routable=true` label and the four host/path annotations below.

use enrober_state::{Labels, PodTemplate};

pub const PUBLIC_HOSTS: &str = "publicHosts";
pub const PUBLIC_PATHS: &str = "publicPaths";
pub const PRIVATE_HOSTS: &str = "privateHosts";
pub const PRIVATE_PATHS: &str = "privatePaths";

pub const ROUTING_ANNOTATIONS: [&str; 4] = [PUBLIC_HOSTS, PUBLIC_PATHS, PRIVATE_HOSTS, PRIVATE_PATHS];

pub const ROUTABLE_LABEL: &str = "routable";

/// Routing values supplied by a request. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingInput {
    pub public_hosts: Option<String>,
    pub public_paths: Option<String>,
    pub private_hosts: Option<String>,
    pub private_paths: Option<String>,
}

impl RoutingInput {
    /// True when a public or private host is present.
    pub fn has_target(&self) -> bool {
        self.public_hosts.is_some() || self.private_hosts.is_some()
    }

    fn supplied(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [
            (PUBLIC_HOSTS, self.public_hosts.as_ref()),
            (PUBLIC_PATHS, self.public_paths.as_ref()),
            (PRIVATE_HOSTS, self.private_hosts.as_ref()),
            (PRIVATE_PATHS, self.private_paths.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
    }
}

/// Create path: write every supplied routing value over the template's own
/// annotations and mark it routable.
pub fn apply_on_create(template: &mut PodTemplate, input: &RoutingInput) {
    let annotations = &mut template.metadata.annotations;
    for (key, value) in input.supplied() {
        annotations.insert(key.to_string(), value.clone());
    }
    mark_routable(template);
}

/// Update path: drop whatever annotations the new template carries, seed
/// the routing keys from `previous`, then overwrite with supplied values.
///
/// A patch that only names `publicHosts` keeps the previous private
/// routing.
pub fn apply_on_update(template: &mut PodTemplate, input: &RoutingInput, previous: &Labels) {
    let mut annotations = Labels::new();
    for key in ROUTING_ANNOTATIONS {
        if let Some(value) = previous.get(key) {
            annotations.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in input.supplied() {
        annotations.insert(key.to_string(), value.clone());
    }
    template.metadata.annotations = annotations;
    mark_routable(template);
}

fn mark_routable(template: &mut PodTemplate) {
    template
        .metadata
        .labels
        .insert(ROUTABLE_LABEL.to_string(), "true".to_string());
}
