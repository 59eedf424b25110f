//! Hostname registry.
//!
//! There is no separate table of hostnames: the registry is the union of
//! the `hostNames` annotation over every environment namespace, and
//! validation is a read-scan of the store followed by a compare. No lock is
//! taken between the scan and the caller's write, so two concurrent
//! creates with the same hostname can both pass; the next scan sees both.

use std::collections::HashSet;
use std::sync::LazyLock;

use enrober_state::{LabelSelector, ResourceStore};
use regex::Regex;
use tracing::warn;

use crate::error::{EnroberError, EnroberResult};

/// Namespace annotation holding the space-delimited hostname list.
pub const HOST_NAMES_ANNOTATION: &str = "hostNames";

static VALID_IP_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])\.){3}([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])$",
    )
    .expect("static regex")
});

static VALID_HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$",
    )
    .expect("static regex")
});

/// Dotted-decimal IPv4 or RFC-1123 hostname.
pub fn is_valid_host(candidate: &str) -> bool {
    VALID_IP_ADDRESS.is_match(candidate) || VALID_HOSTNAME.is_match(candidate)
}

/// Serialize hostnames into the annotation value.
pub fn join_host_names(hosts: &[String]) -> String {
    hosts.join(" ")
}

/// Parse the annotation value back into its hostname tokens.
pub fn split_host_names(annotation: &str) -> Vec<String> {
    annotation.split_whitespace().map(str::to_string).collect()
}

/// Check `candidates` for syntax, then for collisions with every other
/// environment's hostnames.
///
/// `exclude` names the environment namespace being updated so that it does
/// not collide with itself. Tokens are compared exactly: `host1` does not
/// collide with `host10`.
pub fn validate_host_names(
    store: &dyn ResourceStore,
    candidates: &[String],
    exclude: Option<&str>,
) -> EnroberResult<()> {
    // Fail fast on syntax before touching the store.
    if let Some(bad) = candidates.iter().find(|c| !is_valid_host(c)) {
        warn!(hostname = %bad, "rejecting invalid hostname");
        return Err(EnroberError::InvalidHostname(bad.clone()));
    }
    if candidates.is_empty() {
        return Ok(());
    }

    let namespaces = store.list_namespaces(&LabelSelector::everything())?;
    for ns in &namespaces {
        if exclude == Some(ns.metadata.name.as_str()) {
            continue;
        }
        let Some(value) = ns.metadata.annotations.get(HOST_NAMES_ANNOTATION) else {
            continue;
        };
        let taken: HashSet<&str> = value.split_whitespace().collect();
        if let Some(dup) = candidates.iter().find(|c| taken.contains(c.as_str())) {
            warn!(hostname = %dup, owner = %ns.metadata.name, "rejecting duplicate hostname");
            return Err(EnroberError::DuplicateHost(dup.clone()));
        }
    }
    Ok(())
}
