//! Mirror of an environment's public key into the organization's
//! key-value map service.
//!
//! One create attempt, and on `409` a single fallback whose request shape
//! depends on whether the organization has CPS enabled. Nothing here is
//! retried or backed off.

use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::KvmConfig;
use crate::error::{EnroberError, EnroberResult};

/// Organization property that switches the map update API shape.
pub const CPS_PROPERTY: &str = "features.isCpsEnabled";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KvmEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValueMap {
    pub name: String,
    pub encrypted: bool,
    pub entry: Vec<KvmEntry>,
}

#[derive(Debug, Deserialize)]
struct OrganizationProperties {
    properties: Option<PropertyList>,
}

#[derive(Debug, Deserialize)]
struct PropertyList {
    #[serde(default)]
    property: Vec<Property>,
}

#[derive(Debug, Deserialize)]
struct Property {
    name: String,
    #[serde(default)]
    value: String,
}

/// How the sync concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvmOutcome {
    /// The map did not exist and was created.
    Created,
    /// The map existed; the single entry was posted (CPS organizations).
    EntryUpdated,
    /// The map existed; the whole map was rewritten.
    MapReplaced,
}

pub struct KvmSynchronizer<'a> {
    client: &'a Client,
    config: &'a KvmConfig,
}

impl<'a> KvmSynchronizer<'a> {
    pub fn new(client: &'a Client, config: &'a KvmConfig) -> Self {
        Self { client, config }
    }

    fn map_body(&self, public_key: &str) -> KeyValueMap {
        KeyValueMap {
            name: self.config.map_name.clone(),
            encrypted: true,
            entry: vec![self.entry(public_key)],
        }
    }

    fn entry(&self, public_key: &str) -> KvmEntry {
        KvmEntry {
            name: self.config.entry_name.clone(),
            value: public_key.to_string(),
        }
    }

    fn maps_url(&self, org: &str, env: &str) -> String {
        format!(
            "{}/organizations/{org}/environments/{env}/keyvaluemaps",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn authorized(builder: RequestBuilder, authorization: Option<&str>) -> RequestBuilder {
        match authorization {
            Some(auth) => builder.header(header::AUTHORIZATION, auth),
            None => builder,
        }
    }

    /// Push `public_key` into the `{org}/{env}` routing map.
    pub async fn sync(
        &self,
        org: &str,
        env: &str,
        public_key: &str,
        authorization: Option<&str>,
    ) -> EnroberResult<KvmOutcome> {
        let maps_url = self.maps_url(org, env);
        let body = self.map_body(public_key);

        let status = self
            .send(Self::authorized(self.client.post(&maps_url), authorization).json(&body))
            .await?;
        match status {
            StatusCode::CREATED => {
                info!(org, env, map = %self.config.map_name, "created key-value map");
                return Ok(KvmOutcome::Created);
            }
            StatusCode::CONFLICT => {
                debug!(org, env, map = %self.config.map_name, "key-value map exists, updating");
            }
            other => {
                return Err(EnroberError::KvmSync(format!(
                    "creating key-value map returned {}",
                    other.as_u16()
                )));
            }
        }

        let map_url = format!("{maps_url}/{}", self.config.map_name);
        let (request, outcome) = if self.cps_enabled(org, authorization).await? {
            let entry = self.entry(public_key);
            (
                self.client.post(format!("{map_url}/entries")).json(&entry),
                KvmOutcome::EntryUpdated,
            )
        } else {
            (self.client.post(&map_url).json(&body), KvmOutcome::MapReplaced)
        };

        let status = self.send(Self::authorized(request, authorization)).await?;
        match status {
            StatusCode::CREATED | StatusCode::CONFLICT => {
                info!(org, env, ?outcome, "updated key-value map");
                Ok(outcome)
            }
            other => Err(EnroberError::KvmSync(format!(
                "updating key-value map returned {}",
                other.as_u16()
            ))),
        }
    }

    /// Read the organization's properties and look for the CPS flag.
    async fn cps_enabled(&self, org: &str, authorization: Option<&str>) -> EnroberResult<bool> {
        let url = format!(
            "{}/organizations/{org}",
            self.config.base_url.trim_end_matches('/')
        );
        let response = Self::authorized(self.client.get(&url), authorization)
            .send()
            .await
            .map_err(|e| EnroberError::KvmSync(format!("reading organization {org}: {e}")))?;
        if response.status() != StatusCode::OK {
            return Err(EnroberError::KvmSync(format!(
                "reading organization {org} returned {}",
                response.status().as_u16()
            )));
        }
        let org_info: OrganizationProperties = response
            .json()
            .await
            .map_err(|e| EnroberError::KvmSync(format!("decoding organization {org}: {e}")))?;
        let properties = org_info.properties.ok_or_else(|| {
            EnroberError::KvmSync(format!("organization {org} has no properties"))
        })?;

        Ok(properties
            .property
            .iter()
            .find(|p| p.name == CPS_PROPERTY)
            .is_some_and(|p| p.value.eq_ignore_ascii_case("true")))
    }

    async fn send(&self, request: RequestBuilder) -> EnroberResult<StatusCode> {
        request
            .send()
            .await
            .map(|r| r.status())
            .map_err(|e| EnroberError::KvmSync(e.to_string()))
    }
}
