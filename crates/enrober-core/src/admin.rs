//! Organization admin gate for mutating operations in hardened mode.

use reqwest::{Client, StatusCode, header};
use tracing::warn;

use crate::config::AdminConfig;
use crate::error::{EnroberError, EnroberResult};

pub struct AdminGate<'a> {
    client: &'a Client,
    config: &'a AdminConfig,
    enabled: bool,
}

impl<'a> AdminGate<'a> {
    pub fn new(client: &'a Client, config: &'a AdminConfig, enabled: bool) -> Self {
        Self {
            client,
            config,
            enabled,
        }
    }

    /// Ask the identity service whether the caller administers `org`.
    pub async fn check(&self, org: &str, authorization: Option<&str>) -> EnroberResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(auth) = authorization else {
            warn!(org, "mutating request without credentials");
            return Err(EnroberError::MissingCredentials);
        };

        let url = format!("{}/{org}/adminCheck", self.config.check_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| EnroberError::AdminCheck(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(org, "caller is not an org admin");
                Err(EnroberError::Forbidden(org.to_string()))
            }
            other => Err(EnroberError::AdminCheck(format!(
                "identity service returned {}",
                other.as_u16()
            ))),
        }
    }
}
