//! Pod template resolution.
//!
//! A template comes from the request body, from a URL, or (on update) from
//! the deployment being replaced, in that order. URL fetches forward the
//! caller's `Authorization` header and are never retried.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use enrober_state::PodTemplate;
use reqwest::{Client, StatusCode, header};
use tracing::{debug, warn};
use url::{Position, Url};

use crate::RequestContext;
use crate::config::PodTemplateConfig;
use crate::error::{EnroberError, EnroberResult};

pub struct TemplateResolver<'a> {
    client: &'a Client,
    config: &'a PodTemplateConfig,
    hardened: bool,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(client: &'a Client, config: &'a PodTemplateConfig, hardened: bool) -> Self {
        Self {
            client,
            config,
            hardened,
        }
    }

    /// Pick the template for a request.
    ///
    /// `previous` is the stored template of the deployment being updated and
    /// is `None` on the create path, where having neither `direct` nor `url`
    /// is an error.
    pub async fn resolve(
        &self,
        direct: Option<PodTemplate>,
        url: Option<&str>,
        previous: Option<&PodTemplate>,
        ctx: &RequestContext,
    ) -> EnroberResult<PodTemplate> {
        if let Some(template) = direct {
            return Ok(template);
        }
        if let Some(url) = url {
            return self.fetch(url, ctx).await;
        }
        previous.cloned().ok_or(EnroberError::MissingTemplate)
    }

    /// GET a template from `raw_url`.
    pub async fn fetch(&self, raw_url: &str, ctx: &RequestContext) -> EnroberResult<PodTemplate> {
        let url = Url::parse(raw_url)
            .map_err(|e| EnroberError::InvalidBody(format!("invalid ptsURL {raw_url}: {e}")))?;
        let authority = authority(&url);

        if self.hardened && authority != ctx.host {
            warn!(host = %authority, expected = %ctx.host, "rejecting pod template from foreign host");
            return Err(EnroberError::UnauthorizedOrigin {
                host: authority,
                expected: ctx.host.clone(),
            });
        }

        let internal = !self.config.shipyard_host.is_empty() && authority == self.config.shipyard_host;
        let target = if internal {
            format!(
                "http://{}{}",
                self.config.internal_router_host,
                &url[Position::BeforePath..]
            )
        } else {
            url.to_string()
        };

        let mut request = self
            .client
            .get(&target)
            .header(header::CONTENT_TYPE, "application/json");
        if internal {
            let key = STANDARD.encode(self.config.shipyard_private_secret.as_bytes());
            request = request
                .header(header::HOST, &self.config.shipyard_host)
                .header(self.config.routing_key_header.as_str(), key);
        }
        if let Some(auth) = &ctx.authorization {
            request = request.header(header::AUTHORIZATION, auth);
        }

        debug!(url = %target, internal, "fetching pod template");
        let response = request
            .send()
            .await
            .map_err(|e| EnroberError::Fetch(format!("retrieving pod template: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(EnroberError::Fetch(format!(
                "expected 200 from ptsURL, got {}",
                status.as_u16()
            )));
        }

        response
            .json::<PodTemplate>()
            .await
            .map_err(|e| EnroberError::Fetch(format!("decoding pod template: {e}")))
    }
}

/// `host[:port]` as it would appear in a `Host` header.
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Reject templates that ask for privileged containers.
pub fn ensure_unprivileged(template: &PodTemplate) -> EnroberResult<()> {
    match template.spec.containers.iter().find(|c| c.is_privileged()) {
        Some(container) => Err(EnroberError::PrivilegedContainer(container.name.clone())),
        None => Ok(()),
    }
}
