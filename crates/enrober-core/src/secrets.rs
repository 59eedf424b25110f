//! Routing credentials.
//!
//! Every environment owns one `routing` secret carrying a public and a
//! private API key: 32 bytes from the operating system's CSPRNG, base64url
//! encoded. There is no fallback generator; if the OS cannot supply
//! randomness the request fails.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use enrober_state::{ObjectMeta, Secret};

use crate::error::{EnroberError, EnroberResult};

/// Name of the per-environment secret.
pub const ROUTING_SECRET_NAME: &str = "routing";
pub const PUBLIC_KEY_FIELD: &str = "public-api-key";
pub const PRIVATE_KEY_FIELD: &str = "private-api-key";

/// Raw key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Fill `length` bytes from the OS CSPRNG.
pub fn generate_bytes(length: usize) -> EnroberResult<Vec<u8>> {
    let mut buf = vec![0u8; length];
    getrandom::getrandom(&mut buf).map_err(|e| EnroberError::Entropy(e.to_string()))?;
    Ok(buf)
}

/// A base64url token over `length` random bytes.
pub fn generate_token(length: usize) -> EnroberResult<String> {
    Ok(URL_SAFE.encode(generate_bytes(length)?))
}

/// The two key components of a routing secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKeys {
    pub public_key: String,
    pub private_key: String,
}

/// Which keys a patch asks to regenerate. `true` means "replace".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Regenerate {
    pub public: bool,
    pub private: bool,
}

impl RoutingKeys {
    /// Fresh public and private keys.
    pub fn generate() -> EnroberResult<Self> {
        Ok(Self {
            public_key: generate_token(KEY_LENGTH)?,
            private_key: generate_token(KEY_LENGTH)?,
        })
    }

    /// Read the keys back out of a stored secret. A missing component comes
    /// back empty.
    pub fn from_secret(secret: &Secret) -> Self {
        let field = |name: &str| secret.data.get(name).cloned().unwrap_or_default();
        Self {
            public_key: field(PUBLIC_KEY_FIELD),
            private_key: field(PRIVATE_KEY_FIELD),
        }
    }

    pub fn to_secret(&self, namespace: &str) -> Secret {
        let mut data = BTreeMap::new();
        data.insert(PUBLIC_KEY_FIELD.to_string(), self.public_key.clone());
        data.insert(PRIVATE_KEY_FIELD.to_string(), self.private_key.clone());
        Secret {
            metadata: ObjectMeta::namespaced(namespace, ROUTING_SECRET_NAME),
            data,
            secret_type: "Opaque".to_string(),
        }
    }

    /// Apply a patch: regenerate the requested components and any that are
    /// missing; everything else is kept byte for byte.
    pub fn rotate(&self, regenerate: Regenerate) -> EnroberResult<Self> {
        let next = |current: &str, requested: bool| -> EnroberResult<String> {
            if requested || current.is_empty() {
                generate_token(KEY_LENGTH)
            } else {
                Ok(current.to_string())
            }
        };
        Ok(Self {
            public_key: next(&self.public_key, regenerate.public)?,
            private_key: next(&self.private_key, regenerate.private)?,
        })
    }
}
