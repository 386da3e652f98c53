//! Hash-based selection for cache and session affinity.

use sha2::{Digest, Sha256};

use crate::load_balancer::backend::BackendRef;
use crate::load_balancer::context::RequestContext;
use crate::load_balancer::pool::pick_weighted;
use crate::load_balancer::{LoadBalancer, Member};

/// Maps a request key to a fixed point in `[0, 1)` and picks by weight.
///
/// The key is the value of the configured header, or the request path when no
/// header is configured or the request lacks it. The same key lands on the same
/// backend for as long as membership, weights and health stay put.
#[derive(Debug, Clone, Default)]
pub struct HashSelect {
    header: Option<String>,
}

impl HashSelect {
    pub fn new(header: Option<String>) -> Self {
        Self {
            header: header.filter(|h| !h.is_empty()),
        }
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    fn key<'a>(&self, ctx: &'a RequestContext) -> &'a str {
        self.header
            .as_deref()
            .and_then(|name| ctx.header(name))
            .unwrap_or_else(|| ctx.path())
    }
}

/// First 32 bits of the SHA-256 digest, scaled to `[0, 1)`.
pub fn hash_draw(key: &str) -> f64 {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(prefix) / 4_294_967_296.0
}

impl LoadBalancer for HashSelect {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn next_server(&self, members: &[Member], ctx: &RequestContext) -> Option<BackendRef> {
        pick_weighted(members, hash_draw(self.key(ctx)))
    }
}
