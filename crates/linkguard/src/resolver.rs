/// Domain resolution: does a link point somewhere real.
///
/// In production : [`DnsDomainResolver`] (A/AAAA lookup, answers cached).
/// In tests : [`StaticResolver`].
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{ResolveError, TokioResolver};
use lru::LruCache;

const DNS_CACHE_CAPACITY: usize = 1024;

#[async_trait::async_trait]
pub trait DomainResolver: Send + Sync {
    /// True when `domain` has at least one address. Lookup errors are `false`.
    async fn resolves(&self, domain: &str) -> bool;
}

// ── DNS ─────────────────────────────────────────────────────────────────

pub struct DnsDomainResolver {
    resolver: TokioResolver,
    answers: Mutex<LruCache<String, bool>>,
}

impl DnsDomainResolver {
    /// Resolver using the public default upstreams.
    pub fn new() -> Self {
        Self::with_resolver(
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build(),
        )
    }

    /// Resolver configured from the host (`/etc/resolv.conf`).
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        Ok(Self::with_resolver(TokioResolver::builder_tokio()?.build()))
    }

    fn with_resolver(resolver: TokioResolver) -> Self {
        let capacity = NonZeroUsize::new(DNS_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            resolver,
            answers: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for DnsDomainResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DomainResolver for DnsDomainResolver {
    async fn resolves(&self, domain: &str) -> bool {
        let cached = self
            .answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(domain)
            .copied();
        if let Some(answer) = cached {
            return answer;
        }

        // Trailing dot: never expand with local search domains.
        let fqdn = format!("{domain}.");
        let answer = match self.resolver.lookup_ip(fqdn.as_str()).await {
            Ok(lookup) => lookup.iter().next().is_some(),
            Err(e) => {
                tracing::debug!(domain, error = %e, "domain does not resolve");
                false
            }
        };
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(domain.to_string(), answer);
        answer
    }
}

// ── Static ──────────────────────────────────────────────────────────────

/// Resolves a fixed set of domains (and their subdomains), or everything.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    known: HashSet<String>,
    resolve_all: bool,
}

impl StaticResolver {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: domains.into_iter().map(|d| d.into().to_ascii_lowercase()).collect(),
            resolve_all: false,
        }
    }

    /// Every domain resolves.
    pub fn any() -> Self {
        Self {
            known: HashSet::new(),
            resolve_all: true,
        }
    }
}

#[async_trait::async_trait]
impl DomainResolver for StaticResolver {
    async fn resolves(&self, domain: &str) -> bool {
        if self.resolve_all {
            return true;
        }
        let domain = domain.to_ascii_lowercase();
        self.known
            .iter()
            .any(|known| domain == *known || domain.ends_with(&format!(".{known}")))
    }
}
