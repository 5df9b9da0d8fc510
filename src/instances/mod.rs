//! Nitter instance registries.
//!
//! An [`InstanceRegistry`] hands out the ordered list of mirrors to try for
//! a request. Two providers exist:
//!
//! - [`StaticRegistry`] - a fixed, comma-separated list from configuration
//! - [`WikiRegistry`] - instances scraped from the Nitter wiki, re-scraped and
//!   health-probed in the background
//!
//! [`Prober`] measures instance liveness and latency for the wiki provider.

mod prober;
mod static_list;
mod wiki;

pub use prober::{ProbeResult, Prober};
pub use static_list::StaticRegistry;
pub use wiki::{
    parse_directory, Candidate, DiscoveryError, WikiConfig, WikiRegistry, DEFAULT_REPO,
    DEFAULT_ROW_SELECTOR,
};

use crate::account::AccountPath;
use crate::util::UrlValidationError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors raised while constructing a registry.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The configured list contained no usable instance.
    #[error("no instances supplied")]
    NoInstances,
    /// One configured instance is not a usable http(s) URL.
    #[error("failed parsing instance {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlValidationError,
    },
}

/// An upstream Nitter mirror, identified by its base URL.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Instance {
    url: Url,
}

impl Instance {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URL of `account`'s RSS feed on this instance: the base path joined with
    /// the account path and `rss`.
    pub fn feed_url(&self, account: &AccountPath) -> Url {
        let mut url = self.url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}/rss", base, account.as_str()));
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Liveness of one instance as last observed by a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceHealth {
    pub alive: bool,
    pub latency_ms: u64,
}

/// Source of candidate instances for the fetcher.
///
/// Implementations must be cheap to call: both methods are invoked once per
/// incoming request and must not perform I/O.
pub trait InstanceRegistry: Send + Sync {
    /// Every known instance, in provider order.
    fn all_instances(&self) -> Vec<Arc<Instance>>;

    /// Instances currently believed to be healthy.
    fn active_instances(&self) -> Vec<Arc<Instance>>;
}
