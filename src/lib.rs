//! An HTTP proxy that serves Twitter account feeds fetched from Nitter
//! instances.
//!
//! Each request names an account. The proxy tries Nitter instances in turn
//! until one returns the account's RSS feed, rewrites instance-specific links
//! back to twitter.com, and re-serializes the feed as Atom, JSON Feed or RSS.

pub mod account;
pub mod config;
pub mod feed;
pub mod instances;
pub mod rewrite;
pub mod server;
pub mod util;
