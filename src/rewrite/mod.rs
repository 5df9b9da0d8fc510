//! URL rewriting for feeds fetched from Nitter instances.
//!
//! Different instances serve the same tweets under different hosts and with
//! different link encodings. Everything here maps those links back onto the
//! Twitter hosts so that readers see identical items no matter which instance
//! produced them.
//!
//! - `rules` - the ordered pattern pipeline applied to item bodies
//! - `canonical` - whole-URL rewrites for feed/item links and profile images
//!
//! Nothing in this module performs I/O. Malformed input is passed through
//! unchanged rather than reported as an error.

mod canonical;
mod rules;

pub use canonical::{canonicalize_icon, canonicalize_link, CANONICAL_HOST};
pub use rules::{rewrite, rewrite_with_source, rules, RewriteRule, RuleKind, RULE_ORDER};
