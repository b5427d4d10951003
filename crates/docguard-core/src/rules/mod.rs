mod blocklist;
mod filter;

pub use blocklist::{Blocklist, BlocklistTerm};
pub use filter::{
    RuleFilter, RuleVerdict, FLAG_BLOCKLISTED, FLAG_BLOCKLIST_HITS, FLAG_EXCESSIVE_CAPS,
    FLAG_EXCESSIVE_LINKS, FLAG_EXECUTABLE, FLAG_EXTENSION_MISMATCH, FLAG_NEAR_EMPTY,
    FLAG_NEAR_MISS, FLAG_REPEATED_CHARS,
};
