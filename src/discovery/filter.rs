//! Tag and status filtering for discovered accounts.
//!
//! Tag patterns support `*` (zero or more characters) and `?` (exactly
//! one) on both the key and the value, compiled through `glob::Pattern`.
//! The match mode selects conjunctive or disjunctive combination across
//! the pattern set.

use glob::Pattern;

use super::client::AccountInfo;
use crate::config::{TagGlob, TagMatchMode};
use crate::errors::Result;

/// A compiled tag glob pair
#[derive(Debug)]
pub struct CompiledTagGlob {
    key: Pattern,
    value: Pattern,
}

impl CompiledTagGlob {
    pub fn compile(glob: &TagGlob) -> Result<Self> {
        Ok(Self { key: Pattern::new(&glob.key)?, value: Pattern::new(&glob.value)? })
    }

    /// Whether any of the account's tags satisfies this pattern pair
    pub fn matches(&self, account: &AccountInfo) -> bool {
        account
            .tags
            .iter()
            .any(|(key, value)| self.key.matches(key) && self.value.matches(value))
    }
}

/// Compile a set of tag globs up front so invalid patterns fail the run
/// instead of silently matching nothing
pub fn compile_tag_globs(globs: &[TagGlob]) -> Result<Vec<CompiledTagGlob>> {
    globs.iter().map(CompiledTagGlob::compile).collect()
}

/// Apply compiled tag patterns under the given match mode
pub fn matches_tags(
    account: &AccountInfo,
    compiled: &[CompiledTagGlob],
    mode: TagMatchMode,
) -> bool {
    if compiled.is_empty() {
        return true;
    }
    match mode {
        TagMatchMode::And => compiled.iter().all(|glob| glob.matches(account)),
        TagMatchMode::Or => compiled.iter().any(|glob| glob.matches(account)),
    }
}

/// Apply the status filter; an empty allow-list accepts everything
pub fn matches_status(account: &AccountInfo, status_in: &[String]) -> bool {
    status_in.is_empty() || status_in.iter().any(|s| s.eq_ignore_ascii_case(&account.status))
}
