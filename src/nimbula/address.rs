//! Resource Address Builder
//!
//! Every resource lives under `/account/user/localName`. These helpers compose
//! endpoint URLs with those paths without ever producing an empty segment or
//! a doubled separator.

use super::error::{Error, Result};
use std::fmt;

pub const SEPARATOR: char = '/';

/// The account/user pair every caller-owned resource is filed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub account: String,
    pub user: String,
}

impl Namespace {
    pub fn new(account: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
        }
    }

    /// `/account/user`, the prefix of every resource this caller creates
    pub fn prefix(&self) -> String {
        format!("/{}/{}", self.account, self.user)
    }

    /// Full name for a local resource name
    pub fn qualify(&self, local: &str) -> String {
        format!("{}/{}", self.prefix(), local.trim_start_matches(SEPARATOR))
    }
}

/// Append `segment` to `base` with exactly one separator between them
fn join(base: &str, segment: &str) -> String {
    let segment = segment.trim_start_matches(SEPARATOR);
    if base.ends_with(SEPARATOR) {
        format!("{}{}", base, segment)
    } else {
        format!("{}{}{}", base, SEPARATOR, segment)
    }
}

/// Address of an item (or, with no id, of the caller's own collection)
///
/// Rules in order of precedence:
/// 1. an id starting with `/` is absolute under the endpoint root, and `/`
///    alone is the root itself
/// 2. no id means `base/account/user`
/// 3. anything else is appended to `base`
pub fn build_address(base: &str, id: Option<&str>, ns: &Namespace) -> String {
    match id {
        Some(id) if id.starts_with(SEPARATOR) => {
            if id.len() == 1 {
                base.to_string()
            } else {
                join(base, id)
            }
        }
        None => join(&join(base, &ns.account), &ns.user),
        Some(id) => join(base, id),
    }
}

/// Address used for listing everything under an account
///
/// Endpoints ending in `info` are global catalogs and are not scoped by
/// account.
pub fn build_collection_address(base: &str, account: &str) -> String {
    let trimmed = base.trim_end_matches(SEPARATOR);
    if trimmed.ends_with("info") {
        format!("{}{}", trimmed, SEPARATOR)
    } else {
        format!("{}{}", join(trimmed, account), SEPARATOR)
    }
}

/// Address used for directory discovery: `base/account/[sub/]`
pub fn build_discover_address(base: &str, account: &str, sub: Option<&str>) -> String {
    let mut target = join(base, account);
    if let Some(sub) = sub.map(|s| s.trim_matches(SEPARATOR)).filter(|s| !s.is_empty()) {
        target = join(&target, sub);
    }
    target.push(SEPARATOR);
    target
}

/// A parsed `/account/user/localName` identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub account: String,
    pub user: String,
    pub name: String,
}

impl ResourceId {
    /// Split on separators, collapsing duplicates and trimming leading ones
    ///
    /// Anything past the third component belongs to the local name.
    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split(SEPARATOR).filter(|p| !p.is_empty()).collect();
        if parts.len() < 3 {
            return Err(Error::InvalidId(id.to_string()));
        }
        Ok(Self {
            account: parts[0].to_string(),
            user: parts[1].to_string(),
            name: parts[2..].join("/"),
        })
    }

    pub fn owner(&self) -> &str {
        &self.account
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.account.clone(), self.user.clone())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", self.account, self.user, self.name)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
