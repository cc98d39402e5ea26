//! Activity categories.
//!
//! The member list is configuration data (see `settings::CategorySettings`).
//! A `Category` can only be obtained through a `CategorySet`, so any value
//! that reaches the database is a known member or the catch-all.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Rehydrates a category previously written by this crate.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    members: Vec<String>,
    catch_all: String,
}

/// Result of mapping a raw model answer onto the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coerced {
    Known(Category),
    Fallback { raw: String, category: Category },
}

impl Coerced {
    pub fn category(&self) -> &Category {
        match self {
            Coerced::Known(category) => category,
            Coerced::Fallback { category, .. } => category,
        }
    }

    pub fn into_category(self) -> Category {
        match self {
            Coerced::Known(category) => category,
            Coerced::Fallback { category, .. } => category,
        }
    }
}

impl CategorySet {
    pub fn new(members: Vec<String>, catch_all: impl Into<String>) -> Result<Self> {
        let catch_all = catch_all.into();
        let mut normalized: Vec<String> = Vec::with_capacity(members.len() + 1);
        for member in members {
            let member = member.trim().to_string();
            if member.is_empty() {
                bail!("category names must not be empty");
            }
            if !normalized.contains(&member) {
                normalized.push(member);
            }
        }

        if catch_all.trim().is_empty() {
            bail!("catch-all category must not be empty");
        }
        let catch_all = catch_all.trim().to_string();
        if !normalized.contains(&catch_all) {
            normalized.push(catch_all.clone());
        }

        Ok(Self {
            members: normalized,
            catch_all,
        })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn contains(&self, value: &str) -> bool {
        self.members.iter().any(|member| member == value)
    }

    pub fn catch_all(&self) -> Category {
        Category(self.catch_all.clone())
    }

    /// Exact-match lookup; anything unknown maps to the catch-all.
    pub fn coerce(&self, raw: &str) -> Coerced {
        let trimmed = raw.trim();
        if self.contains(trimmed) {
            Coerced::Known(Category(trimmed.to_string()))
        } else {
            Coerced::Fallback {
                raw: raw.to_string(),
                category: self.catch_all(),
            }
        }
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self {
            members: [
                "PC_WORK",
                "GAMING",
                "SLEEPING",
                "USING_SMARTPHONE",
                "AWAY",
                "OTHER",
            ]
            .iter()
            .map(|name| name.to_string())
            .collect(),
            catch_all: "OTHER".into(),
        }
    }
}
