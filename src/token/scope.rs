use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::token::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScopeCategory {
    ActivityPub,
    Admin,
    Misc,
    Notification,
    Organization,
    Package,
    Issue,
    Repository,
    User,
}

impl ScopeCategory {
    pub const ALL: [ScopeCategory; 9] = [
        ScopeCategory::ActivityPub,
        ScopeCategory::Admin,
        ScopeCategory::Misc,
        ScopeCategory::Notification,
        ScopeCategory::Organization,
        ScopeCategory::Package,
        ScopeCategory::Issue,
        ScopeCategory::Repository,
        ScopeCategory::User,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeCategory::ActivityPub => "activitypub",
            ScopeCategory::Admin => "admin",
            ScopeCategory::Misc => "misc",
            ScopeCategory::Notification => "notification",
            ScopeCategory::Organization => "organization",
            ScopeCategory::Package => "package",
            ScopeCategory::Issue => "issue",
            ScopeCategory::Repository => "repository",
            ScopeCategory::User => "user",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Access level within a category. Each level implies the ones below it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeLevel {
    #[default]
    NoAccess,
    Read,
    Write,
    Delete,
}

impl ScopeLevel {
    fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::NoAccess => "none",
            ScopeLevel::Read => "read",
            ScopeLevel::Write => "write",
            ScopeLevel::Delete => "delete",
        }
    }
}

/// Normalized permission set carried by a personal access token or an OAuth2 grant.
///
/// Text form is a comma separated list such as `public-only,read:repository,write:issue`;
/// `all` grants every category at the delete level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AccessTokenScope {
    public_only: bool,
    levels: [ScopeLevel; 9],
}

impl AccessTokenScope {
    pub fn all() -> Self {
        Self {
            public_only: false,
            levels: [ScopeLevel::Delete; 9],
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        let mut scope = Self::default();

        for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            if item == "all" {
                scope.levels = [ScopeLevel::Delete; 9];
                continue;
            }
            if item == "public-only" {
                scope.public_only = true;
                continue;
            }

            let invalid = || Error::InvalidScope(item.to_string());
            let (level, name) = item.split_once(':').ok_or_else(invalid)?;
            let level = match level {
                "read" => ScopeLevel::Read,
                "write" => ScopeLevel::Write,
                "delete" => ScopeLevel::Delete,
                _ => return Err(invalid()),
            };
            let category = ScopeCategory::ALL
                .into_iter()
                .find(|category| category.as_str() == name)
                .ok_or_else(invalid)?;

            let slot = &mut scope.levels[category.index()];
            *slot = (*slot).max(level);
        }

        Ok(scope)
    }

    pub fn is_public_only(&self) -> bool {
        self.public_only
    }

    pub fn level(&self, category: ScopeCategory) -> ScopeLevel {
        self.levels[category.index()]
    }

    pub fn has(&self, category: ScopeCategory, level: ScopeLevel) -> bool {
        self.level(category) >= level
    }

    pub fn is_empty(&self) -> bool {
        !self.public_only && self.levels.iter().all(|level| *level == ScopeLevel::NoAccess)
    }
}

impl FromStr for AccessTokenScope {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for AccessTokenScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut items = Vec::new();
        if self.public_only {
            items.push("public-only".to_string());
        }

        if self.levels.iter().all(|level| *level == ScopeLevel::Delete) {
            items.push("all".to_string());
        } else {
            for category in ScopeCategory::ALL {
                let level = self.level(category);
                if level != ScopeLevel::NoAccess {
                    items.push(format!("{}:{}", level.as_str(), category.as_str()));
                }
            }
        }

        write!(f, "{}", items.join(","))
    }
}

impl Serialize for AccessTokenScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccessTokenScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}
