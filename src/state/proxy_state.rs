use std::fmt;

/// Health state of an egress proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProxyState {
    /// Eligible for assignment
    Active,

    /// Temporarily withdrawn after repeated transient failures
    Cooldown,

    /// Detected or blacklisted by a target; withdrawn until an admin reset
    Banned,
}

impl ProxyState {
    /// Only active proxies may be handed to a worker
    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cooldown => "cooldown",
            Self::Banned => "banned",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cooldown" => Some(Self::Cooldown),
            "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
