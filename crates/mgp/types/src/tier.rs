use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent trust tier. Lower values are more trusted and more tightly governed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Production,
    Stable,
    Sandbox,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Production, Tier::Stable, Tier::Sandbox];

    pub fn value(&self) -> u8 {
        match self {
            Self::Production => 0,
            Self::Stable => 1,
            Self::Sandbox => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Production => "PRODUCTION",
            Self::Stable => "STABLE",
            Self::Sandbox => "SANDBOX",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRODUCTION" => Ok(Self::Production),
            "STABLE" => Ok(Self::Stable),
            "SANDBOX" => Ok(Self::Sandbox),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Rule enforcement severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocking,
    Warning,
    Advisory,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Blocking, Severity::Warning, Severity::Advisory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Warning => "warning",
            Self::Advisory => "advisory",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(Self::Blocking),
            "warning" => Ok(Self::Warning),
            "advisory" => Ok(Self::Advisory),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

const PRODUCTION_KEYWORDS: [&str; 4] = ["runtime", "security", "main", "orchestrator"];

/// Classify an agent into a trust tier from its identifier.
///
/// A forced tier (operator override) always wins.
pub fn determine_tier(agent_id: &str, forced: Option<Tier>) -> Tier {
    if let Some(tier) = forced {
        return tier;
    }
    let lower = agent_id.to_ascii_lowercase();
    if lower.contains("test_subject") || lower.contains("sandbox") {
        return Tier::Sandbox;
    }
    if PRODUCTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Tier::Production;
    }
    Tier::Stable
}
