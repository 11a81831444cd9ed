use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Promotion lifecycle of a mutation.
///
/// `Proposed → {Certified, Rejected}`, `Certified → {Activated, Rejected}`;
/// `Activated` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionState {
    Proposed,
    Certified,
    Activated,
    Rejected,
}

impl PromotionState {
    pub const ALL: [PromotionState; 4] = [
        PromotionState::Proposed,
        PromotionState::Certified,
        PromotionState::Activated,
        PromotionState::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Certified => "certified",
            Self::Activated => "activated",
            Self::Rejected => "rejected",
        }
    }

    pub fn successors(&self) -> &'static [PromotionState] {
        match self {
            Self::Proposed => &[PromotionState::Certified, PromotionState::Rejected],
            Self::Certified => &[PromotionState::Activated, PromotionState::Rejected],
            Self::Activated | Self::Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: PromotionState) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromotionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proposed" => Ok(Self::Proposed),
            "certified" => Ok(Self::Certified),
            "activated" => Ok(Self::Activated),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown promotion state: {other}")),
        }
    }
}
