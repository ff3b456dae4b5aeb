//! Validity projection: snapshot transitions onto the 6-bit state space.
//!
//! Everything here is pure. No I/O, no clock, no randomness.

use serde::{Deserialize, Serialize};

use super::Snapshot;
use crate::canon::{Canon, EXISTENCE_TABLE, ExistenceVerdict};

/// The six independent flags, in bit order (`h1` is bit 0).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateFlag {
    AppAllowed,
    InteractiveRole,
    LabelPresent,
    Focused,
    Enabled,
    Stable,
}

impl StateFlag {
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A code in the closed 64-state space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ProjectedState(u8);

impl ProjectedState {
    pub const SPACE: usize = 64;
    const MASK: u8 = 0b11_1111;

    pub const fn new(code: u8) -> Option<Self> {
        if code <= Self::MASK {
            Some(Self(code))
        } else {
            None
        }
    }

    pub const fn code(self) -> u8 {
        self.0
    }

    pub const fn has(self, flag: StateFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Flags as the string `h1..h6`, e.g. `"110111"`.
    pub fn flags_string(self) -> String {
        (0..6)
            .map(|i| if (self.0 >> i) & 1 == 1 { '1' } else { '0' })
            .collect()
    }
}

impl TryFrom<u8> for ProjectedState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::new(code).ok_or_else(|| format!("projected state {code} outside 0..64"))
    }
}

impl From<ProjectedState> for u8 {
    fn from(state: ProjectedState) -> Self {
        state.0
    }
}

impl std::fmt::Display for ProjectedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}[{}]", self.0, self.flags_string())
    }
}

/// Externally observed change, as a mask of flags it flips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta {
    #[serde(deserialize_with = "deserialize_mask")]
    mask: u8,
}

fn deserialize_mask<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mask = u8::deserialize(deserializer)?;
    if mask > ProjectedState::MASK {
        return Err(serde::de::Error::custom(format!(
            "delta mask {mask} outside 0..64"
        )));
    }
    Ok(mask)
}

impl Delta {
    pub const NONE: Self = Self { mask: 0 };

    pub fn new(mask: u8) -> Option<Self> {
        (mask <= ProjectedState::MASK).then_some(Self { mask })
    }

    pub fn from_flags(flags: &[StateFlag]) -> Self {
        Self {
            mask: flags.iter().fold(0, |acc, f| acc ^ f.bit()),
        }
    }

    /// The delta that carries `prev` onto `next`.
    pub fn between(canon: &Canon, prev: &Snapshot, next: &Snapshot) -> Self {
        Self {
            mask: encode(canon, prev).code() ^ encode(canon, next).code(),
        }
    }

    pub const fn mask(self) -> u8 {
        self.mask
    }
}

/// Flags of a single snapshot against the canon.
pub fn encode(canon: &Canon, snapshot: &Snapshot) -> ProjectedState {
    let flags = [
        (StateFlag::AppAllowed, canon.is_allowed_app(&snapshot.app)),
        (
            StateFlag::InteractiveRole,
            canon.is_interactive_role(&snapshot.role),
        ),
        (StateFlag::LabelPresent, !snapshot.label.is_empty()),
        (StateFlag::Focused, snapshot.focused),
        (StateFlag::Enabled, snapshot.enabled),
        (StateFlag::Stable, snapshot.stable),
    ];
    let code = flags
        .iter()
        .filter(|(_, set)| *set)
        .fold(0u8, |acc, (flag, _)| acc | flag.bit());
    ProjectedState(code)
}

/// `Snapshot × Delta → ProjectedState`.
pub fn project(canon: &Canon, prev: &Snapshot, delta: Delta) -> ProjectedState {
    ProjectedState(encode(canon, prev).code() ^ delta.mask)
}

/// Constant-time table lookup over the full state space.
pub fn classify(state: ProjectedState) -> ExistenceVerdict {
    EXISTENCE_TABLE[usize::from(state.code())]
}
