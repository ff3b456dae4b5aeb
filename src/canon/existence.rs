use serde::{Deserialize, Serialize};

use crate::state::ProjectedState;

/// Survivability class of a projected state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExistenceVerdict {
    Survivable,
    Transitional,
    TerminalSoft,
    TerminalHard,
}

impl ExistenceVerdict {
    /// Only survivable and transitional states may reach the policy stage.
    pub const fn may_proceed(self) -> bool {
        matches!(self, Self::Survivable | Self::Transitional)
    }

    pub const fn is_terminal(self) -> bool {
        !self.may_proceed()
    }
}

use ExistenceVerdict::{Survivable, TerminalHard, TerminalSoft, Transitional};

/// Verdict for every projected state, indexed by code (`h1` is the least
/// significant bit). The array length is the state space, so a missing row
/// fails to compile.
///
/// Bits `h2..h5` all clear means nothing interactive is reachable: terminal,
/// hard when the app is also outside the allowlist. Otherwise internal
/// support `h1+h2+h3` at least matching external pressure `h4+h5+h6` is
/// survivable, anything less is transitional.
#[rustfmt::skip]
pub const EXISTENCE_TABLE: [ExistenceVerdict; ProjectedState::SPACE] = [
    /* 00 0b000000 */ TerminalHard,
    /* 01 0b000001 */ TerminalSoft,
    /* 02 0b000010 */ Survivable,
    /* 03 0b000011 */ Survivable,
    /* 04 0b000100 */ Survivable,
    /* 05 0b000101 */ Survivable,
    /* 06 0b000110 */ Survivable,
    /* 07 0b000111 */ Survivable,
    /* 08 0b001000 */ Transitional,
    /* 09 0b001001 */ Survivable,
    /* 10 0b001010 */ Survivable,
    /* 11 0b001011 */ Survivable,
    /* 12 0b001100 */ Survivable,
    /* 13 0b001101 */ Survivable,
    /* 14 0b001110 */ Survivable,
    /* 15 0b001111 */ Survivable,
    /* 16 0b010000 */ Transitional,
    /* 17 0b010001 */ Survivable,
    /* 18 0b010010 */ Survivable,
    /* 19 0b010011 */ Survivable,
    /* 20 0b010100 */ Survivable,
    /* 21 0b010101 */ Survivable,
    /* 22 0b010110 */ Survivable,
    /* 23 0b010111 */ Survivable,
    /* 24 0b011000 */ Transitional,
    /* 25 0b011001 */ Transitional,
    /* 26 0b011010 */ Transitional,
    /* 27 0b011011 */ Survivable,
    /* 28 0b011100 */ Transitional,
    /* 29 0b011101 */ Survivable,
    /* 30 0b011110 */ Survivable,
    /* 31 0b011111 */ Survivable,
    /* 32 0b100000 */ TerminalHard,
    /* 33 0b100001 */ TerminalSoft,
    /* 34 0b100010 */ Survivable,
    /* 35 0b100011 */ Survivable,
    /* 36 0b100100 */ Survivable,
    /* 37 0b100101 */ Survivable,
    /* 38 0b100110 */ Survivable,
    /* 39 0b100111 */ Survivable,
    /* 40 0b101000 */ Transitional,
    /* 41 0b101001 */ Transitional,
    /* 42 0b101010 */ Transitional,
    /* 43 0b101011 */ Survivable,
    /* 44 0b101100 */ Transitional,
    /* 45 0b101101 */ Survivable,
    /* 46 0b101110 */ Survivable,
    /* 47 0b101111 */ Survivable,
    /* 48 0b110000 */ Transitional,
    /* 49 0b110001 */ Transitional,
    /* 50 0b110010 */ Transitional,
    /* 51 0b110011 */ Survivable,
    /* 52 0b110100 */ Transitional,
    /* 53 0b110101 */ Survivable,
    /* 54 0b110110 */ Survivable,
    /* 55 0b110111 */ Survivable,
    /* 56 0b111000 */ Transitional,
    /* 57 0b111001 */ Transitional,
    /* 58 0b111010 */ Transitional,
    /* 59 0b111011 */ Transitional,
    /* 60 0b111100 */ Transitional,
    /* 61 0b111101 */ Transitional,
    /* 62 0b111110 */ Transitional,
    /* 63 0b111111 */ Survivable,
];

/// The rule the table was generated from. Kept for table verification and
/// the `table` CLI listing.
pub const fn derive_verdict(code: u8) -> ExistenceVerdict {
    const fn bit(code: u8, i: u8) -> u8 {
        (code >> i) & 1
    }

    if code & 0b01_1110 == 0 {
        if bit(code, 0) == 0 {
            TerminalHard
        } else {
            TerminalSoft
        }
    } else if bit(code, 0) + bit(code, 1) + bit(code, 2) >= bit(code, 3) + bit(code, 4) + bit(code, 5)
    {
        Survivable
    } else {
        Transitional
    }
}
