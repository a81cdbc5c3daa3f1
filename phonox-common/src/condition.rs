//! Goldmine condition grading scale
//!
//! Vinyl condition grades, best to worst: M, NM, VG+, VG, G+, G, F, P.
//! The ordering is total; multi-image merging takes the worst grade seen.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Goldmine condition grade
///
/// Variants are declared worst-to-best so the derived `Ord` ranks better
/// grades greater. Pessimistic merging is therefore `min`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub enum Condition {
    /// Poor
    P,
    /// Fair
    F,
    /// Good
    G,
    /// Good Plus
    GPlus,
    /// Very Good
    Vg,
    /// Very Good Plus
    VgPlus,
    /// Near Mint
    Nm,
    /// Mint
    M,
}

impl Condition {
    /// Canonical internal spelling (persistence and evidence payloads key on these)
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::M => "M",
            Condition::Nm => "NM",
            Condition::VgPlus => "VG+",
            Condition::Vg => "VG",
            Condition::GPlus => "G+",
            Condition::G => "G",
            Condition::F => "F",
            Condition::P => "P",
        }
    }

    /// User-visible spelling
    pub fn display_label(&self) -> &'static str {
        match self {
            Condition::M => "Mint (M)",
            Condition::Nm => "Near Mint (NM)",
            Condition::VgPlus => "VG+",
            Condition::Vg => "VG",
            Condition::GPlus => "G+",
            Condition::G => "G",
            Condition::F => "F",
            Condition::P => "P",
        }
    }

    /// Pessimistic merge: the worse of two grades
    pub fn worse(self, other: Condition) -> Condition {
        self.min(other)
    }

    /// All grades, best to worst
    pub fn all() -> [Condition; 8] {
        [
            Condition::M,
            Condition::Nm,
            Condition::VgPlus,
            Condition::Vg,
            Condition::GPlus,
            Condition::G,
            Condition::F,
            Condition::P,
        ]
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = crate::Error;

    /// Accepts canonical (`NM`) and long user-visible (`Near Mint (NM)`) forms
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        let grade = match normalized {
            "M" | "Mint" | "Mint (M)" => Condition::M,
            "NM" | "Near Mint" | "Near Mint (NM)" | "NM-" => Condition::Nm,
            "VG+" | "Very Good Plus" | "Very Good Plus (VG+)" => Condition::VgPlus,
            "VG" | "Very Good" | "Very Good (VG)" => Condition::Vg,
            "G+" | "Good Plus" | "Good Plus (G+)" => Condition::GPlus,
            "G" | "Good" | "Good (G)" => Condition::G,
            "F" | "Fair" | "Fair (F)" => Condition::F,
            "P" | "Poor" | "Poor (P)" => Condition::P,
            other => {
                return Err(crate::Error::InvalidInput(format!(
                    "Unrecognized condition grade: {}",
                    other
                )))
            }
        };
        Ok(grade)
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> String {
        c.as_str().to_string()
    }
}

impl TryFrom<String> for Condition {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
