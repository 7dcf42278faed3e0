//! # Confidence Module
//!
//! Fixed-point probabilities and weights for graph elements.
//!
//! - `Confidence` maps `[0, 255]` onto `[0, 1]`
//! - `Weight` uses the same scale for edge strength
//! - Rule scores are carried in per-mille (`0..=1000`)
//!
//! All arithmetic is integer and saturating, so derived values stay in range.

use serde::{Deserialize, Serialize};

/// Upper bound of per-mille quantities.
pub const PER_MILLE: u16 = 1000;

/// Fixed-point probability in `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Confidence(pub u8);

impl Confidence {
    pub const CERTAIN: Self = Self(u8::MAX);
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Convert a per-mille value, clamping above 1000.
    #[must_use]
    pub fn from_per_mille(per_mille: u16) -> Self {
        let pm = u32::from(per_mille.min(PER_MILLE));
        // round half up
        Self(((pm * 255 + 500) / 1000) as u8)
    }

    #[must_use]
    pub fn per_mille(self) -> u16 {
        ((u32::from(self.0) * 1000 + 127) / 255) as u16
    }

    /// Scale by a per-mille factor.
    #[must_use]
    pub fn scale_per_mille(self, per_mille: u16) -> Self {
        let pm = u32::from(per_mille.min(PER_MILLE));
        Self(((u32::from(self.0) * pm) / 1000) as u8)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::CERTAIN
    }
}

/// Fixed-point edge weight in `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Weight(pub u8);

impl Weight {
    pub const FULL: Self = Self(u8::MAX);

    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl Default for Weight {
    fn default() -> Self {
        Self::FULL
    }
}

/// Confidence of an element derived by a rule.
///
/// The weakest bound antecedent caps the result, which is then scaled by the
/// rule's precision. No antecedents means the rule precision alone.
#[must_use]
pub fn derive_confidence(
    antecedents: impl IntoIterator<Item = Confidence>,
    precision_per_mille: u16,
) -> Confidence {
    let floor = antecedents
        .into_iter()
        .min()
        .unwrap_or(Confidence::CERTAIN);
    floor.scale_per_mille(precision_per_mille)
}

/// Ranking key of a rule: `precision × support`, saturating.
#[must_use]
pub fn rule_strength(precision_per_mille: u16, support: u32) -> u64 {
    u64::from(precision_per_mille.min(PER_MILLE)).saturating_mul(u64::from(support))
}

// =============================================================================
// TESTS
// =============================================================================
