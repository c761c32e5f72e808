//! Product-formula validation capability.
//!
//! The simulator asks an oracle whether each delivered unit satisfies the
//! requirement's formula. Real formula matching lives outside the engine.

use mto_core::{DeliveryId, FormulaId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Reference to one unit within a delivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub delivery_id: DeliveryId,
    pub unit_index: u64,
}

/// Decides whether a unit conforms to a product formula.
pub trait ProductOracle {
    fn validate(&self, unit: &UnitRef, formula: &FormulaId) -> bool;
}

impl<F> ProductOracle for F
where
    F: Fn(&UnitRef, &FormulaId) -> bool,
{
    fn validate(&self, unit: &UnitRef, formula: &FormulaId) -> bool {
        self(unit, formula)
    }
}

/// Accepts every unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl ProductOracle for AcceptAll {
    fn validate(&self, _unit: &UnitRef, _formula: &FormulaId) -> bool {
        true
    }
}

/// Stand-in oracle accepting units with a fixed probability.
///
/// The decision for a unit is a pure function of the seed, the unit and the
/// formula, so repeated runs agree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeededOracle {
    pub seed: u64,
    /// Probability in [0, 1] that a unit passes.
    pub acceptance_rate: f64,
}

impl SeededOracle {
    pub fn new(seed: u64, acceptance_rate: f64) -> Self {
        Self {
            seed,
            acceptance_rate,
        }
    }

    fn unit_seed(&self, unit: &UnitRef, formula: &FormulaId) -> u64 {
        // FNV-1a over the unit identity; stable across platforms and builds.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325 ^ self.seed;
        let mut feed = |bytes: &[u8]| {
            for b in bytes {
                h ^= u64::from(*b);
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        feed(unit.delivery_id.as_str().as_bytes());
        feed(&[0xff]);
        feed(&unit.unit_index.to_le_bytes());
        feed(formula.as_str().as_bytes());
        h
    }
}

impl ProductOracle for SeededOracle {
    fn validate(&self, unit: &UnitRef, formula: &FormulaId) -> bool {
        let p = self.acceptance_rate;
        if !p.is_finite() || p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.unit_seed(unit, formula));
        rng.gen_bool(p)
    }
}
