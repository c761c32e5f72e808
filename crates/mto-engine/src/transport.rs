//! Transportation fee pricing.
//!
//! fee = round2(distance * unit_distance_rate * ceil(quantity / volume_band))

use crate::EngineError;
use mto_core::{round2, ValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rate card for shipping units between tiles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportFeeSchedule {
    /// Monetary rate per unit of distance (>= 0).
    pub unit_distance_rate: Decimal,
    /// Units per volume band (> 0); each started band multiplies the fee.
    pub volume_band: u64,
}

impl Default for TransportFeeSchedule {
    fn default() -> Self {
        Self {
            unit_distance_rate: Decimal::new(1, 1), // 0.1
            volume_band: 100,
        }
    }
}

impl TransportFeeSchedule {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.unit_distance_rate < Decimal::ZERO {
            return Err(ValidationError::NegativeMoney(self.unit_distance_rate).into());
        }
        if self.volume_band == 0 {
            return Err(EngineError::ZeroVolumeBand);
        }
        Ok(())
    }

    /// Number of started volume bands for `quantity` units.
    pub fn volume_multiplier(&self, quantity: u64) -> u64 {
        quantity.div_ceil(self.volume_band)
    }

    /// Fee for shipping `quantity` units over `distance`.
    pub fn fee(&self, distance: Decimal, quantity: u64) -> Result<Decimal, EngineError> {
        self.validate()?;
        if distance < Decimal::ZERO {
            return Err(EngineError::NegativeDistance(distance));
        }
        let base_rate = distance * self.unit_distance_rate;
        let multiplier = Decimal::from(self.volume_multiplier(quantity));
        Ok(round2(base_rate * multiplier))
    }
}

/// Fee under the default schedule (rate 0.1, 100-unit bands).
pub fn transportation_fee(distance: Decimal, quantity: u64) -> Result<Decimal, EngineError> {
    TransportFeeSchedule::default().fee(distance, quantity)
}
