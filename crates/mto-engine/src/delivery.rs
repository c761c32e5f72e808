//! Pre-ledger checks for a proposed delivery.

use chrono::{DateTime, Utc};
use mto_core::{LocationId, MtoRequirement, PayerId, TileRequirement};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A delivery the caller wants to record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCandidate {
    pub payer_id: PayerId,
    pub location_id: LocationId,
    pub quantity: u64,
    pub at: DateTime<Utc>,
}

/// Reasons a candidate delivery is refused.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum DeliveryRejection {
    #[error("quantity must be positive")]
    NonPositiveQuantity,
    #[error("quantity {requested} exceeds remaining requirement {remaining}")]
    ExceedsRemaining { requested: u64, remaining: u64 },
    #[error("insufficient balance {balance} for transportation fee {fee}")]
    InsufficientBalance { balance: Decimal, fee: Decimal },
    #[error("requirement window is not open at {at}")]
    OutsideWindow { at: DateTime<Utc> },
    #[error("delivery targets {candidate} but requirement belongs to {requirement}")]
    LocationMismatch {
        candidate: LocationId,
        requirement: LocationId,
    },
    #[error("location {0} was eliminated by the budget constraint")]
    LocationEliminated(LocationId),
}

/// Outcome of [`validate_delivery`]; every failed check is listed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<DeliveryRejection>,
}

impl ValidationResult {
    /// Human-readable error messages.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// Source of payer balances.
pub trait BalanceLookup {
    fn balance_of(&self, payer: &PayerId) -> Decimal;
}

/// Unknown payers hold nothing.
impl BalanceLookup for BTreeMap<PayerId, Decimal> {
    fn balance_of(&self, payer: &PayerId) -> Decimal {
        self.get(payer).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Check a candidate delivery against its tile, the program window and the
/// payer's balance. Never mutates anything.
pub fn validate_delivery(
    candidate: &DeliveryCandidate,
    program: &MtoRequirement,
    tile: &TileRequirement,
    balance: Decimal,
    transportation_fee: Decimal,
) -> ValidationResult {
    let mut errors = Vec::new();
    if candidate.location_id != tile.location_id {
        errors.push(DeliveryRejection::LocationMismatch {
            candidate: candidate.location_id.clone(),
            requirement: tile.location_id.clone(),
        });
    }
    if tile.is_eliminated() {
        errors.push(DeliveryRejection::LocationEliminated(tile.location_id.clone()));
    }
    if candidate.quantity == 0 {
        errors.push(DeliveryRejection::NonPositiveQuantity);
    }
    if candidate.quantity > tile.remaining_requirement {
        errors.push(DeliveryRejection::ExceedsRemaining {
            requested: candidate.quantity,
            remaining: tile.remaining_requirement,
        });
    }
    if balance < transportation_fee {
        errors.push(DeliveryRejection::InsufficientBalance {
            balance,
            fee: transportation_fee,
        });
    }
    if !program.is_open_at(candidate.at) {
        errors.push(DeliveryRejection::OutsideWindow { at: candidate.at });
    }
    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}
