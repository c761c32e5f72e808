//! Delivery replay and unit-level settlement.
//!
//! Deliveries are replayed per tile in `delivered_at` order (stable for ties),
//! unit by unit. A unit settles only while the tile still has remaining
//! requirement and the oracle accepts it; a rejected unit never comes back.

use crate::oracle::{ProductOracle, UnitRef};
use crate::EngineError;
use mto_core::{
    validate_config, AllocationConfig, Delivery, DeliveryId, LocationId, PayerId, PaymentStatus,
    RequirementBook, RequirementId, Settlement, SettlementStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStepKind {
    TileProcessingStart,
    DeliveryValidation,
    ProductValidation,
    PaymentProcessing,
    TileProcessingComplete,
    UnmatchedDeliveries,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementDetail {
    TileProcessingStart {
        location_id: LocationId,
        target: u64,
        remaining: u64,
    },
    DeliveryValidation {
        location_id: LocationId,
        delivery_count: usize,
        total_quantity: u64,
    },
    ProductValidation {
        delivery_id: DeliveryId,
        location_id: LocationId,
        quantity: u64,
        /// Units offered to the oracle.
        validated: u64,
        settled: u64,
        rejected: u64,
        /// Rejected because the tile had no requirement left.
        rejected_no_requirement: u64,
        /// Rejected by the oracle.
        rejected_formula: u64,
        remaining_after: u64,
    },
    PaymentProcessing {
        delivery_id: DeliveryId,
        payer_id: PayerId,
        settled_units: u64,
        unit_price: Decimal,
        payment_amount: Decimal,
    },
    TileProcessingComplete {
        location_id: LocationId,
        settled_count: u64,
        delivered_quantity: u64,
        remaining: u64,
    },
    /// Deliveries that were not replayed against any tile.
    UnmatchedDeliveries {
        /// Location has no requirement in this run.
        unknown_location: Vec<DeliveryId>,
        /// Delivery belongs to a different requirement program.
        other_requirement: Vec<DeliveryId>,
    },
}

impl SettlementDetail {
    pub fn kind(&self) -> SettlementStepKind {
        match self {
            SettlementDetail::TileProcessingStart { .. } => SettlementStepKind::TileProcessingStart,
            SettlementDetail::DeliveryValidation { .. } => SettlementStepKind::DeliveryValidation,
            SettlementDetail::ProductValidation { .. } => SettlementStepKind::ProductValidation,
            SettlementDetail::PaymentProcessing { .. } => SettlementStepKind::PaymentProcessing,
            SettlementDetail::TileProcessingComplete { .. } => {
                SettlementStepKind::TileProcessingComplete
            }
            SettlementDetail::UnmatchedDeliveries { .. } => SettlementStepKind::UnmatchedDeliveries,
        }
    }
}

/// One entry of the settlement audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlementStep {
    pub step_number: u32,
    pub description: String,
    #[serde(flatten)]
    pub detail: SettlementDetail,
}

impl SettlementStep {
    pub fn kind(&self) -> SettlementStepKind {
        self.detail.kind()
    }
}

/// Final state of a settlement run.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementRun {
    /// The requirement book after consumption.
    pub book: RequirementBook,
    /// Settlements per location; every location of the book has an entry.
    pub settlements: BTreeMap<LocationId, Vec<Settlement>>,
    pub steps: Vec<SettlementStep>,
}

impl SettlementRun {
    pub fn all_settlements(&self) -> impl Iterator<Item = &Settlement> {
        self.settlements.values().flatten()
    }
}

fn record(steps: &mut Vec<SettlementStep>, description: String, detail: SettlementDetail) {
    let step_number = steps.len() as u32 + 1;
    steps.push(SettlementStep {
        step_number,
        description,
        detail,
    });
}

/// Replay the deliveries of `requirement_id` against the allocated `book`.
///
/// Takes the book by value and returns it with consumed requirement. The
/// oracle is consulted once per unit, only while requirement remains.
/// Deliveries of other programs never touch the book.
pub fn settle<O>(
    mut book: RequirementBook,
    deliveries: &[Delivery],
    config: &AllocationConfig,
    requirement_id: &RequirementId,
    oracle: &O,
) -> Result<SettlementRun, EngineError>
where
    O: ProductOracle + ?Sized,
{
    validate_config(config)?;
    let unit_price = config.unit_price;
    // Payments are bounded by the full adjusted requirement at this price.
    let max_payable = Decimal::from(book.total_adjusted())
        .checked_mul(unit_price)
        .ok_or(EngineError::BudgetOverflow)?;

    let mut by_location: BTreeMap<&LocationId, Vec<&Delivery>> = BTreeMap::new();
    let mut unknown_location = Vec::new();
    let mut other_requirement = Vec::new();
    for d in deliveries {
        if &d.requirement_id != requirement_id {
            other_requirement.push(d.id.clone());
        } else if book.contains(&d.location_id) {
            by_location.entry(&d.location_id).or_default().push(d);
        } else {
            unknown_location.push(d.id.clone());
        }
    }

    let mut steps = Vec::new();
    let mut settlements: BTreeMap<LocationId, Vec<Settlement>> = BTreeMap::new();
    let order: Vec<LocationId> = book.tiles().iter().map(|t| t.location_id.clone()).collect();

    for location_id in order {
        let Some(tile) = book.get_mut(&location_id) else {
            continue;
        };
        record(
            &mut steps,
            format!(
                "Processing {} with target {}",
                location_id, tile.adjusted_requirement
            ),
            SettlementDetail::TileProcessingStart {
                location_id: location_id.clone(),
                target: tile.adjusted_requirement,
                remaining: tile.remaining_requirement,
            },
        );

        let mut queue = by_location.remove(&location_id).unwrap_or_default();
        queue.sort_by_key(|d| d.delivered_at);
        let total_quantity = queue.iter().fold(0u64, |acc, d| acc.saturating_add(d.quantity));
        record(
            &mut steps,
            format!("Validating {} deliveries for {}", queue.len(), location_id),
            SettlementDetail::DeliveryValidation {
                location_id: location_id.clone(),
                delivery_count: queue.len(),
                total_quantity,
            },
        );

        let mut tile_settlements = Vec::new();
        for delivery in queue {
            let mut validated = 0u64;
            let mut settled = 0u64;
            let mut rejected_formula = 0u64;
            let mut rejected_no_requirement = 0u64;
            for unit_index in 0..delivery.quantity {
                if tile.remaining_requirement == 0 {
                    // Every later unit of this delivery is rejected the same way.
                    rejected_no_requirement += delivery.quantity - unit_index;
                    break;
                }
                validated += 1;
                let unit = UnitRef {
                    delivery_id: delivery.id.clone(),
                    unit_index,
                };
                if oracle.validate(&unit, &config.formula_id) && tile.consume_unit() {
                    settled += 1;
                    tile_settlements.push(Settlement {
                        id: format!("stl-{}-{}", delivery.id, unit_index),
                        requirement_id: delivery.requirement_id.clone(),
                        delivery_id: delivery.id.clone(),
                        location_id: location_id.clone(),
                        unit_index,
                        status: SettlementStatus::Settled,
                        amount: unit_price,
                        settled_at: delivery.delivered_at,
                        payment_status: PaymentStatus::Paid,
                        payment_reference: format!("pay-{}", delivery.id),
                    });
                } else {
                    rejected_formula += 1;
                }
            }
            tile.record_delivered(delivery.quantity);
            let rejected = rejected_formula + rejected_no_requirement;
            debug!(
                delivery = %delivery.id,
                location = %location_id,
                settled,
                rejected,
                remaining = tile.remaining_requirement,
                "processed delivery"
            );
            record(
                &mut steps,
                format!(
                    "Delivery {}: {} settled, {} rejected of {}",
                    delivery.id, settled, rejected, delivery.quantity
                ),
                SettlementDetail::ProductValidation {
                    delivery_id: delivery.id.clone(),
                    location_id: location_id.clone(),
                    quantity: delivery.quantity,
                    validated,
                    settled,
                    rejected,
                    rejected_no_requirement,
                    rejected_formula,
                    remaining_after: tile.remaining_requirement,
                },
            );
            if settled > 0 {
                let payment_amount = Decimal::from(settled)
                    .checked_mul(unit_price)
                    .ok_or(EngineError::BudgetOverflow)?;
                record(
                    &mut steps,
                    format!("Paying {} to {}", payment_amount, delivery.payer_id),
                    SettlementDetail::PaymentProcessing {
                        delivery_id: delivery.id.clone(),
                        payer_id: delivery.payer_id.clone(),
                        settled_units: settled,
                        unit_price,
                        payment_amount,
                    },
                );
            }
        }

        let settled_count = tile_settlements.len() as u64;
        record(
            &mut steps,
            format!("Completed {location_id}: {settled_count} unit(s) settled"),
            SettlementDetail::TileProcessingComplete {
                location_id: location_id.clone(),
                settled_count,
                delivered_quantity: tile.delivered_quantity,
                remaining: tile.remaining_requirement,
            },
        );
        settlements.insert(location_id, tile_settlements);
    }

    if !unknown_location.is_empty() || !other_requirement.is_empty() {
        warn!(
            unknown_location = unknown_location.len(),
            other_requirement = other_requirement.len(),
            "deliveries not replayed"
        );
        record(
            &mut steps,
            format!(
                "{} delivery(ies) reference no allocated location, {} belong to another requirement",
                unknown_location.len(),
                other_requirement.len()
            ),
            SettlementDetail::UnmatchedDeliveries {
                unknown_location,
                other_requirement,
            },
        );
    }

    let settled_total: usize = settlements.values().map(Vec::len).sum();
    info!(
        requirement = %requirement_id,
        max_payable = %max_payable,
        tiles = book.len(),
        deliveries = deliveries.len(),
        settled = settled_total,
        "settlement complete"
    );

    Ok(SettlementRun {
        book,
        settlements,
        steps,
    })
}
