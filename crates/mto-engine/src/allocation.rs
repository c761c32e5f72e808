//! Requirement allocation under a global ceiling.
//!
//! Each tile's requirement is derived from its population. While the total
//! exceeds the ceiling, every tile tied at the current maximum is eliminated
//! in the same round. Every round is recorded as a [`CalculationStep`].

use crate::EngineError;
use mto_core::{
    validate_config, validate_snapshots, AdjustmentReason, AllocationConfig, LocationId,
    RequirementBook, TilePopulationSnapshot, TileRequirement,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Kind tag of a calculation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationStepKind {
    InitialCalculation,
    BudgetConstraintCheck,
    TileElimination,
    FinalDistribution,
}

/// Requirement of one tile at the time a step was recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileAdjustment {
    pub location_id: LocationId,
    pub initial_requirement: u64,
    pub adjusted_requirement: u64,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationDetail {
    InitialCalculation {
        total_initial_requirement: u64,
        adjustments: Vec<TileAdjustment>,
    },
    BudgetConstraintCheck {
        total_requirement: u64,
        ceiling: u64,
        excess: u64,
    },
    TileElimination {
        round: u32,
        eliminated: Vec<LocationId>,
        /// Requirement each eliminated tile held (the round's maximum).
        eliminated_requirement: u64,
        total_before: u64,
        total_after: u64,
        budget_saved: Decimal,
    },
    FinalDistribution {
        total_initial_requirement: u64,
        total_adjusted_requirement: u64,
        tiles_zeroed: usize,
        total_budget: Decimal,
    },
}

impl CalculationDetail {
    pub fn kind(&self) -> CalculationStepKind {
        match self {
            CalculationDetail::InitialCalculation { .. } => CalculationStepKind::InitialCalculation,
            CalculationDetail::BudgetConstraintCheck { .. } => {
                CalculationStepKind::BudgetConstraintCheck
            }
            CalculationDetail::TileElimination { .. } => CalculationStepKind::TileElimination,
            CalculationDetail::FinalDistribution { .. } => CalculationStepKind::FinalDistribution,
        }
    }
}

/// One entry of the allocation audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationStep {
    /// 1-based, strictly increasing within a run.
    pub step_number: u32,
    pub description: String,
    #[serde(flatten)]
    pub detail: CalculationDetail,
}

impl CalculationStep {
    pub fn kind(&self) -> CalculationStepKind {
        self.detail.kind()
    }
}

/// Result of an allocation run: the owned requirement book and its audit trail.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    pub book: RequirementBook,
    pub steps: Vec<CalculationStep>,
}

fn record(steps: &mut Vec<CalculationStep>, description: String, detail: CalculationDetail) {
    let step_number = steps.len() as u32 + 1;
    steps.push(CalculationStep {
        step_number,
        description,
        detail,
    });
}

/// Compute per-tile requirements and enforce the overall ceiling.
///
/// Fails only on precondition violations (zero population unit, negative
/// price, duplicate or empty location ids, overflow); in that case no
/// requirement state is returned.
pub fn allocate(
    snapshots: &[TilePopulationSnapshot],
    config: &AllocationConfig,
) -> Result<Allocation, EngineError> {
    validate_config(config)?;
    validate_snapshots(snapshots)?;

    let tiles = snapshots
        .iter()
        .map(|s| TileRequirement::from_snapshot(s, config))
        .collect::<Result<Vec<_>, _>>()?;
    let total_initial = tiles
        .iter()
        .try_fold(0u64, |acc, t| acc.checked_add(t.initial_requirement))
        .ok_or(EngineError::TotalOverflow)?;
    // Bounds every later budget product and sum in this run.
    Decimal::from(total_initial)
        .checked_mul(config.unit_price)
        .ok_or(EngineError::BudgetOverflow)?;
    let mut book = RequirementBook::from_tiles(tiles)?;
    let mut steps = Vec::new();

    let adjustments = book
        .tiles()
        .iter()
        .map(|t| TileAdjustment {
            location_id: t.location_id.clone(),
            initial_requirement: t.initial_requirement,
            adjusted_requirement: t.adjusted_requirement,
            reason: AdjustmentReason::InitialCalculation.to_string(),
        })
        .collect();
    record(
        &mut steps,
        format!(
            "Initial requirement of {} across {} tiles",
            total_initial,
            book.len()
        ),
        CalculationDetail::InitialCalculation {
            total_initial_requirement: total_initial,
            adjustments,
        },
    );

    let ceiling = config.overall_requirement_ceiling;
    let mut total = total_initial;
    if total > ceiling {
        record(
            &mut steps,
            format!("Total requirement {total} exceeds ceiling {ceiling}"),
            CalculationDetail::BudgetConstraintCheck {
                total_requirement: total,
                ceiling,
                excess: total - ceiling,
            },
        );

        let mut round = 0u32;
        while total > ceiling {
            let Some(max) = book
                .tiles()
                .iter()
                .map(|t| t.adjusted_requirement)
                .filter(|&r| r > 0)
                .max()
            else {
                break;
            };
            round += 1;
            let mut eliminated = Vec::new();
            for t in book.iter_mut() {
                if t.adjusted_requirement == max {
                    t.eliminate();
                    eliminated.push(t.location_id.clone());
                }
            }
            let after = book.total_adjusted();
            let budget_saved = Decimal::from(total - after)
                .checked_mul(config.unit_price)
                .ok_or(EngineError::BudgetOverflow)?;
            debug!(
                round,
                max,
                eliminated = eliminated.len(),
                total_before = total,
                total_after = after,
                "eliminated tiles at maximum requirement"
            );
            record(
                &mut steps,
                format!(
                    "Round {round}: eliminated {} tile(s) with requirement {max}",
                    eliminated.len()
                ),
                CalculationDetail::TileElimination {
                    round,
                    eliminated,
                    eliminated_requirement: max,
                    total_before: total,
                    total_after: after,
                    budget_saved,
                },
            );
            total = after;
        }
    }

    for t in book.iter_mut() {
        if t.adjusted_requirement > 0 {
            t.recompute_budget();
        }
    }

    let tiles_zeroed = book.tiles().iter().filter(|t| t.is_eliminated()).count();
    let total_budget = book
        .tiles()
        .iter()
        .try_fold(Decimal::ZERO, |acc, t| acc.checked_add(t.requirement_budget))
        .ok_or(EngineError::BudgetOverflow)?;
    record(
        &mut steps,
        format!("Final requirement {total} of initial {total_initial}; {tiles_zeroed} tile(s) zeroed"),
        CalculationDetail::FinalDistribution {
            total_initial_requirement: total_initial,
            total_adjusted_requirement: total,
            tiles_zeroed,
            total_budget,
        },
    );
    info!(
        tiles = book.len(),
        total_initial,
        total_adjusted = total,
        tiles_zeroed,
        "allocation complete"
    );

    Ok(Allocation { book, steps })
}
