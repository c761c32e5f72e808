#![deny(warnings)]

//! Core domain models and invariants for MTO Type-1 procurement.
//!
//! This crate defines the serializable records shared by the allocation and
//! settlement engine, plus validation helpers that reject malformed input
//! before any requirement state is produced.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Map tile identifier, e.g. "12,-3".
    LocationId
);
string_id!(
    /// Team or company paying for a delivery.
    PayerId
);
string_id!(
    /// Identifier of a recorded delivery.
    DeliveryId
);
string_id!(
    /// Product formula a delivered unit must satisfy.
    FormulaId
);
string_id!(
    /// Identifier of an MTO requirement (procurement program).
    RequirementId
);

/// Population of one tile as reported by the map service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePopulationSnapshot {
    pub location_id: LocationId,
    pub location_name: String,
    pub current_population: u64,
}

/// Parameters of one allocation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Formula every settled unit must satisfy.
    pub formula_id: FormulaId,
    /// Price paid per settled unit (>= 0).
    pub unit_price: Decimal,
    /// Units required per population unit.
    pub base_requirement_quantity: u64,
    /// Population divisor (> 0).
    pub base_population_unit: u64,
    /// Hard cap on the sum of adjusted requirements.
    pub overall_requirement_ceiling: u64,
}

/// An MTO Type-1 procurement program and its active window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtoRequirement {
    pub id: RequirementId,
    pub formula_id: FormulaId,
    /// Release time; deliveries before this are rejected.
    pub opened_at: DateTime<Utc>,
    /// Settlement time; deliveries after this are rejected.
    pub closes_at: DateTime<Utc>,
}

impl MtoRequirement {
    /// Whether `at` lies within `[opened_at, closes_at]`.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.opened_at <= at && at <= self.closes_at
    }
}

/// Why a tile's adjusted requirement differs (or not) from its initial one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentReason {
    InitialCalculation,
    BudgetConstraint,
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjustmentReason::InitialCalculation => f.write_str("Initial calculation"),
            AdjustmentReason::BudgetConstraint => {
                f.write_str("Budget constraint - exceeded overall limit")
            }
        }
    }
}

/// Per-tile requirement state carried from allocation into settlement.
///
/// Invariants: `adjusted_requirement <= initial_requirement`,
/// `requirement_budget == adjusted_requirement * unit_price`, and
/// `remaining_requirement` never increases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileRequirement {
    pub location_id: LocationId,
    pub location_name: String,
    pub population: u64,
    pub unit_price: Decimal,
    pub base_requirement_quantity: u64,
    pub base_population_unit: u64,
    pub initial_requirement: u64,
    pub adjusted_requirement: u64,
    pub delivered_quantity: u64,
    pub remaining_requirement: u64,
    pub requirement_budget: Decimal,
    pub adjustment_reason: Option<AdjustmentReason>,
}

impl TileRequirement {
    /// Derive the initial requirement of a tile from its population.
    ///
    /// Fails if the requirement does not fit in a `u64` or its budget does not
    /// fit in a `Decimal`.
    pub fn from_snapshot(
        snapshot: &TilePopulationSnapshot,
        config: &AllocationConfig,
    ) -> Result<Self, ValidationError> {
        validate_config(config)?;
        let multiplier = snapshot.current_population / config.base_population_unit;
        let initial = config
            .base_requirement_quantity
            .checked_mul(multiplier)
            .ok_or_else(|| ValidationError::RequirementOverflow(snapshot.location_id.clone()))?;
        let budget = Decimal::from(initial)
            .checked_mul(config.unit_price)
            .ok_or_else(|| ValidationError::BudgetOverflow(snapshot.location_id.clone()))?;
        Ok(Self {
            location_id: snapshot.location_id.clone(),
            location_name: snapshot.location_name.clone(),
            population: snapshot.current_population,
            unit_price: config.unit_price,
            base_requirement_quantity: config.base_requirement_quantity,
            base_population_unit: config.base_population_unit,
            initial_requirement: initial,
            adjusted_requirement: initial,
            delivered_quantity: 0,
            remaining_requirement: initial,
            requirement_budget: budget,
            adjustment_reason: None,
        })
    }

    /// Zero the tile out. Elimination is terminal for the run.
    pub fn eliminate(&mut self) {
        self.adjusted_requirement = 0;
        self.remaining_requirement = 0;
        self.requirement_budget = Decimal::ZERO;
        self.adjustment_reason = Some(AdjustmentReason::BudgetConstraint);
    }

    pub fn is_eliminated(&self) -> bool {
        self.adjustment_reason == Some(AdjustmentReason::BudgetConstraint)
    }

    /// Exact while `adjusted_requirement <= initial_requirement`, whose budget
    /// was checked at construction.
    pub fn recompute_budget(&mut self) {
        self.requirement_budget =
            Decimal::from(self.adjusted_requirement).saturating_mul(self.unit_price);
    }

    /// Consume one unit of remaining requirement. Returns false when none is left.
    pub fn consume_unit(&mut self) -> bool {
        if self.remaining_requirement == 0 {
            return false;
        }
        self.remaining_requirement -= 1;
        true
    }

    pub fn record_delivered(&mut self, quantity: u64) {
        self.delivered_quantity = self.delivered_quantity.saturating_add(quantity);
    }

    /// Units accepted against this tile so far.
    pub fn settled_quantity(&self) -> u64 {
        self.adjusted_requirement
            .saturating_sub(self.remaining_requirement)
    }
}

/// A delivery of product units to a tile, as recorded by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub requirement_id: RequirementId,
    pub location_id: LocationId,
    pub payer_id: PayerId,
    pub quantity: u64,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Settled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
}

/// One unit accepted against a tile requirement and paid for. Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    pub requirement_id: RequirementId,
    pub delivery_id: DeliveryId,
    pub location_id: LocationId,
    pub unit_index: u64,
    pub status: SettlementStatus,
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub payment_reference: String,
}

/// Precondition violations, reported before any state is produced.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Population divisor must be strictly positive.
    #[error("base population unit must be > 0")]
    ZeroPopulationUnit,
    /// Prices and rates must be non-negative.
    #[error("negative monetary value is invalid: {0}")]
    NegativeMoney(Decimal),
    /// Identifiers must not be blank.
    #[error("empty identifier for {0}")]
    EmptyId(&'static str),
    /// The same tile appeared twice in one run.
    #[error("duplicate location id: {0}")]
    DuplicateLocation(LocationId),
    /// Requirement window closes before it opens.
    #[error("requirement window closes before it opens")]
    InvertedWindow,
    /// Requirement quantity does not fit the integer range.
    #[error("requirement overflow at location {0}")]
    RequirementOverflow(LocationId),
    /// Requirement budget does not fit the decimal range.
    #[error("requirement budget overflow at location {0}")]
    BudgetOverflow(LocationId),
}

/// Validate an allocation configuration.
pub fn validate_config(config: &AllocationConfig) -> Result<(), ValidationError> {
    if config.base_population_unit == 0 {
        return Err(ValidationError::ZeroPopulationUnit);
    }
    if config.unit_price < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney(config.unit_price));
    }
    if config.formula_id.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyId("formula"));
    }
    Ok(())
}

/// Validate a requirement program's identifiers and window.
pub fn validate_requirement(req: &MtoRequirement) -> Result<(), ValidationError> {
    if req.id.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyId("requirement"));
    }
    if req.closes_at < req.opened_at {
        return Err(ValidationError::InvertedWindow);
    }
    Ok(())
}

/// Validate a batch of snapshots: non-empty, unique location ids.
pub fn validate_snapshots(snapshots: &[TilePopulationSnapshot]) -> Result<(), ValidationError> {
    let mut seen: BTreeSet<&LocationId> = BTreeSet::new();
    for s in snapshots {
        if s.location_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyId("location"));
        }
        if !seen.insert(&s.location_id) {
            return Err(ValidationError::DuplicateLocation(s.location_id.clone()));
        }
    }
    Ok(())
}

/// Owned, insertion-ordered collection of tile requirements for one run.
///
/// Allocation hands a book to settlement by value; no two runs share one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequirementBook {
    tiles: Vec<TileRequirement>,
    index: BTreeMap<LocationId, usize>,
}

impl RequirementBook {
    pub fn from_tiles(tiles: Vec<TileRequirement>) -> Result<Self, ValidationError> {
        let mut index = BTreeMap::new();
        for (i, t) in tiles.iter().enumerate() {
            if index.insert(t.location_id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateLocation(t.location_id.clone()));
            }
        }
        Ok(Self { tiles, index })
    }

    pub fn get(&self, id: &LocationId) -> Option<&TileRequirement> {
        self.index.get(id).map(|&i| &self.tiles[i])
    }

    pub fn get_mut(&mut self, id: &LocationId) -> Option<&mut TileRequirement> {
        match self.index.get(id) {
            Some(&i) => self.tiles.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &LocationId) -> bool {
        self.index.contains_key(id)
    }

    /// Tiles in insertion order.
    pub fn tiles(&self) -> &[TileRequirement] {
        &self.tiles
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, TileRequirement> {
        self.tiles.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn into_tiles(self) -> Vec<TileRequirement> {
        self.tiles
    }

    pub fn total_adjusted(&self) -> u64 {
        self.tiles
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.adjusted_requirement))
    }

    pub fn total_initial(&self) -> u64 {
        self.tiles
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.initial_requirement))
    }
}

/// Round to 2 decimal places, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn config() -> AllocationConfig {
        AllocationConfig {
            formula_id: FormulaId::from("F-1"),
            unit_price: Decimal::new(250, 2), // 2.50
            base_requirement_quantity: 10,
            base_population_unit: 1000,
            overall_requirement_ceiling: 100,
        }
    }

    fn snapshot(id: &str, pop: u64) -> TilePopulationSnapshot {
        TilePopulationSnapshot {
            location_id: LocationId::from(id),
            location_name: format!("Tile {id}"),
            current_population: pop,
        }
    }

    #[test]
    fn initial_requirement_floors_population() {
        let t = TileRequirement::from_snapshot(&snapshot("0,0", 2500), &config()).unwrap();
        assert_eq!(t.initial_requirement, 20);
        assert_eq!(t.adjusted_requirement, 20);
        assert_eq!(t.remaining_requirement, 20);
        assert_eq!(t.requirement_budget, Decimal::new(5000, 2));
        assert_eq!(t.adjustment_reason, None);
    }

    #[test]
    fn zero_population_unit_rejected() {
        let mut c = config();
        c.base_population_unit = 0;
        assert_eq!(validate_config(&c), Err(ValidationError::ZeroPopulationUnit));
        assert!(TileRequirement::from_snapshot(&snapshot("0,0", 10), &c).is_err());
    }

    #[test]
    fn negative_price_rejected() {
        let mut c = config();
        c.unit_price = Decimal::new(-1, 0);
        assert!(matches!(
            validate_config(&c),
            Err(ValidationError::NegativeMoney(_))
        ));
    }

    #[test]
    fn overflow_is_reported() {
        let mut c = config();
        c.base_population_unit = 1;
        c.base_requirement_quantity = u64::MAX;
        let err = TileRequirement::from_snapshot(&snapshot("1,1", 2), &c).unwrap_err();
        assert_eq!(err, ValidationError::RequirementOverflow(LocationId::from("1,1")));
    }

    #[test]
    fn oversized_price_is_reported() {
        let mut c = config();
        c.unit_price = Decimal::MAX;
        let err = TileRequirement::from_snapshot(&snapshot("2,2", 2000), &c).unwrap_err();
        assert_eq!(err, ValidationError::BudgetOverflow(LocationId::from("2,2")));
        // A zero requirement has a zero budget at any price.
        let t = TileRequirement::from_snapshot(&snapshot("2,2", 999), &c).unwrap();
        assert_eq!(t.requirement_budget, Decimal::ZERO);
    }

    #[test]
    fn elimination_zeroes_everything() {
        let mut t = TileRequirement::from_snapshot(&snapshot("0,0", 5000), &config()).unwrap();
        t.eliminate();
        assert_eq!(t.adjusted_requirement, 0);
        assert_eq!(t.remaining_requirement, 0);
        assert_eq!(t.requirement_budget, Decimal::ZERO);
        assert!(t.is_eliminated());
        assert!(!t.consume_unit());
        assert_eq!(
            t.adjustment_reason.unwrap().to_string(),
            "Budget constraint - exceeded overall limit"
        );
    }

    #[test]
    fn duplicate_snapshots_rejected() {
        let snaps = vec![snapshot("0,0", 1), snapshot("0,0", 2)];
        assert_eq!(
            validate_snapshots(&snaps),
            Err(ValidationError::DuplicateLocation(LocationId::from("0,0")))
        );
    }

    #[test]
    fn book_keeps_insertion_order() {
        let c = config();
        let tiles = ["5,5", "0,0", "3,1"]
            .iter()
            .map(|id| TileRequirement::from_snapshot(&snapshot(id, 1000), &c).unwrap())
            .collect();
        let book = RequirementBook::from_tiles(tiles).unwrap();
        let order: Vec<&str> = book.tiles().iter().map(|t| t.location_id.as_str()).collect();
        assert_eq!(order, vec!["5,5", "0,0", "3,1"]);
        assert!(book.get(&LocationId::from("0,0")).is_some());
        assert_eq!(book.total_initial(), 30);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let req = MtoRequirement {
            id: RequirementId::from("R1"),
            formula_id: FormulaId::from("F-1"),
            opened_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            closes_at: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        };
        validate_requirement(&req).unwrap();
        assert!(req.is_open_at(req.opened_at));
        assert!(req.is_open_at(req.closes_at));
        assert!(!req.is_open_at(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn tile_serde_roundtrip() {
        let t = TileRequirement::from_snapshot(&snapshot("2,3", 3000), &config()).unwrap();
        let s = serde_json::to_string(&t).unwrap();
        let back: TileRequirement = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn round2_is_half_up() {
        assert_eq!(round2(Decimal::new(1005, 3)), Decimal::new(101, 2));
        assert_eq!(round2(Decimal::new(1004, 3)), Decimal::new(100, 2));
    }

    proptest! {
        #[test]
        fn budget_tracks_adjusted(pop in 0u64..10_000_000, cents in 0i64..100_000) {
            let mut c = config();
            c.unit_price = Decimal::new(cents, 2);
            let t = TileRequirement::from_snapshot(&snapshot("0,0", pop), &c).unwrap();
            prop_assert_eq!(t.requirement_budget, Decimal::from(t.adjusted_requirement) * c.unit_price);
            prop_assert_eq!(t.initial_requirement, 10 * (pop / 1000));
        }
    }
}
