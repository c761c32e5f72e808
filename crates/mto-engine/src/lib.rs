#![deny(warnings)]

//! MTO Type-1 demand allocation and settlement engine.
//!
//! This crate provides deterministic, single-threaded computations for:
//! - Deriving per-tile purchase requirements from population snapshots
//! - Enforcing an overall requirement ceiling by eliminating the largest tiles
//! - Validating proposed deliveries before they reach the ledger
//! - Replaying deliveries into unit-level settlements and payments
//! - Transportation fees and summary statistics
//!
//! Allocation and settlement return their audit trails alongside their
//! results; nothing is logged into shared state.

pub mod allocation;
pub mod delivery;
pub mod geometry;
pub mod oracle;
pub mod settlement;
pub mod stats;
pub mod transport;

pub use allocation::{
    allocate, Allocation, CalculationDetail, CalculationStep, CalculationStepKind, TileAdjustment,
};
pub use delivery::{
    validate_delivery, BalanceLookup, DeliveryCandidate, DeliveryRejection, ValidationResult,
};
pub use geometry::{distance, parse_location, Point};
pub use oracle::{AcceptAll, ProductOracle, SeededOracle, UnitRef};
pub use settlement::{settle, SettlementDetail, SettlementRun, SettlementStep, SettlementStepKind};
pub use stats::{statistics, StatsSummary};
pub use transport::{transportation_fee, TransportFeeSchedule};

use mto_core::{
    AllocationConfig, Delivery, LocationId, MtoRequirement, RequirementBook, RequirementId,
    TilePopulationSnapshot, TileRequirement, ValidationError,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Precondition violations raised by the engine.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Location id is not of the form "x,y".
    #[error("malformed location id: {0}")]
    MalformedLocationId(LocationId),
    #[error("distance must be non-negative, got {0}")]
    NegativeDistance(Decimal),
    #[error("volume band must be > 0")]
    ZeroVolumeBand,
    #[error("total requirement overflow")]
    TotalOverflow,
    /// Requirement budget does not fit the decimal range.
    #[error("total budget overflow")]
    BudgetOverflow,
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Facade bundling one program's configuration and fee schedule.
#[derive(Clone, Debug)]
pub struct MtoType1Calculator {
    config: AllocationConfig,
    transport: TransportFeeSchedule,
}

impl MtoType1Calculator {
    /// Validates the configuration and fee schedule up front.
    pub fn new(
        config: AllocationConfig,
        transport: TransportFeeSchedule,
    ) -> Result<Self, EngineError> {
        mto_core::validate_config(&config)?;
        transport.validate()?;
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn transport(&self) -> &TransportFeeSchedule {
        &self.transport
    }

    pub fn allocate(&self, snapshots: &[TilePopulationSnapshot]) -> Result<Allocation, EngineError> {
        allocate(snapshots, &self.config)
    }

    pub fn transportation_fee(&self, distance: Decimal, quantity: u64) -> Result<Decimal, EngineError> {
        self.transport.fee(distance, quantity)
    }

    /// Fee for shipping `quantity` units from `origin` to `destination`.
    pub fn route_fee(
        &self,
        origin: &LocationId,
        destination: &LocationId,
        quantity: u64,
    ) -> Result<Decimal, EngineError> {
        self.transport
            .fee(geometry::distance(origin, destination)?, quantity)
    }

    /// Validate a candidate using the payer's balance from `balances`.
    pub fn validate_delivery<B: BalanceLookup + ?Sized>(
        &self,
        candidate: &DeliveryCandidate,
        program: &MtoRequirement,
        tile: &TileRequirement,
        balances: &B,
        fee: Decimal,
    ) -> ValidationResult {
        validate_delivery(
            candidate,
            program,
            tile,
            balances.balance_of(&candidate.payer_id),
            fee,
        )
    }

    /// Settle the deliveries of `requirement_id`; others are listed, not replayed.
    pub fn settle<O: ProductOracle + ?Sized>(
        &self,
        book: RequirementBook,
        deliveries: &[Delivery],
        requirement_id: &RequirementId,
        oracle: &O,
    ) -> Result<SettlementRun, EngineError> {
        settle(book, deliveries, &self.config, requirement_id, oracle)
    }

    pub fn statistics(
        &self,
        program: &MtoRequirement,
        tiles: &[TileRequirement],
        deliveries: &[Delivery],
    ) -> StatsSummary {
        statistics(program, tiles, deliveries)
    }
}
