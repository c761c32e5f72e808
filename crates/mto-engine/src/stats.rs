//! Summary metrics over the final state of a run.

use mto_core::{round2, Delivery, MtoRequirement, RequirementId, TileRequirement};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub requirement_id: RequirementId,
    pub total_requirement: u64,
    pub total_delivered: u64,
    pub total_settled: u64,
    pub unsettled: u64,
    /// settled / requirement, 2 decimals; zero when nothing was required.
    pub fulfillment_rate: Decimal,
    pub active_tiles: usize,
    pub tiles_with_deliveries: usize,
    pub average_delivered_per_active_tile: Decimal,
    pub total_budget: Decimal,
    pub spent_budget: Decimal,
    pub remaining_budget: Decimal,
    pub distinct_payers: usize,
}

fn ratio(num: u64, den: u64) -> Decimal {
    if den == 0 {
        return Decimal::ZERO;
    }
    round2(Decimal::from(num) / Decimal::from(den))
}

/// Fold final tile state and the program's deliveries into a summary.
///
/// Deliveries belonging to other requirements are ignored.
pub fn statistics(
    program: &MtoRequirement,
    tiles: &[TileRequirement],
    deliveries: &[Delivery],
) -> StatsSummary {
    let own: Vec<&Delivery> = deliveries
        .iter()
        .filter(|d| d.requirement_id == program.id)
        .collect();

    let total_requirement = tiles
        .iter()
        .fold(0u64, |acc, t| acc.saturating_add(t.adjusted_requirement));
    let total_settled = tiles
        .iter()
        .fold(0u64, |acc, t| acc.saturating_add(t.settled_quantity()));
    let total_delivered = own
        .iter()
        .fold(0u64, |acc, d| acc.saturating_add(d.quantity));
    let active_tiles = tiles.iter().filter(|t| t.adjusted_requirement > 0).count();
    let tiles_with_deliveries = own
        .iter()
        .map(|d| &d.location_id)
        .collect::<BTreeSet<_>>()
        .len();
    let distinct_payers = own.iter().map(|d| &d.payer_id).collect::<BTreeSet<_>>().len();

    let total_budget = tiles
        .iter()
        .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.requirement_budget));
    let spent_budget = tiles.iter().fold(Decimal::ZERO, |acc, t| {
        acc.saturating_add(Decimal::from(t.settled_quantity()).saturating_mul(t.unit_price))
    });

    StatsSummary {
        requirement_id: program.id.clone(),
        total_requirement,
        total_delivered,
        total_settled,
        unsettled: total_delivered.saturating_sub(total_settled),
        fulfillment_rate: ratio(total_settled, total_requirement),
        active_tiles,
        tiles_with_deliveries,
        average_delivered_per_active_tile: ratio(total_delivered, active_tiles as u64),
        total_budget,
        spent_budget,
        remaining_budget: total_budget.saturating_sub(spent_budget),
        distinct_payers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::allocate;
    use crate::oracle::AcceptAll;
    use crate::settlement::settle;
    use chrono::{TimeZone, Utc};
    use mto_core::{
        AllocationConfig, DeliveryId, FormulaId, LocationId, PayerId, TilePopulationSnapshot,
    };

    fn program() -> MtoRequirement {
        MtoRequirement {
            id: RequirementId::from("R1"),
            formula_id: FormulaId::from("F-1"),
            opened_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            closes_at: Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        }
    }

    fn config() -> AllocationConfig {
        AllocationConfig {
            formula_id: FormulaId::from("F-1"),
            unit_price: Decimal::new(2, 0),
            base_requirement_quantity: 3,
            base_population_unit: 100,
            overall_requirement_ceiling: 100,
        }
    }

    fn delivery(id: &str, req: &str, loc: &str, payer: &str, qty: u64) -> Delivery {
        Delivery {
            id: DeliveryId::from(id),
            requirement_id: RequirementId::from(req),
            location_id: LocationId::from(loc),
            payer_id: PayerId::from(payer),
            quantity: qty,
            delivered_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn snaps() -> Vec<TilePopulationSnapshot> {
        [("A", 300u64), ("B", 200), ("C", 0)]
            .iter()
            .map(|(id, pop)| TilePopulationSnapshot {
                location_id: LocationId::from(*id),
                location_name: id.to_string(),
                current_population: *pop,
            })
            .collect()
    }

    #[test]
    fn summarizes_a_run() {
        let alloc = allocate(&snaps(), &config()).unwrap();
        let deliveries = vec![
            delivery("d1", "R1", "A", "p1", 12),
            delivery("d2", "R1", "B", "p2", 2),
            delivery("d3", "R1", "B", "p1", 1),
            delivery("other", "R2", "A", "p3", 50),
        ];
        let run = settle(alloc.book, &deliveries, &config(), &program().id, &AcceptAll).unwrap();
        let s = statistics(&program(), run.book.tiles(), &deliveries);
        // A: 9 required, 9 settled; B: 6 required, 3 settled
        assert_eq!(s.total_requirement, 15);
        assert_eq!(s.total_delivered, 15);
        assert_eq!(s.total_settled, 12);
        assert_eq!(s.unsettled, 3);
        assert_eq!(s.fulfillment_rate, Decimal::new(80, 2));
        assert_eq!(s.active_tiles, 2);
        assert_eq!(s.tiles_with_deliveries, 2);
        assert_eq!(s.average_delivered_per_active_tile, Decimal::new(750, 2));
        assert_eq!(s.total_budget, Decimal::new(30, 0));
        assert_eq!(s.spent_budget, Decimal::new(24, 0));
        assert_eq!(s.remaining_budget, Decimal::new(6, 0));
        assert_eq!(s.distinct_payers, 2);
    }

    #[test]
    fn other_program_units_are_not_counted() {
        let alloc = allocate(&snaps(), &config()).unwrap();
        let mut foreign = delivery("foreign", "R2", "A", "p9", 9);
        foreign.delivered_at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let deliveries = vec![foreign, delivery("own", "R1", "A", "p1", 4)];
        let run = settle(alloc.book, &deliveries, &config(), &program().id, &AcceptAll).unwrap();
        assert!(run
            .all_settlements()
            .all(|x| x.delivery_id.as_str() == "own"));
        let s = statistics(&program(), run.book.tiles(), &deliveries);
        assert_eq!(s.total_delivered, 4);
        assert_eq!(s.total_settled, 4);
        assert_eq!(s.spent_budget, Decimal::new(8, 0));
        assert_eq!(s.distinct_payers, 1);
    }

    #[test]
    fn empty_state_is_all_zero() {
        let s = statistics(&program(), &[], &[]);
        assert_eq!(s.fulfillment_rate, Decimal::ZERO);
        assert_eq!(s.average_delivered_per_active_tile, Decimal::ZERO);
        assert_eq!(s.total_budget, Decimal::ZERO);
    }

    #[test]
    fn statistics_is_pure() {
        let alloc = allocate(&snaps(), &config()).unwrap();
        let deliveries = vec![delivery("d1", "R1", "A", "p1", 4)];
        let run = settle(alloc.book, &deliveries, &config(), &program().id, &AcceptAll).unwrap();
        let a = statistics(&program(), run.book.tiles(), &deliveries);
        let b = statistics(&program(), run.book.tiles(), &deliveries);
        assert_eq!(a, b);
    }
}
