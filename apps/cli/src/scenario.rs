//! YAML scenario files consumed by the CLI.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mto_core::{
    AllocationConfig, DeliveryId, LocationId, MtoRequirement, PayerId, TilePopulationSnapshot,
};
use mto_engine::{AcceptAll, ProductOracle, SeededOracle, TransportFeeSchedule};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A delivery as proposed by a payer, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposedDelivery {
    pub id: DeliveryId,
    pub payer_id: PayerId,
    /// Tile the goods ship from; priced by distance to `location_id`.
    pub origin: LocationId,
    pub location_id: LocationId,
    pub quantity: u64,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleConfig {
    #[default]
    AcceptAll,
    Seeded { seed: u64, acceptance_rate: f64 },
}

impl OracleConfig {
    pub fn build(&self) -> Box<dyn ProductOracle> {
        match self {
            OracleConfig::AcceptAll => Box::new(AcceptAll),
            OracleConfig::Seeded {
                seed,
                acceptance_rate,
            } => Box::new(SeededOracle::new(*seed, *acceptance_rate)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub config: AllocationConfig,
    pub requirement: MtoRequirement,
    #[serde(default)]
    pub transport: TransportFeeSchedule,
    pub snapshots: Vec<TilePopulationSnapshot>,
    #[serde(default)]
    pub balances: BTreeMap<PayerId, Decimal>,
    #[serde(default)]
    pub deliveries: Vec<ProposedDelivery>,
    #[serde(default)]
    pub oracle: OracleConfig,
}

impl Scenario {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(text).context("invalid scenario yaml")?;
        mto_core::validate_requirement(&scenario.requirement)?;
        Ok(scenario)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_yaml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
config:
  formula_id: F-1
  unit_price: "12.50"
  base_requirement_quantity: 10
  base_population_unit: 1000
  overall_requirement_ceiling: 25
requirement:
  id: R1
  formula_id: F-1
  opened_at: 2024-01-01T00:00:00Z
  closes_at: 2024-01-31T00:00:00Z
snapshots:
  - { location_id: "0,0", location_name: A, current_population: 2500 }
  - { location_id: "3,4", location_name: B, current_population: 1000 }
balances:
  team-a: "40"
deliveries:
  - { id: d1, payer_id: team-a, origin: "0,0", location_id: "3,4", quantity: 4, delivered_at: 2024-01-02T00:00:00Z }
oracle:
  kind: seeded
  seed: 9
  acceptance_rate: 0.5
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let s = Scenario::from_yaml(SAMPLE).unwrap();
        assert_eq!(s.config.unit_price, Decimal::new(1250, 2));
        assert_eq!(s.transport, TransportFeeSchedule::default());
        assert_eq!(s.snapshots.len(), 2);
        assert_eq!(s.deliveries[0].origin, LocationId::from("0,0"));
        assert_eq!(
            s.balances.get(&PayerId::from("team-a")),
            Some(&Decimal::new(40, 0))
        );
        assert!(matches!(s.oracle, OracleConfig::Seeded { seed: 9, .. }));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let bad = SAMPLE.replace("2024-01-31T00:00:00Z", "2023-12-31T00:00:00Z");
        assert!(Scenario::from_yaml(&bad).is_err());
    }
}
