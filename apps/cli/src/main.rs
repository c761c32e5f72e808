#![deny(warnings)]

//! Headless CLI that runs one MTO Type-1 scenario end to end and prints a
//! JSON report: allocation trail, delivery decisions, settlement trail and
//! statistics.

mod scenario;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use mto_core::{Delivery, LocationId, TileRequirement};
use mto_engine::{
    CalculationStep, DeliveryCandidate, MtoType1Calculator, SettlementStep, StatsSummary,
};
use rust_decimal::Decimal;
use scenario::Scenario;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    scenario: String,
    now: Option<DateTime<Utc>>,
}

fn parse_args() -> Result<Args> {
    let mut scenario: Option<String> = None;
    let mut now: Option<DateTime<Utc>> = None;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => scenario = it.next(),
            "--now" => {
                let raw = it.next().context("--now requires a timestamp")?;
                let ts = DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid --now timestamp {raw}"))?;
                now = Some(ts.with_timezone(&Utc));
            }
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    match scenario {
        Some(scenario) => Ok(Args { scenario, now }),
        None => bail!("usage: mto-cli --scenario <path.yaml> [--now <rfc3339>]"),
    }
}

#[derive(Debug, Serialize)]
struct RejectedDelivery {
    id: String,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    allocation: Vec<CalculationStep>,
    accepted: Vec<Delivery>,
    rejected: Vec<RejectedDelivery>,
    settlement: Vec<SettlementStep>,
    settled_units: usize,
    tiles: Vec<TileRequirement>,
    statistics: StatsSummary,
}

/// Run a scenario. `now` overrides each delivery's own timestamp as the
/// validation clock.
fn run(scenario: &Scenario, now: Option<DateTime<Utc>>) -> Result<Report> {
    let calc = MtoType1Calculator::new(scenario.config.clone(), scenario.transport.clone())?;
    let alloc = calc.allocate(&scenario.snapshots)?;

    let mut balances = scenario.balances.clone();
    let mut reserved: BTreeMap<LocationId, u64> = BTreeMap::new();
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for p in &scenario.deliveries {
        let Some(tile) = alloc.book.get(&p.location_id) else {
            rejected.push(RejectedDelivery {
                id: p.id.to_string(),
                errors: vec![format!("unknown location {}", p.location_id)],
            });
            continue;
        };
        // Accepted but not yet settled deliveries hold requirement back.
        let mut view = tile.clone();
        let held = reserved.get(&p.location_id).copied().unwrap_or(0);
        view.remaining_requirement = view.remaining_requirement.saturating_sub(held);

        let fee = match calc.route_fee(&p.origin, &p.location_id, p.quantity) {
            Ok(fee) => fee,
            Err(e) => {
                rejected.push(RejectedDelivery {
                    id: p.id.to_string(),
                    errors: vec![e.to_string()],
                });
                continue;
            }
        };
        let candidate = DeliveryCandidate {
            payer_id: p.payer_id.clone(),
            location_id: p.location_id.clone(),
            quantity: p.quantity,
            at: now.unwrap_or(p.delivered_at),
        };
        let result =
            calc.validate_delivery(&candidate, &scenario.requirement, &view, &balances, fee);
        if !result.valid {
            info!(delivery = %p.id, errors = ?result.messages(), "delivery rejected");
            rejected.push(RejectedDelivery {
                id: p.id.to_string(),
                errors: result.messages(),
            });
            continue;
        }
        let balance = balances.entry(p.payer_id.clone()).or_insert(Decimal::ZERO);
        *balance -= fee;
        *reserved.entry(p.location_id.clone()).or_insert(0) += p.quantity;
        accepted.push(Delivery {
            id: p.id.clone(),
            requirement_id: scenario.requirement.id.clone(),
            location_id: p.location_id.clone(),
            payer_id: p.payer_id.clone(),
            quantity: p.quantity,
            delivered_at: p.delivered_at,
        });
    }

    let oracle = scenario.oracle.build();
    let run = calc.settle(alloc.book, &accepted, &scenario.requirement.id, oracle.as_ref())?;
    let statistics = calc.statistics(&scenario.requirement, run.book.tiles(), &accepted);
    let settled_units = run.all_settlements().count();

    Ok(Report {
        allocation: alloc.steps,
        accepted,
        rejected,
        settlement: run.steps,
        settled_units,
        tiles: run.book.into_tiles(),
        statistics,
    })
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    info!(scenario = %args.scenario, now = ?args.now, "starting CLI");

    let scenario = Scenario::load(&args.scenario)?;
    let report = run(&scenario, args.now)?;
    info!(
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        settled = report.settled_units,
        "scenario complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
