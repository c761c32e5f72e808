use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use mto_core::{
    AllocationConfig, Delivery, DeliveryId, FormulaId, LocationId, PayerId, RequirementId,
    TilePopulationSnapshot,
};
use mto_engine::{allocate, settle, SeededOracle};
use rust_decimal::Decimal;

fn bench_engine(c: &mut Criterion) {
    let config = AllocationConfig {
        formula_id: FormulaId::from("F-1"),
        unit_price: Decimal::new(1000, 2),
        base_requirement_quantity: 10,
        base_population_unit: 1000,
        overall_requirement_ceiling: 50_000,
    };
    let snapshots: Vec<_> = (0..1_000u64)
        .map(|i| TilePopulationSnapshot {
            location_id: LocationId(format!("{},{}", i % 40, i / 40)),
            location_name: format!("tile-{i}"),
            current_population: (i * 7_919) % 20_000,
        })
        .collect();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let deliveries: Vec<_> = (0..5_000u64)
        .map(|i| Delivery {
            id: DeliveryId(format!("d{i}")),
            requirement_id: RequirementId::from("R1"),
            location_id: snapshots[(i % 1_000) as usize].location_id.clone(),
            payer_id: PayerId(format!("p{}", i % 17)),
            quantity: 1 + i % 30,
            delivered_at: start + chrono::Duration::minutes(i as i64),
        })
        .collect();
    let oracle = SeededOracle::new(7, 0.9);
    let requirement_id = RequirementId::from("R1");

    c.bench_function("allocate_1000_tiles", |b| {
        b.iter(|| allocate(&snapshots, &config).unwrap())
    });
    c.bench_function("settle_5000_deliveries", |b| {
        b.iter(|| {
            let alloc = allocate(&snapshots, &config).unwrap();
            settle(alloc.book, &deliveries, &config, &requirement_id, &oracle).unwrap()
        })
    });
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
