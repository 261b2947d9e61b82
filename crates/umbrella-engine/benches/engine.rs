//! Umbrella engine benchmarks
//!
//! - Premium math on the hot billing path
//! - Capacity reservation round trips
//! - Billing batches of increasing size

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use umbrella_common::{units::units, HolderId, ManualClock, StrategyId};
use umbrella_engine::{
    premium_for, CapacityLedger, Ceilings, Collaborators, CoverEngine, Ed25519ClaimVerifier,
    EngineConfig, EventLog, InMemoryFunds, PremiumCalculator, PremiumRate, Role, RoleTable,
    StaticRiskBudget,
};

// ============ PREMIUM BENCHMARKS ============

fn bench_premium(c: &mut Criterion) {
    let mut group = c.benchmark_group("premium");
    let rate = PremiumRate::new(1, 315_360_000).unwrap();
    let calculator = PremiumCalculator::new(rate, 604_800);

    group.bench_function("premium_for", |b| {
        b.iter(|| premium_for(black_box(units(12_345)), black_box(604_800), rate))
    });

    group.bench_function("min_required_balance", |b| {
        b.iter(|| calculator.min_required_balance(black_box(units(1_000_000))))
    });

    group.finish();
}

// ============ CAPACITY BENCHMARKS ============

fn bench_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");
    let ledger = Arc::new(CapacityLedger::new());
    let strategy = StrategyId::new("bench");
    let ceilings = Some(Ceilings {
        global: u128::MAX,
        strategy: u128::MAX,
    });

    group.bench_function("reserve_revert", |b| {
        b.iter(|| {
            let reservation = ledger
                .reserve(&strategy, 0, black_box(units(100)), ceilings)
                .unwrap();
            drop(reservation);
        })
    });

    group.bench_function("reserve_commit_release", |b| {
        b.iter(|| {
            ledger
                .reserve(&strategy, 0, units(100), ceilings)
                .unwrap()
                .commit();
            ledger
                .reserve(&strategy, units(100), 0, None)
                .unwrap()
                .commit();
        })
    });

    group.finish();
}

// ============ BILLING BENCHMARKS ============

fn billing_fixture(rt: &tokio::runtime::Runtime, size: u32) -> (CoverEngine, HolderId, Vec<HolderId>) {
    let funds = Arc::new(InMemoryFunds::new());
    let roles = Arc::new(RoleTable::new());
    let collector = HolderId([0xBB; 32]);
    roles.grant(collector, Role::PremiumCollector);

    let collaborators = Collaborators {
        risk_budget: Arc::new(StaticRiskBudget::new(u128::MAX)),
        funds: funds.clone(),
        authority: roles,
        verifier: Arc::new(Ed25519ClaimVerifier),
        events: Arc::new(EventLog::new()),
        clock: Arc::new(ManualClock::new(1_700_000_000)),
    };
    let engine = CoverEngine::new(&EngineConfig::default(), collaborators).unwrap();

    let holders: Vec<HolderId> = (0..size)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[..4].copy_from_slice(&i.to_be_bytes());
            HolderId(bytes)
        })
        .collect();

    rt.block_on(async {
        for holder in &holders {
            funds.mint(holder, units(1_000_000));
            engine
                .activate(holder, units(100), units(1_000_000), None)
                .await
                .unwrap();
        }
    });

    (engine, collector, holders)
}

fn bench_billing(c: &mut Criterion) {
    let mut group = c.benchmark_group("billing");
    group.measurement_time(Duration::from_secs(10));
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for size in [10u32, 100, 1_000] {
        let (engine, collector, holders) = billing_fixture(&rt, size);
        let premiums = vec![units(1) / 10; holders.len()];
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("charge_premiums", size), &size, |b, _| {
            b.iter(|| {
                rt.block_on(engine.charge_premiums(&collector, &holders, &premiums))
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(premium_benches, bench_premium);
criterion_group!(capacity_benches, bench_capacity);
criterion_group!(billing_benches, bench_billing);

criterion_main!(premium_benches, capacity_benches, billing_benches);
