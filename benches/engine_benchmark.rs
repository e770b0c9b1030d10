use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use travel_session_engine::{
    CabinClass, ConversionService, CurrencyProfile, ManualClock, MemoryStore, RateCache,
    RateCacheConfig, SeatConfig, SeatInventory, StaticRateProvider,
};

// Seat map generation and a burst of random clicks, per cabin class
pub fn seat_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("seat_inventory");
    let config = SeatConfig::default();

    for cabin in [CabinClass::First, CabinClass::Business, CabinClass::Economy] {
        group.bench_with_input(BenchmarkId::new("generate", cabin), &cabin, |b, &cabin| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| {
                let inventory =
                    SeatInventory::generate_with_rng(cabin, 2, &config, &mut rng).unwrap();
                black_box(inventory.seat_map().len())
            })
        });

        group.bench_with_input(BenchmarkId::new("select", cabin), &cabin, |b, &cabin| {
            let mut rng = StdRng::seed_from_u64(2);
            b.iter(|| {
                let mut inventory =
                    SeatInventory::generate_with_rng(cabin, 4, &config, &mut rng).unwrap();
                let ids: Vec<String> = inventory
                    .seat_map()
                    .seats()
                    .iter()
                    .map(|seat| seat.id.clone())
                    .collect();
                for _ in 0..100 {
                    let id = ids.choose(&mut rng).unwrap();
                    let _ = inventory.select(id);
                }
                black_box(inventory.total_surcharge())
            })
        });
    }

    group.finish();
}

// Lookups against a warm table, with and without formatting
pub fn conversion_benchmark(c: &mut Criterion) {
    let cache = RateCache::new(
        &RateCacheConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(StaticRateProvider::new([
            ("USD", 1.0),
            ("EUR", 0.92),
            ("GHS", 12.0),
            ("NGN", 1500.0),
            ("XOF", 603.0),
        ])),
        Arc::new(ManualClock::starting_now()),
    );
    let runtime = tokio::runtime::Runtime::new().unwrap();
    assert!(runtime.block_on(cache.refresh()));
    let service = ConversionService::new(cache);

    let mut group = c.benchmark_group("conversion");

    group.bench_function("convert", |b| {
        b.iter(|| black_box(service.convert(black_box(1234.56), "EUR", "NGN")))
    });

    for code in ["USD", "EUR", "XOF"] {
        let profile = CurrencyProfile::by_code(code).unwrap();
        group.bench_with_input(
            BenchmarkId::new("convert_and_format", code),
            &profile,
            |b, profile| {
                b.iter(|| black_box(service.convert_and_format(black_box(98765.43), "USD", profile)))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, seat_benchmark, conversion_benchmark);
criterion_main!(benches);
