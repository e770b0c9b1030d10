//! Session demo
//!
//! Walks one booking session end to end: rates, a converted price, a form draft and seat selection.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use travel_session_engine::{
    CabinClass, EngineConfig, FileStore, HttpRateProvider, KvStore, MemoryStore, RateProvider,
    SeatFeature, SeatInventory, SeatStatus, SessionContext, StaticRateProvider, SystemClock,
};

/// Travel session engine demo
#[derive(Parser)]
#[command(name = "session-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Engine config file (JSON)
    #[arg(long, env = "SESSION_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Persist session state in this directory instead of memory
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Use built-in rates instead of the HTTP provider
    #[arg(long)]
    offline: bool,

    /// Display currency code
    #[arg(long, default_value = "GHS")]
    currency: String,

    /// Pick the currency from an ISO country code instead
    #[arg(long)]
    country: Option<String>,

    /// Price in the base currency to convert
    #[arg(long, default_value_t = 250.0)]
    price: f64,

    /// Cabin class: economy, business or first
    #[arg(long, default_value = "economy")]
    cabin: String,

    /// Number of passengers to seat
    #[arg(long, default_value_t = 2)]
    passengers: usize,

    /// Seed for a reproducible seat map
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckoutDraft {
    step: u32,
    currency: String,
    passengers: usize,
}

const DRAFT_KEY: &str = "demo-checkout";

// Rates used with --offline, relative to USD
const OFFLINE_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("GHS", 12.0),
    ("NGN", 1500.0),
    ("KES", 129.0),
    ("ZAR", 18.2),
    ("CAD", 1.36),
    ("XOF", 603.0),
    ("AED", 3.67),
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "travel_session_engine=debug,session_demo=debug,info"
    } else {
        "travel_session_engine=info,session_demo=info,warn"
    };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let store: Arc<dyn KvStore> = match &cli.store_dir {
        Some(dir) => Arc::new(
            FileStore::open(dir).with_context(|| format!("opening store at {}", dir.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let provider: Arc<dyn RateProvider> = if cli.offline {
        Arc::new(StaticRateProvider::new(OFFLINE_RATES.iter().copied()))
    } else {
        Arc::new(HttpRateProvider::from_config(&config.rates)?)
    };

    let mut ctx = SessionContext::new(&config, store, provider, Arc::new(SystemClock));

    // Rates: last-known snapshot first, then wait for the background revalidation
    let restored = ctx.restore();
    info!(currency = restored.currency.code, rates = ?restored.rates, "session restored");
    while ctx.rates().is_refreshing() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let table = ctx.rates().table();
    println!(
        "Rates: {} currencies against {} (fetched at {})",
        table.len(),
        table.base(),
        table.fetched_at()
    );

    let profile = match &cli.country {
        Some(country) => ctx.select_country(country)?,
        None => ctx.select_currency(&cli.currency)?,
    };
    println!(
        "Price: {:.2} {} -> {} ({})",
        cli.price,
        ctx.rates().base_currency(),
        ctx.display_price(cli.price),
        profile.display_locale
    );

    // Draft: save, read back, resume prompt
    let resumed = ctx.drafts().exists(DRAFT_KEY);
    ctx.drafts().save(
        DRAFT_KEY,
        &CheckoutDraft {
            step: 2,
            currency: profile.code.to_string(),
            passengers: cli.passengers,
        },
    )?;
    let draft: Option<CheckoutDraft> = ctx.drafts().load(DRAFT_KEY);
    println!("Draft: resumed={} loaded={:?}", resumed, draft);

    // Seats: generate, auto-pick the first free seats, confirm
    let cabin: CabinClass = cli.cabin.parse()?;
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut inventory =
        SeatInventory::generate_with_rng(cabin, cli.passengers, &config.seats, &mut rng)?;

    let candidates: Vec<String> = inventory
        .seat_map()
        .seats()
        .iter()
        .filter(|seat| seat.status == SeatStatus::Available)
        .take(cli.passengers)
        .map(|seat| seat.id.clone())
        .collect();
    for seat_id in &candidates {
        inventory.select(seat_id)?;
    }

    for (row, seats) in inventory.seat_map().rows() {
        let line: String = seats
            .iter()
            .map(|seat| match seat.status {
                SeatStatus::Available if seat.has_feature(SeatFeature::ExtraLegroom) => '+',
                SeatStatus::Available => '.',
                SeatStatus::Selected => '*',
                SeatStatus::Occupied => 'x',
                SeatStatus::Reserved => 'r',
            })
            .collect();
        println!("{:>3} {}", row, line);
    }

    let confirmed = inventory.confirm()?;
    let seat_ids: Vec<&str> = confirmed.seats.iter().map(|s| s.id.as_str()).collect();
    println!(
        "Seats: {} in {} (surcharge {})",
        seat_ids.join(", "),
        confirmed.cabin_class,
        ctx.display_price(confirmed.total_surcharge)
    );

    ctx.drafts().clear(DRAFT_KEY)?;

    let stats = ctx.rates().stats();
    info!(
        lookups = stats.lookups,
        refresh_attempts = stats.refresh_attempts,
        refresh_failures = stats.refresh_failures,
        "rate cache stats"
    );
    Ok(())
}
