//! Demo driver: preload a book, replay a generated order stream, report
//! throughput, per-op latency percentiles, and a sample of trades.

use clap::Parser;
use hdrhistogram::Histogram;
use std::time::Instant;
use tracing::info;

use tick_lob::sim::{preload, WorkloadGen};
use tick_lob::{Engine, EngineConfig, OrderType, PriceMapper, TimeInForce};

#[derive(Parser)]
#[command(name = "sim")]
#[command(about = "Replay a generated order stream through the matching engine")]
struct Args {
    /// Orders to replay after preload
    #[arg(long, default_value_t = 500_000)]
    orders: u64,

    /// Resting orders to preload
    #[arg(long, default_value_t = 100_000)]
    preload: u64,

    /// Workload seed
    #[arg(long, default_value_t = 123)]
    seed: u64,

    /// Preload seed
    #[arg(long, default_value_t = 42)]
    preload_seed: u64,

    /// Center of the preload band
    #[arg(long, default_value_t = 50.0)]
    base_price: f64,

    /// Preload offset band, in ticks
    #[arg(long, default_value_t = 2_000)]
    band_ticks: u32,

    /// Lower edge of the workload price band
    #[arg(long, default_value_t = 49.0)]
    lo: f64,

    /// Upper edge of the workload price band
    #[arg(long, default_value_t = 51.0)]
    hi: f64,

    /// Ring capacity per price level
    #[arg(long, default_value_t = 4_096)]
    ring: usize,

    /// Every Nth limit order is immediate-or-cancel
    #[arg(long, default_value_t = 200)]
    ioc_every: u64,

    /// Every Nth op cancels a random earlier client
    #[arg(long, default_value_t = 10_000)]
    cancel_every: u64,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = EngineConfig {
        ring_capacity: args.ring,
        ..EngineConfig::default()
    };
    let mapper = PriceMapper::new(config.tick, config.min_price, config.price_levels);
    let mut engine = Engine::new(config);

    let mut next_client = 1u64;
    let mut clock = 0u64;

    info!(count = args.preload, "preloading book");
    preload(
        &mut engine,
        &mapper,
        args.preload_seed,
        args.preload,
        args.base_price,
        args.band_ticks,
        &mut next_client,
        &mut clock,
    )
    .expect("preload exceeded engine capacity");
    info!(
        best_bid = ?engine.best_bid(),
        best_ask = ?engine.best_ask(),
        resting = engine.order_count(),
        "preload done, starting workload"
    );

    let mut gen = WorkloadGen::new(args.seed, mapper, args.lo, args.hi);
    let mut histogram =
        Histogram::<u64>::new_with_bounds(1, 10_000_000, 3).expect("histogram bounds");

    let run_start = Instant::now();
    for i in 0..args.orders {
        let op = gen.next_op();
        let client_id = next_client;
        next_client += 1;
        let ts = clock;
        clock += 1;

        let op_start = Instant::now();
        let result = match op.kind {
            OrderType::Market => engine.place_market(client_id, op.side, op.qty, ts),
            OrderType::Limit => {
                let tif = if args.ioc_every > 0 && i % args.ioc_every == 0 {
                    TimeInForce::Ioc
                } else {
                    TimeInForce::Gfd
                };
                engine.place_limit(client_id, op.side, op.price_idx, op.qty, ts, tif)
            }
        };
        result.expect("workload exceeded engine capacity");

        if args.cancel_every > 0 && i > 0 && i % args.cancel_every == 0 {
            engine.cancel(gen.pick_client(next_client));
        }

        let nanos = op_start.elapsed().as_nanos() as u64;
        histogram.saturating_record(nanos.max(1));
    }
    let secs = run_start.elapsed().as_secs_f64();

    println!("Orders:     {}", args.orders);
    println!("Time:       {:.3}s", secs);
    println!("Throughput: {:.0} orders/s", args.orders as f64 / secs);
    println!("Trades:     {}", engine.trades().len());
    println!(
        "Latency:    p50={}ns p99={}ns p99.9={}ns max={}ns",
        histogram.value_at_quantile(0.50),
        histogram.value_at_quantile(0.99),
        histogram.value_at_quantile(0.999),
        histogram.max()
    );
    println!(
        "Top of book: bid={:?} ask={:?}",
        engine.best_bid().map(|i| mapper.idx_to_price(i)),
        engine.best_ask().map(|i| mapper.idx_to_price(i)),
    );

    for (i, trade) in engine.trades().iter().take(10).enumerate() {
        println!(
            "{i}: taker={} maker={} qty={} price={:.2}",
            trade.taker_client,
            trade.maker_client,
            trade.qty,
            mapper.idx_to_price(trade.price_idx)
        );
    }
}
