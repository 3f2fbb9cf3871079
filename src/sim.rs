//! Workload generation and book preload for simulation runs.
//!
//! Everything here exercises the engine strictly through its public
//! operations and is deterministic under a fixed seed.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::engine::Engine;
use crate::price_map::PriceMapper;
use crate::types::{EngineError, OrderType, Side, TimeInForce};

/// One generated order event.
#[derive(Clone, Copy, Debug)]
pub struct WorkloadOp {
    pub kind: OrderType,
    pub side: Side,
    /// Tick index; meaningless for market orders
    pub price_idx: u32,
    pub qty: i64,
}

/// Seeded order-flow generator: mostly limit orders uniform over a price
/// band, a small fraction of market orders, quantities 1..=100.
pub struct WorkloadGen {
    rng: ChaCha8Rng,
    mapper: PriceMapper,
    lo: f64,
    hi: f64,
    market_prob: f64,
}

impl WorkloadGen {
    pub fn new(seed: u64, mapper: PriceMapper, lo: f64, hi: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            mapper,
            lo,
            hi,
            market_prob: 0.03,
        }
    }

    /// Draw the next order event.
    pub fn next_op(&mut self) -> WorkloadOp {
        let is_market = self.rng.gen_bool(self.market_prob);
        let side = if self.rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let qty = self.rng.gen_range(1..=100);

        if is_market {
            WorkloadOp { kind: OrderType::Market, side, price_idx: 0, qty }
        } else {
            let price = self.rng.gen_range(self.lo..self.hi);
            WorkloadOp {
                kind: OrderType::Limit,
                side,
                price_idx: self.mapper.price_to_idx(price),
                qty,
            }
        }
    }

    /// Draw a client id in `[1, bound)` for cancel targeting.
    pub fn pick_client(&mut self, bound: u64) -> u64 {
        self.rng.gen_range(1..bound.max(2))
    }
}

/// Preload `count` resting GFD orders around `base_price`: buys below,
/// sells above, offsets uniform within `band_ticks`, quantities 1..=8.
///
/// `next_client` and `clock` are advanced one step per order so the caller
/// can keep issuing ids and timestamps from where the preload stopped.
pub fn preload(
    engine: &mut Engine,
    mapper: &PriceMapper,
    seed: u64,
    count: u64,
    base_price: f64,
    band_ticks: u32,
    next_client: &mut u64,
    clock: &mut u64,
) -> Result<(), EngineError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let base_idx = mapper.price_to_idx(base_price);

    for i in 0..count {
        let offset = rng.gen_range(1..=band_ticks);
        let (side, price_idx) = if i & 1 == 1 {
            (Side::Buy, base_idx.saturating_sub(offset))
        } else {
            (Side::Sell, (base_idx + offset).min(mapper.levels() - 1))
        };
        let qty = (i & 7) as i64 + 1;

        let client_id = *next_client;
        *next_client += 1;
        let ts = *clock;
        *clock += 1;

        engine.place_limit(client_id, side, price_idx, qty, ts, TimeInForce::Gfd)?;
    }
    Ok(())
}
