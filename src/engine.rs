//! Matching Engine - placement, matching, cancellation, replacement.
//!
//! Implements the aggressive-then-passive algorithm under strict price/time
//! priority:
//! 1. SWEEP: match the incoming order against the best opposite levels,
//!    strictly from each level's FIFO head
//! 2. REST: admit any good-for-day residual as a passive order
//!
//! The engine is single-threaded and non-suspending; every operation runs
//! to completion on the caller's thread, and caller invocation order is
//! arrival order for time priority. Given one input sequence the trade log
//! is bit-identical across runs.

use rustc_hash::FxHashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::book::OrderBook;
use crate::pool::{Order, OrderPool, PoolIdx, NULL_IDX};
use crate::trade::{Trade, TradeLog};
use crate::types::{EngineConfig, EngineError, OrderType, Side, TimeInForce};

/// The matching core: order pool, tick-indexed book, client index, and
/// trade log, all preallocated at construction.
///
/// The client index is the only structure that may grow after
/// construction; the hot path performs no other heap allocation.
pub struct Engine {
    pool: OrderPool,
    book: OrderBook,
    client_index: FxHashMap<u64, PoolIdx>,
    trades: TradeLog,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        tracing::info!(
            levels = config.price_levels,
            pool = config.pool_capacity,
            ring = config.ring_capacity,
            "preallocating engine"
        );
        Self {
            pool: OrderPool::new(config.pool_capacity),
            book: OrderBook::new(config.price_levels, config.ring_capacity),
            client_index: FxHashMap::with_capacity_and_hasher(
                config.client_reserve,
                Default::default(),
            ),
            trades: TradeLog::with_capacity(config.trade_reserve),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Place a limit order: sweep the opposite side at prices on-or-through
    /// `price_idx`, then handle the residual per `tif`.
    ///
    /// GFD residuals rest in the book; IOC residuals are discarded; FOK
    /// orders are pre-checked and rejected without any state change when
    /// the book cannot fill them completely.
    pub fn place_limit(
        &mut self,
        client_id: u64,
        side: Side,
        price_idx: u32,
        qty: i64,
        ts: u64,
        tif: TimeInForce,
    ) -> Result<(), EngineError> {
        if qty <= 0 {
            return Err(EngineError::InvalidQuantity(qty));
        }
        if price_idx >= self.book.levels() {
            return Err(EngineError::PriceOutOfRange { idx: price_idx, levels: self.book.levels() });
        }
        if tif == TimeInForce::Fok {
            let available = self.executable_qty(side, price_idx, qty);
            if available < qty {
                return Err(EngineError::FokUnfillable { qty, available });
            }
        }

        let mut taker = Order {
            client_id,
            engine_id: NULL_IDX,
            side,
            kind: OrderType::Limit,
            tif,
            price_idx,
            qty,
            ts,
            active: false,
        };
        self.sweep(&mut taker, Some(price_idx));

        // Residual: GFD rests, IOC/FOK silently drop the remainder
        if taker.qty > 0 && tif == TimeInForce::Gfd {
            self.rest(taker)?;
        }
        Ok(())
    }

    /// Place a market order: sweep the opposite side with no price bound
    /// until filled or the side empties. Never rests; an unfilled
    /// remainder is discarded.
    pub fn place_market(
        &mut self,
        client_id: u64,
        side: Side,
        qty: i64,
        ts: u64,
    ) -> Result<(), EngineError> {
        if qty <= 0 {
            return Err(EngineError::InvalidQuantity(qty));
        }
        let mut taker = Order {
            client_id,
            engine_id: NULL_IDX,
            side,
            kind: OrderType::Market,
            tif: TimeInForce::Ioc,
            price_idx: 0,
            qty,
            ts,
            active: false,
        };
        self.sweep(&mut taker, None);
        Ok(())
    }

    /// Cancel the resting order with this client id.
    ///
    /// Returns false for unknown ids and for stale index entries (the
    /// order matched out between admission and cancel); a stale entry is
    /// erased without freeing the slot a second time.
    pub fn cancel(&mut self, client_id: u64) -> bool {
        let Some(&eid) = self.client_index.get(&client_id) else {
            return false;
        };

        let order = self.pool.get(eid);
        if !order.active {
            self.client_index.remove(&client_id);
            return false;
        }
        let (side, price_idx, qty) = (order.side, order.price_idx, order.qty);

        if !self.book.level_mut(side, price_idx).remove(eid, qty) {
            // Indexed but not in its ring: stale, erase only
            self.client_index.remove(&client_id);
            return false;
        }

        self.pool.free(eid);
        self.client_index.remove(&client_id);
        if self.book.level(side, price_idx).is_empty() {
            self.book.update_best_after_remove(side, price_idx);
        }
        true
    }

    /// Cancel and re-enter the order at a new price and quantity, keeping
    /// its client id, side, and time-in-force. Time priority is forfeited.
    ///
    /// An unknown or no-longer-active id returns `Ok(false)` before the
    /// new parameters are even looked at. For a live order the new
    /// parameters are validated before the cancel half runs, so a
    /// rejected replace leaves the working order untouched.
    pub fn replace(
        &mut self,
        client_id: u64,
        new_price_idx: u32,
        new_qty: i64,
        ts: u64,
    ) -> Result<bool, EngineError> {
        let Some(&eid) = self.client_index.get(&client_id) else {
            return Ok(false);
        };
        let order = self.pool.get(eid);
        if !order.active {
            return Ok(false);
        }
        let (side, tif) = (order.side, order.tif);

        if new_qty <= 0 {
            return Err(EngineError::InvalidQuantity(new_qty));
        }
        if new_price_idx >= self.book.levels() {
            return Err(EngineError::PriceOutOfRange {
                idx: new_price_idx,
                levels: self.book.levels(),
            });
        }

        self.cancel(client_id);
        self.place_limit(client_id, side, new_price_idx, new_qty, ts, tif)?;
        Ok(true)
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Sweep the opposite book. `price_bound` is the taker's limit tick;
    /// `None` sweeps without a price guard (market orders).
    fn sweep(&mut self, taker: &mut Order, price_bound: Option<u32>) {
        let maker_side = taker.side.opposite();

        while taker.qty > 0 {
            let Some(best) = self.book.best_of(maker_side) else {
                break;
            };
            if let Some(bound) = price_bound {
                let crosses = match taker.side {
                    Side::Buy => best <= bound,
                    Side::Sell => best >= bound,
                };
                if !crosses {
                    break;
                }
            }

            // A drained level at the cached top is refreshed in place so a
            // stale cache cannot stall the sweep
            let Some(maker_idx) = self.book.level(maker_side, best).peek_front() else {
                self.book.update_best_after_remove(maker_side, best);
                continue;
            };

            let maker = self.pool.get_mut(maker_idx);
            let fill = maker.qty.min(taker.qty);
            let maker_client = maker.client_id;
            let maker_price = maker.price_idx;
            maker.qty -= fill;
            let maker_done = maker.qty == 0;
            taker.qty -= fill;

            self.trades.append(Trade {
                taker_client: taker.client_id,
                maker_client,
                qty: fill,
                price_idx: maker_price,
                ts: taker.ts,
            });

            let level = self.book.level_mut(maker_side, best);
            level.subtract_qty(fill);
            if maker_done {
                // Aggregate already charged; pop carries zero
                level.pop_front(0);
            }
            let drained = level.is_empty();

            if maker_done {
                self.pool.free(maker_idx);
                self.client_index.remove(&maker_client);
            }
            if drained {
                self.book.update_best_after_remove(maker_side, best);
            }
        }
    }

    /// Quantity executable against the opposite side at prices on-or-through
    /// `bound`, stopping early once `needed` is reachable. FOK pre-check.
    fn executable_qty(&self, side: Side, bound: u32, needed: i64) -> i64 {
        let mut available = 0i64;
        match side {
            Side::Buy => {
                let Some(start) = self.book.best_ask() else {
                    return 0;
                };
                let mut i = start;
                while i <= bound {
                    available += self.book.level(Side::Sell, i).total_qty();
                    if available >= needed {
                        break;
                    }
                    i += 1;
                }
            }
            Side::Sell => {
                let Some(start) = self.book.best_bid() else {
                    return 0;
                };
                let mut i = start;
                while i >= bound {
                    available += self.book.level(Side::Buy, i).total_qty();
                    if available >= needed || i == 0 {
                        break;
                    }
                    i -= 1;
                }
            }
        }
        available
    }

    /// Admit a residual as a resting order: pool slot, level push, best
    /// refresh, client index. On a capacity fault the slot is handed back
    /// and the taker dropped; fills already emitted stay observable.
    fn rest(&mut self, taker: Order) -> Result<(), EngineError> {
        let (client_id, side, price_idx, qty) =
            (taker.client_id, taker.side, taker.price_idx, taker.qty);

        let eid = self.pool.allocate(taker).ok_or(EngineError::PoolExhausted)?;
        if !self.book.level_mut(side, price_idx).push_back(eid, qty) {
            self.pool.free(eid);
            return Err(EngineError::LevelFull(price_idx));
        }
        self.book.update_best_after_add(side, price_idx);

        debug_assert!(
            !self.client_index.contains_key(&client_id),
            "client id {client_id} reused while live"
        );
        self.client_index.insert(client_id, eid);
        Ok(())
    }

    // ========================================================================
    // Read access
    // ========================================================================

    /// Emitted trades, in emission order.
    #[inline]
    pub fn trades(&self) -> &[Trade] {
        self.trades.as_slice()
    }

    #[inline]
    pub fn best_bid(&self) -> Option<u32> {
        self.book.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<u32> {
        self.book.best_ask()
    }

    /// Best ask minus best bid, in ticks.
    #[inline]
    pub fn spread(&self) -> Option<u32> {
        self.book.spread()
    }

    /// Aggregate resting quantity and order count at one tick.
    #[inline]
    pub fn depth_at(&self, side: Side, idx: u32) -> (i64, usize) {
        self.book.depth_at(side, idx)
    }

    /// The resting order for a client id, if it is still live.
    pub fn resting(&self, client_id: u64) -> Option<&Order> {
        let &eid = self.client_index.get(&client_id)?;
        let order = self.pool.get(eid);
        order.active.then_some(order)
    }

    /// Number of client index entries.
    #[inline]
    pub fn order_count(&self) -> usize {
        self.client_index.len()
    }

    /// Number of allocated pool slots.
    #[inline]
    pub fn live_orders(&self) -> u32 {
        self.pool.in_use()
    }

    /// Hash of the externally observable state, for determinism tests.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.book.best_bid().hash(&mut hasher);
        self.book.best_ask().hash(&mut hasher);
        self.client_index.len().hash(&mut hasher);
        self.pool.in_use().hash(&mut hasher);
        self.trades.len().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_engine() -> Engine {
        Engine::new(EngineConfig {
            price_levels: 10_001,
            pool_capacity: 1_024,
            ring_capacity: 64,
            trade_reserve: 256,
            client_reserve: 256,
            ..EngineConfig::default()
        })
    }

    fn gfd(engine: &mut Engine, cid: u64, side: Side, idx: u32, qty: i64, ts: u64) {
        engine
            .place_limit(cid, side, idx, qty, ts, TimeInForce::Gfd)
            .unwrap();
    }

    #[test]
    fn test_rest_no_match() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Buy, 5000, 10, 1);

        assert_eq!(engine.best_bid(), Some(5000));
        assert_eq!(engine.best_ask(), None);
        assert!(engine.trades().is_empty());
        assert_eq!(engine.depth_at(Side::Buy, 5000), (10, 1));
        assert_eq!(engine.resting(1).unwrap().qty, 10);
    }

    #[test]
    fn test_full_cross() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 10, 1);
        gfd(&mut engine, 2, Side::Buy, 5000, 10, 2);

        assert_eq!(engine.trades().len(), 1);
        let t = engine.trades()[0];
        assert_eq!(
            (t.taker_client, t.maker_client, t.qty, t.price_idx),
            (2, 1, 10, 5000)
        );
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.live_orders(), 0);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_execution_at_maker_price() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 10, 1);
        // Buyer bids through the offer; execution stays at the maker's tick
        gfd(&mut engine, 2, Side::Buy, 5010, 10, 2);

        assert_eq!(engine.trades()[0].price_idx, 5000);
    }

    #[test]
    fn test_partial_fill_maker_remains() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 100, 1);
        gfd(&mut engine, 2, Side::Buy, 5000, 30, 2);

        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].qty, 30);
        assert_eq!(engine.depth_at(Side::Sell, 5000), (70, 1));
        assert_eq!(engine.resting(1).unwrap().qty, 70);
        assert!(engine.resting(2).is_none());
    }

    #[test]
    fn test_partial_fill_taker_rests() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 30, 1);
        gfd(&mut engine, 2, Side::Buy, 5000, 100, 2);

        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.best_bid(), Some(5000));
        assert_eq!(engine.resting(2).unwrap().qty, 70);
    }

    #[test]
    fn test_ioc_discards_residual() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 30, 1);
        engine
            .place_limit(2, Side::Buy, 5000, 100, 2, TimeInForce::Ioc)
            .unwrap();

        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].qty, 30);
        assert_eq!(engine.best_bid(), None);
        assert!(engine.resting(2).is_none());
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_fok_rejects_without_state_change() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 3, 1);

        let err = engine
            .place_limit(2, Side::Buy, 5000, 10, 2, TimeInForce::Fok)
            .unwrap_err();
        assert_eq!(err, EngineError::FokUnfillable { qty: 10, available: 3 });

        assert!(engine.trades().is_empty());
        assert_eq!(engine.depth_at(Side::Sell, 5000), (3, 1));
        assert!(engine.resting(2).is_none());
    }

    #[test]
    fn test_fok_fills_across_levels() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 4, 1);
        gfd(&mut engine, 2, Side::Sell, 5001, 6, 2);

        engine
            .place_limit(3, Side::Buy, 5001, 10, 3, TimeInForce::Fok)
            .unwrap();

        assert_eq!(engine.trades().len(), 2);
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_fok_sell_side_precheck() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Buy, 5000, 4, 1);
        gfd(&mut engine, 2, Side::Buy, 4999, 6, 2);

        // Sell FOK through both bid levels fills completely
        engine
            .place_limit(3, Side::Sell, 4999, 10, 3, TimeInForce::Fok)
            .unwrap();
        assert_eq!(engine.trades().len(), 2);
        assert_eq!(engine.best_bid(), None);
    }

    #[test]
    fn test_market_sweeps_until_dry() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 2, 1);
        gfd(&mut engine, 2, Side::Sell, 5001, 3, 2);

        // Demands more than the book holds; remainder is discarded
        engine.place_market(3, Side::Buy, 50, 3).unwrap();

        assert_eq!(engine.trades().len(), 2);
        let total: i64 = engine.trades().iter().map(|t| t.qty).sum();
        assert_eq!(total, 5);
        assert_eq!(engine.best_ask(), None);
        assert!(engine.resting(3).is_none());
    }

    #[test]
    fn test_fifo_priority_within_level() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 10, 1);
        gfd(&mut engine, 2, Side::Sell, 5000, 10, 2);
        gfd(&mut engine, 3, Side::Sell, 5000, 10, 3);

        gfd(&mut engine, 4, Side::Buy, 5000, 20, 4);

        let makers: Vec<u64> = engine.trades().iter().map(|t| t.maker_client).collect();
        assert_eq!(makers, vec![1, 2]);
        assert_eq!(engine.depth_at(Side::Sell, 5000), (10, 1));
    }

    #[test]
    fn test_price_priority_across_levels() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5002, 10, 1);
        gfd(&mut engine, 2, Side::Sell, 5000, 10, 2);
        gfd(&mut engine, 3, Side::Sell, 5001, 10, 3);

        gfd(&mut engine, 4, Side::Buy, 5002, 30, 4);

        let prices: Vec<u32> = engine.trades().iter().map(|t| t.price_idx).collect();
        assert_eq!(prices, vec![5000, 5001, 5002]);
    }

    #[test]
    fn test_cancel_lifecycle() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Buy, 5000, 10, 1);

        assert!(engine.cancel(1));
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.live_orders(), 0);

        // Idempotent: second cancel finds nothing
        assert!(!engine.cancel(1));
        assert!(!engine.cancel(999));
    }

    #[test]
    fn test_replace_moves_order() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Buy, 5000, 10, 1);

        assert!(engine.replace(1, 4990, 25, 2).unwrap());
        assert_eq!(engine.best_bid(), Some(4990));
        assert_eq!(engine.depth_at(Side::Buy, 5000), (0, 0));
        let order = engine.resting(1).unwrap();
        assert_eq!((order.price_idx, order.qty), (4990, 25));
    }

    #[test]
    fn test_replace_forfeits_priority() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5000, 10, 1);
        gfd(&mut engine, 2, Side::Sell, 5000, 10, 2);

        // Same price: the replaced order re-enters at the back of the queue
        assert!(engine.replace(1, 5000, 10, 3).unwrap());
        gfd(&mut engine, 4, Side::Buy, 5000, 10, 4);

        assert_eq!(engine.trades()[0].maker_client, 2);
    }

    #[test]
    fn test_replace_can_cross() {
        let mut engine = small_engine();
        gfd(&mut engine, 1, Side::Sell, 5005, 10, 1);
        gfd(&mut engine, 2, Side::Buy, 5000, 10, 2);

        // Repricing the bid through the offer executes immediately
        assert!(engine.replace(2, 5005, 10, 3).unwrap());
        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].price_idx, 5005);
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.best_ask(), None);
    }

    #[test]
    fn test_replace_unknown_or_invalid() {
        let mut engine = small_engine();
        assert!(!engine.replace(42, 5000, 10, 1).unwrap());
        // An absent id short-circuits to false even with garbage new params
        assert!(!engine.replace(42, 99_999, -5, 1).unwrap());

        gfd(&mut engine, 1, Side::Buy, 5000, 10, 1);
        // Bad new parameters leave the working order untouched
        assert!(engine.replace(1, 5000, 0, 2).is_err());
        assert!(engine.replace(1, 99_999, 10, 2).is_err());
        assert_eq!(engine.resting(1).unwrap().qty, 10);
        assert_eq!(engine.best_bid(), Some(5000));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut engine = small_engine();
        assert_eq!(
            engine.place_limit(1, Side::Buy, 5000, 0, 1, TimeInForce::Gfd),
            Err(EngineError::InvalidQuantity(0))
        );
        assert_eq!(
            engine.place_limit(1, Side::Buy, 5000, -5, 1, TimeInForce::Gfd),
            Err(EngineError::InvalidQuantity(-5))
        );
        assert!(matches!(
            engine.place_limit(1, Side::Buy, 10_001, 5, 1, TimeInForce::Gfd),
            Err(EngineError::PriceOutOfRange { .. })
        ));
        assert_eq!(
            engine.place_market(1, Side::Buy, 0, 1),
            Err(EngineError::InvalidQuantity(0))
        );
        assert!(engine.trades().is_empty());
        assert_eq!(engine.live_orders(), 0);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut engine = Engine::new(EngineConfig {
            price_levels: 101,
            pool_capacity: 2,
            ring_capacity: 8,
            trade_reserve: 8,
            client_reserve: 8,
            ..EngineConfig::default()
        });

        gfd(&mut engine, 1, Side::Buy, 10, 1, 1);
        gfd(&mut engine, 2, Side::Buy, 11, 1, 2);
        assert_eq!(
            engine.place_limit(3, Side::Buy, 12, 1, 3, TimeInForce::Gfd),
            Err(EngineError::PoolExhausted)
        );

        // Book is still consistent and a freed slot is reusable
        assert!(engine.cancel(1));
        gfd(&mut engine, 4, Side::Buy, 12, 1, 4);
        assert_eq!(engine.best_bid(), Some(12));
    }

    #[test]
    fn test_level_full() {
        let mut engine = Engine::new(EngineConfig {
            price_levels: 101,
            pool_capacity: 16,
            ring_capacity: 4, // three usable slots
            trade_reserve: 8,
            client_reserve: 8,
            ..EngineConfig::default()
        });

        for cid in 1..=3 {
            gfd(&mut engine, cid, Side::Buy, 50, 1, cid);
        }
        assert_eq!(
            engine.place_limit(4, Side::Buy, 50, 1, 4, TimeInForce::Gfd),
            Err(EngineError::LevelFull(50))
        );

        // The dropped taker's slot went back to the pool
        assert_eq!(engine.live_orders(), 3);
        assert_eq!(engine.depth_at(Side::Buy, 50), (3, 3));
    }

    #[test]
    fn test_slot_reuse_through_match() {
        // Exercises the full maker-consumed path at minimal pool size
        let mut engine = Engine::new(EngineConfig {
            price_levels: 101,
            pool_capacity: 1,
            ring_capacity: 8,
            trade_reserve: 8,
            client_reserve: 8,
            ..EngineConfig::default()
        });

        gfd(&mut engine, 1, Side::Sell, 50, 5, 1);
        // Takes the 5, then rests its residual in the slot the maker vacated
        gfd(&mut engine, 2, Side::Buy, 50, 10, 2);

        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.resting(2).unwrap().qty, 5);
        assert_eq!(engine.live_orders(), 1);
    }
}
