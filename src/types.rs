//! Shared order types, engine configuration, and the error taxonomy.

use thiserror::Error;

/// Order side (buy = bid book, sell = ask book)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    /// Buy side (rests in the bid array)
    Buy = 0,
    /// Sell side (rests in the ask array)
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order kind determines whether a price bound applies during matching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderType {
    /// Limit order - matches on-or-through its price, may rest (default)
    #[default]
    Limit = 0,
    /// Market order - sweeps the opposite side with no price bound, never rests
    Market = 1,
}

/// Time-in-force for limit orders.
///
/// Market orders carry implicit IOC semantics and ignore this field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimeInForce {
    /// Good-for-day: residual rests until cancelled (default)
    #[default]
    Gfd = 0,
    /// Immediate-or-cancel: residual is discarded
    Ioc = 1,
    /// Fill-or-kill: all-or-nothing, rejected up front if not fully executable
    Fok = 2,
}

/// Construction-time constants of the engine.
///
/// These form part of the external contract: changing them is a rebuild,
/// not a runtime option. Defaults reproduce the simulation build the crate
/// was tuned for.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Minimum price increment
    pub tick: f64,
    /// Price mapped to tick index 0
    pub min_price: f64,
    /// Number of price levels per side; odd gives a natural mid-book index
    pub price_levels: u32,
    /// Order pool capacity (maximum live orders)
    pub pool_capacity: u32,
    /// Ring capacity per price level; usable occupancy is one less
    pub ring_capacity: usize,
    /// Trade log reserve
    pub trade_reserve: usize,
    /// Client index bucket reserve
    pub client_reserve: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick: 0.01,
            min_price: 0.0,
            price_levels: 20_001,
            pool_capacity: 3_000_000,
            ring_capacity: 4_096,
            trade_reserve: 1 << 20,
            client_reserve: 1 << 20,
        }
    }
}

/// Errors surfaced by engine operations.
///
/// `InvalidQuantity`, `PriceOutOfRange`, and `FokUnfillable` are rejections:
/// the operation has no observable effect. `PoolExhausted` and `LevelFull`
/// are capacity faults from operator misconfiguration; the offending
/// operation aborts with the book still consistent, and any fills already
/// emitted by the sweep stay in the trade log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error("price index {idx} outside [0, {levels})")]
    PriceOutOfRange { idx: u32, levels: u32 },

    #[error("fill-or-kill order of qty {qty} exceeds executable qty {available}")]
    FokUnfillable { qty: i64, available: i64 },

    #[error("order pool exhausted")]
    PoolExhausted,

    #[error("price level ring full at tick index {0}")]
    LevelFull(u32),
}
