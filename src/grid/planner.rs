//! Order planning.
//!
//! Given current price and position, computes the desired set of resting
//! orders: for each side, a primary order at the nearest level and a
//! secondary order one level further out, pushed an extra dollar away to
//! catch sharp excursions. Prices carry a small random sub-integer offset so
//! they never land on exact round numbers.

use crate::grid::levels::LevelTable;
use crate::utils::round_to_tick;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order tier: primary rests at the nearest level, secondary one level
/// further out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Primary,
    Secondary,
}

impl Tier {
    /// Short tag used in trade reasons and notifications.
    pub fn tag(&self) -> &'static str {
        match self {
            Tier::Primary => "L1",
            Tier::Secondary => "L2",
        }
    }
}

/// One of the four fixed order identities the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub tier: Tier,
    pub side: Side,
}

impl Slot {
    pub const PRIMARY_BUY: Slot = Slot {
        tier: Tier::Primary,
        side: Side::Buy,
    };
    pub const SECONDARY_BUY: Slot = Slot {
        tier: Tier::Secondary,
        side: Side::Buy,
    };
    pub const PRIMARY_SELL: Slot = Slot {
        tier: Tier::Primary,
        side: Side::Sell,
    };
    pub const SECONDARY_SELL: Slot = Slot {
        tier: Tier::Secondary,
        side: Side::Sell,
    };

    pub const ALL: [Slot; 4] = [
        Slot::PRIMARY_BUY,
        Slot::SECONDARY_BUY,
        Slot::PRIMARY_SELL,
        Slot::SECONDARY_SELL,
    ];

    /// The other tier on the same side.
    pub fn sibling(&self) -> Slot {
        Slot {
            tier: match self.tier {
                Tier::Primary => Tier::Secondary,
                Tier::Secondary => Tier::Primary,
            },
            side: self.side,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tier.tag(), self.side)
    }
}

/// An order the planner wants resting in a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredOrder {
    pub slot: Slot,
    /// The level the order is anchored to; used for staleness comparison so
    /// jitter alone never forces a replacement
    pub level_price: Decimal,
    pub level_ratio: Decimal,
    /// Actual limit price, jittered and rounded to tick
    pub price: Decimal,
    pub qty: u32,
}

/// Randomized sub-integer price offset source.
///
/// Draws uniformly from a fixed set of fractional offsets. The RNG is owned
/// and injected, never global, so tests can seed it deterministically.
#[derive(Debug)]
pub struct Jitter {
    offsets: Vec<Decimal>,
    rng: StdRng,
}

impl Jitter {
    pub fn new(offsets: Vec<Decimal>) -> Self {
        Self {
            offsets,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(offsets: Vec<Decimal>, seed: u64) -> Self {
        Self {
            offsets,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self) -> Decimal {
        self.offsets
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Computes the desired order set from price and position.
pub struct OrderPlanner {
    table: LevelTable,
    jitter: Jitter,
    secondary_offset: Decimal,
    tick: Decimal,
}

impl OrderPlanner {
    pub fn new(table: LevelTable, jitter: Jitter, secondary_offset: Decimal, tick: Decimal) -> Self {
        Self {
            table,
            jitter,
            secondary_offset,
            tick,
        }
    }

    pub fn table(&self) -> &LevelTable {
        &self.table
    }

    /// Desired orders for the four slots; absent entries mean no order
    /// should rest there (zero quantity, or no level beyond the boundary).
    pub fn compute_desired(
        &mut self,
        price: Decimal,
        position: u32,
    ) -> BTreeMap<Slot, DesiredOrder> {
        let mut desired = BTreeMap::new();

        // Buy side: primary at the nearest level below, secondary one further
        // down with the extra offset.
        if let Some(primary) = self.table.primary_below(price) {
            let level = self.table.level(primary).clone();
            let qty = level.target_qty.saturating_sub(position);
            if qty > 0 {
                let limit = round_to_tick(level.price - Decimal::ONE + self.jitter.draw(), self.tick);
                desired.insert(
                    Slot::PRIMARY_BUY,
                    DesiredOrder {
                        slot: Slot::PRIMARY_BUY,
                        level_price: level.price,
                        level_ratio: level.ratio,
                        price: limit,
                        qty,
                    },
                );
            }

            let secondary = self.table.next(primary, -1).clone();
            if secondary.price < level.price {
                let qty = secondary.target_qty.saturating_sub(position);
                if qty > 0 {
                    let limit =
                        round_to_tick(secondary.price - Decimal::ONE + self.jitter.draw(), self.tick)
                            - self.secondary_offset;
                    desired.insert(
                        Slot::SECONDARY_BUY,
                        DesiredOrder {
                            slot: Slot::SECONDARY_BUY,
                            level_price: secondary.price,
                            level_ratio: secondary.ratio,
                            price: limit,
                            qty,
                        },
                    );
                }
            }
        }

        // Sell side mirrors upward.
        if let Some(primary) = self.table.primary_above(price) {
            let level = self.table.level(primary).clone();
            let qty = position.saturating_sub(level.target_qty);
            if qty > 0 {
                let limit = round_to_tick(level.price + self.jitter.draw(), self.tick);
                desired.insert(
                    Slot::PRIMARY_SELL,
                    DesiredOrder {
                        slot: Slot::PRIMARY_SELL,
                        level_price: level.price,
                        level_ratio: level.ratio,
                        price: limit,
                        qty,
                    },
                );
            }

            let secondary = self.table.next(primary, 1).clone();
            if secondary.price > level.price {
                let qty = position.saturating_sub(secondary.target_qty);
                if qty > 0 {
                    let limit = round_to_tick(secondary.price + self.jitter.draw(), self.tick)
                        + self.secondary_offset;
                    desired.insert(
                        Slot::SECONDARY_SELL,
                        DesiredOrder {
                            slot: Slot::SECONDARY_SELL,
                            level_price: secondary.price,
                            level_ratio: secondary.ratio,
                            price: limit,
                            qty,
                        },
                    );
                }
            }
        }

        desired
    }
}
