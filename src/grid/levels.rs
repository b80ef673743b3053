//! The immutable level table.
//!
//! Maps the configured price range onto a sequence of fibonacci levels, each
//! carrying the position the bot should hold once price reaches it. Built
//! once at startup; pure lookups afterwards.

use crate::config::{BoundaryBias, GridConfig};
use anyhow::Result;
use rust_decimal::Decimal;

/// A single price level and its target position.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    /// Fibonacci ratio within the range, 0 at the bottom
    pub ratio: Decimal,
    /// Absolute price of the level
    pub price: Decimal,
    /// Contracts to hold once price has fallen to this level
    pub target_qty: u32,
}

/// Ordered sequence of levels, ascending in price.
///
/// Invariants enforced at build time: strictly increasing price,
/// non-increasing target quantity.
#[derive(Debug, Clone)]
pub struct LevelTable {
    levels: Vec<Level>,
    price_min: Decimal,
    price_max: Decimal,
    bias: BoundaryBias,
}

impl LevelTable {
    /// Build the table from configuration.
    ///
    /// `price = price_min + ratio * (price_max - price_min)`; the target
    /// quantity is taken verbatim from the configured entry.
    pub fn build(grid: &GridConfig) -> Result<Self> {
        anyhow::ensure!(
            grid.price_max > grid.price_min,
            "price range must have positive span"
        );
        anyhow::ensure!(grid.levels.len() >= 2, "at least two levels are required");

        let span = grid.price_max - grid.price_min;
        let levels: Vec<Level> = grid
            .levels
            .iter()
            .map(|entry| Level {
                ratio: entry.ratio,
                price: grid.price_min + entry.ratio * span,
                target_qty: entry.target_qty,
            })
            .collect();

        for pair in levels.windows(2) {
            anyhow::ensure!(
                pair[1].price > pair[0].price,
                "level prices must be strictly increasing ({} then {})",
                pair[0].price,
                pair[1].price
            );
            anyhow::ensure!(
                pair[1].target_qty <= pair[0].target_qty,
                "target quantities must be non-increasing ({} then {})",
                pair[0].target_qty,
                pair[1].target_qty
            );
        }

        Ok(Self {
            levels,
            price_min: grid.price_min,
            price_max: grid.price_max,
            bias: grid.boundary_bias,
        })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> &Level {
        &self.levels[index]
    }

    pub fn in_range(&self, price: Decimal) -> bool {
        price >= self.price_min && price <= self.price_max
    }

    /// Tightest pair of adjacent levels bracketing `price`.
    ///
    /// Out-of-range prices return the boundary level repeated; callers treat
    /// that as "no further orders on that side". A price landing exactly on a
    /// level is resolved by the configured boundary bias.
    pub fn bracket(&self, price: Decimal) -> (&Level, &Level) {
        let last = self.levels.len() - 1;
        if price <= self.levels[0].price {
            if price < self.levels[0].price {
                return (&self.levels[0], &self.levels[0]);
            }
            // Exactly on the bottom level
            return match self.bias {
                BoundaryBias::Lower => (&self.levels[0], &self.levels[1]),
                BoundaryBias::Upper => (&self.levels[0], &self.levels[0]),
            };
        }
        if price >= self.levels[last].price {
            if price > self.levels[last].price {
                return (&self.levels[last], &self.levels[last]);
            }
            return match self.bias {
                BoundaryBias::Lower => (&self.levels[last], &self.levels[last]),
                BoundaryBias::Upper => (&self.levels[last - 1], &self.levels[last]),
            };
        }

        // First level at or above price; exists because price < top
        let hi = self
            .levels
            .iter()
            .position(|level| level.price >= price)
            .expect("price below the top level");

        if self.levels[hi].price == price {
            return match self.bias {
                BoundaryBias::Lower => (&self.levels[hi], &self.levels[hi + 1]),
                BoundaryBias::Upper => (&self.levels[hi - 1], &self.levels[hi]),
            };
        }
        (&self.levels[hi - 1], &self.levels[hi])
    }

    /// The level `steps` positions away from `index`, clamped to the table
    /// boundary. Negative steps move toward lower prices.
    pub fn next(&self, index: usize, steps: isize) -> &Level {
        let target = index as isize + steps;
        let clamped = target.clamp(0, self.levels.len() as isize - 1) as usize;
        &self.levels[clamped]
    }

    /// Index of the nearest level below `price` (the buy-side primary), if
    /// any. With `BoundaryBias::Lower` an exact touch still counts as below.
    pub fn primary_below(&self, price: Decimal) -> Option<usize> {
        self.levels
            .iter()
            .rposition(|level| match self.bias {
                BoundaryBias::Lower => level.price <= price,
                BoundaryBias::Upper => level.price < price,
            })
    }

    /// Index of the nearest level above `price` (the sell-side primary), if
    /// any. With `BoundaryBias::Upper` an exact touch still counts as above.
    pub fn primary_above(&self, price: Decimal) -> Option<usize> {
        self.levels.iter().position(|level| match self.bias {
            BoundaryBias::Lower => level.price > price,
            BoundaryBias::Upper => level.price >= price,
        })
    }

    /// Target position for an arbitrary price, clamped at the table edges.
    pub fn target_for(&self, price: Decimal) -> u32 {
        if price <= self.levels[0].price {
            return self.levels[0].target_qty;
        }
        let last = self.levels.len() - 1;
        if price >= self.levels[last].price {
            return self.levels[last].target_qty;
        }
        let (lower, _) = self.bracket(price);
        lower.target_qty
    }
}
