use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// Per-relay payout by block height.
///
/// `base` applies from genesis; each step replaces it from its height
/// onwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSchedule {
    base: Decimal,
    steps: BTreeMap<u64, Decimal>,
}

impl RateSchedule {
    pub fn flat(rate: Decimal) -> Self {
        Self {
            base: rate,
            steps: BTreeMap::new(),
        }
    }

    pub fn with_step(mut self, from_height: u64, rate: Decimal) -> Self {
        self.steps.insert(from_height, rate);
        self
    }

    pub fn rate_at(&self, height: u64) -> Decimal {
        self.steps
            .range(..=height)
            .next_back()
            .map_or(self.base, |(_, rate)| *rate)
    }
}
