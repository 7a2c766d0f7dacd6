//! Input-keyed memoization for the calculators.
//!
//! Derived state is recomputed from scratch whenever an input changes, so a
//! cache keyed by the input's *content* is enough: same raw data, same result.
//! The caller owns the cache and calls [`Memo::advance_generation`] once per
//! update cycle; entries nobody asked for during the cycle that just ended are
//! dropped.

use crate::aggregate::{calculate_parent_subaccount_summary, AggregateError, GroupedSubaccountSummary};
use crate::config::DeriveConfig;
use crate::market::{calculate_all_markets, MarketInfo};
use crate::raw::{MarketsData, RawParentSubaccount};
use crate::types::MarketId;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::trace;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    generation: u64,
}

#[derive(Debug, Clone)]
pub struct Memo<I, V> {
    name: &'static str,
    entries: HashMap<I, Slot<V>>,
    generation: u64,
    hits: u64,
    misses: u64,
}

impl<I: Hash + Eq + Clone, V> Memo<I, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: HashMap::new(),
            generation: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached value for `input`, computing it on a miss.
    pub fn get_or_compute(&mut self, input: &I, compute: impl FnOnce(&I) -> V) -> &V {
        let generation = self.generation;
        match self.entries.entry(input.clone()) {
            Entry::Occupied(slot) => {
                self.hits += 1;
                let slot = slot.into_mut();
                slot.generation = generation;
                &slot.value
            }
            Entry::Vacant(slot) => {
                self.misses += 1;
                trace!(cache = self.name, generation, "cache miss");
                &slot
                    .insert(Slot {
                        value: compute(input),
                        generation,
                    })
                    .value
            }
        }
    }

    /// Ends the current cycle. Entries not read or written during it are evicted.
    pub fn advance_generation(&mut self) {
        let current = self.generation;
        self.entries.retain(|_, slot| slot.generation == current);
        self.generation += 1;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type ParentSummaryKey = (RawParentSubaccount, MarketsData);

/// Caches for the two most expensive fan-outs: every market, and the wallet summary.
#[derive(Debug, Clone)]
pub struct DeriveCache {
    pub markets: Memo<MarketsData, BTreeMap<MarketId, MarketInfo>>,
    pub parent_summaries: Memo<ParentSummaryKey, Result<GroupedSubaccountSummary, AggregateError>>,
}

impl Default for DeriveCache {
    fn default() -> Self {
        Self {
            markets: Memo::new("markets"),
            parent_summaries: Memo::new("parent_summary"),
        }
    }
}

impl DeriveCache {
    pub fn markets(&mut self, raw: &MarketsData) -> &BTreeMap<MarketId, MarketInfo> {
        self.markets.get_or_compute(raw, calculate_all_markets)
    }

    // config is not part of the key. rebuild the cache when it changes.
    pub fn parent_summary(
        &mut self,
        parent: &RawParentSubaccount,
        markets: &MarketsData,
        config: &DeriveConfig,
    ) -> &Result<GroupedSubaccountSummary, AggregateError> {
        let key = (parent.clone(), markets.clone());
        self.parent_summaries
            .get_or_compute(&key, |(parent, markets)| {
                calculate_parent_subaccount_summary(parent, markets, config)
            })
    }

    pub fn advance_generation(&mut self) {
        self.markets.advance_generation();
        self.parent_summaries.advance_generation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawDecimal, RawMarket};

    #[test]
    fn hit_after_miss() {
        let mut memo: Memo<u32, u32> = Memo::new("square");
        let mut calls = 0;
        assert_eq!(*memo.get_or_compute(&4, |x| { calls += 1; x * x }), 16);
        assert_eq!(*memo.get_or_compute(&4, |x| { calls += 1; x * x }), 16);
        assert_eq!(calls, 1);
        assert_eq!(memo.hits(), 1);
        assert_eq!(memo.misses(), 1);
    }

    #[test]
    fn untouched_entries_evicted_on_advance() {
        let mut memo: Memo<&str, usize> = Memo::new("len");
        memo.get_or_compute(&"a", |s| s.len());
        memo.get_or_compute(&"bb", |s| s.len());
        memo.advance_generation();
        assert_eq!(memo.len(), 2);

        // only "a" is used in the next cycle
        memo.get_or_compute(&"a", |s| s.len());
        memo.advance_generation();
        assert_eq!(memo.len(), 1);

        memo.advance_generation();
        assert!(memo.is_empty());
    }

    #[test]
    fn markets_cached_by_content() {
        let btc = RawMarket {
            ticker: MarketId::from("BTC-USD"),
            oracle_price: Some(RawDecimal::from("50000")),
            ..RawMarket::default()
        };
        let raw: MarketsData = [(btc.ticker.clone(), btc)].into_iter().collect();
        let mut cache = DeriveCache::default();

        assert_eq!(cache.markets(&raw.clone()).len(), 1);
        assert_eq!(cache.markets(&raw).len(), 1);
        assert_eq!(cache.markets.hits(), 1);
    }
}
