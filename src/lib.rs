// perps-state: derived perpetuals account state.
// raw indexer / validator feeds in, margin, risk, orders, orderbook and funding numbers out.
// every calculator is a pure function of its inputs. no I/O, no clocks unless passed in.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, Side, SignedSize, Price, Quote, Timestamp
//   1.5  numbers.rs: lenient decimal parsing, rounding to tick/step
//   2.x  reconcile.rs: merging snapshot and live maps by recency
//   3.x  subaccount.rs: equity, free collateral, leverage, per-position extras
//   4.x  position.rs: position value, risk, pnl
//   5.x  orderbook.rs: uncrossing, depth, grouping
//   6.x  funding.rs: funding cost, projections, break-even, warnings
//   7.x  config.rs: derivation params, validation
//   8.x  aggregate.rs: parent subaccount across children, pending isolated positions
//   9.x  operations.rs: optimistic deposits, withdrawals, transfers and trades
//   10.x api_state.rs: indexer / validator health
//
// documented in place: raw.rs (feed shapes), market.rs, liquidation.rs,
// orders.rs (status lifecycle), vault.rs, cache.rs

// primitives and wire data
pub mod numbers;
pub mod raw;
pub mod reconcile;
pub mod types;

// account math
pub mod aggregate;
pub mod liquidation;
pub mod market;
pub mod position;
pub mod subaccount;

// trading surfaces
pub mod funding;
pub mod orderbook;
pub mod orders;
pub mod vault;

// state plumbing
pub mod api_state;
pub mod cache;
pub mod config;
pub mod operations;

// re exports for convenience
pub use aggregate::*;
pub use api_state::*;
pub use cache::{DeriveCache, Memo};
pub use config::*;
pub use funding::*;
pub use liquidation::*;
pub use market::*;
pub use numbers::*;
pub use operations::*;
pub use orderbook::*;
pub use orders::*;
pub use position::*;
pub use raw::*;
pub use reconcile::*;
pub use subaccount::*;
pub use types::*;
pub use vault::*;
