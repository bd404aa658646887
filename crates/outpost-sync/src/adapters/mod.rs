//! Built-in entity adapters.
//!
//! - [`ClientAdapter`] - a flat entity keyed by document number
//! - [`PriceListAdapter`] / [`PriceListItemAdapter`] - a header with child
//!   lines, created offline under a correlation key

mod client;
mod price_list;

pub use client::ClientAdapter;
pub use price_list::{PriceListAdapter, PriceListItemAdapter};
