// Visio: live activity aggregation for a social client
//
// This is the library root. `store` is the document store abstraction and
// its backends, `social` the writes users perform, `activity` the aggregator
// that turns those writes into one unread summary.

pub mod activity;
pub mod config;
pub mod layout;
pub mod output;
pub mod replay;
pub mod session;
pub mod social;
pub mod status;
pub mod store;
