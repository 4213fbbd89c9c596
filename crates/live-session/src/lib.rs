pub mod binder;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;
