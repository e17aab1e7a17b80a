//! Caching proxy for exchange candlestick market data: live ingestion,
//! historical backfill, and interval aggregation.
pub mod aggregator;
pub mod backfill;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod exchange;
pub mod historical;
pub mod interval;
pub mod model;
pub mod pair;
pub mod retention;
pub mod store;
pub mod web;
