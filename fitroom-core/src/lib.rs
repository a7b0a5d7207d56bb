//! Fitroom core library: try-on orchestration, caching, and cost tracking.
//!
//! The main entry point is [`session::TryOnSession`], which turns garment,
//! size, and pose selections into generated previews through a
//! [`cache::TryOnCache`], the [`oracle`] contracts, and a [`ledger::CostLedger`]
//! over a [`store::FitroomStore`].

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod pricing;
pub mod progress;
pub mod prompt;
pub mod recommend;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;
pub mod wardrobe;
