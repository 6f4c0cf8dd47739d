//! Lead Finder API Library
//!
//! Metered business search: a credit ledger (monthly allowance plus purchased packages) in front
//! of a paginated places provider, with result deduplication, normalization and filtering.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Entitlements, ledger and the search pipeline.
//! - `integrations`: Upstream provider and storage backends.
//! - `cache_validator`: Checksummed cache entries and token hashing.
//! - `circuit_breaker`: Breaker for ancillary provider lookups.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres entitlement store.
//! - `dedup`: Duplicate removal by place id.
//! - `entitlements`: Balance resolution and the storage trait.
//! - `errors`: Error handling types.
//! - `fetcher`: Multi-page upstream fetching.
//! - `filters`: Rating/price filters and the result cap.
//! - `geo`: Country inference, coordinate stripping, query building.
//! - `handlers`: HTTP request handlers and router.
//! - `ledger`: Credit decrement and search recording.
//! - `memory_store`: In-process entitlement store.
//! - `models`: Core data models.
//! - `normalizer`: Raw provider records to `LeadResult`.
//! - `place_details`: Cached single-place lookups.
//! - `search_client`: Places provider client.
//! - `search_service`: End-to-end search orchestration.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod entitlements;
pub mod errors;
pub mod fetcher;
pub mod filters;
pub mod geo;
pub mod handlers;
pub mod ledger;
pub mod memory_store;
pub mod models;
pub mod normalizer;
pub mod place_details;
pub mod search_client;
pub mod search_service;
