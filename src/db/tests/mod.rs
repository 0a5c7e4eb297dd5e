//! Shared database repository tests.
//!
//! All tests run against fast in-memory SQLite databases with the real
//! migrations applied, so the schema under test matches production.

pub mod harness;

mod idempotency;
mod ledger;
mod limits;
