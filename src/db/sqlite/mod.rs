mod common;
mod demo_sessions;
mod idempotency;
mod ledger;
mod limits;
mod wallets;

pub use demo_sessions::SqliteDemoSessionRepo;
pub use idempotency::SqliteIdempotencyRepo;
pub use ledger::SqliteCreditLedgerRepo;
pub use limits::SqliteUsageLimitsRepo;
pub use wallets::SqliteWalletRepo;
