mod identity;
mod ledger;
mod limits;
mod wallet;

pub use identity::*;
pub use ledger::*;
pub use limits::*;
pub use wallet::*;
