//! Data models for Focusroom

mod ledger;
mod message;
mod participant;
mod session;
mod user;

pub use ledger::*;
pub use message::*;
pub use participant::*;
pub use session::*;
pub use user::*;
