//! Focusroom Core Library
//!
//! Session lifecycle, pseudonymous membership, timer authority, focus ledger
//! and storage for Focusroom.

pub mod access;
pub mod aggregator;
pub mod clock;
pub mod error;
pub mod events;
pub mod identity;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod prompts;
pub mod service;
pub mod storage;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventSink, NullSink, SessionEvent, SessionEventKind, Topic};
pub use identity::IdentityHasher;
pub use models::*;
pub use prompts::{HeuristicPrompts, PromptGenerator, PromptService};
pub use service::*;
pub use storage::Database;
pub use timer::TimerSnapshot;
