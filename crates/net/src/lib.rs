//! Focusroom Network Library
//!
//! Exposes the session service over TCP.
//!
//! # Architecture
//!
//! - **Server**: authenticates connections and dispatches their requests
//! - **Hub**: fans session events out to subscribed connections
//! - **Client**: async handle for calling the server and receiving events
//! - **Protocol**: length-prefixed JSON frames
//!
//! # Usage
//!
//! ```ignore
//! let hub = Arc::new(Hub::new());
//! let service = Arc::new(SessionService::new(db, hasher).with_events(hub.clone()));
//! let server = Server::start(addr, ServerContext::new(service, hub, auth)).await?;
//!
//! let mut client = Client::connect(server.addr(), token).await?;
//! client.subscribe(Topic::Session(session_id)).await?;
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         ClientEvent::Event { event, .. } => { /* handle */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod auth;
pub mod client;
pub mod dispatch;
pub mod error;
mod frame;
pub mod hub;
pub mod protocol;
pub mod server;

pub use auth::Authenticator;
pub use client::{Client, ClientEvent, ConnectionState};
pub use dispatch::dispatch;
pub use error::{Error, Result};
pub use hub::{Hub, Subscription};
pub use protocol::{ClientFrame, Request, Response, ServerFrame, WireError};
pub use server::{Server, ServerContext};

/// Default port for focusroom servers
pub const DEFAULT_PORT: u16 = 7441;
