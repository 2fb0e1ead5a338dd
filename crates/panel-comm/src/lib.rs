//! # panel-comm
//!
//! WebSocket transport for [`panel_sync`] patch messages.
//!
//! [`CommSocket`] is both a `Stream` and a `Sink` of [`Frame`](panel_sync::Frame)s,
//! so a document can be pushed straight into it and the far side can read
//! complete patches back with [`CommSocket::next_patch`].
//!
//! ```rust,no_run
//! use panel_comm::SessionServer;
//! use panel_sync::{Document, HoldGate};
//!
//! pub async fn sync(doc: &mut Document) -> anyhow::Result<()> {
//!     let server = SessionServer::from_url("http://127.0.0.1:5006/?token=secret")?;
//!     let (mut socket, _response) = server.connect("app", Some("session-1")).await?;
//!
//!     let gate = HoldGate::new();
//!     socket.push(doc, &gate, true).await?;
//!
//!     while let Some(patch) = socket.next_patch().await? {
//!         doc.apply_patch(&patch)?;
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod socket;

pub use client::{origin_url, server_url, SessionServer};
pub use socket::{CommSocket, CommSocketReader, CommSocketWriter};
