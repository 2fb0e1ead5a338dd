//! # panel-sync
//!
//! Differential synchronization between a server-side widget document and its
//! browser-rendered replica, for notebook embedding.
//!
//! ## What it does
//!
//! - **Document**: an arena of models with a ledger of pending mutation events
//! - **Diff**: drains the ledger into `PATCH-DOC` messages, with numeric arrays
//!   sent as binary buffers or inline base64
//! - **Push**: writes a patch to any `futures::Sink` of frames in a fixed order
//! - **Receiver**: reassembles frames into a patch and applies it to a replica
//! - **Embed**: explores every widget state ahead of time and records the
//!   patches so a static page can replay them
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`document`] | `Document`, roots, change listeners, patch application |
//! | [`event`] | `MutationEvent` and the `EventLedger` |
//! | [`hold`] | `HoldGate`, the scoped switch suppressing outgoing diffs |
//! | [`diff`] | `compute_diff` and `record_events` |
//! | [`push`] | `push` over an asynchronous channel |
//! | [`protocol`] | Wire messages, array codec and the frame `Receiver` |
//! | [`component`] | Widgets, panes and layouts rendered into a document |
//! | [`embed`] | `embed_state` and the `SnapshotTree` |
//! | [`notebook`] | MIME bundles for notebook display |
//! | [`config`] | Options with environment fallbacks |
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures::channel::mpsc;
//! use panel_sync::{push, Document, HoldGate, Model};
//! use serde_json::json;
//!
//! # async fn run() -> panel_sync::Result<()> {
//! let mut doc = Document::new();
//! let slider = doc.insert_model(Model::new("Slider").with_property("value", json!(0)));
//! doc.add_root(&slider)?;
//! doc.hold();
//!
//! let gate = HoldGate::new();
//! let (mut tx, _rx) = mpsc::unbounded();
//! doc.set_property(&slider, "value", json!(5))?;
//! push(&mut doc, &gate, &mut tx, true).await?;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod config;
pub mod diff;
pub mod document;
pub mod embed;
pub mod error;
pub mod event;
pub mod hold;
pub mod model;
pub mod notebook;
pub mod protocol;
pub mod push;

pub use component::{Component, Layout, LayoutKind, Options, Pane, Widget, WidgetKind};
pub use config::{Config, Resolved};
pub use diff::{compute_diff, record_events, RecordedPatch};
pub use document::{add_to_doc, transfer_root, Document};
pub use embed::{embed_state, EmbedOptions, EmbeddedState, SnapshotTree, StateKey};
pub use error::{Result, SyncError};
pub use event::{EventId, EventKind, EventLedger, MutationEvent};
pub use hold::{HoldGate, HoldGuard};
pub use model::{CustomJs, Model, ModelId, NumericArray, PropertyValue};
pub use notebook::{mimebundle_to_html, render_component, render_mimebundle, render_model, MimeBundle};
pub use protocol::{Frame, PatchMessage, Receiver};
pub use push::push;
