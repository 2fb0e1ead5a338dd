//! Offline export of application state.
//!
//! Widgets with a finite (or sampled) value domain are driven through every
//! combination of values. The patch each combination produces is stored in a
//! [`SnapshotTree`] keyed by the values the browser will see, so a static page
//! can replay the changes without a running server.

pub mod domain;
pub mod explorer;
pub mod snapshot;

pub use domain::{cardinality, cross_product, resolve_domain, sample_range};
pub use explorer::{embed_state, EmbedOptions, EmbeddedState, EMBEDDED_TAG, STATE_JS, STATE_MODEL};
pub use snapshot::{SnapshotTree, StateKey};
