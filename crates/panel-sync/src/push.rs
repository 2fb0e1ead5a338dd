//! Sends pending document changes across an asynchronous channel.

use std::fmt;

use futures::{Sink, SinkExt};

use crate::diff::compute_diff;
use crate::document::Document;
use crate::error::{Result, SyncError};
use crate::hold::HoldGate;
use crate::protocol::Frame;

/// Diff the document and send the patch over `channel`.
///
/// Frames go out as header, metadata, content, then one buffer header and
/// payload pair per buffer. Returns the number of frames sent, zero when
/// there was nothing to push.
///
/// The ledger is drained before the first frame is written, so a failed write
/// loses the update; the caller has to resynchronize the client.
pub async fn push<S>(doc: &mut Document, gate: &HoldGate, channel: &mut S, binary: bool) -> Result<usize>
where
    S: Sink<Frame> + Unpin,
    S::Error: fmt::Display,
{
    let Some(msg) = compute_diff(doc, gate, binary, None)? else {
        return Ok(0);
    };

    let frames = msg.frames()?;
    let count = frames.len();
    for frame in frames {
        channel.send(frame).await.map_err(|e| {
            tracing::warn!(msgid = %msg.header().msgid, error = %e, "patch push failed");
            SyncError::Channel(e.to_string())
        })?;
    }
    tracing::debug!(msgid = %msg.header().msgid, frames = count, "pushed patch");
    Ok(count)
}
