use anyhow::{Context, Result};
use async_tungstenite::{tokio::ConnectStream, tungstenite::Message, WebSocketStream};
use futures::io::{AsyncRead, AsyncWrite};
use futures::{Sink, SinkExt as _, Stream, StreamExt};
use panel_sync::{Document, Frame, HoldGate, PatchMessage, Receiver};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

/// A WebSocket carrying patch frames.
///
/// Text and binary WebSocket messages map one-to-one onto [`Frame`]s, so the
/// socket can be handed straight to [`panel_sync::push`].
#[derive(Debug)]
pub struct CommSocket<S = ConnectStream> {
    pub inner: WebSocketStream<S>,
    receiver: Receiver,
}

impl<S> CommSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            receiver: Receiver::new(),
        }
    }

    /// Read frames until a complete patch has arrived.
    ///
    /// Returns `None` once the socket is closed.
    pub async fn next_patch(&mut self) -> Result<Option<PatchMessage>> {
        while let Some(frame) = self.next().await {
            let frame = frame?;
            if let Some(msg) = self
                .receiver
                .consume(frame)
                .context("Failed to decode patch frame")?
            {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    /// Diff `doc` and send any pending changes. Returns the number of frames sent.
    pub async fn push(&mut self, doc: &mut Document, gate: &HoldGate, binary: bool) -> Result<usize> {
        panel_sync::push(doc, gate, self, binary)
            .await
            .context("Failed to push document patch")
    }
}

impl<S> Stream for CommSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(msg))) => match msg {
                    Message::Text(text) => {
                        return Poll::Ready(Some(Ok(Frame::Text(text.as_str().to_owned()))));
                    }
                    Message::Binary(data) => {
                        return Poll::Ready(Some(Ok(Frame::Binary(data))));
                    }
                    // Ping/Pong are answered by tungstenite
                    Message::Ping(_) | Message::Pong(_) => {
                        continue;
                    }
                    Message::Close(_) => {
                        return Poll::Ready(None);
                    }
                    Message::Frame(_) => {
                        tracing::warn!("received unexpected raw frame, skipping");
                        continue;
                    }
                },
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> Sink<Frame> for CommSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = anyhow::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready_unpin(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let ws_message = match item {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.inner.start_send_unpin(ws_message).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_flush_unpin(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_close_unpin(cx).map_err(Into::into)
    }
}

pub type CommSocketReader<S = ConnectStream> = futures::stream::SplitStream<CommSocket<S>>;
pub type CommSocketWriter<S = ConnectStream> = futures::stream::SplitSink<CommSocket<S>, Frame>;
