//! Push a patch through a real WebSocket connection on the loopback interface.

use async_tungstenite::tokio::accept_async;
use panel_comm::{CommSocket, SessionServer};
use panel_sync::{Document, HoldGate, Model, NumericArray, PropertyValue};
use serde_json::json;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_push_over_websocket() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let mut doc = Document::new();
    let plot = doc.insert_model(Model::new("Plot").with_property("title", json!("before")));
    doc.add_root(&plot)?;
    let mut replica = Document::from_json(&doc.to_json()?)?;
    doc.hold();

    let target = plot.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut socket = CommSocket::new(accept_async(stream).await?);

        let gate = HoldGate::new();
        doc.set_property(&target, "title", json!("after"))?;
        doc.set_property(&target, "ys", NumericArray::new(vec![1.0, 4.0, 9.0]))?;
        let frames = socket.push(&mut doc, &gate, true).await?;
        socket.inner.close(None).await?;
        anyhow::Ok(frames)
    });

    let client = SessionServer::from_url(&format!("http://127.0.0.1:{}/", port))?;
    let (mut socket, _response) = client.connect("app", Some("loopback")).await?;
    let patch = socket
        .next_patch()
        .await?
        .expect("server closed before sending a patch");
    replica.apply_patch(&patch)?;
    assert!(socket.next_patch().await?.is_none());

    assert_eq!(server.await??, 5);
    let model = replica.model(&plot).expect("plot is in the replica");
    assert_eq!(model.value("title"), Some(&json!("after")));
    assert_eq!(
        model.property("ys"),
        Some(&PropertyValue::Array(NumericArray::new(vec![1.0, 4.0, 9.0])))
    );
    Ok(())
}
