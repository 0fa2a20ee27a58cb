//! In-process WebSocket server for live client tests
//!
//! Every accepted connection is handed to the test as a [`MockConnection`]:
//! frames written by the client arrive on `incoming`, frames pushed into
//! `outgoing` are written to the client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Upper bound for any single wait in tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

pub struct MockConnection {
    pub incoming: mpsc::UnboundedReceiver<Message>,
    pub outgoing: mpsc::UnboundedSender<Message>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with_handshake_delay(Duration::ZERO).await
    }

    /// Delay the WebSocket handshake of every connection, keeping clients in
    /// the connecting state.
    pub async fn start_with_handshake_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = handle_connection(stream, tx).await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            connections,
        }
    }

    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("server stopped")
    }
}

async fn handle_connection(
    stream: TcpStream,
    connections: mpsc::UnboundedSender<MockConnection>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (incoming_tx, incoming) = mpsc::unbounded_channel();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
    connections
        .send(MockConnection { incoming, outgoing })
        .map_err(|_| "test dropped the mock server")?;

    loop {
        tokio::select! {
            Some(msg) = outgoing_rx.recv() => {
                write.send(msg).await?;
            }
            msg = read.next() => match msg {
                Some(Ok(msg)) => {
                    let _ = incoming_tx.send(msg);
                }
                _ => break,
            },
        }
    }

    Ok(())
}

impl MockConnection {
    /// Next frame written by the client, `None` once the connection ended.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for client frame")
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        match self.recv().await {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }

    pub fn send_json(&self, value: Value) {
        self.outgoing
            .send(Message::Text(value.to_string().into()))
            .unwrap();
    }

    /// Collect everything until the client goes away.
    pub async fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(msg) = self.recv().await {
            messages.push(msg);
        }
        messages
    }
}
