//! Embedded cowrite example
//!
//! Runs a registry in-process and edits one document from two clients
//! without any network transport.
//!
//! Run with: cargo run --example embedded

use std::sync::Arc;

use cowrite_core::{DocumentId, Operation};
use cowrite_protocol::ServerMessage;
use cowrite_storage::{MemoryStorage, Storage};
use cowrite_transport::{client_channel, Registry, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("cowrite embedded example\n");

    let storage = Arc::new(MemoryStorage::new());
    let id = DocumentId::new("board:todo")?;
    storage
        .truncate_and_write(&id, br#"{"title": "Todo", "items": [], "done": 0}"#)
        .await?;

    let registry = Registry::new(storage.clone(), ServerConfig::default());

    let (alice_handle, mut alice_out) = client_channel(16);
    let (bob_handle, mut bob_out) = client_channel(16);
    let alice = registry.attach(&id, alice_handle).await?;
    let bob = registry.attach(&id, bob_handle).await?;
    println!("Initial: {}", serde_json::to_string(&alice.snapshot.contents)?);

    // Both insert at the front without having seen each other's edit
    alice.pipe.submit(Operation::array_insert("items/0", "write docs", 0))?;
    bob.pipe.submit(Operation::array_insert("items/0", "fix bug", 0))?;

    for (name, outbox) in [("alice", &mut alice_out), ("bob", &mut bob_out)] {
        for _ in 0..2 {
            match outbox.next().await {
                Some(ServerMessage::Acknowledged { history_index }) => {
                    println!("{name}: acknowledged at {history_index}")
                }
                Some(ServerMessage::Operation { history_index, operation, .. }) => {
                    println!("{name}: remote edit at {} ({history_index})", operation.target_path)
                }
                other => println!("{name}: {other:?}"),
            }
        }
    }

    // Alice has seen both edits now
    alice.pipe.submit(Operation::text_replace("title", 0, 4, "Sprint", 2))?;
    alice_out.next().await;
    bob_out.next().await;

    alice.leave.leave()?;
    bob.leave.leave()?;
    registry.shutdown().await?;

    let stored = storage.get_document(&id).await?.unwrap_or_default();
    println!("\nPersisted: {}", String::from_utf8_lossy(&stored));

    Ok(())
}
