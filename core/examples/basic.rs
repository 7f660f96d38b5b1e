//! Basic circuit lifecycle example

use circuit_lifecycle::{CircuitManager, DisconnectCause, EventRecorder};
use std::time::Duration;

#[derive(Debug)]
struct Session {
    user: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "circuit_lifecycle=debug".into()),
        )
        .init();

    println!("=== Circuit Lifecycle Basic Example ===\n");

    let manager = CircuitManager::<Session, &'static str>::builder()
        .grace_period(Duration::from_millis(300))
        .max_circuits(16)
        .on_event(|event| println!("📣 {} {}", event.kind, event.circuit_id))
        .build()
        .expect("valid configuration");
    let recorder = EventRecorder::new();
    recorder.attach(manager.events());

    // First connection creates a circuit
    println!("--- Connecting ---");
    let conn = manager
        .on_connected(None, "socket-1", || Session {
            user: "ada".to_string(),
        })
        .expect("capacity available");
    println!("🟢 Circuit {} created for {}", conn.circuit_id, conn.session.user);
    println!("Token handed to client: {}\n", conn.circuit_id);

    // Page reload: transport drops, client returns inside the grace period
    println!("--- Transport lost, client reconnects ---");
    manager.on_disconnected(conn.circuit_id).expect("circuit is active");
    println!("🟡 Status: {}", manager.status(conn.circuit_id).unwrap().name());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let token = conn.circuit_id.to_string();
    let again = manager
        .on_connected_with_token(Some(&token), "socket-2", || unreachable!())
        .expect("resume");
    println!(
        "🟢 Resumed: {} (same session: {})\n",
        again.resumed,
        std::ptr::eq(&*again.session, &*conn.session)
    );

    // Client goes away for good
    println!("--- Transport lost, client never returns ---");
    manager.on_disconnected(conn.circuit_id).expect("circuit is active");
    recorder
        .wait_for(
            conn.circuit_id,
            circuit_lifecycle::LifecycleEventKind::DisconnectedPermanently,
            Duration::from_secs(1),
        )
        .await;
    println!("🔴 Circuit still registered: {}\n", manager.contains(conn.circuit_id));

    // Client closes its tab: no grace period needed
    println!("--- Orderly close ---");
    let other = manager
        .on_connected(None, "socket-3", || Session {
            user: "grace".to_string(),
        })
        .expect("capacity available");
    manager
        .on_disconnected_with(other.circuit_id, DisconnectCause::ClientClosed)
        .expect("circuit is active");

    println!("\nRecorded events:");
    for (level, name) in recorder.messages() {
        println!("  {:?} {}", level, name);
    }
    println!("Live circuits: {}", manager.len());
}
