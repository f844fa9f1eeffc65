use std::env;

use mygren_smarthub::{Coordinator, MygrenClient};

#[tokio::main]
async fn main() -> mygren_smarthub::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args
        .get(1)
        .expect("usage: monitor <host> <password> [username]");
    let password = args
        .get(2)
        .expect("usage: monitor <host> <password> [username]");
    let username = args.get(3).map(String::as_str).unwrap_or("admin");

    let client = MygrenClient::builder(host)
        .credentials(username, password)
        .build();

    println!("Connecting to {host}...");
    client.test_connection().await?;
    println!("Connected. Watching telemetry...");

    let coordinator = Coordinator::builder(client).start();
    let mut states = coordinator.subscribe();

    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();

        if !state.available {
            eprintln!(
                "Pump unavailable after {} failed polls: {}",
                state.consecutive_failures,
                state.last_error.as_deref().unwrap_or("unknown error"),
            );
            continue;
        }

        let Some(snapshot) = state.snapshot() else {
            continue;
        };
        println!(
            "[{}] mode: {} | action: {:?} | programs: {:?}",
            snapshot.program().unwrap_or("?"),
            state.mode().map(|m| m.to_string()).unwrap_or_default(),
            state.action(),
            snapshot.available_programs(),
        );
        if let Some(interior) = snapshot.interior_temperature() {
            println!("Interior: {interior:.1}\u{00b0}C");
        }
        if let Some(exterior) = snapshot.exterior_temperature() {
            println!("Exterior: {exterior:.1}\u{00b0}C");
        }
        if let (Some(current), Some(target)) = (
            snapshot.hot_water_temperature(),
            snapshot.hot_water_target(),
        ) {
            println!("Hot water: {current:.1}\u{00b0}C -> {target:.1}\u{00b0}C");
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
