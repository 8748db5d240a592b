//! Basic circuit breaker usage example

use callguard::{CircuitBreaker, ManualClock, Outcome, Permission};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callguard=info".into()),
        )
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    // A manual clock lets the example skip the open wait instantly
    let clock = ManualClock::new();

    let circuit = CircuitBreaker::builder("payment_api")
        .sliding_window_size(10)
        .minimum_calls(5)
        .failure_rate_threshold(50.0)
        .wait_duration_in_open(Duration::from_secs(30))
        .half_open_permits(2)
        .clock(Arc::new(clock.clone()))
        .on_open(|name| println!("Circuit '{}' opened!", name))
        .on_close(|name| println!("Circuit '{}' closed!", name))
        .on_half_open(|name| println!("Circuit '{}' half-open, probing...", name))
        .build()
        .expect("valid configuration");

    println!("Initial state: {}\n", circuit.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("ok: {}", result),
            Err(e) => println!("error: {}", e),
        }
    }

    println!("\n--- Triggering failures ---");
    for i in 1..=3 {
        match circuit.call(move || Err::<String, _>(format!("Payment failed {}", i))) {
            Ok(_) => println!("ok"),
            Err(e) => println!("error: {}", e),
        }
    }
    println!(
        "State: {} (failure rate {}%)\n",
        circuit.state(),
        circuit.metrics().failure_rate
    );

    println!("--- Calling while open, with a fallback ---");
    let result = circuit.call_with_fallback(
        || Ok::<_, String>("should not run".to_string()),
        |denial| Ok(format!("cached receipt ({})", denial)),
    );
    println!("{}\n", result.unwrap_or_else(|e| e.to_string()));

    println!("--- 30 seconds later: manual probing ---");
    clock.advance(Duration::from_secs(30));
    let mut probes = Vec::new();
    loop {
        match circuit.try_acquire() {
            Permission::Allowed(permit) => probes.push(permit),
            Permission::Denied(denial) => {
                println!("denied: {}", denial);
                break;
            }
        }
    }
    println!("{} probes in flight", probes.len());

    for permit in probes {
        circuit.record_outcome(permit, Outcome::Success);
    }
    println!("State: {}", circuit.state());
}
