//! Catalog handler demo
//!
//! A category lookup protected by a named circuit. The backend fails for a
//! while, the breaker opens, and the handler turns degraded results into
//! "503 retry later" or "500 service down" depending on the breaker state.
//!
//! Run with `RUST_LOG=debug cargo run --example catalog`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tripwire::{BreakerConfig, CircuitRegistry, Degradation, FallbackResult, State};

#[derive(Debug)]
struct ServiceError(String);

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

/// Stand-in for the document store: fails on requests 3 through 8.
struct CategoriesService {
    requests: AtomicU32,
}

impl CategoriesService {
    async fn get_all(&self) -> Result<Vec<String>, ServiceError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        if (3..=8).contains(&n) {
            Err(ServiceError("connection reset".to_string()))
        } else {
            Ok(vec!["BOOKS".to_string(), "GAMES".to_string()])
        }
    }
}

fn respond(result: FallbackResult<Vec<String>, ServiceError>) -> (u16, String) {
    match result {
        FallbackResult::Success(categories) if categories.is_empty() => {
            (404, "There is no categories.".to_string())
        }
        FallbackResult::Success(categories) => (200, format!("{categories:?}")),
        degraded => match degraded.degradation() {
            Some(Degradation::Unavailable) => {
                (503, "Categories service is currently down.".to_string())
            }
            _ => (500, "Categories service is down.".to_string()),
        },
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = BreakerConfig::builder()
        .open_state_delay(Duration::from_millis(300))
        .build()
        .expect("valid breaker configuration");
    let registry = Arc::new(CircuitRegistry::new(config));
    let service = Arc::new(CategoriesService {
        requests: AtomicU32::new(0),
    });

    for attempt in 1..=16 {
        let service = Arc::clone(&service);
        let circuit = registry
            .build_circuit::<Vec<String>, ServiceError>("get-categories", "get_categories")
            .func(move || {
                let service = Arc::clone(&service);
                async move { service.get_all().await }
            });

        let (status, body) = respond(circuit.execute().await);
        let state: State = circuit.state();
        println!("attempt {attempt:>2}: {status} {body} (circuit {state})");

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\nfinal states: {:?}", registry.states());
}
