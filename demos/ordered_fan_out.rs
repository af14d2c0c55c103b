//! Example: Ordered Fan-Out
//!
//! Squares a range of numbers with several workers whose latency varies per
//! item, then prints the results. Output order always matches input order,
//! even though workers finish out of order.
//!
//! The pipeline stops early on Ctrl+C or once the optional timeout passes.
//!
//! Usage:
//!   cargo run --example ordered_fan_out -- [items] [workers] [timeout_ms]
//!
//! Set RUST_LOG=debug to see each stage report how it ended:
//!   RUST_LOG=debug cargo run --example ordered_fan_out -- 20 4

use std::env;
use std::time::Duration;

use pipeflow::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    let items: u64 = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(20);
    let workers: usize = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(4);
    let timeout: Option<u64> = args.get(3).map(|s| s.parse()).transpose()?;

    let token = match timeout {
        Some(ms) => Token::with_timeout(Duration::from_millis(ms)),
        None => Token::new(),
    };
    let _signals = cancel_on_signal(&token);

    eprintln!("=== Ordered Fan-Out Example ===");
    eprintln!("Squaring {} items with {} workers", items, workers);

    let reason = Pipeline::generate(&token, 1..=items)
        .ordered_fan_out_fan_in(workers, move |x| async move {
            // Latency varies per item so workers finish out of order
            tokio::time::sleep(Duration::from_millis((items + 1 - x) * 3 % 37)).await;
            (x, x * x)
        })
        .for_each(|(x, square)| println!("{x:>4} -> {square}"))
        .await;

    match reason {
        CloseReason::Exhausted => eprintln!("Done"),
        CloseReason::Cancelled => eprintln!("Stopped early"),
        CloseReason::Failed(failure) => return Err(failure.into()),
    }

    Ok(())
}
