//! Example: Work Pool
//!
//! Starts a pool of workers, submits jobs one at a time from the caller and
//! reads results as they complete. Results arrive in completion order; the
//! per-worker counters are printed once the pool has drained.
//!
//! Usage:
//!   cargo run --example work_pool -- [jobs] [workers]

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use pipeflow::prelude::*;

/// Handler that "hashes" a word after a delay proportional to its length
struct WordHasher {
    delay_per_char: Duration,
}

#[async_trait]
impl Handler<String, (String, u64)> for WordHasher {
    async fn handle(&self, word: String) -> (String, u64) {
        tokio::time::sleep(self.delay_per_char * word.len() as u32).await;
        let hash = word
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
        (word, hash)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    let jobs: usize = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(12);
    let workers: usize = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(3);

    let token = Token::new();
    let _signals = cancel_on_signal(&token);

    eprintln!("=== Work Pool Example ===");
    eprintln!("Submitting {} jobs to {} workers", jobs, workers);

    let mut pool = WorkPool::<String, (String, u64)>::new(workers, 4);
    let mut results = pool.start(
        &token,
        WordHasher {
            delay_per_char: Duration::from_millis(5),
        },
    )?;

    let reader = {
        let token = token.clone();
        tokio::spawn(async move {
            while let Ok((word, hash)) = results.recv(&token).await {
                println!("{word:<12} {hash:016x}");
            }
            results.close_reason()
        })
    };

    let words = ["stream", "pipeline", "token", "fan", "ordered", "batch"];
    for i in 0..jobs {
        pool.submit(format!("{}-{}", words[i % words.len()], i)).await?;
    }
    pool.close();
    pool.wait().await?;

    let reason = reader.await?;
    eprintln!("Results stream closed: {:?}", reason);
    for stats in pool.stats() {
        eprintln!("  worker {} processed {} jobs", stats.worker_id, stats.processed);
    }

    Ok(())
}
