use std::time::Duration;

/// Simulated per-item work: a short async sleep plus some arithmetic
///
/// The sleep length varies with the input so workers finish out of order.
pub async fn simulated_work(x: u64) -> u64 {
    tokio::time::sleep(Duration::from_micros(x % 17)).await;
    checksum(x)
}

/// Cheap CPU-bound mixing function used by the synchronous stages
#[allow(dead_code)]
pub fn checksum(x: u64) -> u64 {
    x.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17)
}
