/// Pick a pseudo-random value in `[0, max)` without pulling in the `rand`
/// crate. Seeds a xorshift64 from the high-resolution clock; good enough
/// for pacing jitter and rotation, not crypto.
pub fn clock_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max
}
