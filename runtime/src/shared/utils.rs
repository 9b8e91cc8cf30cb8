use rand::Rng;

/// Generates a unique-enough container name for a warm container.
///
/// The driver requires a name at creation time; collisions are avoided by a
/// random suffix rather than a counter, since the pool has no central name
/// registry of its own.
pub fn random_container_name(function_id: i32) -> String {
    let mut rng = rand::thread_rng();
    let suffix: u32 = rng.gen();
    format!("invok-warm-{function_id}-{suffix:x}")
}
