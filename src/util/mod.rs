pub mod command_queue;
pub mod timer;

pub use command_queue::CommandQueue;
pub use timer::Timer;

/// Milliseconds since the Unix epoch, the timestamp unit used across the
/// repositories and request registries.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
