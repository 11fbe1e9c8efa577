pub mod events;
pub mod gallery;
pub mod keyring;
pub mod scene;
pub mod transfer;

/// Default generation model used when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-09-2025";

/// Milliseconds since the UNIX epoch, the base for gallery item ids.
pub fn timestamp_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
