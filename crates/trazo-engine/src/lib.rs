pub mod client;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod raster;
pub mod scene;
pub mod studio;
pub mod svg;

pub use client::{GenerativeClient, HttpTransport, Transport, WireResponse};
pub use error::{ApiError, PipelineError, RasterError};
pub use pipeline::Pipeline;
pub use studio::Studio;

/// Shortens long prompt text for logs and notifications.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let mut result = String::new();
    for (index, character) in text.chars().enumerate() {
        if index >= max_chars {
            result.push('…');
            return result;
        }
        result.push(character);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::truncate_text;

    #[test]
    fn truncate_text_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
