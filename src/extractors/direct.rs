use super::{ExtractFrom, ExtractedVideo, Extractor};

/// Passthrough for already-resolved media URLs. Never matched
/// automatically; only reachable by name.
pub struct Direct;

impl Extractor for Direct {
    const DISPLAY_NAME: &'static str = "Direct";
    const NAMES: &'static [&'static str] = &["Direct", "None"];

    async fn supports_url(_: &str) -> Option<bool> {
        None
    }

    async fn extract_video_url(from: ExtractFrom) -> Result<ExtractedVideo, anyhow::Error> {
        match from {
            ExtractFrom::Url { url, referer, .. } => Ok(ExtractedVideo { url, referer }),
            ExtractFrom::Source(_) => anyhow::bail!("Direct: page source is not supported"),
        }
    }
}
