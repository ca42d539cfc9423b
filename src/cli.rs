use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::series::{Language, VideoType};

#[derive(Parser, Debug)]
#[command(version)]
/// Download direct or HLS video files, one at a time or as a whole series
pub(crate) struct Args {
    /// Only download specific video type
    #[arg(value_enum, long = "type", ignore_case = true, default_value_t = SimpleVideoType::Unspecified, hide_default_value = true)]
    pub(crate) video_type: SimpleVideoType,

    /// Only download specific language
    #[arg(value_enum, long = "lang", ignore_case = true, default_value_t = Language::Unspecified, hide_default_value = true)]
    pub(crate) language: Language,

    /// Shorthand for language and video type, e.g. GerDub
    #[arg(short = 't', value_parser = parse_shorthand, default_value_t = VideoType::Unspecified(Language::Unspecified), hide_default_value = true, conflicts_with_all = ["video_type", "language"])]
    pub(crate) type_language: VideoType,

    /// Concurrent downloads
    #[arg(short = 'N', long, default_value_t = 5, value_name = "NUMBER")]
    pub(crate) concurrent_downloads: u32,

    /// Maximum download rate in bytes per second, e.g. 50K or 4.2MiB
    #[arg(short = 'r', long, value_parser = parse_rate_limit_as_f64, value_name = "RATE", default_value = "inf", hide_default_value = true)]
    pub(crate) limit_rate: f64,

    /// Skip episodes that already exist in the save directory
    #[arg(short = 's', long)]
    pub(crate) skip_existing: bool,

    /// Save directory (defaults to the working directory)
    #[arg(short = 'o', long, value_name = "DIRECTORY")]
    pub(crate) output_dir: Option<PathBuf>,

    /// Use a specific extractor instead of trying all of them
    #[arg(short = 'e', long, num_args = 0..=1, require_equals = true, value_parser = parse_extractor, default_missing_value = "auto", value_name = "NAME")]
    pub(crate) extractor: Option<Extractor>,

    /// File with one URL per line; downloaded as one series
    #[arg(short = 'q', long, value_name = "FILE", conflicts_with = "extractor")]
    pub(crate) queue: Option<PathBuf>,

    /// Series title used for filenames in queue mode
    #[arg(long, value_name = "TITLE", requires = "queue")]
    pub(crate) title: Option<String>,

    /// Overrides the User-Agent header on every request
    #[arg(long, value_name = "USER_AGENT")]
    pub(crate) user_agent: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    pub(crate) debug: bool,

    /// Download URL
    #[arg(required_unless_present = "queue", conflicts_with = "queue")]
    pub(crate) url: Option<String>,
}

impl Args {
    pub(crate) fn get_video_type(&self) -> VideoType {
        if self.type_language != VideoType::Unspecified(Language::Unspecified) {
            return self.type_language;
        }

        match self.video_type {
            SimpleVideoType::Unspecified => VideoType::Unspecified(self.language),
            SimpleVideoType::Raw => VideoType::Raw,
            SimpleVideoType::Dub => VideoType::Dub(self.language),
            SimpleVideoType::Sub => VideoType::Sub(self.language),
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub(crate) enum SimpleVideoType {
    #[clap(hide = true)]
    Unspecified,
    Raw,
    Dub,
    Sub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Extractor {
    Auto,
    Name(String),
}

fn parse_extractor(input: &str) -> Result<Extractor, String> {
    if input.eq_ignore_ascii_case("auto") {
        Ok(Extractor::Auto)
    } else if crate::extractors::exists_extractor_with_name(input) {
        Ok(Extractor::Name(input.to_owned()))
    } else {
        Err(format!("no extractor with name: {input}"))
    }
}

fn parse_shorthand(input: &str) -> Result<VideoType, String> {
    if input.eq_ignore_ascii_case("Unspecified") {
        return Ok(VideoType::Unspecified(Language::Unspecified));
    }

    if input.eq_ignore_ascii_case("Raw") {
        return Ok(VideoType::Raw);
    }

    if input.eq_ignore_ascii_case("Dub") {
        return Ok(VideoType::Dub(Language::Unspecified));
    }

    if input.eq_ignore_ascii_case("Sub") {
        return Ok(VideoType::Sub(Language::Unspecified));
    }

    let input_lower = input.to_ascii_lowercase();
    let languages = || enum_iterator::all::<Language>().filter(|lang| *lang != Language::Unspecified);

    if let Some(lang_short) = input_lower.strip_suffix("dub") {
        for lang in languages() {
            if lang_short.eq_ignore_ascii_case(lang.get_name_short()) {
                return Ok(VideoType::Dub(lang));
            }
        }
    }

    if let Some(lang_short) = input_lower.strip_suffix("sub") {
        for lang in languages() {
            if lang_short.eq_ignore_ascii_case(lang.get_name_short()) {
                return Ok(VideoType::Sub(lang));
            }
        }
    }

    for lang in languages() {
        if input.eq_ignore_ascii_case(lang.get_name_long()) || input.eq_ignore_ascii_case(lang.get_name_short()) {
            return Ok(VideoType::Unspecified(lang));
        }
    }

    Err(format!("failed to parse \"{input}\" as video type shorthand"))
}

fn parse_rate_limit_as_f64(input: &str) -> Result<f64, String> {
    if input.eq_ignore_ascii_case("inf") {
        return Ok(f64::INFINITY);
    }

    let bytes = byte_unit::Byte::parse_str(input, false)
        .map_err(|err| format!("{err}"))?
        .as_u64() as f64;

    if bytes <= 0.0 {
        return Err("rate limit must be greater than 0".to_string());
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::{parse_rate_limit_as_f64, parse_shorthand};
    use crate::series::{Language, VideoType};

    #[test]
    fn test_parse_shorthand() {
        assert_eq!(parse_shorthand("GerDub").unwrap(), VideoType::Dub(Language::German));
        assert_eq!(parse_shorthand("engsub").unwrap(), VideoType::Sub(Language::English));
        assert_eq!(parse_shorthand("Dub").unwrap(), VideoType::Dub(Language::Unspecified));
        assert_eq!(parse_shorthand("raw").unwrap(), VideoType::Raw);
        assert_eq!(
            parse_shorthand("German").unwrap(),
            VideoType::Unspecified(Language::German)
        );
        assert!(parse_shorthand("klingon").is_err());
    }

    #[test]
    fn test_parse_rate_limit() {
        assert_eq!(parse_rate_limit_as_f64("inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_rate_limit_as_f64("50K").unwrap(), 50_000.0);
        assert_eq!(parse_rate_limit_as_f64("1KiB").unwrap(), 1024.0);
        assert!(parse_rate_limit_as_f64("garbage").is_err());
    }
}
