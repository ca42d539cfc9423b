use std::fmt::Display;
use std::ops::Deref;

use clap::ValueEnum;

/// Metadata of the series a batch of downloads belongs to.
#[derive(Debug, Clone)]
pub struct SeriesInfo {
    pub title: String,
    pub description: Option<String>,
}

impl SeriesInfo {
    pub fn with_title(title: impl Into<String>) -> Self {
        SeriesInfo {
            title: title.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoType {
    Unspecified(Language),
    Raw,
    Dub(Language),
    Sub(Language),
}

impl VideoType {
    /// The filename suffix token, e.g. "GerDub". Empty for combinations
    /// that carry no information.
    pub fn suffix(&self) -> String {
        match self {
            VideoType::Unspecified(_) => String::new(),
            VideoType::Raw => "Raw".to_string(),
            VideoType::Dub(Language::Unspecified) => "Dub".to_string(),
            VideoType::Sub(Language::Unspecified) => "Sub".to_string(),
            VideoType::Dub(language) => format!("{}Dub", language.get_name_short()),
            VideoType::Sub(language) => format!("{}Sub", language.get_name_short()),
        }
    }
}

impl Display for VideoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoType::Unspecified(_) => write!(f, "Unspecified"),
            _ => write!(f, "{}", self.suffix()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, enum_iterator::Sequence)]
pub enum Language {
    #[clap(hide = true)]
    Unspecified,
    #[clap(aliases = ["en", "eng"])]
    English,
    #[clap(aliases = ["ger"])]
    German,
}

impl Language {
    pub fn get_name_short(&self) -> &'static str {
        match self {
            Language::Unspecified => "Und",
            Language::English => "Eng",
            Language::German => "Ger",
        }
    }

    pub fn get_name_long(&self) -> &'static str {
        match self {
            Language::Unspecified => "Unspecified",
            Language::English => "English",
            Language::German => "German",
        }
    }
}

impl<'a> TryFrom<&'a str> for Language {
    type Error = anyhow::Error;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        let language = match value.to_ascii_lowercase().deref() {
            "english" | "en" | "eng" => Language::English,
            "german" | "ger" => Language::German,
            _ => {
                anyhow::bail!("could not recognize language: {}", value);
            }
        };

        Ok(language)
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeInfo {
    pub name: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: EpisodeNumber,
    pub max_episode_number_in_season: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeNumber {
    Number(u32),
    String(String),
}

#[cfg(test)]
mod tests {
    use super::{Language, VideoType};

    #[test]
    fn test_video_type_suffix() {
        let cases = [
            (VideoType::Unspecified(Language::Unspecified), ""),
            (VideoType::Unspecified(Language::German), ""),
            (VideoType::Raw, "Raw"),
            (VideoType::Dub(Language::Unspecified), "Dub"),
            (VideoType::Sub(Language::Unspecified), "Sub"),
            (VideoType::Dub(Language::German), "GerDub"),
            (VideoType::Sub(Language::English), "EngSub"),
        ];

        for (video_type, expected) in cases {
            assert_eq!(video_type.suffix(), expected);
        }
    }
}
