use crate::download;
use crate::extractors::direct::Direct;
use crate::extractors::streamtape::Streamtape;
use crate::extractors::vidoza::Vidoza;

pub mod direct;
pub mod streamtape;
pub mod vidoza;

macro_rules! normalized_name {
    ($extractor:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            Some(<$ext>::DISPLAY_NAME)
        } else {
            normalized_name!($extractor, $($tail),*)
        }
    };
    ($extractor:expr $(,)?) => {
        None
    };
}

// Extractors are tried in registration order; an extraction error moves on
// to the next candidate instead of failing the lookup.
macro_rules! extract_video_url {
    ($url:expr, $user_agent:expr, $referer:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::supports_url($url).await.unwrap_or(false) {
            let from = ExtractFrom::Url {
                url: $url.to_owned(),
                user_agent: $user_agent.clone(),
                referer: $referer.clone(),
            };

            match <$ext>::extract_video_url(from).await {
                Ok(extracted) => Some(extracted),
                Err(err) => {
                    log::debug!(
                        "{}: extraction failed, trying next extractor: {:#}",
                        <$ext>::DISPLAY_NAME,
                        err
                    );
                    extract_video_url!($url, $user_agent, $referer, $($tail),*)
                }
            }
        } else {
            extract_video_url!($url, $user_agent, $referer, $($tail),*)
        }
    };
    ($url:expr, $user_agent:expr, $referer:expr $(,)?) => {
        None
    };
}

macro_rules! extract_video_url_with_extractor {
    ($url:expr, $extractor:expr, $user_agent:expr, $referer:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            let from = ExtractFrom::Url {
                url: $url.to_owned(),
                user_agent: $user_agent.clone(),
                referer: $referer.clone(),
            };

            Some(<$ext>::extract_video_url(from).await)
        } else {
            extract_video_url_with_extractor!($url, $extractor, $user_agent, $referer, $($tail),*)
        }
    };
    ($url:expr, $extractor:expr, $user_agent:expr, $referer:expr $(,)?) => {
        None
    };
}

macro_rules! create_functions_for_extractors {
    ($( $ext:ty ),* $(,)?) => {
        /// Canonical display name for a user-supplied extractor name.
        pub fn normalized_name(extractor: &str) -> Option<&'static str> {
            normalized_name!(extractor, $($ext),*)
        }

        pub fn exists_extractor_with_name(extractor: &str) -> bool {
            normalized_name(extractor).is_some()
        }

        /// First-success-wins extractor chain; `None` if no registered
        /// extractor could produce a media URL.
        pub async fn extract_video_url(
            url: &str,
            user_agent: Option<String>,
            referer: Option<String>,
        ) -> Option<ExtractedVideo> {
            extract_video_url!(url, user_agent, referer, $($ext),*)
        }

        /// Extraction through one named extractor; its error is reported
        /// instead of being skipped. `None` if the name is unknown.
        pub async fn extract_video_url_with_extractor(
            url: &str,
            extractor: &str,
            user_agent: Option<String>,
            referer: Option<String>,
        ) -> Option<Result<ExtractedVideo, anyhow::Error>> {
            extract_video_url_with_extractor!(url, extractor, user_agent, referer, $($ext),*)
        }
    };
    () => {};
}

create_functions_for_extractors! {
    Direct,
    Vidoza,
    Streamtape,
}

#[derive(Debug, Clone)]
pub enum ExtractFrom {
    Url {
        url: String,
        user_agent: Option<String>,
        referer: Option<String>,
    },
    Source(String),
}

impl ExtractFrom {
    pub async fn get_source(self, referer: Option<&str>) -> Result<String, anyhow::Error> {
        match self {
            ExtractFrom::Url {
                url,
                user_agent,
                referer: referer_input,
            } => download::get_page_text(url, user_agent.as_deref(), referer_input.as_deref().or(referer), None).await,
            ExtractFrom::Source(source) => Ok(source),
        }
    }
}

/// A resolved media reference: the URL the fetch engine downloads, plus
/// the referer some hosters require on the media request.
#[derive(Debug, Clone)]
pub struct ExtractedVideo {
    pub url: String,
    pub referer: Option<String>,
}

pub trait Extractor {
    const DISPLAY_NAME: &'static str;
    const NAMES: &'static [&'static str];

    /// `None` means "cannot tell from the URL alone": the chain skips the
    /// extractor, name-based lookup still reaches it.
    async fn supports_url(url: &str) -> Option<bool>;

    async fn extract_video_url(from: ExtractFrom) -> Result<ExtractedVideo, anyhow::Error>;
}

pub mod utils {
    pub fn is_url_host_and_has_path(url: &str, host: &str, allow_http: bool, allow_www: bool) -> bool {
        url::Url::parse(url)
            .map(|url| {
                let scheme = url.scheme();
                let is_correct_scheme = scheme == "https" || (allow_http && scheme == "http");

                let no_username = url.username().is_empty();
                let no_password = url.password().is_none();
                let no_port = url.port().is_none();

                let is_same_host = url
                    .host_str()
                    .map(|url_host| {
                        let url_host = if allow_www {
                            url_host.strip_prefix("www.").unwrap_or(url_host)
                        } else {
                            url_host
                        };

                        host.eq_ignore_ascii_case(url_host)
                    })
                    .unwrap_or(false);

                let path = url.path();
                let path_is_empty = path.strip_prefix('/').unwrap_or(path).is_empty();

                is_correct_scheme && no_username && no_password && no_port && is_same_host && !path_is_empty
            })
            .unwrap_or(false)
    }

    #[cfg(test)]
    mod tests {
        use super::is_url_host_and_has_path;

        #[test]
        fn test_is_url_host_and_has_path() {
            assert!(is_url_host_and_has_path("https://vidoza.net/embed-x.html", "vidoza.net", true, true));
            assert!(is_url_host_and_has_path("https://www.vidoza.net/embed-x.html", "vidoza.net", true, true));
            assert!(is_url_host_and_has_path("http://vidoza.net/embed-x.html", "vidoza.net", true, true));
            assert!(!is_url_host_and_has_path("http://vidoza.net/embed-x.html", "vidoza.net", false, true));
            assert!(!is_url_host_and_has_path("https://vidoza.net/", "vidoza.net", true, true));
            assert!(!is_url_host_and_has_path("https://evil.net/embed-x.html", "vidoza.net", true, true));
            assert!(!is_url_host_and_has_path("https://user:pw@vidoza.net/x", "vidoza.net", true, true));
            assert!(!is_url_host_and_has_path("not a url", "vidoza.net", true, true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtractFrom, ExtractedVideo, Extractor};

    struct Broken;

    impl Extractor for Broken {
        const DISPLAY_NAME: &'static str = "Broken";
        const NAMES: &'static [&'static str] = &["Broken"];

        async fn supports_url(_: &str) -> Option<bool> {
            Some(true)
        }

        async fn extract_video_url(_: ExtractFrom) -> Result<ExtractedVideo, anyhow::Error> {
            anyhow::bail!("hoster changed its page layout again")
        }
    }

    struct Working;

    impl Extractor for Working {
        const DISPLAY_NAME: &'static str = "Working";
        const NAMES: &'static [&'static str] = &["Working"];

        async fn supports_url(_: &str) -> Option<bool> {
            Some(true)
        }

        async fn extract_video_url(from: ExtractFrom) -> Result<ExtractedVideo, anyhow::Error> {
            let ExtractFrom::Url { url, .. } = from else {
                anyhow::bail!("expected url");
            };

            Ok(ExtractedVideo { url, referer: None })
        }
    }

    #[tokio::test]
    async fn test_chain_continues_past_failing_extractor() {
        let user_agent: Option<String> = None;
        let referer: Option<String> = None;
        let extracted = extract_video_url!("https://example.com/video", user_agent, referer, Broken, Working);

        assert_eq!(extracted.unwrap().url, "https://example.com/video");
    }

    #[tokio::test]
    async fn test_chain_returns_none_when_all_fail() {
        let user_agent: Option<String> = None;
        let referer: Option<String> = None;
        let extracted = extract_video_url!("https://example.com/video", user_agent, referer, Broken);

        assert!(extracted.is_none());
    }

    #[test]
    fn test_named_lookup() {
        assert_eq!(super::normalized_name("vidoza"), Some("Vidoza"));
        assert_eq!(super::normalized_name("STREAMTAPE"), Some("Streamtape"));
        assert!(super::exists_extractor_with_name("direct"));
        assert!(!super::exists_extractor_with_name("nosuchhoster"));
    }
}
