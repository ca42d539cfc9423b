#![cfg_attr(not(debug_assertions), allow(warnings, unused))]
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use cli::Args;
use download::{Cancelled, DownloadTask, Downloader};
use extractors::{extract_video_url, extract_video_url_with_extractor, ExtractedVideo};
use ffmpeg::Ffmpeg;
use logger::log_wrapper::LogWrapper;
use manager::{DownloadManager, ManagerTask};
use series::{EpisodeInfo, EpisodeNumber, SeriesInfo};
use tokio_util::sync::CancellationToken;

pub(crate) mod cache;
pub(crate) mod cli;
pub(crate) mod dirs;
pub(crate) mod download;
pub(crate) mod extractors;
pub(crate) mod ffmpeg;
pub(crate) mod limit;
pub(crate) mod logger;
pub(crate) mod manager;
pub(crate) mod naming;
pub(crate) mod series;
#[cfg(test)]
pub(crate) mod testutil;
pub(crate) mod utils;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    let debug = args.debug;

    let logger = logger::default_logger(debug);
    let mut log_wrapper = LogWrapper::new(None, logger).try_init().unwrap();

    let data_dir = match dirs::get_data_dir().await {
        Ok(data_dir) => data_dir,
        Err(err) => {
            log::error!("Failed to create data directory: {:#}", err);
            std::process::exit(1);
        }
    };

    let save_directory = match dirs::get_save_directory(args.output_dir.clone()) {
        Ok(dir) => dir,
        Err(err) => {
            log::error!("Failed to get save directory: {:#}", err);
            std::process::exit(1);
        }
    };

    // One token governs every blocking call; Ctrl-C trips it.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, stopping downloads");
                cancel.cancel();
            }
        });
    }

    // Clones share one token bucket, so assets and episodes together
    // stay under the configured rate.
    let limiter = limit::rate_limiter(args.limit_rate);

    let ffmpeg_path = {
        let asset_downloader = Downloader::new(&mut log_wrapper, limiter.clone(), debug, None, None);
        let ffmpeg = Ffmpeg::new(data_dir);

        let ffmpeg_path = match ffmpeg.auto_download(&asset_downloader, &cancel).await {
            Ok(path) => Some(path),
            Err(err) => {
                if err.downcast_ref::<Cancelled>().is_some() {
                    std::process::exit(1);
                }

                log::warn!(
                    "FFmpeg is unavailable, HLS downloads will keep their transport container: {:#}",
                    err
                );
                None
            }
        };

        asset_downloader.clear();
        ffmpeg_path
    };

    let downloader = Arc::new(Downloader::new(
        &mut log_wrapper,
        limiter,
        debug,
        ffmpeg_path,
        args.user_agent.clone(),
    ));

    let errored = match args.queue.clone() {
        Some(queue_path) => run_queue(args, queue_path, downloader, save_directory, cancel).await,
        None => run_single(args, downloader, save_directory, cancel).await,
    };

    if errored {
        std::process::exit(1);
    }
}

/// Extracts and downloads one URL under a timestamp-derived name.
async fn run_single(args: Args, downloader: Arc<Downloader>, save_directory: PathBuf, cancel: CancellationToken) -> bool {
    let Some(url) = args.url.as_deref() else {
        log::error!("No URL given");
        return true;
    };

    let extracted = match &args.extractor {
        Some(cli::Extractor::Name(extractor_name)) => {
            match extract_video_url_with_extractor(url, extractor_name, args.user_agent.clone(), None).await {
                Some(Ok(extracted)) => extracted,
                Some(Err(err)) => {
                    log::error!("Failed to extract video url: {:#}", err);
                    return true;
                }
                None => {
                    log::error!("Failed to find an extractor named: {}", extractor_name);
                    return true;
                }
            }
        }
        _ => match extract_video_url(url, args.user_agent.clone(), None).await {
            Some(extracted) => extracted,
            None => {
                log::error!("Failed to find an extractor for the url: {}", url);
                return true;
            }
        },
    };

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S.%3f").to_string();
    let mut collision_counter = 0u32;

    let output_path = loop {
        let name = if collision_counter == 0 {
            Cow::Borrowed(&timestamp)
        } else {
            Cow::Owned(format!("{}-{}", timestamp, collision_counter))
        };

        let mut taken = false;
        for extension in crate::cache::OUTPUT_EXTENSIONS {
            let candidate = save_directory.join(format!("{}{}", name, extension));

            match candidate.try_exists() {
                Ok(exists) => taken |= exists,
                Err(err) => {
                    log::error!("Failed to check if \"{}\" exists: {}", candidate.display(), err);
                    return true;
                }
            }
        }

        if !taken {
            break save_directory.join(name.as_ref());
        }

        match collision_counter.checked_add(1) {
            Some(next) => collision_counter = next,
            None => {
                log::error!("Failed to find a free name for the file");
                return true;
            }
        }
    };

    let download_task = DownloadTask::new(output_path, extracted.url)
        .output_path_has_extension(false)
        .referer(extracted.referer);

    if let Err(err) = downloader.download_to_file(download_task, &cancel).await {
        if err.downcast_ref::<Cancelled>().is_some() {
            log::error!("Download cancelled");
        } else {
            log::error!("Failed download: {:#}", err);
        }

        return true;
    }

    false
}

/// Feeds every queue entry through the orchestrator as one series.
async fn run_queue(
    args: Args,
    queue_path: PathBuf,
    downloader: Arc<Downloader>,
    mut save_directory: PathBuf,
    cancel: CancellationToken,
) -> bool {
    let queue_text = match tokio::fs::read_to_string(&queue_path).await {
        Ok(queue_text) => queue_text,
        Err(err) => {
            log::error!("Failed to read queue file \"{}\": {}", queue_path.display(), err);
            return true;
        }
    };

    let entries = parse_queue_lines(&queue_text);

    if entries.is_empty() {
        log::warn!("Queue file \"{}\" contains no URLs", queue_path.display());
        return false;
    }

    let series_title = args.title.clone().unwrap_or_else(|| {
        queue_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let folder_name = naming::clean_folder_name(&series_title);
    if !folder_name.is_empty() {
        save_directory = save_directory.join(folder_name);

        if let Err(err) = tokio::fs::create_dir_all(&save_directory).await {
            log::error!("Failed to create save directory \"{}\": {}", save_directory.display(), err);
            return true;
        }
    }

    log::info!("Saving {} episodes to \"{}\"", entries.len(), save_directory.display());

    let video_type = args.get_video_type();
    let max_episodes = entries.len() as u32;
    let (manager, sender) = DownloadManager::new(
        downloader,
        args.concurrent_downloads as usize,
        save_directory,
        SeriesInfo::with_title(series_title),
        args.skip_existing,
    );

    let user_agent = args.user_agent.clone();
    let producer = async move {
        for (index, url) in entries.into_iter().enumerate() {
            // Hoster pages go through the extractor chain; anything no
            // extractor claims is taken as an already-direct media URL.
            let extracted = match extract_video_url(&url, user_agent.clone(), None).await {
                Some(extracted) => extracted,
                None => ExtractedVideo { url, referer: None },
            };

            let task = ManagerTask {
                download_url: extracted.url,
                referer: extracted.referer,
                video_type,
                episode_info: EpisodeInfo {
                    name: None,
                    season_number: None,
                    episode_number: EpisodeNumber::Number(index as u32 + 1),
                    max_episode_number_in_season: Some(max_episodes),
                },
            };

            if sender.send(task).await.is_err() {
                break;
            }
        }
    };

    let (_, manager_result) = tokio::join!(producer, manager.progress_downloads(cancel));

    if let Err(err) = manager_result {
        if err.downcast_ref::<Cancelled>().is_some() {
            log::error!("Queue download cancelled");
        } else {
            log::error!("At least one queue download failed: {:#}", err);
        }

        return true;
    }

    false
}

/// Queue files list one URL per line; blank lines and `#` comments, full
/// line or trailing, are ignored.
fn parse_queue_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();

            (!line.is_empty()).then(|| line.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_queue_lines;

    #[test]
    fn test_parse_queue_lines() {
        let content = "\
            # weekly batch\n\
            https://example.com/ep1\n\
            \n\
            https://example.com/ep2 # rewatch\n\
            \t https://example.com/ep3 \n\
            #https://example.com/disabled\n";

        assert_eq!(
            parse_queue_lines(content),
            vec![
                "https://example.com/ep1".to_string(),
                "https://example.com/ep2".to_string(),
                "https://example.com/ep3".to_string(),
            ]
        );
        assert!(parse_queue_lines("").is_empty());
        assert!(parse_queue_lines("# only comments\n\n").is_empty());
    }
}
