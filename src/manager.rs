use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::DirectoryCache;
use crate::download::{Cancelled, DownloadTask, Downloader};
use crate::naming::{get_episode_name, prepare_series_name_for_file};
use crate::series::{EpisodeInfo, SeriesInfo, VideoType};

/// Queue depth between the episode producer and the workers. Lets the
/// producer run ahead of slow downloads without buffering a whole series.
const TASK_QUEUE_DEPTH: usize = 100;

/// The orchestrator's queue element: everything needed to name and fetch
/// one episode.
#[derive(Debug, Clone)]
pub struct ManagerTask {
    pub download_url: String,
    pub referer: Option<String>,
    pub video_type: VideoType,
    pub episode_info: EpisodeInfo,
}

/// Fans a stream of [`ManagerTask`]s out to a bounded pool of workers.
///
/// Tasks fail independently: a dead hoster for one episode must not sink
/// the rest of the series, so the first error is kept as the overall
/// result while every other task still runs to completion.
pub struct DownloadManager {
    downloader: Arc<Downloader>,
    receiver: mpsc::Receiver<ManagerTask>,
    max_concurrent: usize,
    save_directory: PathBuf,
    series_info: SeriesInfo,
    skip_existing: bool,
}

impl DownloadManager {
    pub fn new(
        downloader: Arc<Downloader>,
        max_concurrent: usize,
        save_directory: PathBuf,
        series_info: SeriesInfo,
        skip_existing: bool,
    ) -> (Self, mpsc::Sender<ManagerTask>) {
        let (sender, receiver) = mpsc::channel(TASK_QUEUE_DEPTH);

        let manager = DownloadManager {
            downloader,
            receiver,
            max_concurrent: max_concurrent.max(1),
            save_directory,
            series_info,
            skip_existing,
        };

        (manager, sender)
    }

    /// Processes tasks until every sender is dropped and all in-flight
    /// downloads finished. Returns the first error that occurred, if any.
    pub async fn progress_downloads(self, cancel: CancellationToken) -> Result<(), anyhow::Error> {
        let cache = match DirectoryCache::snapshot(&self.save_directory).await {
            Ok(cache) => cache,
            Err(err) => {
                log::warn!("Failed to list save directory, downloading everything: {}", err);
                DirectoryCache::default()
            }
        };

        let first_error = Arc::new(Mutex::new(None));
        let worker = Arc::new(Worker {
            downloader: self.downloader,
            cache,
            series_name: prepare_series_name_for_file(&self.series_info.title),
            save_directory: self.save_directory,
            skip_existing: self.skip_existing,
            cancel,
            first_error: Arc::clone(&first_error),
        });

        run_worker_pool(self.receiver, self.max_concurrent, move |task| {
            let worker = Arc::clone(&worker);
            async move { worker.process(task).await }
        })
        .await;

        let result = first_error.lock().unwrap().take();
        match result {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Worker {
    downloader: Arc<Downloader>,
    cache: DirectoryCache,
    series_name: Option<String>,
    save_directory: PathBuf,
    skip_existing: bool,
    cancel: CancellationToken,
    first_error: Arc<Mutex<Option<anyhow::Error>>>,
}

impl Worker {
    async fn process(&self, task: ManagerTask) {
        let output_name = get_episode_name(
            self.series_name.as_deref(),
            Some(&task.video_type),
            &task.episode_info,
            false,
        );

        if self.skip_existing && self.cache.exists(&output_name) {
            log::info!("Skipping download of {}: file already exists", output_name);
            return;
        }

        let download_task = DownloadTask::new(self.save_directory.join(&output_name), task.download_url)
            .output_path_has_extension(false)
            .skip_if_exists(self.skip_existing)
            .referer(task.referer);

        if let Err(err) = self.downloader.download_to_file(download_task, &self.cancel).await {
            if err.downcast_ref::<Cancelled>().is_some() {
                log::info!("Cancelled download of {}", output_name);
            } else {
                log::warn!("Failed download of {}: {:#}", output_name, err);
            }

            let mut first_error = self.first_error.lock().unwrap();

            if first_error.is_none() {
                *first_error = Some(err);
            }
        }
    }
}

/// Fixed-size pool of executors pulling from one queue. Returns once the
/// queue is closed and drained and every handler future completed.
pub(crate) async fn run_worker_pool<T, F, Fut>(receiver: mpsc::Receiver<T>, workers: usize, handler: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let mut pool = tokio::task::JoinSet::new();

    for _ in 0..workers.max(1) {
        let receiver = Arc::clone(&receiver);
        let handler = handler.clone();

        pool.spawn(async move {
            loop {
                let task = receiver.lock().await.recv().await;

                match task {
                    Some(task) => handler(task).await,
                    None => break,
                }
            }
        });
    }

    while pool.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{run_worker_pool, DownloadManager, ManagerTask};
    use crate::download::{Downloader, UnsupportedEncryptionMethod};
    use crate::logger::log_wrapper::SetLogWrapper;
    use crate::series::{EpisodeInfo, EpisodeNumber, SeriesInfo, VideoType};
    use crate::testutil::{unique_temp_dir, TestResponse, TestServer};

    fn episode(number: u32, max: u32) -> EpisodeInfo {
        EpisodeInfo {
            name: None,
            season_number: Some(1),
            episode_number: EpisodeNumber::Number(number),
            max_episode_number_in_season: Some(max),
        }
    }

    fn manager_task(url: String, number: u32) -> ManagerTask {
        ManagerTask {
            download_url: url,
            referer: None,
            video_type: VideoType::Raw,
            episode_info: episode(number, 9),
        }
    }

    fn test_downloader() -> Arc<Downloader> {
        Arc::new(Downloader::new(
            &mut SetLogWrapper::disconnected(),
            None,
            false,
            None,
            None,
        ))
    }

    #[tokio::test]
    async fn test_worker_pool_respects_concurrency_limit() {
        for limit in [1usize, 3, 8] {
            let (sender, receiver) = mpsc::channel(100);
            let active = Arc::new(AtomicUsize::new(0));
            let max_active = Arc::new(AtomicUsize::new(0));
            let processed = Arc::new(AtomicUsize::new(0));

            for task in 0..24 {
                sender.send(task).await.unwrap();
            }
            drop(sender);

            let handler = {
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                let processed = Arc::clone(&processed);

                move |_task: u32| {
                    let active = Arc::clone(&active);
                    let max_active = Arc::clone(&max_active);
                    let processed = Arc::clone(&processed);

                    async move {
                        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now_active, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        processed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            };

            run_worker_pool(receiver, limit, handler).await;

            assert_eq!(processed.load(Ordering::SeqCst), 24);
            assert!(
                max_active.load(Ordering::SeqCst) <= limit,
                "more than {} tasks ran at once",
                limit
            );
        }
    }

    #[test]
    fn test_non_positive_concurrency_is_coerced_to_one() {
        let (manager, _sender) = DownloadManager::new(
            test_downloader(),
            0,
            std::env::temp_dir(),
            SeriesInfo::with_title("Test"),
            false,
        );

        assert_eq!(manager.max_concurrent, 1);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_siblings() {
        let mut routes = HashMap::new();
        routes.insert("/e1.bin".to_string(), TestResponse::ok(b"first episode".to_vec()));
        routes.insert("/e2.bin".to_string(), TestResponse::ok(b"second episode".to_vec()));
        routes.insert(
            "/e3.m3u8".to_string(),
            TestResponse::ok(
                b"#EXTM3U\n\
                #EXT-X-TARGETDURATION:4\n\
                #EXT-X-KEY:METHOD=AES-256,URI=\"key.bin\"\n\
                #EXTINF:4.0,\nseg0.ts\n\
                #EXT-X-ENDLIST\n"
                    .to_vec(),
            )
            .content_type("application/vnd.apple.mpegurl"),
        );

        let server = TestServer::spawn(routes).await;
        let save_directory = unique_temp_dir("manager-partial-failure");

        let (manager, sender) = DownloadManager::new(
            test_downloader(),
            3,
            save_directory.clone(),
            SeriesInfo::with_title("Partial"),
            false,
        );

        sender.send(manager_task(server.url("/e1.bin"), 1)).await.unwrap();
        sender.send(manager_task(server.url("/e2.bin"), 2)).await.unwrap();
        sender.send(manager_task(server.url("/e3.m3u8"), 3)).await.unwrap();
        drop(sender);

        let result = manager.progress_downloads(CancellationToken::new()).await;

        let err = result.expect_err("one task failed, so the batch must report an error");
        assert!(
            err.downcast_ref::<UnsupportedEncryptionMethod>().is_some(),
            "unexpected error: {:#}",
            err
        );

        let e1 = tokio::fs::read(save_directory.join("Partial - S01E01 - Raw.mp4"))
            .await
            .unwrap();
        let e2 = tokio::fs::read(save_directory.join("Partial - S01E02 - Raw.mp4"))
            .await
            .unwrap();
        assert_eq!(e1, b"first episode");
        assert_eq!(e2, b"second episode");
    }

    #[tokio::test]
    async fn test_skip_existing_avoids_network_access() {
        // The only route errors, so a passing download proves the task
        // was skipped before any request went out.
        let mut routes = HashMap::new();
        routes.insert(
            "/e1.bin".to_string(),
            TestResponse::status(500, b"must never be fetched".to_vec()),
        );

        let server = TestServer::spawn(routes).await;
        let save_directory = unique_temp_dir("manager-skip-existing");
        tokio::fs::write(save_directory.join("Existing - S01E01 - Raw.mp4"), b"old")
            .await
            .unwrap();

        let (manager, sender) = DownloadManager::new(
            test_downloader(),
            2,
            save_directory.clone(),
            SeriesInfo::with_title("Existing"),
            true,
        );

        sender.send(manager_task(server.url("/e1.bin"), 1)).await.unwrap();
        drop(sender);

        manager
            .progress_downloads(CancellationToken::new())
            .await
            .expect("existing episode must be skipped without a download");

        let content = tokio::fs::read(save_directory.join("Existing - S01E01 - Raw.mp4"))
            .await
            .unwrap();
        assert_eq!(content, b"old");
    }
}
