use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut as _, KeyIvInit as _};
use anyhow::Context;
use futures_util::{AsyncRead, AsyncReadExt as _, StreamExt as _};
use m3u8_rs::{KeyMethod, MediaPlaylist, VariantStream};
use once_cell::sync::Lazy;
use reqwest::header::HeaderName;
use reqwest::redirect::Policy;
use reqwest::IntoUrl;
use tokio::io::AsyncWriteExt as _;
use tokio_util::compat::TokioAsyncReadCompatExt as _;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::logger::log_wrapper::SetLogWrapper;
use crate::utils::remove_file_ignore_not_exists;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_REDIRECTS: u32 = 10;
const READ_BUFFER_SIZE: usize = 65536;

static DEFAULT_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(Policy::none()) // redirects handled in get_response
        .build()
        .unwrap()
});

/// Marker error for cooperative cancellation. Callers must be able to tell
/// "the user aborted" apart from "the content failed", so this is a typed
/// error instead of a message string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("download cancelled")]
pub struct Cancelled;

/// The playlist declared a key method other than AES-128.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported encryption method: {0}")]
pub struct UnsupportedEncryptionMethod(pub String);

/// One unit of work for the fetch engine: a resolved media URL and where
/// its reassembled bytes should end up.
pub struct DownloadTask {
    url: String,
    output_path: PathBuf,
    output_path_has_extension: bool,
    overwrite_file: bool,
    skip_if_exists: bool,
    custom_message: Option<String>,
    referer: Option<String>,
}

impl DownloadTask {
    pub fn new(output_path: PathBuf, url: String) -> Self {
        DownloadTask {
            url,
            output_path,
            output_path_has_extension: true,
            overwrite_file: false,
            skip_if_exists: false,
            custom_message: None,
            referer: None,
        }
    }

    pub fn output_path_has_extension(mut self, output_path_has_extension: bool) -> Self {
        self.output_path_has_extension = output_path_has_extension;
        self
    }

    pub fn overwrite_file(mut self, overwrite_file: bool) -> Self {
        self.overwrite_file = overwrite_file;
        self
    }

    pub fn skip_if_exists(mut self, skip_if_exists: bool) -> Self {
        self.skip_if_exists = skip_if_exists;
        self
    }

    pub fn custom_message(mut self, custom_message: Option<String>) -> Self {
        self.custom_message = custom_message;
        self
    }

    pub fn referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }
}

/// The media fetch engine. Downloads one resolved URL per
/// [`Downloader::download_to_file`] call, either by streaming a direct
/// file or by reassembling an HLS playlist, and keeps one aggregate
/// progress bar across all concurrently running tasks.
///
/// All shared state is atomic or mutex-guarded; the engine is shared
/// between orchestrator workers via `Arc`.
pub struct Downloader {
    client: reqwest::Client,
    limiter: Option<async_speed_limit::Limiter>,
    multi_progress: indicatif::MultiProgress,
    total_bar: Mutex<Option<indicatif::ProgressBar>>,
    total_size: AtomicI64,
    started_tasks: AtomicUsize,
    finished_tasks: AtomicUsize,
    ffmpeg_path: Option<PathBuf>,
    user_agent: Option<String>,
    debug: bool,
}

impl Downloader {
    pub fn new(
        log_wrapper: &mut SetLogWrapper,
        limiter: Option<async_speed_limit::Limiter>,
        debug: bool,
        ffmpeg_path: Option<PathBuf>,
        user_agent: Option<String>,
    ) -> Self {
        let multi_progress = indicatif::MultiProgress::new();
        log_wrapper.set_multi(Some(multi_progress.clone()));

        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(Policy::none()) // redirects handled in get_response
            .build()
            .unwrap();

        Downloader {
            client,
            limiter,
            multi_progress,
            total_bar: Mutex::new(None),
            total_size: AtomicI64::new(0),
            started_tasks: AtomicUsize::new(0),
            finished_tasks: AtomicUsize::new(0),
            ffmpeg_path,
            user_agent,
            debug,
        }
    }

    pub async fn download_to_file(&self, task: DownloadTask, cancel: &CancellationToken) -> Result<(), anyhow::Error> {
        if task.skip_if_exists && self.output_already_exists(&task).await? {
            log::info!(
                "Skipping download of {}: file already exists",
                task.output_path.display()
            );
            return Ok(());
        }

        let url = Url::parse(&task.url).context("failed to parse URL")?;
        let response = with_cancel(
            cancel,
            get_response(
                &self.client,
                url,
                self.user_agent.as_deref(),
                task.referer.as_deref(),
                None,
            ),
        )
        .await?;

        let is_m3u8 = is_m3u8_url(response.url()) || is_m3u8_content_type(&response);

        let output_path = if task.output_path_has_extension {
            task.output_path.clone()
        } else {
            let mut file_name = task
                .output_path
                .file_name()
                .context("output path has no file name")?
                .to_owned();
            file_name.push(".mp4");
            task.output_path.with_file_name(file_name)
        };

        let message = match &task.custom_message {
            Some(custom_message) => custom_message.clone(),
            None => output_path
                .file_name()
                .context("failed to get file name")?
                .to_string_lossy()
                .to_string(),
        };

        if is_m3u8 {
            // The segments are concatenated into a temporary MPEG-TS
            // container next to the final output, which only becomes the
            // deliverable if no remux tool is available.
            let container_path = if output_path.extension().is_some_and(|ext| ext == "mp4") {
                output_path.with_extension("ts")
            } else {
                output_path.clone()
            };

            let container_file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&container_path)
                .await
                .context("failed to open temporary container file")?;

            self.m3u8_download(
                response,
                task.referer.as_deref(),
                container_file,
                container_path,
                output_path,
                message,
                cancel,
            )
            .await
        } else {
            let target_file = if task.overwrite_file {
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&output_path)
                    .await
            } else {
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&output_path)
                    .await
            }
            .context("failed to open download target file")?;

            self.simple_download(response, target_file, output_path, message, cancel)
                .await
        }
    }

    /// The skip-existing fast path must not touch the network, so the
    /// extension the response would decide is unknown here; every known
    /// output extension counts as a hit.
    async fn output_already_exists(&self, task: &DownloadTask) -> Result<bool, anyhow::Error> {
        let mut candidates = vec![task.output_path.clone()];

        if !task.output_path_has_extension {
            if let Some(file_name) = task.output_path.file_name() {
                for extension in crate::cache::OUTPUT_EXTENSIONS {
                    let mut with_extension = file_name.to_owned();
                    with_extension.push(extension);
                    candidates.push(task.output_path.with_file_name(with_extension));
                }
            }
        }

        for candidate in candidates {
            if candidate
                .try_exists()
                .with_context(|| format!("failed to check if \"{}\" exists", candidate.display()))?
            {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn simple_download(
        &self,
        response: reqwest::Response,
        target_file: tokio::fs::File,
        output_path: PathBuf,
        message: String,
        cancel: &CancellationToken,
    ) -> Result<(), anyhow::Error> {
        let content_length = response.content_length();
        let progress_bar = self.create_task_bar(message, content_length);
        let mut accounted_bytes = content_length.unwrap_or(0) as i64;
        self.add_total_size(accounted_bytes);

        let mut reader = self.response_reader(response);
        let mut output_stream = tokio::io::BufWriter::new(target_file);
        let mut downloaded = 0u64;

        let result: Result<(), anyhow::Error> = async {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];

            loop {
                let size = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return Err(Cancelled.into()),
                    read = reader.read(&mut buf) => read.context("failed to read download stream")?,
                };

                if size == 0 {
                    break;
                }

                output_stream
                    .write_all(&buf[..size])
                    .await
                    .context("failed writing to download file")?;
                downloaded += size as u64;

                progress_bar.set_position(downloaded);
                self.add_total_pos(size as u64);
            }

            // Correct the estimate in case Content-Length was missing or
            // inaccurate.
            progress_bar.set_length(downloaded);
            self.add_total_size(downloaded as i64 - accounted_bytes);
            accounted_bytes = downloaded as i64;

            clean_up_write(output_stream).await
        }
        .await;

        if let Err(err) = result {
            self.abandon_task_bar(&progress_bar);
            self.add_total_size(downloaded as i64 - accounted_bytes);

            // Never leave a half-written file at the final path.
            if let Err(remove_err) = remove_file_ignore_not_exists(&output_path).await {
                log::warn!(
                    "Failed to remove partial download \"{}\": {}",
                    output_path.display(),
                    remove_err
                );
            }

            return Err(err);
        }

        self.finish_task_bar(&progress_bar);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn m3u8_download(
        &self,
        response: reqwest::Response,
        referer: Option<&str>,
        container_file: tokio::fs::File,
        container_path: PathBuf,
        output_path: PathBuf,
        message: String,
        cancel: &CancellationToken,
    ) -> Result<(), anyhow::Error> {
        let m3u8_url = response.url().clone();
        let m3u8_bytes = with_cancel(cancel, get_response_bytes(response)).await?;

        let (media_playlist_url, media_playlist) = match m3u8_rs::parse_playlist_res(&m3u8_bytes) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(playlist)) => {
                if playlist.variants.is_empty() {
                    anyhow::bail!("no variants in master playlist");
                }

                let best_variant =
                    select_variant(&playlist.variants).context("no usable variant in master playlist")?;
                let media_playlist_url = m3u8_url
                    .join(&best_variant.uri)
                    .context("failed to create media playlist url")?;

                let media_response = with_cancel(
                    cancel,
                    get_response(
                        &self.client,
                        media_playlist_url.clone(),
                        self.user_agent.as_deref(),
                        referer,
                        None,
                    ),
                )
                .await
                .context("failed to get media playlist response")?;
                let media_bytes = get_response_bytes(media_response).await?;

                match m3u8_rs::parse_playlist_res(&media_bytes) {
                    Ok(m3u8_rs::Playlist::MediaPlaylist(media_playlist)) => (media_playlist_url, media_playlist),
                    Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => {
                        anyhow::bail!("variant did not resolve to a media playlist")
                    }
                    Err(_) => anyhow::bail!("failed to parse media playlist"),
                }
            }
            Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => (m3u8_url, playlist),
            Err(_) => anyhow::bail!("failed to parse m3u8 playlist"),
        };

        let progress_bar = self.create_task_bar(message, None);
        let mut output_stream = tokio::io::BufWriter::new(container_file);

        let result = self
            .m3u8_download_segments(
                &media_playlist_url,
                &media_playlist,
                referer,
                &mut output_stream,
                &progress_bar,
                cancel,
            )
            .await;

        let downloaded_bytes = match result {
            Ok(downloaded_bytes) => downloaded_bytes,
            Err(err) => {
                self.abandon_task_bar(&progress_bar);
                return Err(err);
            }
        };

        progress_bar.set_length(downloaded_bytes);
        progress_bar.set_position(downloaded_bytes);

        if let Err(err) = clean_up_write(output_stream).await {
            self.abandon_task_bar(&progress_bar);
            return Err(err);
        }

        if container_path != output_path {
            self.remux(&container_path, &output_path).await;
        }

        self.finish_task_bar(&progress_bar);

        Ok(())
    }

    /// Fetches, decrypts and appends every segment, strictly in playlist
    /// order. Returns the total number of container bytes written.
    async fn m3u8_download_segments(
        &self,
        media_playlist_url: &Url,
        media_playlist: &MediaPlaylist,
        referer: Option<&str>,
        output_stream: &mut tokio::io::BufWriter<tokio::fs::File>,
        progress_bar: &indicatif::ProgressBar,
        cancel: &CancellationToken,
    ) -> Result<u64, anyhow::Error> {
        struct Encryption {
            key: [u8; 16],
            iv: Option<[u8; 16]>,
        }

        let total_duration: f64 = media_playlist
            .segments
            .iter()
            .map(|segment| segment.duration as f64)
            .sum();

        let mut downloaded_bytes = 0u64;
        let mut downloaded_duration = 0f64;
        // Undefined until the first segment is done: dividing by a zero
        // cumulative duration has no meaning.
        let mut total_bytes_estimation: Option<u64> = None;
        let mut current_encryption: Option<Encryption> = None;

        for (segment_index, segment) in media_playlist.segments.iter().enumerate() {
            let sequence_number = u128::from(media_playlist.media_sequence) + segment_index as u128;

            if let Some(encryption_key) = &segment.key {
                match &encryption_key.method {
                    KeyMethod::None => {
                        current_encryption = None;
                    }
                    KeyMethod::AES128 => {
                        let iv = encryption_key.iv.as_deref().map(parse_encryption_iv).transpose()?;

                        let relative_key_url = encryption_key
                            .uri
                            .as_deref()
                            .context("no uri for decryption key provided")?;
                        let key_url = media_playlist_url
                            .join(relative_key_url)
                            .context("failed to create decryption key url")?;
                        let key_response = with_cancel(
                            cancel,
                            get_response(&self.client, key_url, self.user_agent.as_deref(), referer, None),
                        )
                        .await
                        .context("failed to get response of decryption key")?;
                        let key = get_response_bytes(key_response)
                            .await
                            .context("failed to get bytes of decryption key")?;
                        let key: [u8; 16] = key
                            .as_ref()
                            .try_into()
                            .ok()
                            .context("decryption key is not 16 bytes long")?;

                        current_encryption = Some(Encryption { key, iv });
                    }
                    KeyMethod::SampleAES => {
                        return Err(UnsupportedEncryptionMethod("SAMPLE-AES".to_string()).into());
                    }
                    KeyMethod::Other(other) => {
                        return Err(UnsupportedEncryptionMethod(other.clone()).into());
                    }
                }
            }

            let segment_url = media_playlist_url
                .join(&segment.uri)
                .context("failed to create segment url")?;
            let segment_response = with_cancel(
                cancel,
                get_response(&self.client, segment_url, self.user_agent.as_deref(), referer, None),
            )
            .await
            .context("failed to get segment response")?;

            let mut segment_bytes = self
                .read_response_limited(segment_response, cancel)
                .await
                .context("failed to download segment")?;

            if let Some(encryption) = &current_encryption {
                // No declared IV: the media sequence number, big-endian in
                // the last 8 of 16 zero-initialized bytes.
                let iv = encryption.iv.unwrap_or_else(|| sequence_number.to_be_bytes());
                decrypt_aes128_cbc(&mut segment_bytes, &encryption.key, &iv)?;
                strip_pkcs7_padding(&mut segment_bytes);
            }

            output_stream
                .write_all(&segment_bytes)
                .await
                .context("failed writing to container file")?;

            downloaded_bytes += segment_bytes.len() as u64;
            downloaded_duration += segment.duration as f64;
            self.add_total_pos(segment_bytes.len() as u64);

            if downloaded_duration > 0.0 {
                let new_estimation = ((downloaded_bytes as f64 * total_duration) / downloaded_duration).ceil() as u64;
                let delta = new_estimation as i64 - total_bytes_estimation.unwrap_or(0) as i64;

                self.add_total_size(delta);
                progress_bar.set_length(new_estimation);
                total_bytes_estimation = Some(new_estimation);
            }

            progress_bar.set_position(downloaded_bytes);
        }

        // Replace the estimate with the real size.
        self.add_total_size(downloaded_bytes as i64 - total_bytes_estimation.unwrap_or(0) as i64);

        Ok(downloaded_bytes)
    }

    /// Stream-copies the temporary container into the final container
    /// format. Failure is not fatal: the temporary file stays around as
    /// the deliverable.
    async fn remux(&self, container_path: &Path, output_path: &Path) {
        let Some(ffmpeg_path) = &self.ffmpeg_path else {
            log::info!(
                "Keeping \"{}\" as is: FFmpeg is not available for remuxing",
                container_path.display()
            );
            return;
        };

        let mut ffmpeg_cmd = tokio::process::Command::new(ffmpeg_path);

        if !self.debug {
            ffmpeg_cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        }

        let spawn_result = ffmpeg_cmd
            .arg("-y")
            .arg("-i")
            .arg(container_path)
            .arg("-c")
            .arg("copy")
            .arg(output_path)
            .spawn();

        match spawn_result {
            Ok(mut child) => match child.wait().await {
                Ok(status) if status.success() => {
                    if let Err(err) = remove_file_ignore_not_exists(container_path).await {
                        log::warn!("Failed to delete temporary container file: {}", err);
                    }
                }
                Ok(status) => match status.code() {
                    Some(code) => log::warn!("FFmpeg failed with exit code {}", code),
                    None => log::warn!("FFmpeg failed due to signal termination"),
                },
                Err(err) => {
                    log::warn!("FFmpeg was not running: {}", err);
                }
            },
            Err(err) => {
                log::warn!("Failed to start FFmpeg: {}", err);
            }
        }
    }

    /// Response body as a rate-limited reader. Every transfer of this
    /// engine goes through here, so one limiter caps them all.
    fn response_reader(&self, response: reqwest::Response) -> Box<dyn AsyncRead + Send + Unpin> {
        let input_stream = response
            .bytes_stream()
            .map(|item| item.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)));
        let stream_reader = tokio_util::io::StreamReader::new(input_stream).compat();

        match &self.limiter {
            Some(limiter) => Box::new(limiter.clone().limit(stream_reader)),
            None => Box::new(stream_reader),
        }
    }

    async fn read_response_limited(
        &self,
        response: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, anyhow::Error> {
        let expected = response.content_length().unwrap_or(0) as usize;
        let mut reader = self.response_reader(response);
        let mut output = Vec::with_capacity(expected);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let size = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(Cancelled.into()),
                read = reader.read(&mut buf) => read.context("failed to read download stream")?,
            };

            if size == 0 {
                break;
            }

            output.extend_from_slice(&buf[..size]);
        }

        Ok(output)
    }

    fn create_task_bar(&self, message: String, length: Option<u64>) -> indicatif::ProgressBar {
        self.ensure_total_bar();

        let progress_bar = match length {
            Some(length) => indicatif::ProgressBar::new(length).with_style(known_length_style()),
            None => indicatif::ProgressBar::new(0).with_style(unknown_length_style()),
        }
        .with_message(message);

        let total_bar_lock = self.total_bar.lock().unwrap();
        let progress_bar = self
            .multi_progress
            .insert_before(total_bar_lock.as_ref().unwrap(), progress_bar);
        drop(total_bar_lock);

        progress_bar.enable_steady_tick(Duration::from_millis(100));
        self.started_tasks.fetch_add(1, Ordering::SeqCst);
        self.update_total_message();

        progress_bar
    }

    fn finish_task_bar(&self, progress_bar: &indicatif::ProgressBar) {
        progress_bar.finish();
        self.finished_tasks.fetch_add(1, Ordering::SeqCst);
        self.update_total_message();
    }

    fn abandon_task_bar(&self, progress_bar: &indicatif::ProgressBar) {
        progress_bar.abandon();
        self.finished_tasks.fetch_add(1, Ordering::SeqCst);
        self.update_total_message();
    }

    fn ensure_total_bar(&self) {
        let mut total_bar_lock = self.total_bar.lock().unwrap();

        if total_bar_lock.is_none() {
            let total_bar = indicatif::ProgressBar::new(0)
                .with_style(known_length_style())
                .with_message("Total 0/0");
            let total_bar = self.multi_progress.add(total_bar);
            total_bar.enable_steady_tick(Duration::from_millis(100));
            *total_bar_lock = Some(total_bar);
        }
    }

    fn add_total_pos(&self, bytes: u64) {
        if let Some(total_bar) = self.total_bar.lock().unwrap().as_ref() {
            total_bar.inc(bytes);
        }
    }

    /// Adjusts the aggregate size estimate. HLS estimates refine while a
    /// task runs, so deltas may be negative.
    fn add_total_size(&self, delta: i64) {
        let new_total = self.total_size.fetch_add(delta, Ordering::SeqCst) + delta;

        if let Some(total_bar) = self.total_bar.lock().unwrap().as_ref() {
            total_bar.set_length(new_total.max(0) as u64);
        }
    }

    fn update_total_message(&self) {
        let finished = self.finished_tasks.load(Ordering::SeqCst);
        let started = self.started_tasks.load(Ordering::SeqCst);

        if let Some(total_bar) = self.total_bar.lock().unwrap().as_ref() {
            total_bar.set_message(format!("Total {finished}/{started}"));
        }
    }

    pub fn clear(self) {
        if let Some(total_bar) = self.total_bar.lock().unwrap().take() {
            total_bar.finish_and_clear();
        }

        let _ = self.multi_progress.clear();
    }
}

fn known_length_style() -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {wide_msg} {binary_bytes_per_sec:>14} {binary_bytes:>10}/{binary_total_bytes:<10} [{bar:40.cyan/blue}] {eta:>5} {percent:>3}%",
    )
    .unwrap()
}

fn unknown_length_style() -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {wide_msg} {binary_bytes_per_sec:>14} {binary_bytes:>10}",
    )
    .unwrap()
}

async fn clean_up_write(mut output_stream: tokio::io::BufWriter<tokio::fs::File>) -> Result<(), anyhow::Error> {
    output_stream.flush().await.context("failed flushing to download file")?;
    output_stream
        .get_mut()
        .sync_all()
        .await
        .context("failed syncing download file to disk")?;

    Ok(())
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    future: impl std::future::Future<Output = Result<T, anyhow::Error>>,
) -> Result<T, anyhow::Error> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(Cancelled.into()),
        result = future => result,
    }
}

/// Performs a GET with manual redirect handling, because reqwest rewrites
/// the Referer header on redirection. A non-2xx final status is an error.
pub(crate) async fn get_response<U: IntoUrl>(
    client: &reqwest::Client,
    url: U,
    user_agent: Option<&str>,
    referer: Option<&str>,
    extra_headers: Option<&[(HeaderName, &str)]>,
) -> Result<reqwest::Response, anyhow::Error> {
    let mut last_url = url.as_str().to_string();
    let mut redirect_count = 0u32;

    loop {
        let mut request = client.get(&last_url);

        if let Some(user_agent) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, user_agent);
        }

        request = request.header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5");

        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }

        if let Some(extra_headers) = extra_headers {
            for (header, value) in extra_headers {
                request = request.header(header, *value);
            }
        }

        let response = request.send().await.context("failed to request url")?;

        let is_redirect_code = [301, 308, 302, 303, 307].contains(&response.status().as_u16());
        let location_header = response.headers().get(reqwest::header::LOCATION);

        match (is_redirect_code, location_header) {
            (true, Some(redirect_url)) => {
                if redirect_count >= MAX_REDIRECTS {
                    anyhow::bail!("more than {} redirects", MAX_REDIRECTS);
                }

                redirect_count += 1;
                last_url = redirect_url
                    .to_str()
                    .context("redirect url could not be converted to string")?
                    .to_string();
            }
            _ => {
                if !response.status().is_success() {
                    anyhow::bail!("bad response status: {}", response.status());
                }

                return Ok(response);
            }
        }
    }
}

pub(crate) async fn get_response_bytes(response: reqwest::Response) -> Result<bytes::Bytes, anyhow::Error> {
    response.bytes().await.context("failed to get bytes of response body")
}

pub(crate) async fn get_page_text<U: IntoUrl>(
    url: U,
    user_agent: Option<&str>,
    referer: Option<&str>,
    extra_headers: Option<&[(HeaderName, &str)]>,
) -> Result<String, anyhow::Error> {
    get_response(&DEFAULT_CLIENT, url, user_agent, referer, extra_headers)
        .await?
        .text()
        .await
        .context("failed to parse response body as text")
}

fn is_m3u8_url(url: &Url) -> bool {
    url.path_segments()
        .and_then(|segments| segments.last())
        .map(|last| {
            let lower = last.to_ascii_lowercase();
            (lower.ends_with(".m3u8") && lower.len() != ".m3u8".len())
                || (lower.ends_with(".m3u") && lower.len() != ".m3u".len())
        })
        .unwrap_or(false)
}

fn is_m3u8_content_type(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|content_type| {
            let lower = content_type.to_ascii_lowercase();
            lower.contains("application/vnd.apple.mpegurl") || lower.contains("application/x-mpegurl")
        })
        .unwrap_or(false)
}

/// Selects the variant with the highest declared bandwidth; ties keep the
/// first-listed entry. I-frame-only variants are trick-play tracks, not
/// full renditions, and are never picked.
pub(crate) fn select_variant(variants: &[VariantStream]) -> Option<&VariantStream> {
    let mut best: Option<&VariantStream> = None;

    for variant in variants {
        if variant.is_i_frame {
            continue;
        }

        match best {
            Some(best_so_far) if variant.bandwidth <= best_so_far.bandwidth => {}
            _ => best = Some(variant),
        }
    }

    best
}

fn parse_encryption_iv(iv: &str) -> Result<[u8; 16], anyhow::Error> {
    let hex = iv.strip_prefix("0x").or_else(|| iv.strip_prefix("0X")).unwrap_or(iv);
    let value = u128::from_str_radix(hex, 16)
        .with_context(|| format!("failed to parse encryption iv as hexadecimal: {}", iv))?;

    Ok(value.to_be_bytes())
}

pub(crate) fn decrypt_aes128_cbc(data: &mut [u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<(), anyhow::Error> {
    let mut decryptor = cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into());

    let buf: InOutBuf<'_, '_, u8> = data.into();
    let (mut blocks, tail) = buf.into_chunks();

    if !tail.is_empty() {
        anyhow::bail!("encrypted segment length is not a multiple of the cipher block size");
    }

    decryptor.decrypt_blocks_inout_mut(blocks.reborrow());

    Ok(())
}

/// Removes PKCS#7 padding when the trailing byte looks like a padding
/// length. Out-of-range values leave the data untouched instead of
/// failing: some servers serve unpadded streams.
pub(crate) fn strip_pkcs7_padding(data: &mut Vec<u8>) {
    if let Some(&last_byte) = data.last() {
        let padding_len = last_byte as usize;

        if (1..=16).contains(&padding_len) && padding_len <= data.len() {
            data.truncate(data.len() - padding_len);
        }
    }
}
