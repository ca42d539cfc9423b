use std::path::PathBuf;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::download::{DownloadTask, Downloader};

/// Download URL of a static FFmpeg build for the running platform, or an
/// error when no build is published for it.
fn ffmpeg_download_url() -> Result<String, anyhow::Error> {
    let platform_name = if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "windows") {
        "win32"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "freebsd") {
        "freebsd"
    } else {
        anyhow::bail!("unsupported platform");
    };

    let architecture_name = if cfg!(target_arch = "x86_64") {
        "x64"
    } else if cfg!(target_arch = "x86") {
        "ia32"
    } else if cfg!(any(target_arch = "aarch64", target_arch = "arm")) {
        "arm64"
    } else {
        anyhow::bail!("unsupported architecture");
    };

    let published = match (platform_name, architecture_name) {
        ("linux", _) => true,
        ("win32", "x64" | "ia32") => true,
        ("darwin", "x64" | "arm64") => true,
        ("freebsd", "x64") => true,
        _ => false,
    };

    if !published {
        anyhow::bail!("no static FFmpeg build for this platform architecture");
    }

    Ok(format!(
        "https://github.com/eugeneware/ffmpeg-static/releases/latest/download/ffmpeg-{}-{}.gz",
        platform_name, architecture_name
    ))
}

/// Locates or provisions the FFmpeg executable used for remuxing. One
/// instance per process run carries all related state.
pub(crate) struct Ffmpeg {
    data_dir: PathBuf,
}

impl Ffmpeg {
    pub(crate) fn new(data_dir: PathBuf) -> Self {
        Ffmpeg { data_dir }
    }

    /// Returns a usable FFmpeg path, downloading and unpacking a static
    /// build into the data directory if none is found.
    pub(crate) async fn auto_download(
        &self,
        downloader: &Downloader,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, anyhow::Error> {
        if let Some(path) = self.get_ffmpeg_path() {
            return Ok(path);
        }

        let ffmpeg_url = ffmpeg_download_url()?;
        let gzip_path = self.get_ffmpeg_data_path(true);
        let download_task = DownloadTask::new(gzip_path.clone(), ffmpeg_url)
            .overwrite_file(true)
            .custom_message(Some("Downloading FFmpeg".to_string()));

        downloader.download_to_file(download_task, cancel).await?;

        let gzip_file = tokio::fs::OpenOptions::new()
            .read(true)
            .open(&gzip_path)
            .await
            .context("failed to open compressed FFmpeg file")?;

        let buf_reader = tokio::io::BufReader::new(gzip_file);
        let mut decoder = async_compression::tokio::bufread::GzipDecoder::new(buf_reader);

        let ffmpeg_path = self.get_ffmpeg_data_path(false);
        let open_options = {
            let mut open_options = tokio::fs::OpenOptions::new();
            open_options.write(true);
            open_options.truncate(true);
            open_options.create(true);
            #[cfg(unix)]
            open_options.mode(0o755);
            open_options
        };
        let mut output_file = open_options
            .open(&ffmpeg_path)
            .await
            .context("failed to open or create FFmpeg file")?;

        if let Err(err) = tokio::io::copy(&mut decoder, &mut output_file).await {
            let _ = tokio::fs::remove_file(&ffmpeg_path).await;
            return Err(err).context("failed to decompress the compressed FFmpeg file");
        }

        let _ = tokio::fs::remove_file(&gzip_path).await;

        Ok(ffmpeg_path)
    }

    fn ffmpeg_executable_name() -> &'static str {
        if cfg!(windows) {
            "ffmpeg.exe"
        } else {
            "ffmpeg"
        }
    }

    fn get_ffmpeg_data_path(&self, gzip: bool) -> PathBuf {
        self.data_dir.join(if gzip {
            "ffmpeg.gz"
        } else {
            Self::ffmpeg_executable_name()
        })
    }

    pub(crate) fn get_ffmpeg_path(&self) -> Option<PathBuf> {
        pathsearch::find_executable_in_path(Self::ffmpeg_executable_name()).or_else(|| {
            let data_path = self.get_ffmpeg_data_path(false);

            data_path.exists().then_some(data_path)
        })
    }
}
