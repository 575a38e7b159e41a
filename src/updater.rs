use crate::config::UpdateConfig;
use crate::error::{OverlayError, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const RELEASE_ENDPOINT: &str = "https://api.github.com/repos/Gear2Head/Fps-Display/releases/latest";
const INSTALLER_URL: &str =
    "https://github.com/Gear2Head/Fps-Display/releases/latest/download/OSD-Overlay-Setup.exe";

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Anything smaller than this is not a plausible installer.
const MIN_INSTALLER_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

/// A newer release than the running one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub version: String,
    pub tag_name: String,
    pub notes: String,
    pub published_at: Option<String>,
    pub download_url: String,
}

pub struct UpdateChecker {
    client: reqwest::Client,
    endpoint: String,
    download_url: String,
    current_version: String,
}

impl UpdateChecker {
    /// Uses `update.url` as the release endpoint when set.
    pub fn new(config: &UpdateConfig) -> Result<Self> {
        let endpoint = if config.url.trim().is_empty() {
            RELEASE_ENDPOINT.to_string()
        } else {
            config.url.trim().to_string()
        };
        Self::with_endpoint(endpoint, INSTALLER_URL, CURRENT_VERSION)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        download_url: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("osd-overlay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            download_url: download_url.into(),
            current_version: current_version.into(),
        })
    }

    /// Returns the newer release, or `None` when up to date or on any
    /// network/parse failure.
    pub async fn check(&self) -> Option<UpdateDescriptor> {
        match self.fetch_latest().await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Update check failed: {}", e);
                None
            }
        }
    }

    async fn fetch_latest(&self) -> Result<Option<UpdateDescriptor>> {
        let release: ReleaseResponse = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .timeout(CHECK_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let version = release.tag_name.trim_start_matches('v').to_string();
        if version.is_empty() {
            return Err(OverlayError::UpdateError(
                "release has no version tag".to_string(),
            ));
        }

        if !is_newer_version(&version, &self.current_version) {
            tracing::debug!("Up to date ({} >= {})", self.current_version, version);
            return Ok(None);
        }

        Ok(Some(UpdateDescriptor {
            version,
            tag_name: release.tag_name,
            notes: release.body.unwrap_or_default(),
            published_at: release.published_at,
            download_url: self.download_url.clone(),
        }))
    }

    /// Streams the installer to a temporary file. `on_progress` receives a
    /// percentage whenever the server reported a content length.
    pub async fn download<F>(&self, url: &str, on_progress: F) -> Option<PathBuf>
    where
        F: FnMut(f32),
    {
        let file_name = format!("osd-overlay-setup-{}.exe", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(file_name);
        match self.download_to(url, &path, on_progress).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!("Update download failed: {}", e);
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
        }
    }

    async fn download_to<F>(&self, url: &str, path: &Path, mut on_progress: F) -> Result<()>
    where
        F: FnMut(f32),
    {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length().filter(|len| *len > 0);

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total {
                on_progress((downloaded as f64 / total as f64 * 100.0) as f32);
            }
        }

        file.flush().await?;
        tracing::info!("Downloaded {} bytes to {}", downloaded, path.display());
        Ok(())
    }
}

/// Dot-separated numeric comparison; the shorter version is padded with
/// zeros. A non-numeric component makes the result `false`.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let parse = |v: &str| -> Option<Vec<u64>> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect()
    };

    let (Some(mut latest), Some(mut current)) = (parse(latest), parse(current)) else {
        return false;
    };

    let len = latest.len().max(current.len());
    latest.resize(len, 0);
    current.resize(len, 0);

    latest > current
}

/// Coarse sanity check on the downloaded file. Not a signature check.
pub fn verify(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() >= MIN_INSTALLER_BYTES,
        Err(_) => false,
    }
}

/// Launches the installer silently and detached; its exit status is never
/// observed.
pub fn install(path: &Path) -> bool {
    let mut command = std::process::Command::new(path);
    command
        .arg("/S")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        command.creation_flags(DETACHED_PROCESS);
    }

    match command.spawn() {
        Ok(child) => {
            tracing::info!("Installer launched (pid {})", child.id());
            true
        }
        Err(e) => {
            tracing::warn!("Could not launch installer {}: {}", path.display(), e);
            false
        }
    }
}
