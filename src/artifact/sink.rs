//! Persistence targets for finished artifacts.
//!
//! Hosts with reliable programmatic downloads get [`DirectDownload`]; hosts
//! without one get [`ShareHandoff`], which lets the user pick a destination
//! and may be dismissed.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{SurveyError, SurveyResult};

// ---

/// What the host platform can do, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    // ---
    pub reliable_download: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    DirectDownload,
    ShareHandoff,
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Persist `bytes` under `filename`, returning where it landed.
    async fn write(&self, bytes: &[u8], filename: &str) -> SurveyResult<PathBuf>;
}

/// Interactive destination picker behind the share handoff.
///
/// May wait on the user indefinitely; `None` means the user dismissed it.
#[async_trait]
pub trait SharePrompt: Send + Sync {
    async fn choose_destination(&self, filename: &str, size: usize) -> Option<PathBuf>;
}

/// Pick the sink variant for a platform. No detection happens here.
pub fn select_sink(
    caps: PlatformCapabilities,
    output_dir: impl Into<PathBuf>,
    prompt: Arc<dyn SharePrompt>,
) -> Box<dyn ArtifactSink> {
    // ---
    if caps.reliable_download {
        Box::new(DirectDownload::new(output_dir))
    } else {
        Box::new(ShareHandoff::new(prompt))
    }
}

// ---

/// Non-interactive write into a fixed directory.
#[derive(Debug, Clone)]
pub struct DirectDownload {
    dir: PathBuf,
}

impl DirectDownload {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSink for DirectDownload {
    fn kind(&self) -> SinkKind {
        SinkKind::DirectDownload
    }

    async fn write(&self, bytes: &[u8], filename: &str) -> SurveyResult<PathBuf> {
        write_unique(&self.dir, filename, bytes).await
    }
}

/// User-mediated export. Never retried after a dismissal.
#[derive(Clone)]
pub struct ShareHandoff {
    prompt: Arc<dyn SharePrompt>,
}

impl ShareHandoff {
    pub fn new(prompt: Arc<dyn SharePrompt>) -> Self {
        Self { prompt }
    }
}

impl fmt::Debug for ShareHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareHandoff").finish_non_exhaustive()
    }
}

#[async_trait]
impl ArtifactSink for ShareHandoff {
    fn kind(&self) -> SinkKind {
        SinkKind::ShareHandoff
    }

    async fn write(&self, bytes: &[u8], filename: &str) -> SurveyResult<PathBuf> {
        // ---
        match self.prompt.choose_destination(filename, bytes.len()).await {
            Some(dir) => write_unique(&dir, filename, bytes).await,
            None => Err(SurveyError::PersistenceCancelled {
                filename: filename.to_string(),
            }),
        }
    }
}

/// Write into `dir`, never clobbering: `name.ext`, `name (1).ext`, ...
async fn write_unique(dir: &Path, filename: &str, bytes: &[u8]) -> SurveyResult<PathBuf> {
    // ---
    let io_err = |path: &Path, source: std::io::Error| SurveyError::Io {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_err(dir, e))?;

    let (stem, ext) = match filename.rfind('.') {
        Some(i) if i > 0 => filename.split_at(i),
        _ => (filename, ""),
    };

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(filename)
        } else {
            dir.join(format!("{stem} ({n}){ext}"))
        };

        let open = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        let file = match open {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                n += 1;
                continue;
            }
            Err(e) => return Err(io_err(&candidate, e)),
        };

        fill_or_remove(file, &candidate, bytes).await?;
        return Ok(candidate);
    }
}

/// Write and flush `bytes`; on failure the partial file at `path` is removed
/// so it cannot pass for a saved artifact.
async fn fill_or_remove<W>(mut out: W, path: &Path, bytes: &[u8]) -> SurveyResult<()>
where
    W: AsyncWrite + Unpin,
{
    // ---
    let result = match out.write_all(bytes).await {
        Ok(()) => out.flush().await,
        Err(e) => Err(e),
    };
    drop(out);

    let Err(source) = result else {
        return Ok(());
    };
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "could not remove partial artifact");
    }
    Err(SurveyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    struct FixedPrompt(Option<PathBuf>);

    #[async_trait]
    impl SharePrompt for FixedPrompt {
        async fn choose_destination(&self, _filename: &str, _size: usize) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    #[test]
    fn test_select_sink_by_capability() {
        // ---
        let prompt: Arc<dyn SharePrompt> = Arc::new(FixedPrompt(None));
        let direct = select_sink(PlatformCapabilities { reliable_download: true }, ".", prompt.clone());
        assert_eq!(direct.kind(), SinkKind::DirectDownload);

        let share = select_sink(PlatformCapabilities { reliable_download: false }, ".", prompt);
        assert_eq!(share.kind(), SinkKind::ShareHandoff);
    }

    #[tokio::test]
    async fn test_direct_download_never_clobbers() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectDownload::new(dir.path().join("nested"));

        let first = sink.write(b"one", "kim_20250101_090000.geojson").await.unwrap();
        let second = sink.write(b"two", "kim_20250101_090000.geojson").await.unwrap();

        assert_eq!(first.file_name().unwrap(), "kim_20250101_090000.geojson");
        assert_eq!(second.file_name().unwrap(), "kim_20250101_090000 (1).geojson");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_share_handoff_writes_to_chosen_destination() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sink = ShareHandoff::new(Arc::new(FixedPrompt(Some(dir.path().to_path_buf()))));
        let path = sink.write(b"{}", "a.geojson").await.unwrap();
        assert_eq!(path, dir.path().join("a.geojson"));
    }

    #[tokio::test]
    async fn test_share_handoff_dismissed() {
        // ---
        let sink = ShareHandoff::new(Arc::new(FixedPrompt(None)));
        let err = sink.write(b"{}", "a.geojson").await.unwrap_err();
        assert!(matches!(err, SurveyError::PersistenceCancelled { ref filename } if filename == "a.geojson"));
        assert!(err.is_user_decision());
    }

    /// Accepts a few bytes, then fails like a full disk.
    struct FullDisk {
        room: usize,
    }

    impl AsyncWrite for FullDisk {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if self.room == 0 {
                return std::task::Poll::Ready(Err(std::io::Error::other("no space left on device")));
            }
            let n = buf.len().min(self.room);
            self.room -= n;
            std::task::Poll::Ready(Ok(n))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kim_20250101_090000.geojson");
        std::fs::write(&path, b"{\"type\"").unwrap();

        let err = fill_or_remove(FullDisk { room: 4 }, &path, b"{\"type\": \"FeatureCollection\"}")
            .await
            .unwrap_err();

        assert!(matches!(err, SurveyError::Io { path: ref p, .. } if p == &path));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_successful_fill_keeps_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.geojson");
        let file = tokio::fs::File::create(&path).await.unwrap();

        fill_or_remove(file, &path, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
    }
}
