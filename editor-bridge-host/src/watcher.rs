//! Dev-mode reload watcher
//!
//! In dev mode the sandbox loads its editor bundle from local files. This
//! watcher follows those files and, when one really changes, tells the bridge
//! the sandbox is about to reload and notifies the host so it can reload the
//! page.

use crate::bridge::EditorBridge;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Configuration for the reload watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for file events
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// A watched source changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadNotice {
    pub path: PathBuf,
    /// BLAKE3 hex digest of the new contents, `None` if the file was removed
    pub fingerprint: Option<String>,
}

/// Watches dev sources and resets the bridge when they change
pub struct DevReloadWatcher {
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl DevReloadWatcher {
    /// Start watching the given files or directories
    ///
    /// Returns the watcher and a receiver of reload notices. Must be called
    /// within a tokio runtime.
    pub fn new(
        bridge: EditorBridge,
        paths: impl IntoIterator<Item = impl AsRef<Path>>,
        config: WatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<ReloadNotice>), WatcherError> {
        let paths: Vec<PathBuf> = paths
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();

        let mut fingerprints = HashMap::new();
        for path in &paths {
            fingerprint_tree(path, &mut fingerprints)?;
        }

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (notice_tx, notice_rx) = mpsc::channel::<ReloadNotice>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        })
        .map_err(WatcherError::WatcherInit)?;

        for path in &paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(WatcherError::WatcherInit)?;
                tracing::info!(path = %path.display(), "Watching dev source");
            } else {
                tracing::warn!(path = %path.display(), "Dev source does not exist, skipping");
            }
        }

        let debounce = config.debounce;
        tokio::spawn(async move {
            let mut pending: Vec<PathBuf> = Vec::new();
            let mut debounce_timer: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Dev reload watcher shutting down");
                        break;
                    }

                    Some(event) = event_rx.recv() => {
                        for path in event.paths {
                            if path.is_dir() {
                                continue;
                            }
                            if !pending.contains(&path) {
                                pending.push(path);
                            }
                            debounce_timer = Some(tokio::time::Instant::now() + debounce);
                        }
                    }

                    _ = async {
                        match debounce_timer {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        debounce_timer = None;
                        let changed: Vec<ReloadNotice> = pending
                            .drain(..)
                            .filter_map(|path| detect_change(&mut fingerprints, path))
                            .collect();
                        if changed.is_empty() {
                            continue;
                        }

                        bridge.begin_reload();
                        for notice in changed {
                            tracing::info!(path = %notice.path.display(), "Dev source changed");
                            if notice_tx.send(notice).await.is_err() {
                                tracing::debug!("Reload notice receiver dropped");
                            }
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                _watcher: watcher,
                shutdown_tx,
            },
            notice_rx,
        ))
    }

    /// Watch the bridge's configured custom sources when dev mode is on
    ///
    /// Returns `None` outside dev mode or when no custom source is configured.
    pub fn from_config(
        bridge: &EditorBridge,
    ) -> Result<Option<(Self, mpsc::Receiver<ReloadNotice>)>, WatcherError> {
        let config = bridge.config();
        if !config.dev || config.custom_source.is_empty() {
            return Ok(None);
        }
        let paths = config.custom_source.clone();
        Self::new(bridge.clone(), paths, WatcherConfig::default()).map(Some)
    }

    /// Shutdown the watcher
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Compare a path against its last fingerprint; touch-only events yield `None`
fn detect_change(
    fingerprints: &mut HashMap<PathBuf, String>,
    path: PathBuf,
) -> Option<ReloadNotice> {
    match std::fs::read(&path) {
        Ok(bytes) => {
            let digest = blake3::hash(&bytes).to_hex().to_string();
            if fingerprints.get(&path) == Some(&digest) {
                return None;
            }
            fingerprints.insert(path.clone(), digest.clone());
            Some(ReloadNotice {
                path,
                fingerprint: Some(digest),
            })
        }
        Err(_) => fingerprints.remove(&path).map(|_| ReloadNotice {
            path,
            fingerprint: None,
        }),
    }
}

fn fingerprint_tree(
    path: &Path,
    fingerprints: &mut HashMap<PathBuf, String>,
) -> Result<(), WatcherError> {
    if path.is_file() {
        let bytes = std::fs::read(path).map_err(|e| {
            WatcherError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        fingerprints.insert(path.to_path_buf(), blake3::hash(&bytes).to_hex().to_string());
    } else if path.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|e| {
            WatcherError::Io(format!("Failed to read directory {}: {}", path.display(), e))
        })?;
        for entry in entries.flatten() {
            fingerprint_tree(&entry.path(), fingerprints)?;
        }
    }
    Ok(())
}

/// Errors that can occur during watching
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("IO error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeConfig;
    use editor_bridge_api::Value;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_detect_change_ignores_identical_contents() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("editor.js");
        fs::write(&file, "console.log(1)").unwrap();

        let mut fingerprints = HashMap::new();
        fingerprint_tree(temp.path(), &mut fingerprints).unwrap();
        assert_eq!(fingerprints.len(), 1);

        assert!(detect_change(&mut fingerprints, file.clone()).is_none());

        fs::write(&file, "console.log(2)").unwrap();
        let notice = detect_change(&mut fingerprints, file.clone()).unwrap();
        assert_eq!(notice.path, file);
        assert!(notice.fingerprint.is_some());

        fs::remove_file(&file).unwrap();
        let notice = detect_change(&mut fingerprints, file.clone()).unwrap();
        assert_eq!(notice.fingerprint, None);
        assert!(detect_change(&mut fingerprints, file).is_none());
    }

    #[tokio::test]
    async fn test_from_config_requires_dev_mode() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("editor.js");
        fs::write(&file, "v1").unwrap();

        let plain = EditorBridge::builder().build().unwrap();
        assert!(DevReloadWatcher::from_config(&plain).unwrap().is_none());

        let dev = EditorBridge::builder()
            .config(BridgeConfig::default().dev_source(&file))
            .build()
            .unwrap();
        let (watcher, _notices) = DevReloadWatcher::from_config(&dev).unwrap().unwrap();
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_change_resets_pending_calls() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("editor.js");
        fs::write(&file, "v1").unwrap();

        let bridge = EditorBridge::builder()
            .extension(crate::kit::core())
            .build()
            .unwrap();
        let (channel, mut sandbox) = crate::MessageChannel::in_memory();
        bridge.attach(channel).unwrap();
        let ready = editor_bridge_api::Message::event(editor_bridge_api::events::READY, Value::Null);
        sandbox
            .outbound
            .send(editor_bridge_api::WireCodec::Json.encode(&ready).unwrap())
            .unwrap();

        let pending = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.get_text().await })
        };
        sandbox.inbound.recv().await.unwrap();

        let (watcher, mut notices) = DevReloadWatcher::new(
            bridge.clone(),
            vec![temp.path()],
            WatcherConfig {
                debounce: Duration::from_millis(50),
            },
        )
        .unwrap();
        fs::write(&file, "v2").unwrap();

        tokio::time::timeout(Duration::from_secs(5), notices.recv())
            .await
            .expect("notice in time")
            .unwrap();
        assert!(matches!(
            pending.await.unwrap(),
            Err(crate::BridgeError::ChannelReset)
        ));
        assert_eq!(bridge.link_state(), crate::LinkState::Booting);

        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_watcher_reports_modified_source() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("editor.js");
        fs::write(&file, "v1").unwrap();

        let bridge = EditorBridge::builder().build().unwrap();
        let (watcher, mut notices) = DevReloadWatcher::new(
            bridge,
            vec![temp.path()],
            WatcherConfig {
                debounce: Duration::from_millis(100),
            },
        )
        .unwrap();

        fs::write(&file, "v2").unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
            .await
            .expect("notice in time")
            .unwrap();
        assert_eq!(notice.path.file_name(), file.file_name());
        assert_eq!(
            notice.fingerprint,
            Some(blake3::hash(b"v2").to_hex().to_string())
        );

        watcher.shutdown().await;
    }
}
