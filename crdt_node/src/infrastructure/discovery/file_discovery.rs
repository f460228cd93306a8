// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! A `Discovery` that polls a TOML file on disk at a fixed interval. Stands
//! in for gossip or an external coordinator in deployments that hand-
//! edit or script-generate a scheme file; a failing tick (missing file,
//! parse error) is logged and the previous scheme remains in force.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crdt_storage_domain::entities::PartitionSchemeSnapshot;
use crdt_storage_domain::repositories::Discovery;

pub struct FileDiscovery {
    current: Arc<Mutex<PartitionSchemeSnapshot>>,
    sender: watch::Sender<PartitionSchemeSnapshot>,
}

impl FileDiscovery {
    /// Reads `path` once synchronously to seed the initial scheme, then
    /// spawns a background task that re-reads it every `poll_interval`.
    pub async fn start(path: PathBuf, poll_interval: Duration) -> Self {
        let initial = read_scheme(&path).await.unwrap_or_default();
        let (sender, _receiver) = watch::channel(initial.clone());
        let current = Arc::new(Mutex::new(initial));

        let task_current = current.clone();
        let task_sender = sender.clone();
        tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                interval.tick().await; // first tick fires immediately; already seeded above
                loop {
                    interval.tick().await;
                    match read_scheme(&path).await {
                        Ok(snapshot) => {
                            let changed = *task_current.lock() != snapshot;
                            if changed {
                                *task_current.lock() = snapshot.clone();
                                let _ = task_sender.send(snapshot);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, path = %path.display(), "discovery tick failed, keeping previous scheme");
                        }
                    }
                }
            });

        Self { current, sender }
    }
}

async fn read_scheme(path: &PathBuf) -> Result<PartitionSchemeSnapshot, String> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| e.to_string())?;
    toml::from_str(&contents).map_err(|e| e.to_string())
}

#[async_trait]
impl Discovery for FileDiscovery {
    async fn current(&self) -> PartitionSchemeSnapshot {
        self.current.lock().clone()
    }

    fn watch(&self) -> BoxStream<'static, PartitionSchemeSnapshot> {
        let receiver = self.sender.subscribe();
        Box::pin(async_stream::stream! {
                let mut receiver = receiver;
                while receiver.changed().await.is_ok() {
                    yield receiver.borrow().clone();
                }
            })
    }
}
