// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! A `Discovery` that never changes: the scheme baked into configuration at
//! startup. Useful for a single-node deployment or a fixed, manually
//! managed cluster where membership changes are rare enough to warrant a
//! restart rather than a live watcher.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crdt_storage_domain::entities::PartitionSchemeSnapshot;
use crdt_storage_domain::repositories::Discovery;

pub struct StaticDiscovery {
    snapshot: PartitionSchemeSnapshot,
}

impl StaticDiscovery {
    pub fn new(snapshot: PartitionSchemeSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn current(&self) -> PartitionSchemeSnapshot {
        self.snapshot.clone()
    }

    /// Never emits: the scheme is fixed for the node's lifetime.
    fn watch(&self) -> BoxStream<'static, PartitionSchemeSnapshot> {
        Box::pin(futures::stream::pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn current_returns_the_fixed_snapshot() {
        let snapshot = PartitionSchemeSnapshot::new(vec![], 16);
        let discovery = StaticDiscovery::new(snapshot.clone());
        assert_eq!(discovery.current().await, snapshot);
    }

    #[tokio::test]
    async fn watch_never_yields() {
        let discovery = StaticDiscovery::new(PartitionSchemeSnapshot::default());
        let mut watch = discovery.watch();
        tokio::select! {
            _ = watch.next() => panic!("static discovery should never emit an update"),
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}
        }
    }
}
