// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Concrete fulfilments of `crdt_storage_domain::repositories::Discovery`
//!: a fixed scheme for single-node or manually managed clusters, and
//! a polling file watcher for scripted or hand-edited membership.

pub mod file_discovery;
pub mod static_discovery;

pub use file_discovery::FileDiscovery;
pub use static_discovery::StaticDiscovery;
