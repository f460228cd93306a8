// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure layer: concrete adapters for every domain repository
//! port, plus the ambient concerns (configuration, metrics, logging) that
//! sit outside the domain's storage contract entirely.

pub mod chunk_store;
pub mod config;
pub mod discovery;
pub mod entry_reduce;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod serializer;
pub mod wal;
pub mod wire;
