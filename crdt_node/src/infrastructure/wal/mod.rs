// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Concrete fulfilment of `crdt_storage_domain::repositories::WriteAheadLog`
//! over a directory of segment files, plus the background drainer that
//! uploads finalized segments into a `ChunkStore`.

pub mod drainer;
pub mod file_wal;
pub mod record;

pub use drainer::WalDrainer;
pub use file_wal::{FileWriteAheadLog, WalRollPolicy};
