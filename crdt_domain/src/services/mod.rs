// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain services: stateless operations expressing cross-entity business
//! rules.

pub mod entry_serializer;
pub mod merge;

pub use entry_serializer::EntrySerializer;
pub use merge::{CrdtMergeService, MaxWinsMergeService};
