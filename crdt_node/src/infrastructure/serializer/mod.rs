// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Concrete fulfilment of `crdt_storage_domain::services::EntrySerializer`.

pub mod bincode_serializer;

pub use bincode_serializer::BincodeEntrySerializer;
