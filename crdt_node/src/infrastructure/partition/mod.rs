// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Concrete fulfilment of `crdt_storage_domain::repositories::PartitionScheme`
//! via rendezvous hashing.

pub mod rendezvous;

pub use rendezvous::RendezvousPartitionScheme;
