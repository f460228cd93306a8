// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # CRDT Storage Node
//!
//! A single replica in a replicated, partitioned CRDT key-value store:
//! a content-addressed chunk store and write-ahead log for local durability
//!, a length-framed wire protocol for remote access,
//! rendezvous-hashing partitioning and cluster fan-out for horizontal
//! scale, and a repartitioner for moving a node's content when
//! the scheme changes.
//!
//! Layered the way the rest of this lineage is: `crdt_storage_domain` states
//! the repository ports and entities with no I/O; this crate supplies every
//! concrete adapter (`infrastructure`) and composes them into the two
//! storage endpoints a process can serve (`application`). `crdt-node`, this
//! crate's binary, wires configuration, signal handling, and the CLI
//! operator surface around them.

pub mod application;
pub mod infrastructure;
