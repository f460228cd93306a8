// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The length-framed wire protocol: control-message framing
//! (`framing`, `messages`), the server-side request state machine
//! (`server`), the client-side `StorageNode` over TCP (`client`), and
//! partition-id-to-address resolution (`address_book`) for the cluster
//! layer above it.

pub mod address_book;
pub mod client;
pub mod framing;
pub mod messages;
pub mod server;

pub use address_book::{DirectAddressBook, PartitionAddressBook, StaticAddressBook};
pub use client::{call_admin, RemoteStorageNode};
pub use messages::{CleanupReport, ConsolidateReport, NodeStatusReport, Request, Response};
pub use server::{serve, AdminHooks, RepartitionFn};
