// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus metrics: registration (`service`) and the HTTP endpoint that
//! exposes them for scraping (`endpoint`).

pub mod endpoint;
pub mod service;

pub use endpoint::MetricsEndpoint;
pub use service::MetricsService;
