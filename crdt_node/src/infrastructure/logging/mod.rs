// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Process-wide tracing subscriber setup for a running node: human-readable
//! output for a development terminal, structured JSON when `json` is set
//! (container/production deployments feeding a log aggregator).

use tracing_subscriber::EnvFilter;

/// Where log output goes and what shape it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored when the terminal supports it.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs the process-wide tracing subscriber. Call once, at startup.
///
/// `verbose` raises the default filter to `debug`; `RUST_LOG`, if set,
/// always takes precedence over both `verbose` and the built-in default.
pub fn init(format: LogFormat, verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Pretty => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt().json().with_env_filter(filter).try_init();
        }
    }
}
