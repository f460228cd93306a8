// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Wire Client
//!
//! This module is part of the Infrastructure layer: `RemoteStorageNode`
//! implements `StorageNode` against a peer reached over the length-framed
//! wire protocol, the same trait a `LocalStorageNode` implements.
//! `ClusterStorage` never needs to know which kind of node it holds.
//!
//! One connection is opened lazily per remote and kept open across calls;
//! a connection lost to an I/O error is not retried here; it is dropped and
//! reopened on the next call. Every operation serializes on an internal
//! async mutex, matching "opens one connection per remote partition":
//! requests to one peer do not interleave on the wire.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crdt_storage_domain::entities::{CrdtState, Key};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::{EntryStream, StorageNode};
use crdt_storage_domain::services::EntrySerializer;
use crdt_storage_domain::value_objects::Timestamp;

use super::framing::{read_bulk_entry, read_frame, write_bulk_end, write_frame};
use super::messages::{decode_response, encode_request, Request, Response, PROTOCOL_VERSION};

/// Dials `addr`, performs the handshake, sends one admin `request`, and
/// returns the single `Response` that follows. Used by the CLI's
/// `ping`/`status`/`consolidate-now`/`cleanup-now`/`repartition` commands,
/// none of which need a long-lived connection the way `ClusterStorage` does.
pub async fn call_admin(addr: SocketAddr, timeout: Duration, request: Request) -> Result<Response, StorageError> {
    let attempt = async {
        let mut stream = TcpStream::connect(addr).await.map_err(|e| StorageError::IoError(e.to_string()))?;
        send_request(&mut stream, &Request::Handshake { version: PROTOCOL_VERSION }).await?;
        match recv_response(&mut stream).await? {
            Response::HandshakeOk => {}
            Response::HandshakeFailure { minimum_version, message } => {
                return Err(StorageError::protocol(format!(
                            "handshake rejected by {addr}: requires >= {minimum_version:?}: {message}"
                        )));
            }
            other => return Err(StorageError::protocol(format!("unexpected handshake response: {other:?}"))),
        }
        send_request(&mut stream, &request).await?;
        recv_response(&mut stream).await
    };
    tokio::time::timeout(timeout, attempt)
    .await
    .map_err(|_| StorageError::IoError(format!("admin request to {addr} timed out")))?
}

struct Connection {
    stream: Option<TcpStream>,
}

/// A `StorageNode` reached over TCP at `addr`.
pub struct RemoteStorageNode<K, S, Ser> {
    addr: SocketAddr,
    serializer: Arc<Ser>,
    connection: Mutex<Connection>,
    _marker: PhantomData<(K, S)>,
}

impl<K, S, Ser> RemoteStorageNode<K, S, Ser>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    pub fn new(addr: SocketAddr, serializer: Arc<Ser>) -> Self {
        Self { addr, serializer, connection: Mutex::new(Connection { stream: None }), _marker: PhantomData }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn ensure_connected(&self, conn: &mut Connection) -> Result<(), StorageError> {
        if conn.stream.is_some() {
            return Ok(());
        }
        let mut stream = TcpStream::connect(self.addr).await.map_err(|e| StorageError::IoError(e.to_string()))?;
        send_request(&mut stream, &Request::Handshake { version: PROTOCOL_VERSION }).await?;
        match recv_response(&mut stream).await? {
            Response::HandshakeOk => {}
            Response::HandshakeFailure { minimum_version, message } => {
                return Err(StorageError::protocol(format!(
                            "handshake rejected by {}: requires >= {:?}: {message}",
                            self.addr, minimum_version
                        )));
            }
            other => return Err(StorageError::protocol(format!("unexpected handshake response: {other:?}"))),
        }
        conn.stream = Some(stream);
        Ok(())
    }
}

async fn send_request(stream: &mut TcpStream, request: &Request) -> Result<(), StorageError> {
    let bytes = encode_request(request)?;
    write_frame(stream, &bytes).await.map_err(|e| StorageError::IoError(e.to_string()))
}

async fn recv_response(stream: &mut TcpStream) -> Result<Response, StorageError> {
    let bytes = read_frame(stream).await.map_err(|e| StorageError::IoError(e.to_string()))?;
    decode_response(&bytes)
}

#[async_trait]
impl<K, S, Ser> StorageNode<K, S> for RemoteStorageNode<K, S, Ser>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    async fn upload(&self, mut entries: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        use futures::StreamExt;
        let mut conn = self.connection.lock().await;
        self.ensure_connected(&mut conn).await?;
        let stream = conn.stream.as_mut().unwrap();

        let result: Result<(), StorageError> = async {
            send_request(stream, &Request::Upload).await?;
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                let payload = self.serializer.encode(&entry)?;
                write_frame(stream, &payload).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            }
            write_bulk_end(stream).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            match recv_response(stream).await? {
                Response::UploadAck => Ok(()),
                Response::ServerError { message } => Err(StorageError::IoError(message)),
                other => Err(StorageError::protocol(format!("unexpected response to Upload: {other:?}"))),
            }
        }
        .await;

        if result.is_err() {
            conn.stream = None;
        }
        result
    }

    async fn download(&self, since: Timestamp) -> Result<EntryStream<'_, K, S>, StorageError> {
        let mut conn = self.connection.lock().await;
        self.ensure_connected(&mut conn).await?;
        {
            let stream = conn.stream.as_mut().unwrap();
            send_request(stream, &Request::Download { since: since.get() }).await?;
            match recv_response(stream).await? {
                Response::DownloadStarted => {}
                Response::ServerError { message } => return Err(StorageError::IoError(message)),
                other => return Err(StorageError::protocol(format!("unexpected response to Download: {other:?}"))),
            }
        }

        let serializer = self.serializer.clone();
        let out = async_stream::try_stream! {
            let mut conn = conn;
            loop {
                let stream = conn.stream.as_mut().expect("connected for the duration of the stream");
                match read_bulk_entry(stream).await.map_err(|e| StorageError::IoError(e.to_string()))? {
                    None => break,
                    Some(payload) => {
                        let entry = serializer.decode(&payload)?;
                        yield entry;
                    }
                }
            }
        };
        Ok(Box::pin(out))
    }

    async fn take(&self) -> Result<EntryStream<'_, K, S>, StorageError> {
        let mut conn = self.connection.lock().await;
        self.ensure_connected(&mut conn).await?;
        {
            let stream = conn.stream.as_mut().unwrap();
            send_request(stream, &Request::Take).await?;
            match recv_response(stream).await? {
                Response::TakeStarted => {}
                Response::ServerError { message } => return Err(StorageError::IoError(message)),
                other => return Err(StorageError::protocol(format!("unexpected response to Take: {other:?}"))),
            }
        }

        let serializer = self.serializer.clone();
        let out = async_stream::try_stream! {
            let mut conn = conn;
            loop {
                let stream = conn.stream.as_mut().expect("connected for the duration of the stream");
                match read_bulk_entry(stream).await.map_err(|e| StorageError::IoError(e.to_string()))? {
                    None => break,
                    Some(payload) => {
                        let entry = serializer.decode(&payload)?;
                        yield entry;
                    }
                }
            }
        };
        Ok(Box::pin(out))
    }

    async fn commit_take(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.lock().await;
        self.ensure_connected(&mut conn).await?;
        let stream = conn.stream.as_mut().unwrap();
        let result = send_request(stream, &Request::TakeAck).await;
        if result.is_err() {
            conn.stream = None;
        }
        result
    }

    async fn remove(&self, mut tombstones: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        use futures::StreamExt;
        let mut conn = self.connection.lock().await;
        self.ensure_connected(&mut conn).await?;
        let stream = conn.stream.as_mut().unwrap();

        let result: Result<(), StorageError> = async {
            send_request(stream, &Request::Remove).await?;
            while let Some(entry) = tombstones.next().await {
                let entry = entry?;
                let payload = self.serializer.encode(&entry)?;
                write_frame(stream, &payload).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            }
            write_bulk_end(stream).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            match recv_response(stream).await? {
                Response::RemoveAck => Ok(()),
                Response::ServerError { message } => Err(StorageError::IoError(message)),
                other => Err(StorageError::protocol(format!("unexpected response to Remove: {other:?}"))),
            }
        }
        .await;

        if result.is_err() {
            conn.stream = None;
        }
        result
    }

    async fn ping(&self, timeout: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.lock().await;
        let attempt = async {
            self.ensure_connected(&mut conn).await?;
            let stream = conn.stream.as_mut().unwrap();
            send_request(stream, &Request::Ping).await?;
            match recv_response(stream).await? {
                Response::Pong => Ok(()),
                other => Err(StorageError::protocol(format!("unexpected response to Ping: {other:?}"))),
            }
        };
        let result = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| StorageError::IoError(format!("ping to {} timed out", self.addr)))?;
        if result.is_err() {
            conn.stream = None;
        }
        result
    }
}
