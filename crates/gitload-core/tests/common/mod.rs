//! Scripted in-process transport shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use gitload_core::{LoadError, Result, Transport, TransportFactory};
use gitload_protocol::PktLine;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const OID_MAIN: &str = "1111111111111111111111111111111111111111";
pub const OID_DEV: &str = "2222222222222222222222222222222222222222";

// ============================================================================
// Wire fixtures
// ============================================================================

pub fn encode(lines: &[PktLine]) -> Bytes {
    let mut buf = BytesMut::new();
    for pkt in lines {
        pkt.encode_to(&mut buf).unwrap();
    }
    buf.freeze()
}

/// A two-ref advertisement as sent over SSH (no service header).
pub fn advertisement() -> Bytes {
    encode(&[
        PktLine::from_bytes(
            format!(
                "{OID_MAIN} HEAD\0multi_ack_detailed side-band-64k thin-pack ofs-delta \
                 symref=HEAD:refs/heads/main agent=git/2.43.0\n"
            )
            .into_bytes(),
        ),
        PktLine::from_string(&format!("{OID_MAIN} refs/heads/main\n")),
        PktLine::from_string(&format!("{OID_DEV} refs/heads/dev\n")),
        PktLine::Flush,
    ])
}

/// An advertisement with no refs at all.
pub fn empty_advertisement() -> Bytes {
    encode(&[PktLine::Flush])
}

/// A side-band-64k response carrying `pack_len` pack bytes in frames of at
/// most `frame_len`, with progress text interleaved.
pub fn pack_response(pack_len: usize, frame_len: usize) -> Vec<Bytes> {
    let mut chunks = vec![encode(&[PktLine::from_string("NAK\n")])];
    let mut remaining = pack_len;
    let mut n = 0u8;
    while remaining > 0 {
        let len = remaining.min(frame_len);
        let mut frame = vec![1u8];
        frame.extend(std::iter::repeat(n).take(len));
        let progress = format!("\x02Receiving objects: {n}\r");
        chunks.push(encode(&[
            PktLine::from_bytes(frame),
            PktLine::from_string(&progress),
        ]));
        remaining -= len;
        n = n.wrapping_add(1);
    }
    chunks.push(encode(&[PktLine::Flush]));
    chunks
}

/// A response that fails on side-band channel 3.
pub fn remote_error_response(message: &str) -> Vec<Bytes> {
    vec![
        encode(&[PktLine::from_string("NAK\n")]),
        encode(&[PktLine::from_bytes(
            [&[3u8][..], message.as_bytes()].concat(),
        )]),
    ]
}

// ============================================================================
// Scripted transport
// ============================================================================

/// What a scripted transport does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Serve the advertisement, then a pack of this many bytes.
    Clone { pack_len: usize },
    /// Fail to connect.
    RefuseConnection,
    /// Serve an advertisement with no refs.
    EmptyRepository,
    /// Fail the pack with a side-band error.
    RemoteError(String),
    /// Connect, then never send anything.
    Stall,
}

/// Counts open connections across every transport of a run.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    open: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ConnectionCounter {
    fn opened(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn total_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    script: Script,
    counter: Arc<ConnectionCounter>,
    jitter: bool,
    connected: bool,
    pending: VecDeque<Bytes>,
    request: Option<Bytes>,
}

impl ScriptedTransport {
    pub fn new(script: Script, counter: Arc<ConnectionCounter>, jitter: bool) -> Self {
        Self {
            script,
            counter,
            jitter,
            connected: false,
            pending: VecDeque::new(),
            request: None,
        }
    }

    async fn jitter(&self) {
        if !self.jitter {
            return;
        }
        let (yields, sleep_us) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..4), rng.gen_range(0..300u64))
        };
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        if sleep_us > 200 {
            tokio::time::sleep(Duration::from_micros(sleep_us)).await;
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> Result<()> {
        self.jitter().await;
        if let Script::RefuseConnection = self.script {
            return Err(LoadError::Transport("connection refused".to_string()));
        }
        self.counter.opened();
        self.connected = true;
        self.pending.push_back(match self.script {
            Script::EmptyRepository => empty_advertisement(),
            _ => advertisement(),
        });
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Script::Stall = self.script {
            std::future::pending::<()>().await;
        }
        self.jitter().await;
        Ok(self.pending.pop_front())
    }

    async fn write_request(&mut self, request: Bytes) -> Result<()> {
        self.jitter().await;
        let text = String::from_utf8_lossy(&request);
        assert!(text.contains(&format!("want {OID_MAIN}")), "{text}");
        assert!(text.ends_with("0009done\n"), "{text}");
        self.request = Some(request);

        self.pending.clear();
        let response = match &self.script {
            Script::Clone { pack_len } => pack_response(*pack_len, 8192),
            Script::RemoteError(message) => remote_error_response(message),
            _ => Vec::new(),
        };
        self.pending.extend(response);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::take(&mut self.connected) {
            self.counter.closed();
        }
        Ok(())
    }
}

/// Builds transports from a per-index script.
pub struct ScriptedFactory<F> {
    script: F,
    jitter: bool,
    pub counter: Arc<ConnectionCounter>,
}

impl<F> ScriptedFactory<F>
where
    F: Fn(usize) -> Script + Send + Sync,
{
    pub fn new(script: F, jitter: bool) -> Self {
        Self {
            script,
            jitter,
            counter: Arc::new(ConnectionCounter::default()),
        }
    }
}

impl<F> TransportFactory for ScriptedFactory<F>
where
    F: Fn(usize) -> Script + Send + Sync,
{
    fn create(&self, index: usize) -> Box<dyn Transport> {
        Box::new(ScriptedTransport::new(
            (self.script)(index),
            Arc::clone(&self.counter),
            self.jitter,
        ))
    }
}
