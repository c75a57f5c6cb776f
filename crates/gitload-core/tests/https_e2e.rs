//! Smart HTTP clones against a mock server.

mod common;

use bytes::{Bytes, BytesMut};
use common::{encode, OID_DEV, OID_MAIN};
use gitload_core::{
    CloneSession, ErrorKind, HttpsTransport, LoadOrchestrator, RemoteUrl, RunConfig,
    StaticCredentials, Timeouts, TransportKind, USER_AGENT,
};
use gitload_protocol::PktLine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADVERTISEMENT: &str = "application/x-git-upload-pack-advertisement";
const RESULT: &str = "application/x-git-upload-pack-result";
const PACK_LEN: usize = 1024 * 1024;

fn advertisement_body() -> Bytes {
    encode(&[
        PktLine::from_string("# service=git-upload-pack\n"),
        PktLine::Flush,
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

/// NAK, then 1 MiB of pack in maximal side-band-64k frames with progress
/// frames in between, then flush.
fn pack_body() -> Bytes {
    let mut buf = BytesMut::new();
    PktLine::from_string("NAK\n").encode_to(&mut buf).unwrap();

    let mut pack = Vec::with_capacity(PACK_LEN);
    pack.extend_from_slice(b"PACK\0\0\0\x02\0\0\0\x01");
    pack.resize(PACK_LEN, 0xab);

    for (i, chunk) in pack.chunks(65515).enumerate() {
        let mut frame = Vec::with_capacity(chunk.len() + 1);
        frame.push(1);
        frame.extend_from_slice(chunk);
        PktLine::from_bytes(frame).encode_to(&mut buf).unwrap();
        PktLine::from_string(&format!("\x02Receiving objects: {i}\r"))
            .encode_to(&mut buf)
            .unwrap();
    }
    PktLine::Flush.encode_to(&mut buf).unwrap();
    buf.freeze()
}

fn advertisement_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(advertisement_body().to_vec(), ADVERTISEMENT)
}

async fn mount_repository(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repo.git/info/refs"))
        .and(query_param("service", "git-upload-pack"))
        .and(header("user-agent", USER_AGENT))
        .respond_with(advertisement_response())
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repo.git/git-upload-pack"))
        .and(header("content-type", "application/x-git-upload-pack-request"))
        .and(body_string_contains(&format!("want {OID_MAIN} multi_ack_detailed")))
        .and(body_string_contains("0009done\n"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(pack_body().to_vec(), RESULT))
        .mount(server)
        .await;
}

fn remote(server: &MockServer) -> RemoteUrl {
    RemoteUrl::parse(&format!("{}/repo/", server.uri())).unwrap()
}

#[tokio::test]
async fn test_clone_counts_exact_pack_bytes() {
    let server = MockServer::start().await;
    mount_repository(&server).await;

    let remote = remote(&server);
    assert_eq!(remote.kind(), TransportKind::Https);
    let RemoteUrl::Https(url) = remote else {
        unreachable!()
    };
    let transport = HttpsTransport::new(url, Timeouts::default(), USER_AGENT);

    let result = CloneSession::new(1, Box::new(transport), Timeouts::default())
        .run(&CancellationToken::new())
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.bytes_received, 1_048_576);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orchestrated_https_run() {
    let server = MockServer::start().await;
    mount_repository(&server).await;

    let config = RunConfig {
        count: 6,
        concurrency: 3,
        ..RunConfig::default()
    };
    let orchestrator = LoadOrchestrator::for_remote(
        config,
        remote(&server),
        Arc::new(StaticCredentials::default()),
    )
    .unwrap();

    let report = orchestrator.run().await;

    assert!(report.all_succeeded(), "{:?}", report.metrics.failures_by_kind);
    assert_eq!(report.metrics.total_bytes, 6 * PACK_LEN as u64);
    assert!(report.peak_streaming <= 3);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 12);
}

#[tokio::test]
async fn test_http_error_status_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repo.git/info/refs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let RemoteUrl::Https(url) = remote(&server) else {
        unreachable!()
    };
    let transport = HttpsTransport::new(url, Timeouts::default(), USER_AGENT);
    let result = CloneSession::new(1, Box::new(transport), Timeouts::default())
        .run(&CancellationToken::new())
        .await;

    let error = result.error.expect("404 should fail the clone");
    assert_eq!(error.kind, ErrorKind::Transport);
    assert!(error.message.contains("404"), "{}", error.message);
}

#[tokio::test]
async fn test_dumb_server_is_protocol_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repo.git/info/refs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!("{OID_MAIN}\trefs/heads/main\n"), "text/plain"),
        )
        .mount(&server)
        .await;

    let RemoteUrl::Https(url) = remote(&server) else {
        unreachable!()
    };
    let transport = HttpsTransport::new(url, Timeouts::default(), USER_AGENT);
    let result = CloneSession::new(1, Box::new(transport), Timeouts::default())
        .run(&CancellationToken::new())
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Protocol));
}

#[tokio::test]
async fn test_side_band_error_is_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repo.git/info/refs"))
        .respond_with(advertisement_response())
        .mount(&server)
        .await;
    let failure = encode(&[
        PktLine::from_string("NAK\n"),
        PktLine::from_string("\x03upload-pack: not our ref\n"),
    ]);
    Mock::given(method("POST"))
        .and(path("/repo.git/git-upload-pack"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(failure.to_vec(), RESULT))
        .mount(&server)
        .await;

    let RemoteUrl::Https(url) = remote(&server) else {
        unreachable!()
    };
    let transport = HttpsTransport::new(url, Timeouts::default(), USER_AGENT);
    let result = CloneSession::new(1, Box::new(transport), Timeouts::default())
        .run(&CancellationToken::new())
        .await;

    let error = result.error.expect("side-band error should fail the clone");
    assert_eq!(error.kind, ErrorKind::Remote);
    assert!(error.message.contains("not our ref"), "{}", error.message);
}

// ============================================================================
// Connection accounting
// ============================================================================

/// Minimal keep-alive HTTP/1.1 server that counts accepted connections.
async fn serve_counting(listener: TcpListener, accepted: Arc<AtomicUsize>) {
    while let Ok((stream, _)) = listener.accept().await {
        accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve_connection(stream));
    }
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 8192];
    match stream.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}

async fn serve_connection(mut stream: TcpStream) {
    let mut buf = Vec::new();
    loop {
        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if !read_more(&mut stream, &mut buf).await {
                return;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            if !read_more(&mut stream, &mut buf).await {
                return;
            }
        }
        buf.drain(..header_end + content_length);

        let (content_type, body) = if head.starts_with("GET ") {
            (ADVERTISEMENT, advertisement_body())
        } else {
            (RESULT, pack_body())
        };
        let headers = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        if stream.write_all(headers.as_bytes()).await.is_err()
            || stream.write_all(&body).await.is_err()
        {
            return;
        }
    }
}

#[tokio::test]
async fn test_clone_uses_one_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(serve_counting(listener, Arc::clone(&accepted)));

    let RemoteUrl::Https(url) = RemoteUrl::parse(&format!("http://{addr}/repo")).unwrap() else {
        unreachable!()
    };
    let transport = HttpsTransport::new(url, Timeouts::default(), USER_AGENT);
    let result = CloneSession::new(1, Box::new(transport), Timeouts::default())
        .run(&CancellationToken::new())
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.bytes_received, PACK_LEN as u64);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    server.abort();
}
