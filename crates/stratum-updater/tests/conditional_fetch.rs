//! Conditional fetch against a canned HTTP server

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use stratum_core::CancelToken;
use stratum_updater::{fetch_conditional, FetchError};

/// Serve canned responses on a loopback socket, one per accepted
/// connection. 304 is returned whenever the request replays our ETag.
fn spawn_server(hits: usize) -> (String, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for _ in 0..hits {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            while !buf.ends_with(b"\r\n\r\n") {
                if sock.read(&mut byte).unwrap() == 0 {
                    break;
                }
                buf.push(byte[0]);
            }
            let request = String::from_utf8_lossy(&buf).into_owned();
            let revalidation = request
                .lines()
                .any(|l| l.to_ascii_lowercase().starts_with("if-none-match:") && l.contains("\"v1\""));
            let gzip = request.starts_with("GET /feed.json.gz");

            let response: Vec<u8> = if revalidation {
                b"HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\nConnection: close\r\n\r\n".to_vec()
            } else if gzip {
                let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(b"{\"packages\":[]}").unwrap();
                let body = enc.finish().unwrap();
                let mut head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nETag: \"v1\"\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .into_bytes();
                head.extend_from_slice(&body);
                head
            } else {
                b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nETag: \"v1\"\r\nConnection: close\r\n\r\nhello"
                    .to_vec()
            };
            sock.write_all(&response).unwrap();
            requests.push(request);
        }
        requests
    });
    (format!("http://{}", addr), handle)
}

#[test]
fn test_fetch_records_etag_then_reports_unchanged() {
    let (base, server) = spawn_server(2);
    let agent = ureq::Agent::new_with_defaults();
    let cancel = CancelToken::new();
    let url = format!("{}/feed.json", base);

    let (mut rdr, fingerprint) = fetch_conditional(&agent, &cancel, &url, None).unwrap();
    let mut body = String::new();
    rdr.read_to_string(&mut body).unwrap();
    assert_eq!(body, "hello");
    assert_eq!(fingerprint.as_str(), "etag:\"v1\"");

    // replaying the fingerprint yields the unchanged sentinel
    let err = fetch_conditional(&agent, &cancel, &url, Some(&fingerprint))
        .err()
        .unwrap();
    assert!(matches!(err, FetchError::Unchanged));

    let requests = server.join().unwrap();
    assert!(!requests[0].to_ascii_lowercase().contains("if-none-match"));
    assert!(requests[1].to_ascii_lowercase().contains("if-none-match"));
}

#[test]
fn test_gzip_feed_is_decompressed() {
    let (base, server) = spawn_server(1);
    let agent = ureq::Agent::new_with_defaults();
    let url = format!("{}/feed.json.gz", base);

    let (mut rdr, _fp) = fetch_conditional(&agent, &CancelToken::new(), &url, None).unwrap();
    let mut body = String::new();
    rdr.read_to_string(&mut body).unwrap();
    assert_eq!(body, "{\"packages\":[]}");
    server.join().unwrap();
}

#[test]
fn test_cancelled_fetch_short_circuits() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let agent = ureq::Agent::new_with_defaults();
    let err = fetch_conditional(&agent, &cancel, "http://127.0.0.1:9/feed", None)
        .err()
        .unwrap();
    assert!(matches!(err, FetchError::Cancelled(_)));
}
