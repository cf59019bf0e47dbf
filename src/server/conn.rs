//! Per-connection wire driver.
//!
//! Reads HTTP/1.1 requests with `httparse`, feeds the lifecycle engine its
//! callbacks (head first, then body chunks as they arrive off the socket,
//! then the zero-size terminator) and writes the reply. Keep-alive and
//! pipelined bytes are handled by carrying the buffer across requests.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use may::net::TcpStream;
use tracing::{debug, warn};

use crate::dispatcher::{Exchange, RequestHead, Step, Termination};
use crate::response::{
    static_page, Payload, BAD_REQUEST_BODY, INTERNAL_ERROR_BODY, TOO_LARGE_BODY,
};
use crate::server::daemon::ConnGuard;
use crate::server::Server;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 8 * 1024;
const DEFAULT_HEAD_LIMIT: usize = 64 * 1024;

/// `Exchange` implementation over one parsed wire request.
struct WireExchange {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    peer: SocketAddr,
}

impl Exchange for WireExchange {
    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn query_args(&self) -> &[(String, String)] {
        &self.query
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}

struct ParsedHead {
    method: String,
    target: String,
    version: &'static str,
    headers: Vec<(String, String)>,
    head_len: usize,
}

enum HeadOutcome {
    Request(Box<ParsedHead>),
    Closed,
    TooLarge,
    Malformed,
}

pub(crate) fn serve(server: Server, mut stream: TcpStream, peer: SocketAddr, _guard: ConnGuard) {
    let config = &server.core.config;
    if !config.connection_timeout.is_zero() {
        let _ = stream.set_read_timeout(Some(config.connection_timeout));
    }
    let head_limit = if config.memory_limit > 0 {
        config.memory_limit
    } else {
        DEFAULT_HEAD_LIMIT
    };
    let mut buf: Vec<u8> = Vec::with_capacity(4096);

    loop {
        let head = match read_head(&mut stream, &mut buf, head_limit) {
            Ok(HeadOutcome::Request(head)) => head,
            Ok(HeadOutcome::Closed) => return,
            Ok(HeadOutcome::TooLarge) => {
                let _ = write_payload(&mut stream, &static_page(413, TOO_LARGE_BODY), false);
                return;
            }
            Ok(HeadOutcome::Malformed) => {
                warn!(peer = %peer, "malformed request head");
                let _ = write_payload(&mut stream, &static_page(400, BAD_REQUEST_BODY), false);
                return;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "connection read ended");
                return;
            }
        };
        let head_len = head.head_len;
        let ParsedHead {
            method,
            target,
            version,
            headers,
            ..
        } = *head;
        if config.debug {
            debug!(peer = %peer, method = %method, target = %target, "request head parsed");
        }

        if config.pedantic
            && version == "HTTP/1.1"
            && crate::auth::header_value(&headers, "host").is_none()
        {
            let _ = write_payload(&mut stream, &static_page(400, BAD_REQUEST_BODY), false);
            return;
        }

        let content_length = match declared_content_length(&headers) {
            Ok(len) => len,
            Err(()) => {
                let _ = write_payload(&mut stream, &static_page(400, BAD_REQUEST_BODY), false);
                return;
            }
        };
        if config.memory_limit > 0 && content_length > config.memory_limit {
            let _ = write_payload(&mut stream, &static_page(413, TOO_LARGE_BODY), false);
            return;
        }

        let keep_alive_requested = wants_keep_alive(version, &headers);
        buf.drain(..head_len);

        let (path_raw, query_raw) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target.as_str(), None),
        };
        let ex = WireExchange {
            headers,
            query: split_raw_query(query_raw),
            peer,
        };
        let req_head = RequestHead {
            method: &method,
            target: path_raw,
            version,
        };

        let mut tx = server.uri_log(&target);
        let mut step = server.answer(&mut tx, &ex, &req_head, None);

        let mut body_consumed = true;
        if matches!(step, Step::Continue) {
            let mut remaining = content_length;
            while remaining > 0 {
                if buf.is_empty() {
                    let mut tmp = [0u8; READ_CHUNK];
                    match stream.read(&mut tmp) {
                        Ok(0) => {
                            server.request_completed(tx, Termination::ClientAbort);
                            return;
                        }
                        Ok(n) => buf.extend_from_slice(&tmp[..n]),
                        Err(e) if is_timeout(&e) => {
                            server.request_completed(tx, Termination::TimedOut);
                            return;
                        }
                        Err(_) => {
                            server.request_completed(tx, Termination::Error);
                            return;
                        }
                    }
                }
                let take = remaining.min(buf.len());
                let chunk: Vec<u8> = buf.drain(..take).collect();
                step = server.answer(&mut tx, &ex, &req_head, Some(&chunk));
                remaining -= take;
            }
            step = server.answer(&mut tx, &ex, &req_head, Some(&[]));
        } else if content_length > 0 {
            // The engine replied before the body was consumed (unknown
            // method short-circuit): the stream is out of sync, close it
            // after responding.
            body_consumed = false;
        }

        let payload = match step {
            Step::Reply(payload) => payload,
            Step::Continue => {
                warn!(peer = %peer, "engine yielded no reply");
                static_page(500, INTERNAL_ERROR_BODY)
            }
        };

        let keep_alive = keep_alive_requested && body_consumed;
        if write_payload(&mut stream, &payload, keep_alive).is_err() {
            server.request_completed(tx, Termination::Error);
            return;
        }
        server.request_completed(tx, Termination::Completed);
        if !keep_alive {
            return;
        }
    }
}

fn read_head(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<HeadOutcome> {
    loop {
        if !buf.is_empty() {
            let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parsed = httparse::Request::new(&mut header_storage);
            match parsed.parse(buf) {
                Ok(httparse::Status::Complete(head_len)) => {
                    let method = parsed.method.unwrap_or("").to_string();
                    let target = parsed.path.unwrap_or("/").to_string();
                    let version = if parsed.version == Some(0) {
                        "HTTP/1.0"
                    } else {
                        "HTTP/1.1"
                    };
                    let headers = parsed
                        .headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_ascii_lowercase(),
                                String::from_utf8_lossy(h.value).to_string(),
                            )
                        })
                        .collect();
                    return Ok(HeadOutcome::Request(Box::new(ParsedHead {
                        method,
                        target,
                        version,
                        headers,
                        head_len,
                    })));
                }
                Ok(httparse::Status::Partial) => {}
                Err(_) => return Ok(HeadOutcome::Malformed),
            }
            if buf.len() > limit {
                return Ok(HeadOutcome::TooLarge);
            }
        }
        let mut tmp = [0u8; READ_CHUNK];
        let n = stream.read(&mut tmp)?;
        if n == 0 {
            return Ok(if buf.is_empty() {
                HeadOutcome::Closed
            } else {
                HeadOutcome::Malformed
            });
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

fn declared_content_length(headers: &[(String, String)]) -> Result<usize, ()> {
    match crate::auth::header_value(headers, "content-length") {
        Some(value) => value.trim().parse::<usize>().map_err(|_| ()),
        None => Ok(0),
    }
}

fn wants_keep_alive(version: &str, headers: &[(String, String)]) -> bool {
    let connection = crate::auth::header_value(headers, "connection");
    if version == "HTTP/1.0" {
        matches!(connection, Some(v) if v.eq_ignore_ascii_case("keep-alive"))
    } else {
        !matches!(connection, Some(v) if v.eq_ignore_ascii_case("close"))
    }
}

fn split_raw_query(query: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((key, value)) => out.push((key.to_string(), value.to_string())),
                None => out.push((pair.to_string(), String::new())),
            }
        }
    }
    out
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn write_payload(stream: &mut TcpStream, payload: &Payload, keep_alive: bool) -> io::Result<()> {
    let mut head = String::with_capacity(128);
    head.push_str("HTTP/1.1 ");
    head.push_str(&payload.status.to_string());
    head.push(' ');
    head.push_str(payload.reason());
    head.push_str("\r\n");
    let mut has_length = false;
    for (key, value) in &payload.headers {
        if key.eq_ignore_ascii_case("content-length") {
            has_length = true;
        }
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !has_length {
        head.push_str("Content-Length: ");
        head.push_str(&payload.body.len().to_string());
        head.push_str("\r\n");
    }
    if !keep_alive {
        head.push_str("Connection: close\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(&payload.body)?;
    stream.flush()
}
