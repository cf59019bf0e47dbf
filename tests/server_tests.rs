//! End-to-end tests over real sockets: the daemon pool, the wire driver,
//! keep-alive, limits, policy rejection and the lifecycle condition.

mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use portico::{
    HandlerResult, JsonResponse, Request, Resource, Server, ServerBuilder, StartMode, TextResponse,
};

use common::{body_of, read_response, send_request, status_of};

struct Hello;

impl Resource for Hello {
    fn render_get(&self, req: &Request) -> HandlerResult {
        let who = req.arg("name").unwrap_or("world");
        Ok(TextResponse::new(format!("hello, {who}")).shared())
    }
}

struct EchoForm;

impl Resource for EchoForm {
    fn render_post(&self, req: &Request) -> HandlerResult {
        Ok(JsonResponse::new(serde_json::json!({
            "k": req.arg("k"),
            "raw_len": req.content().len(),
        }))
        .shared())
    }
}

fn loopback_builder() -> ServerBuilder {
    Server::builder().bind_address("127.0.0.1:0".parse().unwrap())
}

fn started(server: Server) -> (Server, SocketAddr) {
    assert!(server.start(false), "server failed to start");
    server.wait_ready().expect("server never became ready");
    let addr = server.local_addr().expect("bound address missing");
    (server, addr)
}

#[test]
fn serves_a_routed_get() {
    common::init_tracing();
    let server = loopback_builder().build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    let (_server, addr) = started(server);

    let response = send_request(addr, "GET /hello/rust HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "hello, rust");
}

#[test]
fn unknown_route_gets_the_static_404() {
    let server = loopback_builder().build();
    let (_server, addr) = started(server);

    let response = send_request(addr, "GET /nowhere HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 404);
    assert!(body_of(&response).contains("Not Found"));
}

#[test]
fn form_post_reaches_the_handler_decoded() {
    let server = loopback_builder().build();
    server
        .register_resource("/submit", Arc::new(EchoForm), false)
        .unwrap();
    let (_server, addr) = started(server);

    let body = "k=v%20w&k2=z";
    let request = format!(
        "POST /submit HTTP/1.1\r\nHost: t\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_request(addr, &request);
    assert_eq!(status_of(&response), 200);
    let parsed: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(parsed["k"], "v w");
    assert_eq!(parsed["raw_len"], body.len());
}

#[test]
fn keep_alive_serves_sequential_requests() {
    let server = loopback_builder().build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    let (_server, addr) = started(server);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /hello/one HTTP/1.1\r\nHost: t\r\n\r\n")
        .unwrap();
    let first = read_response(&mut stream);
    assert_eq!(body_of(&first), "hello, one");

    stream
        .write_all(b"GET /hello/two HTTP/1.1\r\nHost: t\r\n\r\n")
        .unwrap();
    let second = read_response(&mut stream);
    assert_eq!(body_of(&second), "hello, two");
}

#[test]
fn pipelined_requests_are_both_answered() {
    let server = loopback_builder().build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    let (_server, addr) = started(server);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(
            b"GET /hello/a HTTP/1.1\r\nHost: t\r\n\r\nGET /hello/b HTTP/1.1\r\nHost: t\r\n\r\n",
        )
        .unwrap();
    let first = read_response(&mut stream);
    assert_eq!(body_of(&first), "hello, a");
    let second = read_response(&mut stream);
    assert_eq!(body_of(&second), "hello, b");
}

#[test]
fn banned_peer_is_dropped_before_parsing() {
    let server = loopback_builder().build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    server.ban_ip("127.0.0.1").unwrap();
    let (_server, addr) = started(server);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(1000)))
        .unwrap();
    let _ = stream.write_all(b"GET /hello/rust HTTP/1.1\r\nHost: t\r\n\r\n");
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    assert!(buf.is_empty(), "banned peer received bytes: {buf:?}");
}

#[test]
fn allowance_overrides_a_covering_ban() {
    let server = loopback_builder().build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    server.ban_ip("127.0.0.0/8").unwrap();
    server.allow_ip("127.0.0.1").unwrap();
    let (_server, addr) = started(server);

    let response = send_request(addr, "GET /hello/back HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 200);
}

#[test]
fn oversize_body_is_rejected_with_413() {
    let server = loopback_builder().memory_limit(128).build();
    server
        .register_resource("/submit", Arc::new(EchoForm), false)
        .unwrap();
    let (_server, addr) = started(server);

    let request =
        "POST /submit HTTP/1.1\r\nHost: t\r\nContent-Length: 4096\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\n";
    let response = send_request(addr, request);
    assert_eq!(status_of(&response), 413);
}

#[test]
fn malformed_request_line_gets_400() {
    let server = loopback_builder().build();
    let (_server, addr) = started(server);

    let response = send_request(addr, "THIS IS NOT HTTP\r\n\r\n");
    assert_eq!(status_of(&response), 400);
}

#[test]
fn pedantic_mode_requires_host_header() {
    let server = loopback_builder().pedantic(true).build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    let (_server, addr) = started(server);

    let response = send_request(addr, "GET /hello/x HTTP/1.1\r\n\r\n");
    assert_eq!(status_of(&response), 400);
}

#[test]
fn unknown_method_gets_406_over_the_wire() {
    let server = loopback_builder().build();
    let (_server, addr) = started(server);

    let response = send_request(addr, "BREW /pot HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 406);
}

#[test]
fn select_mode_runs_a_daemon_pool() {
    let server = loopback_builder()
        .start_mode(StartMode::ExternalSelect)
        .max_threads(2)
        .build();
    server
        .register_resource("/hello/{name}", Arc::new(Hello), false)
        .unwrap();
    let (_server, addr) = started(server);

    for i in 0..4 {
        let response = send_request(addr, &format!("GET /hello/{i} HTTP/1.1\r\nHost: t\r\n\r\n"));
        assert_eq!(status_of(&response), 200);
    }
}

#[test]
fn start_fails_cleanly_without_a_port() {
    let server = Server::builder().build();
    assert!(!server.start(false));
    assert!(!server.is_running());
}

#[test]
fn start_fails_when_tls_material_is_unreadable() {
    let server = loopback_builder()
        .use_ssl(true)
        .https_mem_key("/no/such/key.pem")
        .https_mem_cert("/no/such/cert.pem")
        .build();
    assert!(!server.start(false));
    assert!(!server.is_running());
}

#[test]
fn blocking_start_returns_after_stop() {
    let server = loopback_builder().build();
    let clone = server.clone();
    let blocker = std::thread::spawn(move || clone.start(true));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !server.is_running() {
        assert!(Instant::now() < deadline, "server never reported running");
        std::thread::sleep(Duration::from_millis(5));
    }

    server.stop();
    let returned = blocker.join().expect("blocking start panicked");
    assert!(returned);
    assert!(!server.is_running());
}

#[test]
fn stopped_server_reports_not_running() {
    let server = loopback_builder().build();
    assert!(server.start(false));
    assert!(server.is_running());
    server.stop();
    assert!(!server.is_running());
}

#[test]
fn registration_while_serving_is_visible() {
    let server = loopback_builder().build();
    let (server, addr) = started(server);

    let response = send_request(addr, "GET /late HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 404);

    server
        .register_resource("/late", Arc::new(Hello), false)
        .unwrap();
    let response = send_request(addr, "GET /late HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 200);

    server.unregister_resource("/late");
    let response = send_request(addr, "GET /late HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status_of(&response), 404);
}
