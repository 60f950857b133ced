//! Minimal HTTP/1.1 server for bodies wiremock cannot produce.
//!
//! Each connection gets one response chosen by request path: a plain JSON
//! body, a body written a byte at a time, or a body cut short of its
//! declared `Content-Length`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Json(String),
    /// Sends `body` one byte per `delay`
    Trickle { body: Vec<u8>, delay: Duration },
    /// Declares `declared` bytes, sends `body` and closes the connection
    Truncated { declared: usize, body: Vec<u8> },
    NotFound,
}

/// Starts a server in a background thread. Returns the base URL
/// (e.g. "http://127.0.0.1:12345"). The server runs until the process exits.
pub fn start<F>(route: F) -> String
where
    F: Fn(&str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let route = Arc::new(route);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let route = Arc::clone(&route);
            thread::spawn(move || handle(stream, route.as_ref()));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

fn handle<F>(mut stream: TcpStream, route: &F)
where
    F: Fn(&str) -> Reply,
{
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Some(path) = read_request_path(&mut stream) else {
        return;
    };

    match route(&path) {
        Reply::Json(body) => {
            let _ = write_head(&mut stream, "200 OK", body.len());
            let _ = stream.write_all(body.as_bytes());
        }
        Reply::Trickle { body, delay } => {
            if write_head(&mut stream, "200 OK", body.len()).is_err() {
                return;
            }
            for byte in body {
                thread::sleep(delay);
                if stream.write_all(&[byte]).and_then(|_| stream.flush()).is_err() {
                    return;
                }
            }
        }
        Reply::Truncated { declared, body } => {
            let _ = write_head(&mut stream, "200 OK", declared);
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        }
        Reply::NotFound => {
            let _ = write_head(&mut stream, "404 Not Found", 0);
        }
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

fn write_head(stream: &mut TcpStream, status: &str, content_length: usize) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, content_length
    );
    stream.write_all(head.as_bytes())?;
    stream.flush()
}

/// Reads up to the end of the request headers and returns the path without its query
fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        request.extend_from_slice(&buf[..n]);
    }

    let request = String::from_utf8_lossy(&request);
    let target = request.lines().next()?.split_whitespace().nth(1)?;
    Some(target.split('?').next().unwrap_or(target).to_string())
}
