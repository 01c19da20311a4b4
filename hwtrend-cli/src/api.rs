//! HTTP API over the query service.
//!
//! Uses `std::net::TcpListener` with one thread per connection. Endpoints:
//!
//! - `GET /api/health`: liveness check
//! - `GET /api/types`: configured sensor types with member counts
//! - `GET /api/sensors/<type>`: sensors of one type
//! - `GET /api/data/<key>?start=&end=&resolution=`: `[[timestamp_ms, value], ...]`
//! - `GET /api/chart_state`: stored chart state document
//! - `POST /api/chart_state`: replace the chart state document

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hwtrend::QueryService;
use tracing::{debug, error, info, warn};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1 << 20;

/// Longest accepted request or header line, terminator included.
const MAX_LINE_BYTES: usize = 8 << 10;

/// Most header lines accepted per request.
const MAX_HEADERS: usize = 64;

/// A response ready to be written: status code and JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: String,
}

impl Response {
    fn ok(body: String) -> Self {
        Self { status: 200, body }
    }

    fn json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::ok(body),
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                Self::error(500, "internal error")
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }
}

/// Accepts connections until the listener fails, serving each one on its own
/// thread. Blocking; intended for a dedicated thread or `main`.
pub fn serve(listener: &TcpListener, service: &Arc<QueryService>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API listening");
    }

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept error");
                continue;
            }
        };

        let service = Arc::clone(service);
        thread::spawn(move || {
            // Short read timeout so a slow client cannot pin a thread forever
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            if let Err(e) = handle_connection(&stream, &service) {
                debug!(error = %e, "request error");
            }
        });
    }
}

/// Reads one request from `stream`, routes it and writes the response.
fn handle_connection(stream: &TcpStream, service: &QueryService) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let response = match read_request(&mut reader) {
        Ok(Some(request)) => route(service, &request.method, &request.target, &request.body),
        Ok(None) => Response::error(400, "bad request"),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Response::error(400, "bad request"),
        Err(e) => return Err(e),
    };
    send_response(stream, &response)
}

struct Request {
    method: String,
    target: String,
    body: Vec<u8>,
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Reads one line of at most [`MAX_LINE_BYTES`].
fn read_line_limited<R: BufRead>(reader: &mut R, line: &mut String) -> io::Result<usize> {
    let read = reader.by_ref().take(MAX_LINE_BYTES as u64 + 1).read_line(line)?;
    if read > MAX_LINE_BYTES {
        return Err(invalid_data("line too long"));
    }
    Ok(read)
}

/// Parses the request line, headers and body. `None` for a malformed
/// request line.
///
/// Oversized lines, too many headers and oversized bodies are
/// [`io::ErrorKind::InvalidData`] errors.
fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<Request>> {
    let mut request_line = String::new();
    read_line_limited(reader, &mut request_line)?;

    let mut content_length = 0;
    let mut headers = 0;
    loop {
        let mut line = String::new();
        if read_line_limited(reader, &mut line)? == 0 || line.trim().is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADERS {
            return Err(invalid_data("too many headers"));
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| invalid_data("invalid content-length"))?;
        }
    }

    // "GET /path?query HTTP/1.x"
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(None);
    }

    if content_length > MAX_BODY_BYTES {
        return Err(invalid_data("request body too large"));
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(Some(Request {
        method: parts[0].to_ascii_uppercase(),
        target: parts[1].to_string(),
        body,
    }))
}

/// Maps a request to a response.
pub fn route(service: &QueryService, method: &str, target: &str, body: &[u8]) -> Response {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let Some(path) = percent_decode(path, false) else {
        return Response::error(400, "bad request");
    };
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    debug!(method, path = %path, "request");

    match (method, segments.as_slice()) {
        ("GET", ["api", "health"]) => Response::ok(r#"{"status":"ok"}"#.to_string()),
        ("GET", ["api", "types"]) => Response::json(&service.types()),
        ("GET", ["api", "sensors", type_name]) => match service.sensors_by_type(type_name) {
            Some(sensors) => Response::json(&sensors),
            None => Response::error(404, "unknown sensor type"),
        },
        ("GET", ["api", "data", key]) => {
            let Some(params) = parse_query(query) else {
                return Response::error(400, "bad request");
            };
            let param = |name: &str| params.get(name).map(String::as_str).filter(|v| !v.is_empty());
            let points = service.range_data(key, param("start"), param("end"), param("resolution"));
            Response::json(&points)
        }
        ("GET", ["api", "chart_state"]) => Response::json(&service.chart_state()),
        ("POST", ["api", "chart_state"]) => match serde_json::from_slice(body) {
            Ok(value) => match service.update_chart_state(value) {
                Ok(()) => Response::ok(r#"{"status":"ok"}"#.to_string()),
                Err(e) => {
                    error!(error = %e, "failed to save chart state");
                    Response::error(500, "failed to save chart state")
                }
            },
            Err(e) => {
                warn!(error = %e, "rejected chart state");
                Response::error(400, "invalid JSON")
            }
        },
        _ => Response::error(404, "not found"),
    }
}

fn send_response(mut stream: &TcpStream, response: &Response) -> io::Result<()> {
    let status_text = match response.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    };

    write!(
        stream,
        "HTTP/1.1 {} {status_text}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        response.status,
        response.body.len(),
        response.body,
    )?;
    stream.flush()
}

/// Parses a query string into decoded key-value pairs. `None` if any part is
/// not valid percent-encoded UTF-8.
fn parse_query(query: &str) -> Option<HashMap<String, String>> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(k, true)?, percent_decode(v, true)?))
        })
        .collect()
}

/// Decodes `%XX` escapes, and `+` as a space in query components.
fn percent_decode(input: &str, plus_as_space: bool) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = input.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).ok()
}
