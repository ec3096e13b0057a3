use std::collections::HashMap;

use tokio::sync::Mutex;
use url::Url;

use crate::http::body::Body;
use crate::http::error::ParseError;
use crate::http::header::Header;
use crate::http::multipart::FormLimits;
use crate::http::reader::{self, BufferedSource, ConnReader};
use crate::http::request::{Method, Request, Version};
use crate::http::writer::ConnWriter;

/// Request targets are absolute paths; they are prefixed with this origin
/// only to validate and split them.
const TARGET_ORIGIN: &str = "http://localhost";

/// Reads one request head from `reader` and sets up its body stream.
///
/// `writer` is only used by a body that must answer `Expect: 100-continue`.
pub async fn read_request<'c>(
    reader: &'c mut ConnReader,
    writer: &'c Mutex<ConnWriter>,
    limits: &FormLimits,
) -> Result<Request<'c>, ParseError> {
    let line = reader::read_line(reader)
        .await?
        .ok_or(ParseError::UnexpectedEof)?;
    let line = String::from_utf8(line)
        .map_err(|e| ParseError::RequestLine(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let &[method, target, version] = tokens.as_slice() else {
        return Err(ParseError::RequestLine(line.clone()));
    };

    let method = Method::parse(method);
    let (path, raw_query) = parse_target(target)?;
    let version = Version::parse(version).ok_or_else(|| ParseError::Version(version.to_string()))?;
    let target = target.to_string();

    let headers = read_header(reader).await?;

    // The body is bounded by its own framing from here on.
    reader.lift_limit();

    let body = select_body(&method, &headers, reader, writer);

    Ok(Request::new(
        method,
        target,
        path,
        raw_query,
        version,
        headers,
        body,
        limits.clone(),
    ))
}

fn parse_target(target: &str) -> Result<(String, Option<String>), ParseError> {
    let invalid = |reason: &str| ParseError::Target {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    if !target.starts_with('/') {
        return Err(invalid("not an absolute path"));
    }
    let url = Url::parse(&format!("{TARGET_ORIGIN}{target}")).map_err(|e| invalid(&e.to_string()))?;

    Ok((url.path().to_string(), url.query().map(str::to_string)))
}

/// Reads header lines up to and including the empty line that ends them.
///
/// A line whose colon is its last character is skipped; a line without a
/// colon is an error.
pub async fn read_header<S: BufferedSource>(src: &mut S) -> Result<Header, ParseError> {
    let mut header = Header::new();

    loop {
        let line = reader::read_line(src)
            .await?
            .ok_or(ParseError::UnexpectedEof)?;
        if line.is_empty() {
            break;
        }

        let line = String::from_utf8_lossy(&line);
        let Some(index) = line.find(':') else {
            return Err(ParseError::Header(line.into_owned()));
        };
        if index == line.len() - 1 {
            continue;
        }

        header.add(&line[..index], line[index + 1..].trim());
    }

    Ok(header)
}

fn select_body<'c>(
    method: &Method,
    headers: &Header,
    reader: &'c mut ConnReader,
    writer: &'c Mutex<ConnWriter>,
) -> Body<'c> {
    if !method.permits_body() {
        return Body::empty(reader);
    }

    let body = if let Some(cl) = headers.get("Content-Length").filter(|v| !v.is_empty()) {
        match cl.parse::<u64>() {
            Ok(length) => Body::limited(reader, length),
            Err(_) => return Body::empty(reader),
        }
    } else if headers.get("Transfer-Encoding") == Some("chunked") {
        Body::chunked(reader)
    } else {
        return Body::empty(reader);
    };

    if headers.get("Expect") == Some("100-continue") {
        body.expect_continue(writer)
    } else {
        body
    }
}

/// Parses `a=1&b=2` pairs.
///
/// Pairs without `=` or with an empty value are dropped; keys and values
/// are trimmed; a repeated key keeps its last value. No percent-decoding
/// is done.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut queries = HashMap::new();
    for part in query.split('&') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        queries.insert(key.trim().to_string(), value.trim().to_string());
    }
    queries
}
