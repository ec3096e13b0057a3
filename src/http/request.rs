use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::OnceLock;

use crate::http::body::Body;
use crate::http::error::FormError;
use crate::http::header::Header;
use crate::http::multipart::{FileHeader, FormLimits, MultipartForm, MultipartReader};
use crate::http::parser::parse_query;

/// HTTP request methods.
///
/// The common verbs get their own variant; any other token is kept verbatim
/// in `Extension`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other method token, case preserved
    Extension(String),
}

impl Method {
    /// Parses a method token. Matching is case-sensitive, so `get` becomes
    /// an extension method.
    ///
    /// ```
    /// # use httpd::http::request::Method;
    /// assert_eq!(Method::parse("GET"), Method::GET);
    /// assert_eq!(Method::parse("get"), Method::Extension("get".into()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other => Method::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(s) => s,
        }
    }

    /// Only GET, POST and PUT requests are given a body.
    pub fn permits_body(&self) -> bool {
        matches!(self, Method::GET | Method::POST | Method::PUT)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version of a request, e.g. `HTTP/1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    /// Parses `HTTP/<major>.<minor>`.
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.strip_prefix("HTTP/")?.split_once('.')?;
        Some(Version {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// True for HTTP/1.0 and older, where connections close by default.
    pub fn is_pre_http11(&self) -> bool {
        *self < Version::HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

#[derive(Default)]
struct FormState {
    parsed: bool,
    error: Option<String>,
    values: HashMap<String, String>,
    multipart: Option<MultipartForm>,
}

/// A parsed HTTP request whose body streams from the connection.
///
/// The request lives for one iteration of the connection loop. Form data is
/// parsed on first use and cached; temp files of a multipart form are
/// removed when the iteration finishes.
pub struct Request<'c> {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The raw request target, e.g. `/search?q=rust`
    pub target: String,
    /// The path component of the target
    pub path: String,
    /// The query component of the target, without the `?`
    pub raw_query: Option<String>,
    pub version: Version,
    /// Request headers, keys as sent by the client
    pub headers: Header,
    pub remote_addr: Option<SocketAddr>,
    pub body: Body<'c>,
    query: HashMap<String, String>,
    cookies: OnceLock<HashMap<String, String>>,
    content_type: String,
    boundary: String,
    limits: FormLimits,
    form: FormState,
}

impl<'c> Request<'c> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: Method,
        target: String,
        path: String,
        raw_query: Option<String>,
        version: Version,
        headers: Header,
        body: Body<'c>,
        limits: FormLimits,
    ) -> Self {
        let query = raw_query.as_deref().map(parse_query).unwrap_or_default();
        let mut req = Self {
            method,
            target,
            path,
            raw_query,
            version,
            headers,
            remote_addr: None,
            body,
            query,
            cookies: OnceLock::new(),
            content_type: String::new(),
            boundary: String::new(),
            limits,
            form: FormState::default(),
        };
        req.parse_content_type();
        req
    }

    /// Retrieves a header value by its exact name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Looks up a query parameter, or a path parameter captured by the
    /// router.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn queries(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.query.insert(name.into(), value.into());
    }

    /// Looks up a cookie sent in the `Cookie` header(s).
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get_or_init(|| parse_cookies(self.headers.get_all("Cookie")))
            .get(name)
            .map(String::as_str)
    }

    /// The media type of the body, without parameters.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Splits `Content-Type` into the media type and the multipart boundary.
    fn parse_content_type(&mut self) {
        let Some(ct) = self.headers.get("Content-Type") else {
            return;
        };
        let mut params = ct.split(';');
        self.content_type = params.next().unwrap_or_default().trim().to_string();
        for param in params {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim() == "boundary" {
                    self.boundary = value.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    /// Streams the multipart body part by part.
    pub fn multipart_reader(&mut self) -> Result<MultipartReader<'_, 'c>, FormError> {
        if self.boundary.is_empty() {
            return Err(FormError::MissingBoundary);
        }
        Ok(MultipartReader::new(&mut self.body, &self.boundary))
    }

    /// Returns a text field of a urlencoded or multipart form.
    pub async fn post_form(&mut self, name: &str) -> Option<&str> {
        self.ensure_form().await.ok()?;
        self.form.values.get(name).map(String::as_str)
    }

    /// Parses (once) and returns the multipart form.
    pub async fn multipart_form(&mut self) -> Result<&MultipartForm, FormError> {
        self.ensure_form().await?;
        self.form
            .multipart
            .as_ref()
            .ok_or_else(|| FormError::UnsupportedFormType(self.content_type.clone()))
    }

    /// Returns the file uploaded under the form field `name`.
    pub async fn form_file(&mut self, name: &str) -> Result<&FileHeader, FormError> {
        let form = self.multipart_form().await?;
        form.file
            .get(name)
            .ok_or_else(|| FormError::MissingFile(name.to_string()))
    }

    async fn ensure_form(&mut self) -> Result<(), FormError> {
        if self.form.parsed {
            return match &self.form.error {
                Some(msg) => Err(FormError::Previous(msg.clone())),
                None => Ok(()),
            };
        }
        self.form.parsed = true;

        let result = self.parse_form().await;
        if let Err(e) = &result {
            self.form.error = Some(e.to_string());
        }
        result
    }

    async fn parse_form(&mut self) -> Result<(), FormError> {
        if !self.method.permits_body() {
            return Err(FormError::MissingFormBody(self.method.to_string()));
        }

        match self.content_type.as_str() {
            "application/x-www-form-urlencoded" => {
                let data = self.body.read_to_end().await?;
                self.form.values = parse_query(&String::from_utf8_lossy(&data));
                Ok(())
            }
            "multipart/form-data" => {
                if self.boundary.is_empty() {
                    return Err(FormError::MissingBoundary);
                }
                let form = MultipartReader::new(&mut self.body, &self.boundary)
                    .read_form(&self.limits)
                    .await?;
                self.form.values = form.value.clone();
                self.form.multipart = Some(form);
                Ok(())
            }
            other => Err(FormError::UnsupportedFormType(other.to_string())),
        }
    }

    /// Ends the request iteration: releases temp files and drains the
    /// unread body.
    ///
    /// Returns `false` when the connection cannot be reused because the
    /// client is still waiting for `100 Continue`.
    pub(crate) async fn finish(&mut self) -> io::Result<bool> {
        if let Some(form) = self.form.multipart.as_mut() {
            form.remove_all();
        }
        if self.body.continue_pending() {
            return Ok(false);
        }
        self.body.discard().await?;
        Ok(true)
    }
}

/// Parses `Cookie` header lines of the form `a=1; b=2`.
fn parse_cookies(lines: &[String]) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for line in lines {
        for pair in line.trim().split(';') {
            if let Some((key, value)) = pair.split_once('=') {
                cookies.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_from_several_lines() {
        let lines = vec![
            "uuid=12314753; tid=1BDB9E9; HOME=1".to_string(),
            "lang = en ; junk".to_string(),
        ];
        let cookies = parse_cookies(&lines);
        assert_eq!(cookies.get("uuid").unwrap(), "12314753");
        assert_eq!(cookies.get("tid").unwrap(), "1BDB9E9");
        assert_eq!(cookies.get("HOME").unwrap(), "1");
        assert_eq!(cookies.get("lang").unwrap(), "en");
        assert!(!cookies.contains_key("junk"));
    }

    #[test]
    fn version_ordering() {
        assert!(Version::HTTP_10.is_pre_http11());
        assert!(!Version::HTTP_11.is_pre_http11());
        assert!(!Version { major: 2, minor: 0 }.is_pre_http11());
        assert_eq!(Version::parse("HTTP/1.1"), Some(Version::HTTP_11));
        assert_eq!(Version::parse("HTTP/x.1"), None);
        assert_eq!(Version::parse("FTP/1.1"), None);
    }
}
