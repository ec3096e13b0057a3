//! Streaming `multipart/form-data` decoding.
//!
//! ```text
//! --boundary\r\n
//! Content-Disposition: form-data; name="field"\r\n
//! \r\n
//! value\r\n
//! --boundary\r\n
//! Content-Disposition: form-data; name="upload"; filename="x.txt"\r\n
//! \r\n
//! file contents\r\n
//! --boundary--\r\n
//! ```
//!
//! Parts are located with a sliding window: the decoder peeks a fixed
//! window of the body and only hands out bytes that cannot be the start of
//! the next delimiter. `read_form` materializes a whole form, keeping small
//! files in memory and spooling large ones to temp files.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::http::body::Body;
use crate::http::error::FormError;
use crate::http::header::Header;
use crate::http::parser::read_header;
use crate::http::reader::{self, BufferedSource};

/// Size of the look-ahead window used to find delimiters.
pub const WINDOW_SIZE: usize = 4096;

/// Default memory budget for all text fields of a form.
pub const DEFAULT_MAX_TEXT_MEMORY: u64 = 10 << 20;

/// Default memory budget for file contents before they spill to disk.
pub const DEFAULT_MAX_FILE_MEMORY: u64 = 30 << 20;

/// Memory limits applied by [`MultipartReader::read_form`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormLimits {
    /// Text fields beyond this many bytes in total fail the form.
    pub max_text_memory: u64,
    /// File bytes kept in memory; a file that does not fit is spooled.
    pub max_file_memory: u64,
    /// Directory for spooled files; the system temp dir when unset.
    pub spool_dir: Option<PathBuf>,
}

impl Default for FormLimits {
    fn default() -> Self {
        Self {
            max_text_memory: DEFAULT_MAX_TEXT_MEMORY,
            max_file_memory: DEFAULT_MAX_FILE_MEMORY,
            spool_dir: None,
        }
    }
}

/// A fixed-size look-ahead buffer over a request body.
struct Lookahead<'b, 'c> {
    body: &'b mut Body<'c>,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    eof: bool,
}

impl<'b, 'c> Lookahead<'b, 'c> {
    fn new(body: &'b mut Body<'c>) -> Self {
        Self {
            body,
            buf: vec![0; WINDOW_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
        }
    }

    fn buffered(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Reads once from the body into the free tail of the buffer.
    async fn fill(&mut self) -> io::Result<usize> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.eof || self.end == self.buf.len() {
            return Ok(0);
        }
        let n = self.body.read(&mut self.buf[self.end..]).await?;
        if n == 0 {
            self.eof = true;
        }
        self.end += n;
        Ok(n)
    }

    /// Buffers a full window, or everything that is left of the body.
    async fn peek_window(&mut self) -> io::Result<()> {
        while self.end - self.start < self.buf.len() && !self.eof {
            self.fill().await?;
        }
        Ok(())
    }
}

impl BufferedSource for Lookahead<'_, '_> {
    async fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.start == self.end {
            self.fill().await?;
        }
        Ok(self.buffered())
    }

    fn consume(&mut self, amt: usize) {
        self.start = (self.start + amt).min(self.end);
    }
}

#[derive(Debug, Default)]
struct PartState {
    /// Bytes left in the part once its end has been located.
    limit: Option<usize>,
    closed: bool,
}

/// Splits a multipart body into parts.
///
/// A [`Part`] borrows the reader mutably, so only one part can be read at a
/// time; asking for the next part drains whatever the current one left.
pub struct MultipartReader<'b, 'c> {
    input: Lookahead<'b, 'c>,
    /// `--boundary`
    dash_boundary: Vec<u8>,
    /// `--boundary--`
    dash_boundary_dash: Vec<u8>,
    /// `\r\n--boundary`
    crlf_dash_boundary: Vec<u8>,
    current: Option<PartState>,
    finished: bool,
}

impl<'b, 'c> MultipartReader<'b, 'c> {
    pub fn new(body: &'b mut Body<'c>, boundary: &str) -> Self {
        let crlf_dash_boundary = format!("\r\n--{boundary}").into_bytes();
        let dash_boundary = crlf_dash_boundary[2..].to_vec();
        let mut dash_boundary_dash = dash_boundary.clone();
        dash_boundary_dash.extend_from_slice(b"--");

        Self {
            input: Lookahead::new(body),
            dash_boundary,
            dash_boundary_dash,
            crlf_dash_boundary,
            current: None,
            finished: false,
        }
    }

    /// Advances to the next part. Returns `None` after the closing
    /// delimiter.
    pub async fn next_part(&mut self) -> Result<Option<Part<'_, 'b, 'c>>, FormError> {
        if self.finished {
            return Ok(None);
        }

        if self.current.is_some() {
            self.close_current().await?;
            self.current = None;

            // The CRLF in front of a delimiter belongs to the delimiter.
            let line = reader::read_line(&mut self.input)
                .await?
                .ok_or(FormError::UnexpectedEnd)?;
            if !line.is_empty() {
                return Err(self.mismatch(&line));
            }
        }

        let line = reader::read_line(&mut self.input)
            .await?
            .ok_or(FormError::UnexpectedEnd)?;
        if line == self.dash_boundary_dash {
            self.finished = true;
            return Ok(None);
        }
        if line != self.dash_boundary {
            return Err(self.mismatch(&line));
        }

        let header = read_header(&mut self.input).await?;
        self.current = Some(PartState::default());
        Ok(Some(Part::new(self, header)))
    }

    fn mismatch(&self, got: &[u8]) -> FormError {
        FormError::DelimiterMismatch {
            expected: String::from_utf8_lossy(&self.dash_boundary).into_owned(),
            got: String::from_utf8_lossy(got).into_owned(),
        }
    }

    async fn read_current(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let Some(state) = self.current.as_mut() else {
                return Ok(0);
            };
            if state.closed || buf.is_empty() {
                return Ok(0);
            }

            if let Some(limit) = state.limit {
                if limit == 0 {
                    return Ok(0);
                }
                let want = buf.len().min(limit);
                let n = reader::read_some(&mut self.input, &mut buf[..want]).await?;
                if n == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                if let Some(state) = self.current.as_mut() {
                    state.limit = Some(limit - n);
                }
                return Ok(n);
            }

            self.input.peek_window().await?;
            let window = self.input.buffered();

            let end = match find(window, &self.crlf_dash_boundary) {
                Some(index) => Some(index),
                // Truncated body: whatever is left belongs to this part.
                None if self.input.eof => Some(window.len()),
                None => None,
            };
            if let Some(end) = end {
                if let Some(state) = self.current.as_mut() {
                    state.limit = Some(end);
                }
                continue;
            }

            // Keep enough bytes back to match a delimiter that starts near
            // the end of the window.
            let safe = WINDOW_SIZE
                .saturating_sub(self.crlf_dash_boundary.len() - 1)
                .max(1);
            let n = buf.len().min(safe).min(window.len());
            buf[..n].copy_from_slice(&window[..n]);
            self.input.consume(n);
            return Ok(n);
        }
    }

    async fn close_current(&mut self) -> io::Result<()> {
        match &self.current {
            Some(state) if !state.closed => {}
            _ => return Ok(()),
        }

        let mut scratch = [0u8; 4096];
        while self.read_current(&mut scratch).await? > 0 {}

        if let Some(state) = self.current.as_mut() {
            state.closed = true;
        }
        Ok(())
    }

    /// Reads every part into a [`MultipartForm`].
    ///
    /// Text fields share `limits.max_text_memory`; exceeding it fails with
    /// [`FormError::MessageTooLarge`]. Files share `limits.max_file_memory`;
    /// a file that does not fit is written to a temp file. On error every
    /// temp file created so far is removed.
    pub async fn read_form(&mut self, limits: &FormLimits) -> Result<MultipartForm, FormError> {
        let mut form = MultipartForm::default();
        match self.fill_form(&mut form, limits).await {
            Ok(()) => Ok(form),
            Err(e) => {
                form.remove_all();
                Err(e)
            }
        }
    }

    async fn fill_form(&mut self, form: &mut MultipartForm, limits: &FormLimits) -> Result<(), FormError> {
        let mut text_budget = limits.max_text_memory;
        let mut file_budget = limits.max_file_memory;

        while let Some(mut part) = self.next_part().await? {
            if part.form_name().is_empty() && part.file_name().is_empty() {
                continue;
            }
            let name = part.form_name().to_string();
            let mut buf = Vec::new();

            if part.file_name().is_empty() {
                let n = part.copy_to(&mut buf, text_budget.saturating_add(1)).await?;
                if n > text_budget {
                    return Err(FormError::MessageTooLarge);
                }
                text_budget -= n;
                form.value.insert(name, String::from_utf8_lossy(&buf).into_owned());
                continue;
            }

            let n = part.copy_to(&mut buf, file_budget.saturating_add(1)).await?;
            let (size, storage) = if n <= file_budget {
                file_budget -= n;
                (n, FileStorage::Memory(Bytes::from(buf)))
            } else {
                let (path, size) = spool_to_disk(&mut part, &buf, limits.spool_dir.as_deref()).await?;
                tracing::debug!(field = %name, path = %path.display(), size, "spooled multipart file to disk");
                (size, FileStorage::Disk(path))
            };

            let file = FileHeader {
                filename: part.file_name().to_string(),
                header: part.header.clone(),
                size,
                storage,
            };
            form.insert_file(name, file);
        }

        Ok(())
    }
}

/// One part of a multipart body.
pub struct Part<'m, 'b, 'c> {
    reader: &'m mut MultipartReader<'b, 'c>,
    pub header: Header,
    form_name: String,
    file_name: String,
}

impl<'m, 'b, 'c> Part<'m, 'b, 'c> {
    fn new(reader: &'m mut MultipartReader<'b, 'c>, header: Header) -> Self {
        let (form_name, file_name) = parse_disposition(header.get("Content-Disposition").unwrap_or_default());
        Self {
            reader,
            header,
            form_name,
            file_name,
        }
    }

    /// The `name` parameter of `Content-Disposition`.
    pub fn form_name(&self) -> &str {
        &self.form_name
    }

    /// The `filename` parameter of `Content-Disposition`; empty for text
    /// fields.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn is_closed(&self) -> bool {
        self.reader.current.as_ref().is_none_or(|s| s.closed)
    }

    /// Reads part content. Returns 0 at the end of the part.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_current(buf).await
    }

    /// Drains the rest of the part. Closing twice is a no-op.
    pub async fn close(&mut self) -> io::Result<()> {
        self.reader.close_current().await
    }

    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_to(&mut out, u64::MAX).await?;
        Ok(out)
    }

    /// Appends up to `limit` bytes of the part to `dst`.
    async fn copy_to(&mut self, dst: &mut Vec<u8>, limit: u64) -> io::Result<u64> {
        let mut copied = 0u64;
        let mut buf = [0u8; 4096];
        while copied < limit {
            let want = buf.len().min(usize::try_from(limit - copied).unwrap_or(usize::MAX));
            let n = self.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            dst.extend_from_slice(&buf[..n]);
            copied += n as u64;
        }
        Ok(copied)
    }
}

/// Extracts `name` and `filename` from a `form-data` disposition.
fn parse_disposition(value: &str) -> (String, String) {
    let mut name = String::new();
    let mut file_name = String::new();

    let mut params = value.split(';');
    let is_form_data = params
        .next()
        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("form-data"));
    if !is_form_data {
        return (name, file_name);
    }

    for param in params {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"').to_string();
        match key.trim() {
            "name" => name = val,
            "filename" => file_name = val,
            _ => {}
        }
    }
    (name, file_name)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn spool_to_disk(
    part: &mut Part<'_, '_, '_>,
    prefix: &[u8],
    dir: Option<&Path>,
) -> io::Result<(PathBuf, u64)> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("multipart-");
    let temp = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    let (file, path) = temp.keep().map_err(io::Error::from)?;
    let mut file = tokio::fs::File::from_std(file);

    match copy_into(part, prefix, &mut file).await {
        Ok(size) => Ok((path, size)),
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            Err(e)
        }
    }
}

async fn copy_into(part: &mut Part<'_, '_, '_>, prefix: &[u8], file: &mut tokio::fs::File) -> io::Result<u64> {
    file.write_all(prefix).await?;
    let mut total = prefix.len() as u64;
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = part.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    file.flush().await?;
    Ok(total)
}

/// Where the content of an uploaded file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStorage {
    Memory(Bytes),
    /// A temp file owned by the form it came from.
    Disk(PathBuf),
}

/// An uploaded file.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub filename: String,
    pub header: Header,
    pub size: u64,
    storage: FileStorage,
}

impl FileHeader {
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.storage, FileStorage::Disk(_))
    }

    /// Opens the file content for reading.
    pub async fn open(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        match &self.storage {
            FileStorage::Memory(content) => Ok(Box::new(io::Cursor::new(content.clone()))),
            FileStorage::Disk(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
        }
    }

    /// Copies the content to `dest`. A partially written `dest` is removed.
    pub async fn save(&self, dest: impl AsRef<Path>) -> io::Result<()> {
        let dest = dest.as_ref();
        let mut src = self.open().await?;
        let mut file = tokio::fs::File::create(dest).await?;

        let copied = async {
            tokio::io::copy(&mut src, &mut file).await?;
            file.flush().await
        }
        .await;
        if copied.is_err() {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
        }
        copied
    }

    fn remove_temp_file(&self) {
        let FileStorage::Disk(path) = &self.storage else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => tracing::trace!(path = %path.display(), "removed multipart temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove multipart temp file"),
        }
    }
}

/// A parsed multipart form.
///
/// The form owns the temp files of its spooled uploads. They are removed by
/// [`MultipartForm::remove_all`], which is safe to call more than once, and
/// at the latest when the form is dropped.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub value: HashMap<String, String>,
    pub file: HashMap<String, FileHeader>,
}

impl MultipartForm {
    /// Records `file` under `name`; a replaced upload loses its temp file.
    fn insert_file(&mut self, name: String, file: FileHeader) {
        if let Some(previous) = self.file.insert(name, file) {
            previous.remove_temp_file();
        }
    }

    pub fn remove_all(&mut self) {
        for file in self.file.values() {
            file.remove_temp_file();
        }
    }
}

impl Drop for MultipartForm {
    fn drop(&mut self) {
        self.remove_all();
    }
}
