//! Content-type sniffing for responses that do not declare one.
//!
//! Only the first 512 bytes are inspected. The checks are a small subset of
//! the WHATWG MIME sniffing signatures: markup, a handful of image, archive
//! and document magic numbers, and a text/binary fallback.

/// Number of leading bytes considered by [`detect_content_type`].
pub const SNIFF_LEN: usize = 512;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", TEXT_PLAIN),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"BM", "image/bmp"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    (b"\x00\x61\x73\x6D", "application/wasm"),
];

/// Guesses the media type of `data`. Always returns a valid MIME type,
/// falling back to `application/octet-stream`.
///
/// ```
/// # use httpd::http::mime::detect_content_type;
/// assert_eq!(detect_content_type(b"<html><body>hi"), "text/html; charset=utf-8");
/// assert_eq!(detect_content_type(b"plain words"), "text/plain; charset=utf-8");
/// assert_eq!(detect_content_type(b"\x00\x01\x02"), "application/octet-stream");
/// ```
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let trimmed = skip_whitespace(data);
    if HTML_TAGS.iter().any(|tag| matches_html_tag(trimmed, tag)) {
        return "text/html; charset=utf-8";
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    for &(magic, mime) in SIGNATURES {
        if data.starts_with(magic) {
            return mime;
        }
    }
    if data.len() >= 14 && &data[..4] == b"RIFF" && &data[8..14] == b"WEBPVP" {
        return "image/webp";
    }

    if data.iter().any(|&b| is_binary(b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|&b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

/// A tag matches case-insensitively and must be followed by a space or `>`.
fn matches_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() <= tag.len() {
        return false;
    }
    if !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_after_leading_whitespace() {
        assert_eq!(
            detect_content_type(b"\r\n  <!DOCTYPE html>\n<html>"),
            "text/html; charset=utf-8"
        );
        assert_eq!(detect_content_type(b"<p>para</p>"), "text/html; charset=utf-8");
    }

    #[test]
    fn tag_must_be_terminated() {
        // "<abbr" is not "<a"
        assert_eq!(detect_content_type(b"<abbr>"), TEXT_PLAIN);
    }

    #[test]
    fn magic_numbers() {
        assert_eq!(detect_content_type(b"%PDF-1.7"), "application/pdf");
        assert_eq!(detect_content_type(b"\x89PNG\r\n\x1a\n\0\0"), "image/png");
        assert_eq!(detect_content_type(b"GIF89a...."), "image/gif");
        assert_eq!(detect_content_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(detect_content_type(b"\x1f\x8b\x08\0"), "application/x-gzip");
    }

    #[test]
    fn empty_is_text() {
        assert_eq!(detect_content_type(b""), TEXT_PLAIN);
    }

    #[test]
    fn only_first_512_bytes_are_inspected() {
        let mut data = vec![b'a'; SNIFF_LEN];
        data.push(0);
        assert_eq!(detect_content_type(&data), TEXT_PLAIN);
    }
}
