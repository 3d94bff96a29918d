//! HTTP response parsing for WARC `response` blocks.

use std::io::Read;

use bytes::Bytes;
use ccfetch_core::{CoreError, CoreResult};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

/// Status line, headers and raw body of an archived HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body exactly as archived (possibly chunked and/or compressed).
    pub body: Bytes,
}

impl HttpResponse {
    /// Splits a response block into head and body.
    pub fn parse(block: &Bytes) -> CoreResult<Self> {
        let (head_end, body_start) = find_head_end(block).ok_or_else(|| {
            CoreError::MalformedContainer("HTTP response head has no terminating blank line".into())
        })?;

        let head = String::from_utf8_lossy(&block[..head_end]);
        let mut lines = head.lines();

        let status_line = lines.next().unwrap_or_default();
        let status = parse_status_line(status_line).ok_or_else(|| {
            CoreError::MalformedContainer(format!("invalid HTTP status line: {status_line:?}"))
        })?;

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            status,
            headers,
            body: block.slice(body_start..),
        })
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Body with transfer and content encodings removed.
    ///
    /// Each decoding step falls back to its input when the data does not
    /// decode, so a mislabelled body is returned as archived.
    pub fn decoded_body(&self) -> Bytes {
        let mut body = self.body.clone();

        let chunked = self
            .header("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
        if chunked {
            if let Some(dechunked) = dechunk(&body) {
                body = dechunked;
            }
        }

        match self
            .header("content-encoding")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("gzip") | Some("x-gzip") => inflate(MultiGzDecoder::new(&body[..])).unwrap_or(body),
            Some("deflate") => inflate(ZlibDecoder::new(&body[..]))
                .or_else(|| inflate(DeflateDecoder::new(&body[..])))
                .unwrap_or(body),
            _ => body,
        }
    }
}

fn find_head_end(block: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = block.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    block
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn inflate<R: Read>(mut decoder: R) -> Option<Bytes> {
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(Bytes::from(out))
}

/// Removes chunked transfer framing. `None` if the framing is broken.
fn dechunk(body: &[u8]) -> Option<Bytes> {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;

    loop {
        let line_end = rest.windows(2).position(|w| w == b"\r\n")?;
        let size_line = std::str::from_utf8(&rest[..line_end]).ok()?;
        let size_hex = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        rest = &rest[line_end + 2..];

        if size == 0 {
            return Some(Bytes::from(out));
        }
        if rest.len() < size {
            return None;
        }
        out.extend_from_slice(&rest[..size]);
        rest = rest[size..].strip_prefix(b"\r\n")?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn response(head: &str, body: &[u8]) -> Bytes {
        let mut block = head.as_bytes().to_vec();
        block.extend_from_slice(b"\r\n\r\n");
        block.extend_from_slice(body);
        Bytes::from(block)
    }

    #[test]
    fn test_parse_head() {
        let block = response(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nServer: nginx",
            b"<html>hi</html>",
        );
        let parsed = HttpResponse::parse(&block).unwrap();
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(parsed.header("SERVER"), Some("nginx"));
        assert_eq!(&parsed.body[..], b"<html>hi</html>");
    }

    #[test]
    fn test_bare_newlines_accepted() {
        let block = Bytes::from_static(b"HTTP/1.0 404 Not Found\nContent-Type: text/plain\n\nmissing");
        let parsed = HttpResponse::parse(&block).unwrap();
        assert_eq!(parsed.status, 404);
        assert_eq!(&parsed.body[..], b"missing");
    }

    #[test]
    fn test_malformed_head() {
        assert!(HttpResponse::parse(&Bytes::from_static(b"no blank line here")).is_err());
        assert!(HttpResponse::parse(&Bytes::from_static(b"garbage\r\n\r\nbody")).is_err());
    }

    #[test]
    fn test_chunked_body() {
        let block = response(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked",
            b"5\r\nhello\r\n7;ext=1\r\n, world\r\n0\r\n\r\n",
        );
        let parsed = HttpResponse::parse(&block).unwrap();
        assert_eq!(&parsed.decoded_body()[..], b"hello, world");
    }

    #[test]
    fn test_broken_chunking_falls_back() {
        let block = response("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked", b"zz\r\nnot chunked");
        let parsed = HttpResponse::parse(&block).unwrap();
        assert_eq!(&parsed.decoded_body()[..], b"zz\r\nnot chunked");
    }

    #[test]
    fn test_gzip_content_encoding() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"<p>compressed</p>").unwrap();
        let gz = encoder.finish().unwrap();

        let block = response("HTTP/1.1 200 OK\r\nContent-Encoding: gzip", &gz);
        let parsed = HttpResponse::parse(&block).unwrap();
        assert_eq!(&parsed.decoded_body()[..], b"<p>compressed</p>");
    }

    #[test]
    fn test_deflate_content_encoding() {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"zlib wrapped").unwrap();
        let zlib = encoder.finish().unwrap();

        let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"raw deflate").unwrap();
        let raw = encoder.finish().unwrap();

        let wrapped = HttpResponse::parse(&response("HTTP/1.1 200 OK\r\nContent-Encoding: deflate", &zlib)).unwrap();
        assert_eq!(&wrapped.decoded_body()[..], b"zlib wrapped");

        let bare = HttpResponse::parse(&response("HTTP/1.1 200 OK\r\nContent-Encoding: deflate", &raw)).unwrap();
        assert_eq!(&bare.decoded_body()[..], b"raw deflate");
    }

    #[test]
    fn test_mislabelled_gzip_returns_raw() {
        let block = response("HTTP/1.1 200 OK\r\nContent-Encoding: gzip", b"<html>plain</html>");
        let parsed = HttpResponse::parse(&block).unwrap();
        assert_eq!(&parsed.decoded_body()[..], b"<html>plain</html>");
    }
}
