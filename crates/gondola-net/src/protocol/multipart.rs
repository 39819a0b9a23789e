//! Minimal `multipart/mixed` reader.
//!
//! The update protocol only needs named parts with small JSON payloads,
//! so this parses the body by hand against the boundary instead of
//! pulling in a full multipart stack.

use crate::ProtocolError;

/// One decoded body part.
#[derive(Clone, Debug)]
pub struct Part {
    /// `name` parameter of the part's `content-disposition` header.
    pub name: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Extract the `boundary` parameter from a `multipart/*` content type.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.eq_ignore_ascii_case("boundary") {
            return None;
        }
        Some(value.trim().trim_matches('"').to_string())
    })
}

fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn strip_crlf(mut chunk: &[u8]) -> &[u8] {
    if chunk.starts_with(b"\r\n") {
        chunk = &chunk[2..];
    }
    if chunk.ends_with(b"\r\n") {
        chunk = &chunk[..chunk.len() - 2];
    }
    chunk
}

fn parse_part(chunk: &[u8]) -> Result<Part, ProtocolError> {
    let header_end = find_subsequence(chunk, b"\r\n\r\n", 0)
        .ok_or_else(|| ProtocolError::MalformedBody("part without header terminator".into()))?;
    let header_bytes = &chunk[..header_end];
    let body = chunk[header_end + 4..].to_vec();

    let headers = std::str::from_utf8(header_bytes)
        .map_err(|_| ProtocolError::MalformedBody("non-utf8 part headers".into()))?;

    let mut name = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "content-disposition" => {
                name = value.split(';').find_map(|param| {
                    let (k, v) = param.trim().split_once('=')?;
                    (k.trim() == "name").then(|| v.trim().trim_matches('"').to_string())
                });
            }
            "content-type" => content_type = Some(value.to_string()),
            _ => {}
        }
    }

    let name =
        name.ok_or_else(|| ProtocolError::MalformedBody("part without a name parameter".into()))?;

    Ok(Part {
        name,
        content_type,
        body,
    })
}

/// Split a multipart body into its named parts.
///
/// Preamble before the first boundary and epilogue after the closing
/// `--boundary--` are discarded, per RFC 2046.
pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<Part>, ProtocolError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut parts = Vec::new();

    let Some(mut pos) = find_subsequence(body, &delimiter, 0) else {
        return Err(ProtocolError::MalformedBody("boundary not found".into()));
    };

    loop {
        let chunk_start = pos + delimiter.len();
        // Closing delimiter ends the body.
        if body[chunk_start..].starts_with(b"--") {
            break;
        }
        let Some(next) = find_subsequence(body, &delimiter, chunk_start) else {
            return Err(ProtocolError::MalformedBody(
                "missing closing boundary".into(),
            ));
        };
        let chunk = strip_crlf(&body[chunk_start..next]);
        if !chunk.is_empty() {
            parts.push(parse_part(chunk)?);
        }
        pos = next;
    }

    Ok(parts)
}
