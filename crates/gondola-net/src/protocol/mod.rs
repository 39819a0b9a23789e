//! Update server wire protocol.
//!
//! A check/fetch request gets back one response that may carry a
//! `manifest` part, a `directive` part, both, or neither, as
//! `multipart/mixed` (a bare JSON body is accepted as a lone manifest).
//! Response headers carry the server's manifest filters and the headers
//! the client must echo on its next request.

mod directive;
mod filters;
mod manifest;
mod multipart;

use std::collections::BTreeMap;

pub use directive::UpdateDirective;
pub use filters::parse_manifest_filters;
pub use manifest::{ManifestAsset, UpdateManifest};
pub use multipart::{boundary_from_content_type, parse_multipart, Part};

use crate::{HttpResponse, ProtocolError};

/// Response header listing the server's manifest filters.
pub const MANIFEST_FILTERS_HEADER: &str = "expo-manifest-filters";
/// Response header with a dictionary the client echoes on future requests.
pub const SERVER_DEFINED_HEADERS_HEADER: &str = "expo-server-defined-headers";

/// Decoded manifest/directive response.
#[derive(Clone, Debug, Default)]
pub struct UpdateResponse {
    pub manifest: Option<UpdateManifest>,
    pub directive: Option<UpdateDirective>,
    pub manifest_filters: BTreeMap<String, String>,
    pub server_defined_headers: Option<BTreeMap<String, String>>,
}

impl UpdateResponse {
    /// True when the server sent neither part. The engine treats this the
    /// same as an explicit `NoUpdateAvailable` directive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifest.is_none() && self.directive.is_none()
    }
}

/// Parse a completed HTTP exchange into an [`UpdateResponse`].
///
/// Unknown multipart parts are ignored. HTTP 204 and empty bodies yield an
/// empty response rather than an error.
pub fn parse_update_response(resp: &HttpResponse) -> Result<UpdateResponse, ProtocolError> {
    let mut out = UpdateResponse {
        manifest_filters: resp
            .headers
            .get(MANIFEST_FILTERS_HEADER)
            .map(parse_manifest_filters)
            .unwrap_or_default(),
        server_defined_headers: resp
            .headers
            .get(SERVER_DEFINED_HEADERS_HEADER)
            .map(parse_manifest_filters),
        ..UpdateResponse::default()
    };

    if resp.status == 204 || resp.body.is_empty() {
        return Ok(out);
    }

    let content_type = resp.content_type().unwrap_or("application/json");
    if content_type.starts_with("multipart/") {
        let boundary =
            boundary_from_content_type(content_type).ok_or(ProtocolError::MissingBoundary)?;
        for part in parse_multipart(&resp.body, &boundary)? {
            match part.name.as_str() {
                "manifest" => {
                    let value = serde_json::from_slice(&part.body)?;
                    out.manifest = Some(UpdateManifest::parse(value)?);
                }
                "directive" => {
                    let value = serde_json::from_slice(&part.body)?;
                    out.directive = Some(UpdateDirective::parse(&value)?);
                }
                other => tracing::debug!(part = other, "ignoring unknown response part"),
            }
        }
    } else {
        let value = serde_json::from_slice(&resp.body)?;
        out.manifest = Some(UpdateManifest::parse(value)?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::Headers;

    fn response(content_type: &str, body: &str, extra: &[(&str, &str)]) -> HttpResponse {
        let mut headers = Headers::new();
        headers.insert("content-type", content_type);
        for (k, v) in extra {
            headers.insert(*k, *v);
        }
        HttpResponse {
            status: 200,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    fn manifest_json() -> String {
        format!(
            r#"{{
              "id": "9e3c5d1e-6f7a-4c8b-9d0e-1f2a3b4c5d6e",
              "createdAt": "2024-03-01T12:00:00Z",
              "runtimeVersion": "1.0",
              "launchAsset": {{
                "hash": "{}",
                "url": "https://cdn.example.com/bundle.js",
                "fileExtension": ".js"
              }},
              "assets": [],
              "metadata": {{}}
            }}"#,
            "a".repeat(64)
        )
    }

    #[test]
    fn bare_json_body_is_a_manifest() {
        let resp = response("application/json", &manifest_json(), &[]);
        let parsed = parse_update_response(&resp).unwrap();
        assert!(parsed.manifest.is_some());
        assert!(parsed.directive.is_none());
    }

    #[test]
    fn empty_body_is_no_update() {
        let resp = HttpResponse {
            status: 204,
            headers: Headers::new(),
            body: Bytes::new(),
        };
        let parsed = parse_update_response(&resp).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn multipart_with_manifest_and_directive() {
        let body = format!(
            "--X\r\ncontent-disposition: form-data; name=\"manifest\"\r\ncontent-type: application/json\r\n\r\n{}\r\n--X\r\ncontent-disposition: form-data; name=\"directive\"\r\n\r\n{}\r\n--X--\r\n",
            manifest_json(),
            r#"{"type":"noUpdateAvailable"}"#
        );
        let resp = response(
            "multipart/mixed; boundary=X",
            &body,
            &[(MANIFEST_FILTERS_HEADER, "branch=main")],
        );
        let parsed = parse_update_response(&resp).unwrap();
        assert!(parsed.manifest.is_some());
        assert!(matches!(
            parsed.directive,
            Some(UpdateDirective::NoUpdateAvailable)
        ));
        assert_eq!(parsed.manifest_filters.get("branch").unwrap(), "main");
    }

    #[test]
    fn unknown_parts_are_ignored() {
        let body = "--B\r\ncontent-disposition: form-data; name=\"extensions\"\r\n\r\n{}\r\n--B--\r\n";
        let resp = response("multipart/mixed; boundary=B", body, &[]);
        let parsed = parse_update_response(&resp).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn multipart_without_boundary_is_rejected() {
        let resp = response("multipart/mixed", "--x--", &[]);
        assert!(matches!(
            parse_update_response(&resp),
            Err(ProtocolError::MissingBoundary)
        ));
    }
}
