// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backend response → client response.

use reqwest::header::TRANSFER_ENCODING;

use super::ProxyResponse;

/// Copy status and headers verbatim and stream the body through unbuffered.
///
/// `transfer-encoding` is dropped: the body is re-framed by the inbound
/// connection and a stale `chunked` would corrupt it.  If the client goes
/// away the server drops the body, which drops the backend stream with it.
pub fn relay(response: reqwest::Response) -> ProxyResponse {
    let status = response.status().as_u16();
    let mut headers = response.headers().clone();
    headers.remove(TRANSFER_ENCODING);

    ProxyResponse {
        status,
        headers,
        body: reqwest::Body::wrap_stream(response.bytes_stream()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn backend_response(builder: hyper::http::response::Builder, body: &'static str) -> reqwest::Response {
        reqwest::Response::from(builder.body(body).unwrap())
    }

    #[tokio::test]
    async fn test_relay_copies_status_headers_and_body() {
        let response = backend_response(
            hyper::Response::builder()
                .status(302)
                .header("location", "https://gis.example.com/login")
                .header("content-type", "application/json")
                .header("x-custom", "kept"),
            r#"{"ok":true}"#,
        );

        let relayed = relay(response);

        assert_eq!(relayed.status, 302);
        assert_eq!(relayed.headers.get("location").unwrap(), "https://gis.example.com/login");
        assert_eq!(relayed.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(relayed.headers.get("x-custom").unwrap(), "kept");

        let body = relayed.body.collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_relay_strips_transfer_encoding() {
        for value in ["chunked", "gzip, chunked", "identity"] {
            let response = backend_response(
                hyper::Response::builder()
                    .status(200)
                    .header("transfer-encoding", value),
                "payload",
            );

            let relayed = relay(response);
            assert!(relayed.headers.get("transfer-encoding").is_none());
        }
    }
}
