//! Response rewriting: token-relay script injection.
//!
//! # Responsibilities
//! - Decide whether an upstream response is eligible for injection (HTML only)
//! - Buffer eligible bodies and splice the token-relay script before the
//!   first closing head or body tag
//! - Reconstruct the response with status and headers intact
//!
//! # Design Decisions
//! - Literal first-match substring search, not an HTML parser. A `</head>`
//!   inside a comment or script string wins if it comes first; the behavior
//!   is kept deliberately in favor of predictability
//! - Single pass, no dedup: rewriting an already-injected body adds a second
//!   copy of the script
//! - Non-HTML responses pass through untouched, body unread

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderValue, Response};
use thiserror::Error;

/// The exact tag spliced into HTML bodies. The script persists the `token`
/// query parameter across page loads and exposes `window.getMoltbotToken()`
/// for the panel's WebSocket client.
const TOKEN_RELAY_TAG: &str = concat!(
    "<script>\n",
    include_str!("token_relay.js"),
    "</script>"
);

/// Errors reading or decoding an upstream body.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The body stream failed mid-read (e.g., upstream reset the connection).
    #[error("failed to read upstream body: {0}")]
    BodyRead(axum::Error),

    /// The body was not valid UTF-8.
    #[error("upstream body is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Which of the three rewrite paths a response took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Non-HTML content type; the response passed through untouched.
    Skipped,
    /// HTML without a closing head or body tag; body kept as-is.
    NoAnchor,
    /// Script spliced before the first closing tag.
    Injected,
}

impl RewriteOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            RewriteOutcome::Skipped => "skipped",
            RewriteOutcome::NoAnchor => "no_anchor",
            RewriteOutcome::Injected => "injected",
        }
    }
}

/// Rewrite an upstream response, injecting the token-relay script into HTML.
///
/// Non-HTML responses (judged by the `content-type` header containing
/// `text/html`; a missing header counts as non-HTML) are returned unchanged
/// without touching the body. HTML responses are buffered in full, spliced at
/// the first `</head>` (falling back to the first `</body>`), and rebuilt
/// with the original status and headers. HTML without either tag is rebuilt
/// with its body unmodified.
pub async fn rewrite(
    response: Response<Body>,
) -> Result<(Response<Body>, RewriteOutcome), RewriteError> {
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.contains("text/html") {
        return Ok((response, RewriteOutcome::Skipped));
    }

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(RewriteError::BodyRead)?;
    let html = String::from_utf8(bytes.to_vec())?;

    let (body, outcome) = match inject_token_relay(&html) {
        Some(injected) => (injected, RewriteOutcome::Injected),
        None => (html, RewriteOutcome::NoAnchor),
    };

    // The body is materialized now; framing headers must describe it, not
    // the upstream's original stream.
    parts.headers.remove(header::TRANSFER_ENCODING);
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));

    Ok((Response::from_parts(parts, Body::from(body)), outcome))
}

/// Splice the token-relay script before the first `</head>`, falling back to
/// the first `</body>`. Returns `None` when neither tag is present.
fn inject_token_relay(html: &str) -> Option<String> {
    let pos = html.find("</head>").or_else(|| html.find("</body>"))?;

    let mut out = String::with_capacity(html.len() + TOKEN_RELAY_TAG.len() + 1);
    out.push_str(&html[..pos]);
    out.push_str(TOKEN_RELAY_TAG);
    out.push('\n');
    out.push_str(&html[pos..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    const ACCESSOR: &str = "window.getMoltbotToken";

    fn html_response(body: &str) -> Response<Body> {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn json_passes_through() {
        let input = r#"{"test":"data"}"#;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(input))
            .unwrap();

        let (out, outcome) = rewrite(response).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::Skipped);

        let body = body_text(out).await;
        assert_eq!(body, input);
        assert!(!body.contains(ACCESSOR));
    }

    #[tokio::test]
    async fn missing_content_type_passes_through() {
        let input = "<html><head></head><body></body></html>";
        let response = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(input))
            .unwrap();

        let (out, outcome) = rewrite(response).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::Skipped);
        assert_eq!(body_text(out).await, input);
    }

    #[tokio::test]
    async fn injects_before_closing_head() {
        let input = "<html><head><title>Test</title></head><body>Content</body></html>";
        let (out, outcome) = rewrite(html_response(input)).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::Injected);

        let body = body_text(out).await;
        let script_at = body.find(ACCESSOR).expect("script should be present");
        let head_at = body.find("</head>").expect("head tag should survive");
        assert!(script_at < head_at, "script must precede </head>");
        assert!(body.ends_with("<body>Content</body></html>"));
    }

    #[tokio::test]
    async fn charset_suffix_still_counts_as_html() {
        let input = "<html><head></head></html>";
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Body::from(input))
            .unwrap();

        let (_, outcome) = rewrite(response).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::Injected);
    }

    #[tokio::test]
    async fn falls_back_to_closing_body() {
        let input = "<html><body>Content</body></html>";
        let (out, outcome) = rewrite(html_response(input)).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::Injected);

        let body = body_text(out).await;
        let script_at = body.find(ACCESSOR).unwrap();
        let anchor_at = body.find("</body>").unwrap();
        assert!(script_at < anchor_at, "script must precede </body>");
    }

    #[tokio::test]
    async fn only_first_occurrence_anchors() {
        let input = "<head></head><template></head></template>";
        let (out, _) = rewrite(html_response(input)).await.unwrap();

        let expected = format!(
            "<head>{}\n</head><template></head></template>",
            TOKEN_RELAY_TAG
        );
        assert_eq!(body_text(out).await, expected);
    }

    #[tokio::test]
    async fn head_wins_over_earlier_body_fallback() {
        // </body> appears first, but </head> is still the preferred anchor.
        let input = "</body><html><head></head></html>";
        let (out, _) = rewrite(html_response(input)).await.unwrap();

        let body = body_text(out).await;
        assert!(body.starts_with("</body><html><head><script>"));
    }

    #[tokio::test]
    async fn no_anchor_keeps_body_intact() {
        let input = "<p>plain fragment with no closing tags</p>";
        let (out, outcome) = rewrite(html_response(input)).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::NoAnchor);

        let body = body_text(out).await;
        assert_eq!(body, input);
        assert!(!body.contains(ACCESSOR));
    }

    #[tokio::test]
    async fn status_and_headers_survive_injection() {
        let input = "<html><head></head></html>";
        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(header::CONTENT_TYPE, "text/html")
            .header("x-upstream", "panel-7")
            .header(header::SET_COOKIE, "a=1")
            .header(header::SET_COOKIE, "b=2")
            .body(Body::from(input))
            .unwrap();

        let (out, _) = rewrite(response).await.unwrap();
        assert_eq!(out.status(), StatusCode::NOT_FOUND);
        assert_eq!(out.headers().get("x-upstream").unwrap(), "panel-7");

        let cookies: Vec<_> = out.headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn rerunning_injects_a_second_copy() {
        // Single-pass by design: no dedup on already-injected bodies.
        let input = "<html><head></head></html>";
        let (once, _) = rewrite(html_response(input)).await.unwrap();
        let html = body_text(once).await;

        let (twice, outcome) = rewrite(html_response(&html)).await.unwrap();
        assert_eq!(outcome, RewriteOutcome::Injected);

        let body = body_text(twice).await;
        assert_eq!(body.matches(ACCESSOR).count(), 2);
    }

    #[tokio::test]
    async fn invalid_utf8_surfaces_as_encoding_error() {
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .body(Body::from(vec![0xff, 0xfe, 0xfd]))
            .unwrap();

        let err = rewrite(response).await.expect_err("bad UTF-8 should fail");
        assert!(matches!(err, RewriteError::Encoding(_)));
    }
}
