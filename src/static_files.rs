//! Static file serving with single-page-app fallback.
//!
//! Paths that don't resolve to a file get the SPA entry document instead;
//! only when that document is missing too does the client see a 404.
//! Responses are decorated by content type:
//!
//! | Content type | Added |
//! |--------------|-------|
//! | any | `Vary: Accept-Encoding` |
//! | CSS, JavaScript, JSON | `X-Content-Type-Options: nosniff` |
//! | text-like without a charset | `; charset=utf-8` |
//! | HTML | `Content-Security-Policy` |

use axum::extract::{Request, State};
use axum::http::header::{
    HeaderMap, HeaderValue, CONTENT_SECURITY_POLICY, CONTENT_TYPE, VARY, X_CONTENT_TYPE_OPTIONS,
};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::ServerConfig;

/// Router serving `static_root`, falling back to the SPA entry document.
pub fn router(config: &ServerConfig) -> Router {
    let serve_dir =
        ServeDir::new(&config.static_root).fallback(ServeFile::new(config.spa_entry_path()));
    let csp: Arc<str> = Arc::from(config.content_security_policy.as_str());

    Router::new()
        .fallback_service(serve_dir)
        .layer(middleware::from_fn_with_state(csp, decorate))
}

async fn decorate(State(csp): State<Arc<str>>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    augment_headers(response.headers_mut(), &csp);
    response
}

/// Adds the content-type dependent headers listed in the module docs.
pub fn augment_headers(headers: &mut HeaderMap, csp: &str) {
    let Some(content_type) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));

    if is_css(&essence) || is_javascript(&essence) || is_json(&essence) {
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }

    if is_text_like(&essence) && !content_type.to_ascii_lowercase().contains("charset=") {
        let with_charset = format!("{}; charset=utf-8", content_type.trim_end_matches(';'));
        if let Ok(value) = HeaderValue::from_str(&with_charset) {
            headers.insert(CONTENT_TYPE, value);
        }
    }

    if essence == "text/html" {
        if let Ok(value) = HeaderValue::from_str(csp) {
            headers.insert(CONTENT_SECURITY_POLICY, value);
        }
    }
}

fn is_css(essence: &str) -> bool {
    essence == "text/css"
}

fn is_javascript(essence: &str) -> bool {
    matches!(
        essence,
        "text/javascript" | "application/javascript" | "application/x-javascript"
    )
}

fn is_json(essence: &str) -> bool {
    essence == "application/json" || essence.ends_with("+json")
}

fn is_text_like(essence: &str) -> bool {
    essence.starts_with("text/")
        || is_javascript(essence)
        || is_json(essence)
        || essence == "application/xml"
        || essence.ends_with("+xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSP: &str = "default-src 'self'";

    fn headers_for(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        augment_headers(&mut headers, CSP);
        headers
    }

    #[test]
    fn test_html_gets_csp_and_charset() {
        let h = headers_for("text/html");
        assert_eq!(h[CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(h[CONTENT_SECURITY_POLICY], CSP);
        assert_eq!(h[VARY], "Accept-Encoding");
        assert!(h.get(X_CONTENT_TYPE_OPTIONS).is_none());
    }

    #[test]
    fn test_script_and_style_get_nosniff() {
        for ct in ["text/css", "text/javascript", "application/json"] {
            let h = headers_for(ct);
            assert_eq!(h[X_CONTENT_TYPE_OPTIONS], "nosniff", "{}", ct);
            assert!(h.get(CONTENT_SECURITY_POLICY).is_none(), "{}", ct);
            assert_eq!(h[CONTENT_TYPE], format!("{}; charset=utf-8", ct).as_str());
        }
    }

    #[test]
    fn test_existing_charset_is_kept() {
        let h = headers_for("text/plain; charset=iso-8859-1");
        assert_eq!(h[CONTENT_TYPE], "text/plain; charset=iso-8859-1");
    }

    #[test]
    fn test_binary_only_gets_vary() {
        let h = headers_for("image/png");
        assert_eq!(h[CONTENT_TYPE], "image/png");
        assert_eq!(h[VARY], "Accept-Encoding");
        assert!(h.get(X_CONTENT_TYPE_OPTIONS).is_none());
    }

    #[test]
    fn test_svg_gets_charset() {
        let h = headers_for("image/svg+xml");
        assert_eq!(h[CONTENT_TYPE], "image/svg+xml; charset=utf-8");
    }

    #[test]
    fn test_no_content_type_untouched() {
        let mut headers = HeaderMap::new();
        augment_headers(&mut headers, CSP);
        assert!(headers.is_empty());
    }
}
