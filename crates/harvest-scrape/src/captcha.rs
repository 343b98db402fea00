//! CAPTCHA detection and the pluggable solving hook.
//!
//! Detection is pattern based: a registry of signatures (script sources,
//! marker classes, marker attributes) for known challenge families. Solving
//! is delegated to an external service through the [`CaptchaSolver`] trait
//! and is strictly best-effort; a failed or absent solver never propagates
//! an error to the fetch path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use harvest_core::error::AppError;
use scraper::{Html, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaKind {
    Recaptcha,
    Hcaptcha,
    ImageChallenge,
}

impl CaptchaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptchaKind::Recaptcha => "recaptcha",
            CaptchaKind::Hcaptcha => "hcaptcha",
            CaptchaKind::ImageChallenge => "image_challenge",
        }
    }
}

/// Metadata a solver needs, extracted from the challenge page.
#[derive(Debug, Clone)]
pub struct CaptchaInfo {
    pub kind: CaptchaKind,
    pub site_key: Option<String>,
    pub image_url: Option<String>,
    pub form_action: Option<String>,
}

struct Signature {
    kind: CaptchaKind,
    script_markers: &'static [&'static str],
    class_markers: &'static [&'static str],
    attr_markers: &'static [&'static str],
}

static SIGNATURES: &[Signature] = &[
    Signature {
        kind: CaptchaKind::Recaptcha,
        script_markers: &["google.com/recaptcha", "recaptcha/api.js", "recaptcha/enterprise.js"],
        class_markers: &["g-recaptcha"],
        attr_markers: &["data-sitekey"],
    },
    Signature {
        kind: CaptchaKind::Hcaptcha,
        script_markers: &["hcaptcha.com/1/api.js", "js.hcaptcha.com"],
        class_markers: &["h-captcha"],
        attr_markers: &["data-hcaptcha-sitekey"],
    },
    Signature {
        kind: CaptchaKind::ImageChallenge,
        script_markers: &[],
        class_markers: &["captcha-image", "captcha__image", "captcha-challenge"],
        attr_markers: &[],
    },
];

/// Scan a page for a known challenge. Returns the first signature that
/// matches, with as much solver metadata as the page exposes.
pub fn detect(html: &str) -> Option<CaptchaInfo> {
    let doc = Html::parse_document(html);

    let script_sel = Selector::parse("script[src]").unwrap();
    let script_srcs: Vec<String> = doc
        .select(&script_sel)
        .filter_map(|el| el.value().attr("src"))
        .map(|s| s.to_string())
        .collect();

    // Script and class markers identify a widget family unambiguously.
    // Attribute markers do not: hCaptcha widgets also carry `data-sitekey`,
    // so attributes only classify when no stronger marker matched anywhere.
    for sig in SIGNATURES {
        let script_hit = sig
            .script_markers
            .iter()
            .any(|m| script_srcs.iter().any(|src| src.contains(m)));
        let class_hit = sig.class_markers.iter().any(|class| {
            Selector::parse(&format!(".{class}"))
                .map(|sel| doc.select(&sel).next().is_some())
                .unwrap_or(false)
        });
        if script_hit || class_hit {
            return Some(extract_info(&doc, sig));
        }
    }

    for sig in SIGNATURES {
        let attr_hit = sig.attr_markers.iter().any(|attr| {
            Selector::parse(&format!("[{attr}]"))
                .map(|sel| doc.select(&sel).next().is_some())
                .unwrap_or(false)
        });
        if attr_hit {
            return Some(extract_info(&doc, sig));
        }
    }
    None
}

fn extract_info(doc: &Html, sig: &Signature) -> CaptchaInfo {
    let site_key = match sig.kind {
        CaptchaKind::Recaptcha => first_attr(doc, ".g-recaptcha", "data-sitekey")
            .or_else(|| first_attr(doc, "[data-sitekey]", "data-sitekey")),
        CaptchaKind::Hcaptcha => first_attr(doc, ".h-captcha", "data-sitekey")
            .or_else(|| first_attr(doc, "[data-hcaptcha-sitekey]", "data-hcaptcha-sitekey")),
        CaptchaKind::ImageChallenge => None,
    };

    let image_url = match sig.kind {
        CaptchaKind::ImageChallenge => sig
            .class_markers
            .iter()
            .find_map(|class| first_attr(doc, &format!("img.{class}"), "src"))
            .or_else(|| first_attr(doc, "form img", "src")),
        _ => None,
    };

    let form_action = first_attr(doc, "form[action]", "action");

    CaptchaInfo {
        kind: sig.kind,
        site_key,
        image_url,
        form_action,
    }
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(|s| s.to_string())
}

/// External solving service. Implementations make one call to a configured
/// endpoint/credential pair and return the solution token.
pub trait CaptchaSolver: Send + Sync {
    fn solve<'a>(
        &'a self,
        info: &'a CaptchaInfo,
        page_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;
}

/// HTTP solver client for 2captcha-style services.
#[derive(Clone)]
pub struct RemoteSolver {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RemoteSolver {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

impl CaptchaSolver for RemoteSolver {
    fn solve<'a>(
        &'a self,
        info: &'a CaptchaInfo,
        page_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "type": info.kind.as_str(),
                "site_key": info.site_key,
                "image_url": info.image_url,
                "page_url": page_url,
            });
            let response = self
                .client
                .post(&self.endpoint)
                .header("X-Api-Key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::NetworkError(format!("solver request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(AppError::HttpError(format!(
                    "solver returned HTTP {}",
                    response.status().as_u16()
                )));
            }

            let parsed: serde_json::Value = response
                .json()
                .await
                .map_err(|e| AppError::HttpError(format!("solver response unreadable: {e}")))?;
            parsed
                .get("solution")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| AppError::ParseError("solver response missing solution".into()))
        })
    }
}

/// Detection plus best-effort solving.
#[derive(Clone, Default)]
pub struct CaptchaHandler {
    solver: Option<Arc<dyn CaptchaSolver>>,
}

impl CaptchaHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver(solver: Arc<dyn CaptchaSolver>) -> Self {
        Self {
            solver: Some(solver),
        }
    }

    pub fn detect(&self, html: &str) -> Option<CaptchaInfo> {
        detect(html)
    }

    /// Attempt to solve a detected challenge. `None` means unsolved; no
    /// challenge, no solver configured, or the solver failed. Never errors.
    pub async fn handle(&self, info: &CaptchaInfo, page_url: &str) -> Option<String> {
        let Some(solver) = &self.solver else {
            tracing::warn!(
                kind = info.kind.as_str(),
                url = %page_url,
                "Challenge page detected and no solver configured"
            );
            return None;
        };

        match solver.solve(info, page_url).await {
            Ok(solution) => {
                tracing::info!(kind = info.kind.as_str(), url = %page_url, "Challenge solved");
                Some(solution)
            }
            Err(e) => {
                tracing::warn!(
                    kind = info.kind.as_str(),
                    url = %page_url,
                    error = %e,
                    "Challenge solving failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSolver(Result<String, ()>);

    impl CaptchaSolver for FixedSolver {
        fn solve<'a>(
            &'a self,
            _info: &'a CaptchaInfo,
            _page_url: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
            let out = self
                .0
                .clone()
                .map_err(|()| AppError::NetworkError("solver down".into()));
            Box::pin(async move { out })
        }
    }

    #[test]
    fn test_detects_recaptcha_by_script() {
        let html = r#"<html><head>
            <script src="https://www.google.com/recaptcha/api.js"></script>
            </head><body>
            <form action="/verify"><div class="g-recaptcha" data-sitekey="abc123"></div></form>
            </body></html>"#;
        let info = detect(html).unwrap();
        assert_eq!(info.kind, CaptchaKind::Recaptcha);
        assert_eq!(info.site_key.as_deref(), Some("abc123"));
        assert_eq!(info.form_action.as_deref(), Some("/verify"));
    }

    #[test]
    fn test_detects_recaptcha_by_marker_class_alone() {
        let html = r#"<div class="g-recaptcha" data-sitekey="k"></div>"#;
        let info = detect(html).unwrap();
        assert_eq!(info.kind, CaptchaKind::Recaptcha);
        assert_eq!(info.site_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_detects_hcaptcha() {
        let html = r#"<script src="https://js.hcaptcha.com/1/api.js"></script>
            <div class="h-captcha" data-sitekey="hk-1"></div>"#;
        let info = detect(html).unwrap();
        assert_eq!(info.kind, CaptchaKind::Hcaptcha);
        assert_eq!(info.site_key.as_deref(), Some("hk-1"));
    }

    #[test]
    fn test_hcaptcha_sitekey_attr_does_not_classify_as_recaptcha() {
        // The generic `data-sitekey` attribute appears on hCaptcha widgets
        // too; the class marker must win.
        let html = r#"<div class="h-captcha" data-sitekey="hk-2"></div>"#;
        let info = detect(html).unwrap();
        assert_eq!(info.kind, CaptchaKind::Hcaptcha);
        assert_eq!(info.site_key.as_deref(), Some("hk-2"));
    }

    #[test]
    fn test_detects_recaptcha_by_sitekey_attr_alone() {
        let html = r#"<div data-sitekey="rk-1"></div>"#;
        let info = detect(html).unwrap();
        assert_eq!(info.kind, CaptchaKind::Recaptcha);
        assert_eq!(info.site_key.as_deref(), Some("rk-1"));
    }

    #[test]
    fn test_detects_image_challenge_with_image_url() {
        let html = r#"<form action="/check">
            <img class="captcha-image" src="/challenge.png">
            <input name="answer">
            </form>"#;
        let info = detect(html).unwrap();
        assert_eq!(info.kind, CaptchaKind::ImageChallenge);
        assert_eq!(info.image_url.as_deref(), Some("/challenge.png"));
        assert_eq!(info.form_action.as_deref(), Some("/check"));
    }

    #[test]
    fn test_plain_page_is_not_a_challenge() {
        let html = r#"<html><body><h1>Rust Engineer</h1><div class="job-card">Acme</div></body></html>"#;
        assert!(detect(html).is_none());
    }

    #[tokio::test]
    async fn test_handle_without_solver_returns_none() {
        let handler = CaptchaHandler::new();
        let info = CaptchaInfo {
            kind: CaptchaKind::Recaptcha,
            site_key: Some("k".into()),
            image_url: None,
            form_action: None,
        };
        assert!(handler.handle(&info, "https://x").await.is_none());
    }

    #[tokio::test]
    async fn test_handle_returns_solver_solution() {
        let handler = CaptchaHandler::with_solver(Arc::new(FixedSolver(Ok("token".into()))));
        let info = CaptchaInfo {
            kind: CaptchaKind::Recaptcha,
            site_key: Some("k".into()),
            image_url: None,
            form_action: None,
        };
        assert_eq!(handler.handle(&info, "https://x").await.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_solver_failure_degrades_to_unsolved() {
        let handler = CaptchaHandler::with_solver(Arc::new(FixedSolver(Err(()))));
        let info = CaptchaInfo {
            kind: CaptchaKind::Hcaptcha,
            site_key: None,
            image_url: None,
            form_action: None,
        };
        assert!(handler.handle(&info, "https://x").await.is_none());
    }
}
