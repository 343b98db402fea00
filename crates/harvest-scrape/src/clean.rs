use std::sync::Arc;

use harvest_core::error::AppError;
use htmd::HtmlToMarkdown;

/// HTML-to-Markdown cleaner for job description bodies.
///
/// Converts the description fragment into readable Markdown, stripping
/// non-content elements (script, style, nav, etc.) so stored postings carry
/// text instead of markup.
pub struct DescriptionCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for DescriptionCleaner {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl DescriptionCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| AppError::ParseError(e.to_string()))
    }
}

impl Default for DescriptionCleaner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_html_to_markdown() {
        let cleaner = DescriptionCleaner::new();
        let html = "<h1>About the role</h1><p>You will write Rust.</p>";
        let md = cleaner.clean(html).unwrap();
        assert!(md.contains("About the role"));
        assert!(md.contains("You will write Rust."));
    }

    #[test]
    fn test_strips_script_tags() {
        let cleaner = DescriptionCleaner::new();
        let html = "<p>Benefits</p><script>alert('xss')</script>";
        let md = cleaner.clean(html).unwrap();
        assert!(md.contains("Benefits"));
        assert!(!md.contains("alert"));
    }
}
