//! Heuristic selector regeneration for pages whose structure drifted past
//! the whole fallback chain.
//!
//! Candidate elements come either from text similarity against a known-good
//! sample or from purpose-shaped structural hints (heading tags for titles,
//! class-name fragments for the rest). Each candidate yields a handful of
//! selector variants; a variant is only viable when it matches exactly one
//! element on the page, and the best-scoring viable variant wins.

use harvest_core::similarity::SimilarityFn;
use scraper::{ElementRef, Html, Selector};

use super::{Purpose, element_text, validate_for_purpose};

const MAX_CANDIDATES: usize = 25;

pub(super) fn regenerate(
    doc: &Html,
    purpose: Purpose,
    sample: Option<&str>,
    similarity: SimilarityFn,
) -> Option<String> {
    let mut best: Option<(f64, String)> = None;
    for el in find_candidates(doc, purpose, sample, similarity) {
        for variant in selector_variants(el) {
            let score = score_selector(doc, &variant);
            if score > 0.0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, variant));
            }
        }
    }
    best.map(|(_, selector)| selector)
}

fn find_candidates<'a>(
    doc: &'a Html,
    purpose: Purpose,
    sample: Option<&str>,
    similarity: SimilarityFn,
) -> Vec<ElementRef<'a>> {
    if let Some(sample) = sample {
        // With a sample we can search the whole page for elements whose text
        // still carries the old content.
        let all = Selector::parse("body *").unwrap();
        return doc
            .select(&all)
            .filter(|el| {
                let text = element_text(*el);
                !text.is_empty() && text.len() < 300 && similarity(sample, &text) >= 0.5
            })
            .take(MAX_CANDIDATES)
            .collect();
    }

    let hint = match purpose {
        Purpose::CardTitle => {
            r#"h1, h2, h3, a[class*="title"], [class*="jobTitle"], [class*="job-title"]"#
        }
        Purpose::CardCompany => r#"[class*="company"]"#,
        Purpose::CardLocation => r#"[class*="location"]"#,
        Purpose::CardSalary => r#"[class*="salary"], [class*="pay"], [class*="compensation"]"#,
        Purpose::CardDate => r#"time, [class*="date"], [class*="posted"]"#,
        Purpose::Description => r#"[class*="description"], [id*="description"], article"#,
    };
    let hint = Selector::parse(hint).unwrap();
    doc.select(&hint)
        .filter(|el| validate_for_purpose(purpose, &element_text(*el)))
        .take(MAX_CANDIDATES)
        .collect()
}

/// Selector spellings that could address `el`: by id, by tag+classes, with
/// parent context, and via a preceding sibling.
fn selector_variants(el: ElementRef<'_>) -> Vec<String> {
    let tag = el.value().name().to_string();
    let classes = class_suffix(el);
    let mut variants = Vec::new();

    if let Some(id) = el.value().attr("id") {
        variants.push(format!("#{id}"));
    }
    if !classes.is_empty() {
        variants.push(format!("{tag}{classes}"));
    }

    if let Some(parent) = el.parent().and_then(ElementRef::wrap) {
        if let Some(pid) = parent.value().attr("id") {
            variants.push(format!("#{pid} > {tag}{classes}"));
        } else {
            let parent_classes = class_suffix(parent);
            if !parent_classes.is_empty() {
                variants.push(format!(
                    "{}{parent_classes} > {tag}{classes}",
                    parent.value().name()
                ));
            }
        }
    }

    if let Some(prev) = el.prev_siblings().find_map(ElementRef::wrap) {
        variants.push(format!(
            "{}{} + {tag}{classes}",
            prev.value().name(),
            class_suffix(prev)
        ));
    }

    variants
}

fn class_suffix(el: ElementRef<'_>) -> String {
    el.value()
        .classes()
        .map(|c| format!(".{c}"))
        .collect::<String>()
}

/// A selector is viable only when it matches exactly one element. Among
/// viable selectors, id-based ones rank highest, class specificity helps,
/// and long selectors are penalized as brittle. Invalid CSS scores zero.
fn score_selector(doc: &Html, selector: &str) -> f64 {
    let Ok(sel) = Selector::parse(selector) else {
        return 0.0;
    };
    if doc.select(&sel).take(2).count() != 1 {
        return 0.0;
    }
    let mut score = 10.0;
    if selector.contains('#') {
        score *= 1.2;
    }
    score += 0.3 * selector.matches('.').count() as f64;
    score -= 0.05 * selector.len() as f64;
    score.max(0.1)
}
