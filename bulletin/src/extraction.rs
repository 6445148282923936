//! Turn a fetched category page into article candidates.
//!
//! Two strategies are tried in order: markdown link patterns, then an HTML tag heuristic.
//! The first one that yields at least one valid candidate wins. Candidates are normalized
//! (absolute URL, cleaned title, excerpt) and validated before they become [`Article`]s.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::model::{Article, ArticleMetadata};

pub const MIN_LIST_TITLE_CHARS: usize = 15;
pub const MIN_ARTICLE_TITLE_CHARS: usize = 10;
pub const MIN_ARTICLE_CONTENT_CHARS: usize = 50;
pub const DEFAULT_MAX_CANDIDATES: usize = 5;
pub const EXCERPT_CHARS: usize = 500;

/// Titles containing any of these (case-insensitive) are navigation or ads.
pub const DEFAULT_BANNED_TOKENS: &[&str] = &[
    "suscríbete",
    "suscribete",
    "publicidad",
    "iniciar sesión",
    "newsletter",
    "cookies",
    "ver más",
    "leer más",
    "menú",
    "anuncio",
];

/// What the discovery service returned for one page.
#[derive(Debug, Clone, Default)]
pub struct RawDocument {
    pub markdown: Option<String>,
    pub html: Option<String>,
}

/// Unvalidated article candidate as found on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub content: String,
    pub image_url: Option<String>,
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn candidates(&self, doc: &RawDocument) -> Vec<Candidate>;
}

/// Markdown `[title](url)` links with the text that follows and the closest `![..](img)`.
pub struct LinkPattern {
    link: Regex,
    image: Regex,
    window: usize,
}

impl LinkPattern {
    pub fn new() -> Result<Self> {
        Ok(Self {
            link: Regex::new(r#"\[([^\[\]]{2,300})\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#)?,
            image: Regex::new(r#"!\[[^\]]*\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#)?,
            window: 400,
        })
    }

    fn nearby_text(&self, after: &str) -> String {
        let cut = self.link.find(after).map(|m| m.start()).unwrap_or(after.len());
        let text = self.image.replace_all(&after[..cut], " ");
        // leftover "[" of an image-wrapping link, or list bullets
        let text = text.trim_start_matches(|c: char| c == ']' || c == ')' || c.is_whitespace());
        clean_inline_markdown(text)
    }
}

impl ExtractionStrategy for LinkPattern {
    fn name(&self) -> &'static str {
        "link-pattern"
    }

    fn candidates(&self, doc: &RawDocument) -> Vec<Candidate> {
        let md = match doc.markdown.as_deref() {
            Some(md) if !md.trim().is_empty() => md,
            _ => return Vec::new(),
        };

        let mut out = Vec::new();
        for caps in self.link.captures_iter(md) {
            let (Some(whole), Some(title), Some(href)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            if md[..whole.start()].ends_with('!') {
                continue;
            }

            let before = &md[floor_boundary(md, whole.start().saturating_sub(self.window))..whole.start()];
            let after = &md[whole.end()..floor_boundary(md, whole.end() + self.window)];

            let image_url = self
                .image
                .captures_iter(before)
                .last()
                .or_else(|| self.image.captures_iter(after).next())
                .and_then(|c| c.get(1).map(|m| m.as_str().to_string()));

            out.push(Candidate {
                title: clean_inline_markdown(title.as_str()),
                url: href.as_str().to_string(),
                content: self.nearby_text(after),
                image_url,
            });
        }
        out
    }
}

/// HTML heuristic: `<article>` blocks, heading links, and links wrapping headings.
pub struct TagHeuristic {
    article: Selector,
    heading: Selector,
    heading_link: Selector,
    link: Selector,
    paragraph: Selector,
    img: Selector,
    picture_source: Selector,
}

fn selector(css: &'static str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {:?}", css, e))
}

impl TagHeuristic {
    pub fn new() -> Result<Self> {
        Ok(Self {
            article: selector("article")?,
            heading: selector("h1, h2, h3")?,
            heading_link: selector("h1 a[href], h2 a[href], h3 a[href]")?,
            link: selector("a[href]")?,
            paragraph: selector("p")?,
            img: selector("img")?,
            picture_source: selector("picture source[srcset]")?,
        })
    }

    fn first_paragraph(&self, scope: ElementRef) -> String {
        scope
            .select(&self.paragraph)
            .map(|p| element_text(&p))
            .find(|t| t.chars().count() >= 20)
            .unwrap_or_default()
    }

    fn image_in(&self, scope: ElementRef) -> Option<String> {
        scope
            .select(&self.img)
            .find_map(|img| {
                let el = img.value();
                el.attr("srcset")
                    .and_then(first_srcset_url)
                    .or_else(|| el.attr("data-src").map(String::from))
                    .or_else(|| el.attr("data-lazy-src").map(String::from))
                    .or_else(|| el.attr("src").map(String::from))
                    .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
            })
            .or_else(|| {
                scope
                    .select(&self.picture_source)
                    .find_map(|s| s.value().attr("srcset").and_then(first_srcset_url))
            })
    }

    /// Closest ancestor (up to three levels) that contains a paragraph or image.
    fn container<'a>(&self, el: ElementRef<'a>) -> ElementRef<'a> {
        let mut current = el;
        for _ in 0..3 {
            let Some(parent) = current.parent().and_then(ElementRef::wrap) else {
                break;
            };
            current = parent;
            if current.select(&self.paragraph).next().is_some() || current.select(&self.img).next().is_some() {
                break;
            }
        }
        current
    }
}

impl ExtractionStrategy for TagHeuristic {
    fn name(&self) -> &'static str {
        "tag-heuristic"
    }

    fn candidates(&self, doc: &RawDocument) -> Vec<Candidate> {
        let html = match doc.html.as_deref() {
            Some(h) if !h.trim().is_empty() => h,
            _ => return Vec::new(),
        };
        let page = Html::parse_document(html);
        let mut out = Vec::new();

        for article in page.select(&self.article) {
            let found = article
                .select(&self.heading_link)
                .next()
                .map(|a| (element_text(&a), a))
                .or_else(|| {
                    article.select(&self.link).find_map(|a| {
                        a.select(&self.heading).next().map(|h| (element_text(&h), a))
                    })
                });
            let Some((title, link)) = found else { continue };
            let Some(href) = link.value().attr("href") else { continue };

            out.push(Candidate {
                title,
                url: href.to_string(),
                content: self.first_paragraph(article),
                image_url: self.image_in(article),
            });
        }

        for link in page.select(&self.heading_link) {
            let Some(href) = link.value().attr("href") else { continue };
            let scope = self.container(link);
            out.push(Candidate {
                title: element_text(&link),
                url: href.to_string(),
                content: self.first_paragraph(scope),
                image_url: self.image_in(scope),
            });
        }

        for link in page.select(&self.link) {
            let Some(heading) = link.select(&self.heading).next() else { continue };
            let Some(href) = link.value().attr("href") else { continue };
            let scope = self.container(link);
            out.push(Candidate {
                title: element_text(&heading),
                url: href.to_string(),
                content: self.first_paragraph(scope),
                image_url: self.image_in(scope),
            });
        }

        out
    }
}

/// Runs the strategies in order and turns the first non-empty valid set into articles.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    banned_tokens: Vec<String>,
    max_candidates: usize,
}

#[derive(Debug)]
pub struct Extraction {
    pub strategy: &'static str,
    pub articles: Vec<Article>,
}

impl Extractor {
    pub fn new(extra_banned: &[String], max_candidates: usize) -> Result<Self> {
        let mut banned_tokens: Vec<String> = DEFAULT_BANNED_TOKENS.iter().map(|t| t.to_string()).collect();
        banned_tokens.extend(extra_banned.iter().map(|t| t.to_lowercase()));
        Ok(Self {
            strategies: vec![Box::new(LinkPattern::new()?), Box::new(TagHeuristic::new()?)],
            banned_tokens,
            max_candidates: max_candidates.max(1),
        })
    }

    pub fn extract(&self, doc: &RawDocument, page_url: &str, source_name: &str) -> Option<Extraction> {
        for strategy in &self.strategies {
            let raw = strategy.candidates(doc);
            let found = raw.len();
            let mut seen = HashSet::new();
            let mut articles = Vec::new();

            for candidate in raw {
                let Some(candidate) = normalize(candidate, page_url) else { continue };
                if let Err(reason) = check_list_candidate(&candidate, &self.banned_tokens) {
                    debug!(url = %candidate.url, "rejected candidate: {}", reason);
                    continue;
                }
                if !seen.insert(candidate.url.clone()) {
                    continue;
                }

                let mut article = Article::new(candidate.title, candidate.content, candidate.url, source_name);
                article.image_url = candidate.image_url;
                articles.push(article);
                if articles.len() >= self.max_candidates {
                    break;
                }
            }

            debug!(
                strategy = strategy.name(),
                page = page_url,
                found,
                valid = articles.len(),
                "extraction strategy finished"
            );
            if !articles.is_empty() {
                return Some(Extraction {
                    strategy: strategy.name(),
                    articles,
                });
            }
        }
        None
    }
}

fn normalize(c: Candidate, page_url: &str) -> Option<Candidate> {
    let url = resolve_url(page_url, &c.url)?;
    Some(Candidate {
        title: strip_section_prefix(&collapse_whitespace(&c.title)),
        url,
        content: truncate_excerpt(&collapse_whitespace(&c.content), EXCERPT_CHARS),
        image_url: c.image_url.and_then(|i| resolve_url(page_url, &i)),
    })
}

/// Validation for candidates found on listing pages.
pub fn check_list_candidate(c: &Candidate, banned_tokens: &[String]) -> std::result::Result<(), String> {
    if c.title.chars().count() < MIN_LIST_TITLE_CHARS {
        return Err(format!("title shorter than {} chars", MIN_LIST_TITLE_CHARS));
    }
    if !is_http_url(&c.url) {
        return Err("url is not http(s)".to_string());
    }
    if is_non_article_url(&c.url) {
        return Err("url points to a non-article page".to_string());
    }
    let lower = c.title.to_lowercase();
    if let Some(token) = banned_tokens.iter().find(|t| lower.contains(t.as_str())) {
        return Err(format!("title contains banned token '{}'", token));
    }
    Ok(())
}

/// Validation for a fully fetched single-article page.
pub fn check_single_article(title: &str, content: &str) -> std::result::Result<(), String> {
    if title.trim().chars().count() < MIN_ARTICLE_TITLE_CHARS {
        return Err(format!("title shorter than {} chars", MIN_ARTICLE_TITLE_CHARS));
    }
    if content.trim().chars().count() < MIN_ARTICLE_CONTENT_CHARS {
        return Err(format!("content shorter than {} chars", MIN_ARTICLE_CONTENT_CHARS));
    }
    Ok(())
}

pub fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(r) if !r.is_empty())
}

/// Section/tag listings, account pages, in-page anchors, scripts and document downloads.
/// Path segments are compared whole, so slugs such as `tagua-exportaciones` pass.
pub fn is_non_article_url(url: &str) -> bool {
    const SECTION_SEGMENTS: &[&str] = &["categoria", "category", "seccion", "section", "tag", "tags"];
    const ACCOUNT_SEGMENTS: &[&str] = &["login", "registro", "suscripcion", "newsletter", "contacto"];
    const DOWNLOADS: &[&str] = &[".pdf", ".doc", ".docx", ".zip", ".rar"];

    let lower = url.trim().to_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.contains("/#") {
        return true;
    }
    let Ok(parsed) = url::Url::parse(&lower) else {
        return false;
    };
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if segments
        .iter()
        .any(|seg| SECTION_SEGMENTS.contains(seg) || ACCOUNT_SEGMENTS.contains(seg))
    {
        return true;
    }
    segments
        .last()
        .map_or(false, |last| DOWNLOADS.iter().any(|ext| last.ends_with(ext)))
}

pub fn is_image_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Absolute URL for `href` relative to `base`. None for unparseable or non-http results.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let joined = match url::Url::parse(href) {
        Ok(u) => u,
        Err(_) => url::Url::parse(base).ok()?.join(href).ok()?,
    };
    let s = joined.to_string();
    if is_http_url(&s) || joined.scheme() == "javascript" || joined.scheme() == "mailto" {
        Some(s)
    } else {
        None
    }
}

/// `"Ecuador • Título"` -> `"Título"`
pub fn strip_section_prefix(title: &str) -> String {
    match title.split_once('•') {
        Some((prefix, rest)) if !prefix.trim().is_empty() && !rest.trim().is_empty() => rest.trim().to_string(),
        _ => title.trim().to_string(),
    }
}

/// Cut at the last space before `max` chars and append "...".
pub fn truncate_excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > 0 => format!("{}...", &cut[..pos]),
        _ => format!("{}...", cut),
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_inline_markdown(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`' | '>'))
        .collect();
    collapse_whitespace(&stripped)
}

fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_srcset_url(srcset: &str) -> Option<String> {
    srcset
        .split(|c: char| c == ',' || c.is_whitespace())
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn floor_boundary(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Word count, reading time (200 wpm) and a 0..=100 quality score for article text.
pub fn article_metadata(text: &str) -> ArticleMetadata {
    let word_count = text.split_whitespace().count();
    ArticleMetadata {
        word_count,
        reading_time: (word_count + 199) / 200,
        content_quality: content_quality(text, word_count),
    }
}

fn content_quality(text: &str, word_count: usize) -> u8 {
    let mut score: i32 = 50;

    if word_count < 100 {
        score -= 30;
    } else if word_count < 200 {
        score -= 10;
    }
    if word_count > 500 {
        score += 20;
    } else if word_count > 300 {
        score += 10;
    }

    let total_chars = text.chars().count();
    if total_chars > 0 {
        let special = text
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !".,;:!?'\"()-".contains(*c))
            .count();
        if special as f64 / total_chars as f64 > 0.1 {
            score -= 20;
        }
    }

    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    if sentences > 3 {
        let avg = word_count as f64 / sentences as f64;
        if avg > 10.0 && avg < 50.0 {
            score += 10;
        }
    }

    score.clamp(0, 100) as u8
}
