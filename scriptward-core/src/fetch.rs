//! Guarded URL fetch with a plain-text cache file.
//!
//! Every hop (the first request and each redirect) goes through
//! [`check_url`]. The page is reduced to text, capped, and written to the
//! cache file as a `SOURCE:`/`TITLE:` block; callers get a short receipt.

use std::error::Error as _;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use scriptward_commons::truncate_chars;
use scriptward_config::PolicySet;
use tracing::{debug, info};

use crate::error::{FetchError, UrlError};
use crate::guards::check_url;

const MAX_REDIRECTS: usize = 5;
/// Raw body bytes read before the rest of the response is dropped.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/plain",
    "text/markdown",
    "application/json",
    "application/xml",
    "text/xml",
    "application/xhtml+xml",
];

/// Elements dropped together with their content.
const STRIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "nav", "footer", "header", "aside",
];

static STRIPPED_ELEMENT_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    STRIPPED_ELEMENTS
        .iter()
        .map(|tag| compile_regex(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")))
        .collect()
});
static COMMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"(?s)<!--.*?-->"));
static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"(?is)<title\b[^>]*>(.*?)</title\s*>"));
static BLOCK_BREAK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|section|article|main|pre|blockquote)\s*>")
});
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"(?s)<[^>]*>"));
static NUMERIC_ENTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));"));
static INLINE_SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"[ \t\r\f\v]+"));

/// Receipt for a fetched and cached page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub title: String,
    /// Characters written to the cache file.
    pub chars: usize,
    pub truncated: bool,
    pub cache_file: PathBuf,
}

impl fmt::Display for FetchedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Saved {} to {} ({} chars{})",
            self.url,
            self.cache_file.display(),
            self.chars,
            if self.truncated { ", truncated" } else { "" }
        )
    }
}

pub struct Fetcher<'a> {
    policy: Arc<PolicySet>,
    cache_file: &'a Path,
    max_chars: usize,
    timeout: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        policy: Arc<PolicySet>,
        cache_file: &'a Path,
        max_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            policy,
            cache_file,
            max_chars,
            timeout,
        }
    }

    pub async fn fetch(&self, raw_url: &str) -> Result<FetchedPage, FetchError> {
        let url = check_url(raw_url, &self.policy)?;
        let client = self.client()?;

        debug!(url = %url, "fetching page");
        let mut response = client
            .get(url.clone())
            .send()
            .await
            .map_err(redirect_rejection)?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: response.url().to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        validate_content_type(&content_type)?;

        let final_url = response.url().to_string();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = MAX_BODY_BYTES.saturating_sub(body.len());
            body.extend(chunk.iter().take(room).copied());
            if body.len() >= MAX_BODY_BYTES {
                debug!(url = %final_url, "response body capped");
                break;
            }
        }
        let raw = String::from_utf8_lossy(&body);

        let (title, text) = if is_html(&content_type, &raw) {
            (extract_title(&raw).unwrap_or_default(), html_to_text(&raw))
        } else {
            (String::new(), raw.trim().to_owned())
        };
        let (text, truncated) = truncate_chars(&text, self.max_chars);

        let cached = format!("SOURCE: {final_url}\nTITLE: {title}\n\n{text}");
        tokio::fs::write(self.cache_file, &cached)
            .await
            .map_err(|source| FetchError::Cache {
                path: self.cache_file.to_path_buf(),
                source,
            })?;

        let page = FetchedPage {
            url: final_url,
            title,
            chars: cached.chars().count(),
            truncated,
            cache_file: self.cache_file.to_path_buf(),
        };
        info!(url = %page.url, chars = page.chars, "cached fetched page");
        Ok(page)
    }

    fn client(&self) -> Result<reqwest::Client, FetchError> {
        Ok(reqwest::Client::builder()
            .default_headers(default_headers())
            .redirect(redirect_policy(Arc::clone(&self.policy)))
            .timeout(self.timeout)
            .build()?)
    }
}

/// Redirect policy that re-validates every hop with [`redirect_decision`].
fn redirect_policy(policy: Arc<PolicySet>) -> Policy {
    Policy::custom(move |attempt| {
        match redirect_decision(attempt.url(), attempt.previous().len(), &policy) {
            Ok(()) => attempt.follow(),
            Err(rejection) => attempt.error(rejection),
        }
    })
}

/// Whether a redirect to `hop` may be followed after `previous_hops` requests.
fn redirect_decision(
    hop: &url::Url,
    previous_hops: usize,
    policy: &PolicySet,
) -> Result<(), UrlError> {
    if previous_hops >= MAX_REDIRECTS {
        return Err(UrlError::TooManyRedirects {
            limit: MAX_REDIRECTS,
        });
    }
    check_url(hop.as_str(), policy).map(|_| ())
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html, text/plain;q=0.9, */*;q=0.5"),
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static("scriptward/0.4 (guarded fetch)"),
    );
    headers
}

/// Surface a redirect refused by [`check_url`] as the URL error itself.
fn redirect_rejection(error: reqwest::Error) -> FetchError {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(rejection) = cause.downcast_ref::<UrlError>() {
            debug!(%rejection, "redirect refused");
            return FetchError::Url(rejection.clone());
        }
        source = cause.source();
    }
    FetchError::Request(error)
}

fn validate_content_type(content_type: &str) -> Result<(), FetchError> {
    if content_type.is_empty() {
        return Ok(());
    }
    let lowered = content_type.to_ascii_lowercase();
    if ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| lowered.contains(allowed))
    {
        Ok(())
    } else {
        Err(FetchError::UnsupportedContentType(content_type.to_owned()))
    }
}

fn is_html(content_type: &str, body: &str) -> bool {
    if content_type.is_empty() {
        let head: String = body.chars().take(512).collect::<String>().to_ascii_lowercase();
        return head.contains("<html") || head.contains("<!doctype html");
    }
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("html") || lowered.contains("xml")
}

/// Contents of the first `<title>`, entity-decoded and whitespace-collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    let raw = TITLE_REGEX.captures(html)?.get(1)?.as_str();
    let title = INLINE_SPACE_REGEX
        .replace_all(&decode_entities(raw).replace('\n', " "), " ")
        .trim()
        .to_owned();
    (!title.is_empty()).then_some(title)
}

/// Reduce an HTML document to readable text.
///
/// Drops scripts, styles, embedded objects and page chrome with their
/// content, turns block boundaries into line breaks, removes the remaining
/// tags and decodes entities last so escaped markup stays text.
pub fn html_to_text(html: &str) -> String {
    let mut text = COMMENT_REGEX.replace_all(html, "").into_owned();
    for regex in STRIPPED_ELEMENT_REGEXES.iter() {
        text = regex.replace_all(&text, "").into_owned();
    }
    text = TITLE_REGEX.replace_all(&text, "").into_owned();
    text = BLOCK_BREAK_REGEX.replace_all(&text, "\n").into_owned();
    text = TAG_REGEX.replace_all(&text, " ").into_owned();
    let decoded = decode_entities(&text);

    let mut lines: Vec<String> = Vec::new();
    for line in decoded.lines() {
        let collapsed = INLINE_SPACE_REGEX.replace_all(line, " ").trim().to_owned();
        let previous_blank = lines.last().is_none_or(String::is_empty);
        if collapsed.is_empty() && previous_blank {
            continue;
        }
        lines.push(collapsed);
    }
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY_REGEX.replace_all(text, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(decimal)) => decimal.as_str().parse::<u32>().ok(),
            (None, None) => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| "\u{FFFD}".to_owned())
    });

    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Panic is acceptable thanks to the `load_regex` test
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}
