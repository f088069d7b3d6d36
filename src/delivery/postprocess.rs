//! Pure text post-processing: media extraction, markdown stripping,
//! humanized chunking, and the synthetic typing delay.

use crate::config::DeliveryConfig;
use crate::{MediaItem, MediaKind};
use rand::Rng as _;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

static MARKDOWN_IMAGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)\s]+)\)").expect("hardcoded image regex"));

static MEDIA_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)https?://[^\s<>"')\]]+\.(?:jpe?g|png|gif|webp|mp4|mov|webm|avi|pdf|docx?|xlsx?|pptx?|mp3|ogg|zip)(?:\?[^\s<>"')\]]*)?"#,
    )
    .expect("hardcoded media url regex")
});

static MARKDOWN_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]*)\)").expect("hardcoded link regex"));

static HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("hardcoded header regex"));

static CODE_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[^\n]*\n?").expect("hardcoded fence regex"));

static BOLD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").expect("hardcoded bold regex"));

static EMPHASIS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*([^*\n]+)\*|\b_([^_\n]+)_\b").expect("hardcoded emphasis regex")
});

static INLINE_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]*)`").expect("hardcoded inline code regex"));

static EXCESS_SPACES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("hardcoded spaces regex"));

static EXCESS_NEWLINES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("hardcoded newlines regex"));

/// Scan agent text for embedded media references, removing each match as it
/// is extracted and de-duplicating repeats. Running this on its own cleaned
/// output finds nothing further.
pub fn extract_media(text: &str, media_base_url: Option<&str>) -> (String, Vec<MediaItem>) {
    let mut media = Vec::new();
    let mut seen = HashSet::new();
    let mut cleaned = text.to_string();

    // Markdown image syntax first: the wrapper marks intent explicitly, so
    // the reference is extracted even when the URL has no media extension.
    loop {
        let Some(caps) = MARKDOWN_IMAGE_REGEX.captures(&cleaned) else {
            break;
        };
        let whole = caps.get(0).expect("match exists").range();
        let url = caps[1].to_string();
        if seen.insert(url.clone()) {
            media.push(media_item_from_url(&url, MediaKind::Image));
        }
        cleaned.replace_range(whole, "");
    }

    // Bare URLs with recognized media extensions.
    loop {
        let Some(found) = MEDIA_URL_REGEX.find(&cleaned) else {
            break;
        };
        let url = found.as_str().to_string();
        let range = found.range();
        if seen.insert(url.clone()) {
            let kind = kind_from_url(&url);
            media.push(media_item_from_url(&url, kind));
        }
        cleaned.replace_range(range, "");
    }

    // Short content codes resolving against the configured media base:
    // standalone 8–16 char alphanumeric tokens mixing letters and digits.
    if let Some(base) = media_base_url {
        let codes: Vec<String> = cleaned
            .split_whitespace()
            .filter(|token| is_content_code(token))
            .map(str::to_string)
            .collect();

        if !codes.is_empty() {
            cleaned = cleaned
                .lines()
                .map(|line| {
                    line.split_whitespace()
                        .filter(|token| !is_content_code(token))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
                .join("\n");

            for code in codes {
                let url = format!("{}/{code}", base.trim_end_matches('/'));
                if seen.insert(url.clone()) {
                    media.push(MediaItem {
                        kind: MediaKind::File,
                        url,
                        file_name: Some(code),
                        mime_type: None,
                    });
                }
            }
        }
    }

    (tidy_whitespace(&cleaned), media)
}

fn is_content_code(token: &str) -> bool {
    (8..=16).contains(&token.len())
        && token.chars().all(|c| c.is_ascii_alphanumeric())
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && token.chars().any(|c| c.is_ascii_digit())
}

fn kind_from_url(url: &str) -> MediaKind {
    let path = url.split('?').next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("");
    MediaKind::from_extension(ext)
}

fn media_item_from_url(url: &str, kind: MediaKind) -> MediaItem {
    let path = url.split('?').next().unwrap_or(url);
    let file_name = path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let mime_type = file_name
        .as_deref()
        .and_then(|name| mime_guess::from_path(name).first())
        .map(|mime| mime.essence_str().to_string());

    MediaItem {
        kind,
        url: url.to_string(),
        file_name,
        mime_type,
    }
}

/// Strip residual markdown formatting: emphasis, headers, code fences, inline
/// code, and link syntax collapsed to the bare URL.
pub fn strip_markdown(text: &str) -> String {
    let stripped = CODE_FENCE_REGEX.replace_all(text, "");
    let stripped = HEADER_REGEX.replace_all(&stripped, "");
    let stripped = MARKDOWN_LINK_REGEX.replace_all(&stripped, "$1");
    let stripped = BOLD_REGEX.replace_all(&stripped, "$1$2");
    let stripped = EMPHASIS_REGEX.replace_all(&stripped, "$1$2");
    let stripped = INLINE_CODE_REGEX.replace_all(&stripped, "$1");

    tidy_whitespace(&stripped)
}

fn tidy_whitespace(text: &str) -> String {
    let tidied = EXCESS_SPACES_REGEX.replace_all(text, " ");
    let tidied = EXCESS_NEWLINES_REGEX.replace_all(&tidied, "\n\n");
    tidied
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Split text into chunks sized for comfortable reading.
///
/// Cascade: paragraph boundaries, then single line breaks, then sentence
/// boundaries, finally a hard cut at the last whitespace before the limit.
/// Every chunk is within `max_chars`, except a single word that alone
/// exceeds the limit — that word becomes its own chunk.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    split_piece(text, max_chars.max(1))
}

fn split_piece(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    for separator in ["\n\n", "\n"] {
        if text.contains(separator) {
            let parts: Vec<&str> = text
                .split(separator)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() > 1 {
                return pack_parts(&parts, separator, max_chars);
            }
        }
    }

    let sentences = split_sentences(text);
    if sentences.len() > 1 {
        return pack_parts(
            &sentences.iter().map(String::as_str).collect::<Vec<_>>(),
            " ",
            max_chars,
        );
    }

    hard_cut(text, max_chars)
}

/// Greedily pack consecutive parts into chunks within the limit, recursing
/// into parts that alone exceed it.
fn pack_parts(parts: &[&str], separator: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for part in parts {
        let part_len = part.chars().count();
        if part_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_piece(part, max_chars));
            continue;
        }

        let current_len = current.chars().count();
        let separator_len = separator.chars().count();
        if current.is_empty() {
            current = part.to_string();
        } else if current_len + separator_len + part_len <= max_chars {
            current.push_str(separator);
            current.push_str(part);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = part.to_string();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|next| next.is_whitespace()) {
            sentences.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }

    sentences
}

/// Cut at the last whitespace before the limit. A leading word longer than
/// the limit forms its own chunk.
fn hard_cut(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            chunks.push(remaining.to_string());
            break;
        }

        let window: String = remaining.chars().take(max_chars + 1).collect();
        let cut = match window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((idx, _)) if idx > 0 => idx,
            _ => {
                // One oversized word: it becomes its own chunk.
                remaining
                    .char_indices()
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(idx, _)| idx)
                    .unwrap_or(remaining.len())
            }
        };

        chunks.push(remaining[..cut].trim_end().to_string());
        remaining = remaining[cut..].trim_start();
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Synthetic typing delay: proportional to chunk length, clamped to the
/// configured bounds, plus jitter so replies never look machine-timed.
pub fn typing_delay(chunk: &str, config: &DeliveryConfig) -> Duration {
    let base = (chunk.chars().count() as u64) * config.delay_ms_per_char;
    let clamped = base.clamp(config.min_delay_ms, config.max_delay_ms.max(config.min_delay_ms));
    let jitter = if config.jitter_ms > 0 {
        rand::rng().random_range(0..config.jitter_ms)
    } else {
        0
    };
    Duration::from_millis(clamped + jitter)
}
