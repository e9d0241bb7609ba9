use std::borrow::Cow;
use std::sync::OnceLock;

use proxy_stats::metric;
use regex::Regex;

use crate::ProxyCounters;
use crate::tags::{Tag, segments};

/// An unrecoverable violation of the Prometheus naming rules.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SanitizeError {
    /// The metric name does not start with an ASCII letter.
    #[error("invalid first character in metric name")]
    InvalidFirstCharacter,
}

fn allowed_name() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_:]*$").unwrap())
}

fn allowed_tag_key() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap())
}

fn replace_chars() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_:]").unwrap())
}

fn replace_invalid(input: &str) -> Cow<'_, str> {
    replace_chars().replace_all(input, "_")
}

/// Enforces the Prometheus data model on a metric name and its raw tag list.
///
/// With `strict_mode` off, both inputs are returned unchanged. Otherwise:
///
///  - A name that does not start with an ASCII letter is rejected with
///    [`SanitizeError::InvalidFirstCharacter`] and counted in `metrics_dropped_total`.
///  - Any other character outside `[a-zA-Z0-9_:]` in the name is replaced with `_`.
///  - Invalid characters in tag keys are replaced the same way. Tag values are kept.
///  - Malformed tag pairs are removed without being counted.
///
/// The returned tags are a comma-separated list without leading comma.
///
/// ```
/// use proxy_metrics::sanitize;
///
/// let (name, tags) = sanitize("my.metric", "host-name=web1,bad", true).unwrap();
/// assert_eq!(name, "my_metric");
/// assert_eq!(tags, "host_name=web1");
/// ```
pub fn sanitize(
    name: &str,
    tags: &str,
    strict_mode: bool,
) -> Result<(String, String), SanitizeError> {
    if !strict_mode {
        return Ok((name.to_owned(), tags.to_owned()));
    }

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        metric!(counter(ProxyCounters::MetricsDropped) += 1);
        return Err(SanitizeError::InvalidFirstCharacter);
    }

    let name = if allowed_name().is_match(name) {
        name.to_owned()
    } else {
        replace_invalid(name).into_owned()
    };

    let mut clean_tags = Vec::new();
    for segment in segments(tags) {
        let Some(Tag { key, value }) = Tag::parse(segment) else {
            proxy_log::debug!(tags, pair = segment, "removing malformed tag pair");
            continue;
        };

        let key = if allowed_tag_key().is_match(key) {
            Cow::Borrowed(key)
        } else {
            replace_invalid(key)
        };

        clean_tags.push(format!("{key}={value}"));
    }

    Ok((name, clean_tags.join(",")))
}
