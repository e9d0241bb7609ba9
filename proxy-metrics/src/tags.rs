use std::fmt;

use proxy_stats::metric;

use crate::ProxyCounters;

/// Controls how malformed pairs in a tag list are handled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPolicy {
    /// A single malformed pair discards the entire tag list.
    Strict,
    /// Malformed pairs are dropped and counted, the remaining pairs are kept.
    #[default]
    Lenient,
}

/// A single `key=value` tag, with surrounding whitespace removed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tag<'a> {
    /// The tag key.
    pub key: &'a str,
    /// The tag value.
    pub value: &'a str,
}

impl<'a> Tag<'a> {
    /// Splits a single `key=value` segment.
    ///
    /// Returns `None` unless the segment contains exactly one `=` with a non-blank key and value.
    pub fn parse(segment: &'a str) -> Option<Self> {
        let (key, value) = segment.split_once('=')?;
        if value.contains('=') {
            return None;
        }

        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return None;
        }

        Some(Self { key, value })
    }
}

/// Splits a raw tag list into its segments.
///
/// A blank list has no segments. Otherwise every comma starts a new segment, including trailing
/// commas.
pub(crate) fn segments(raw: &str) -> impl Iterator<Item = &str> {
    let raw = raw.trim();
    raw.split(',').filter(move |_| !raw.is_empty())
}

/// The result of [`parse_tags`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParsedTags<'a> {
    tags: Vec<Tag<'a>>,
    malformed: usize,
}

impl<'a> ParsedTags<'a> {
    /// Returns the surviving tags.
    pub fn tags(&self) -> &[Tag<'a>] {
        &self.tags
    }

    /// Returns the number of malformed pairs that were encountered.
    ///
    /// The strict policy stops at the first malformed pair, so this is at most `1` there.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Returns `true` if every pair of the input was well-formed.
    pub fn is_valid(&self) -> bool {
        self.malformed == 0
    }
}

/// Serializes the tags as `,key=value,key2=value2`, ready to be appended to a metric name.
///
/// Renders nothing if there are no tags.
impl fmt::Display for ParsedTags<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tag in &self.tags {
            write!(f, ",{}={}", tag.key, tag.value)?;
        }
        Ok(())
    }
}

/// Parses a comma-separated list of `key=value` pairs.
///
/// With [`TagPolicy::Lenient`], every malformed pair is dropped and counted in
/// `metrics_tags_dropped_total`. With [`TagPolicy::Strict`], the first malformed pair discards all
/// tags and nothing is counted.
///
/// ```
/// use proxy_metrics::{parse_tags, TagPolicy};
///
/// let lenient = parse_tags("host=web1,badpair,env=", TagPolicy::Lenient);
/// assert_eq!(lenient.to_string(), ",host=web1");
/// assert_eq!(lenient.malformed(), 2);
///
/// let strict = parse_tags("host=web1,badpair", TagPolicy::Strict);
/// assert_eq!(strict.to_string(), "");
/// ```
pub fn parse_tags(raw: &str, policy: TagPolicy) -> ParsedTags<'_> {
    let mut parsed = ParsedTags::default();

    for segment in segments(raw) {
        match Tag::parse(segment) {
            Some(tag) => parsed.tags.push(tag),
            None => {
                proxy_log::debug!(tags = raw, pair = segment, "dropping malformed tag pair");
                parsed.malformed += 1;

                if policy == TagPolicy::Strict {
                    parsed.tags.clear();
                    return parsed;
                }
            }
        }
    }

    if parsed.malformed > 0 {
        metric!(counter(ProxyCounters::TagsDropped) += parsed.malformed as u64);
    }

    parsed
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn dropped(registry: &proxy_stats::StatsRegistry) -> u64 {
        registry.counter_value("metrics_tags_dropped_total", &[])
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!(
            Tag::parse(" host = web1 "),
            Some(Tag {
                key: "host",
                value: "web1"
            })
        );
        assert_eq!(Tag::parse("badpair"), None);
        assert_eq!(Tag::parse("=web1"), None);
        assert_eq!(Tag::parse("host= "), None);
        assert_eq!(Tag::parse("a=b=c"), None);
    }

    #[test]
    fn test_lenient_drops_only_bad_pairs() {
        let registry = proxy_stats::with_test_registry(|| {
            let parsed = parse_tags("host=web1,badpair,env=", TagPolicy::Lenient);
            assert_eq!(parsed.to_string(), ",host=web1");
            assert!(!parsed.is_valid());
        });

        assert_eq!(dropped(&registry), 2);
    }

    #[test]
    fn test_strict_drops_all_tags() {
        let registry = proxy_stats::with_test_registry(|| {
            let parsed = parse_tags("host=web1,badpair,env=prod", TagPolicy::Strict);
            assert_eq!(parsed.to_string(), "");
            assert_eq!(parsed.malformed(), 1);
        });

        assert_eq!(dropped(&registry), 0);
    }

    #[test]
    fn test_valid_list_is_trimmed() {
        for policy in [TagPolicy::Strict, TagPolicy::Lenient] {
            let parsed = parse_tags("  host=web1 , env = prod ", policy);
            assert!(parsed.is_valid());
            assert_eq!(parsed.to_string(), ",host=web1,env=prod");
        }
    }

    #[test]
    fn test_blank_list() {
        let registry = proxy_stats::with_test_registry(|| {
            for raw in ["", "   "] {
                let parsed = parse_tags(raw, TagPolicy::Lenient);
                assert!(parsed.is_valid());
                assert_eq!(parsed.to_string(), "");
            }
        });

        assert_eq!(dropped(&registry), 0);
    }

    #[test]
    fn test_nothing_survives() {
        let registry = proxy_stats::with_test_registry(|| {
            let parsed = parse_tags("a,b=,=c,", TagPolicy::Lenient);
            assert!(parsed.tags().is_empty());
            assert_eq!(parsed.to_string(), "");
        });

        assert_eq!(dropped(&registry), 4);
    }

    #[test]
    fn test_duplicate_keys_pass() {
        let parsed = parse_tags("env=prod,env=dev", TagPolicy::Lenient);
        assert_eq!(parsed.to_string(), ",env=prod,env=dev");
    }
}
