//! Reference extraction from URLs and free text
//!
//! An [`Extractor`] is built once from an [`ExtractorConfig`] and then
//! shared. It holds every compiled pattern, so there is no process-wide
//! state and tests can construct as many differently-configured
//! extractors as they like.
//!
//! Text extraction tries three rules in order and stops at the first hit:
//!
//! 1. bracket subjects such as `[owner/repo] Bump lodash (#1234)`
//! 2. a recognised URL anywhere in the text
//! 3. a loose `Bug N` / `[Bug N]` mention, resolved against the default
//!    Bugzilla host
//!
//! Each rule scans every supplied text before the next rule is tried.
//! Notifications run the rules once per family, so a subject naming a pull
//! request and a body linking a bug yield one reference each.

mod bugzilla;
mod github;

pub use bugzilla::clean_bugzilla_tab_title;

use crate::entity::{EntityRef, Family, FAMILIES};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Settings baked into an [`Extractor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Host assumed for `Bug N` mentions that carry no link
    pub default_bugzilla_host: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            default_bugzilla_host: "bugzilla.mozilla.org".to_string(),
        }
    }
}

/// Immutable, once-compiled reference extractor
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
    url_candidate: Regex,
    github_path: Regex,
    subject: Regex,
    loose_bug: Regex,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config: ExtractorConfig {
                default_bugzilla_host: config.default_bugzilla_host.trim().to_lowercase(),
            },
            url_candidate: Regex::new(r#"https?://[^\s<>()"']+"#).expect("valid regex"),
            github_path: Regex::new(r"^/([^/]+)/([^/]+)/(issues|pull)/(\d+)").expect("valid regex"),
            subject: Regex::new(r"\[([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)\].*#(\d+)").expect("valid regex"),
            loose_bug: Regex::new(r"\bBug\s+(\d+)\b").expect("valid regex"),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Recognise a single URL. Fragment and query never affect the match.
    pub fn from_url(&self, raw: &str) -> Option<EntityRef> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let mut parsed = Url::parse(raw).ok()?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return None;
        }
        let host = parsed.host_str()?.to_lowercase();

        // show_bug.cgi keeps its id in the query, so read it before dropping the query
        let show_bug_id = bugzilla::show_bug_id(&parsed);
        parsed.set_fragment(None);
        parsed.set_query(None);

        if let Some(found) = github::from_path(&self.github_path, &host, parsed.path()) {
            return Some(found);
        }
        bugzilla::from_parts(&host, parsed.path(), show_bug_id)
    }

    /// Run the three text rules over `texts`, first hit wins.
    pub fn from_text(&self, texts: &[&str]) -> Option<EntityRef> {
        self.bracket_rule(texts)
            .or_else(|| self.url_rule(texts))
            .or_else(|| self.loose_rule(texts))
    }

    /// Extract from a captured notification: at most one reference per
    /// family, in family display order.
    ///
    /// Field order differs per rule: subjects show up in preview or title,
    /// links mostly in the snippet body.
    pub fn from_signal(&self, title: &str, preview: &str, snippet: &str) -> Vec<EntityRef> {
        FAMILIES
            .into_iter()
            .filter_map(|family| self.signal_rules(family, title, preview, snippet))
            .collect()
    }

    fn signal_rules(&self, family: Family, title: &str, preview: &str, snippet: &str) -> Option<EntityRef> {
        let links = [snippet, preview, title];
        match family {
            Family::GitHub => self
                .bracket_rule(&[preview, title])
                .or_else(|| self.url_rule_for(family, &links)),
            Family::Bugzilla => self
                .url_rule_for(family, &links)
                .or_else(|| self.loose_rule(&[preview, title, snippet])),
        }
    }

    fn bracket_rule(&self, texts: &[&str]) -> Option<EntityRef> {
        texts
            .iter()
            .find_map(|text| github::from_subject(&self.subject, text))
    }

    fn url_rule(&self, texts: &[&str]) -> Option<EntityRef> {
        self.urls(texts).next()
    }

    fn url_rule_for(&self, family: Family, texts: &[&str]) -> Option<EntityRef> {
        self.urls(texts).find(|found| found.family == family)
    }

    /// Every recognised URL reference in `texts`, in text order
    fn urls<'a>(&'a self, texts: &'a [&'a str]) -> impl Iterator<Item = EntityRef> + 'a {
        texts.iter().flat_map(move |text| {
            self.url_candidate
                .find_iter(*text)
                .filter_map(move |m| self.from_url(trim_trailing_punctuation(m.as_str())))
        })
    }

    fn loose_rule(&self, texts: &[&str]) -> Option<EntityRef> {
        if self.config.default_bugzilla_host.is_empty() {
            return None;
        }
        texts.iter().find_map(|text| {
            bugzilla::from_loose_mention(&self.loose_bug, &self.config.default_bugzilla_host, text)
        })
    }
}

/// Prose often ends a link with sentence punctuation.
fn trim_trailing_punctuation(candidate: &str) -> &str {
    candidate.trim_end_matches(['.', ',', ';', ':', '!', '?', ']', '>'])
}

fn parse_positive(digits: &str) -> Option<i64> {
    digits.parse::<i64>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Family;

    fn extractor() -> Extractor {
        Extractor::default()
    }

    #[test]
    fn test_bracket_subject_leaves_kind_unknown() {
        let found = extractor()
            .from_text(&["[mozilla/gecko-dev] Bump lodash (#1234)"])
            .unwrap();
        assert_eq!(found.family, Family::GitHub);
        assert_eq!(found.scope, "mozilla/gecko-dev");
        assert_eq!(found.local_id, 1234);
        assert_eq!(found.sub_kind, "");
    }

    #[test]
    fn test_pull_url_ignores_fragment() {
        let found = extractor()
            .from_url("https://github.com/mozilla/gecko-dev/pull/123#discussion_r1")
            .unwrap();
        assert_eq!(found.scope, "mozilla/gecko-dev");
        assert_eq!(found.local_id, 123);
        assert_eq!(found.sub_kind, "pull");
    }

    #[test]
    fn test_issue_url_ignores_query() {
        let found = extractor()
            .from_url("https://github.com/o/r/issues/9?notification_referrer_id=abc")
            .unwrap();
        assert_eq!(found.sub_kind, "issue");
        assert_eq!(found.local_id, 9);
    }

    #[test]
    fn test_non_matching_urls() {
        let ex = extractor();
        assert!(ex.from_url("").is_none());
        assert!(ex.from_url("not a url").is_none());
        assert!(ex.from_url("https://github.com/o/r").is_none());
        assert!(ex.from_url("https://github.com/o/r/pull/0").is_none());
        assert!(ex.from_url("ftp://github.com/o/r/pull/1").is_none());
        assert!(ex.from_url("https://example.com/o/r/pull/1").is_none());
    }

    #[test]
    fn test_bracket_rule_beats_url_rule() {
        let found = extractor()
            .from_text(&["[a/b] Fix (#5) see https://github.com/c/d/pull/6"])
            .unwrap();
        assert_eq!(found.scope, "a/b");
        assert_eq!(found.local_id, 5);
    }

    #[test]
    fn test_url_rule_scans_all_texts_before_loose_rule() {
        let found = extractor()
            .from_text(&["Bug 42 is bad", "see https://bugzilla.example.org/show_bug.cgi?id=77."])
            .unwrap();
        assert_eq!(found.scope, "bugzilla.example.org");
        assert_eq!(found.local_id, 77);
    }

    #[test]
    fn test_loose_bug_uses_default_host() {
        let found = extractor().from_text(&["[Bug 1876543] New: crash on startup"]).unwrap();
        assert_eq!(found.family, Family::Bugzilla);
        assert_eq!(found.scope, "bugzilla.mozilla.org");
        assert_eq!(found.local_id, 1876543);
    }

    #[test]
    fn test_loose_bug_with_custom_host() {
        let ex = Extractor::new(ExtractorConfig {
            default_bugzilla_host: "Bugs.Example.ORG".to_string(),
        });
        let found = ex.from_text(&["Bug 5 updated"]).unwrap();
        assert_eq!(found.scope, "bugs.example.org");
    }

    #[test]
    fn test_loose_rule_disabled_without_host() {
        let ex = Extractor::new(ExtractorConfig {
            default_bugzilla_host: String::new(),
        });
        assert!(ex.from_text(&["Bug 5 updated"]).is_none());
    }

    #[test]
    fn test_signal_field_order() {
        let ex = extractor();
        // subject in the title wins over a link in the snippet
        let found = ex.from_signal("[o/r] Add thing (#3)", "", "https://github.com/x/y/pull/4");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].scope, "o/r");

        // snippet link wins over a preview link
        let found = ex.from_signal(
            "",
            "https://github.com/p/q/issues/1",
            "https://github.com/x/y/pull/4",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].scope, "x/y");

        assert!(ex.from_signal("lunch?", "anyone", "").is_empty());
    }

    #[test]
    fn test_signal_yields_one_reference_per_family() {
        let ex = extractor();
        let found = ex.from_signal(
            "[o/r] Fix crash (#3)",
            "",
            "https://bugzilla.mozilla.org/show_bug.cgi?id=99",
        );
        assert_eq!(found.len(), 2);
        assert_eq!((found[0].family, found[0].scope.as_str(), found[0].local_id), (Family::GitHub, "o/r", 3));
        assert_eq!(
            (found[1].family, found[1].scope.as_str(), found[1].local_id),
            (Family::Bugzilla, "bugzilla.mozilla.org", 99)
        );

        // a GitHub link ahead of a bug link does not hide the bug
        let found = ex.from_signal("", "", "https://github.com/o/r/pull/1 fixes Bug 77");
        let keys: Vec<String> = found.iter().map(EntityRef::key).collect();
        assert_eq!(keys, vec!["o/r#1", "bugzilla.mozilla.org#77"]);
    }

    #[test]
    fn test_debug_is_not_a_bug_mention() {
        assert!(extractor().from_text(&["debug 12 output"]).is_none());
    }
}
