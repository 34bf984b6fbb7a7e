//! Sample engine (C8, §4.8): matches [`MftRecord`]s against a
//! [`RuleConfig`] set, tracks per-rule and global quotas, and produces
//! [`Sample`]s in a deterministic order.
//!
//! Grounded in the teacher's `formatters/src/fat32/validation.rs`-style
//! staged check (cheap structural checks first, expensive ones last) —
//! generalized from "is this filesystem structure valid" to "does this
//! file match a collection rule", cheapest matchers (name/path/size/
//! extension) evaluated before the ones that need the file's bytes
//! (header signature, yara, hash-list).

use std::collections::HashMap;

use orc_core::config::{ContentAction, HashAlgo, RuleConfig};
use orc_core::{Frn, OrcError, Result, Status};

use crate::archive::hashing::HashAccumulator;

/// Bytes read for header-signature/yara matching — enough for any
/// realistic magic-number check without pulling the whole file in.
const HEADER_PREFIX_LEN: usize = 4096;

/// Sentinel passed to `read_prefix` to request the entire file (hash-list
/// matching needs the full content's digest, not a prefix). Callers clip
/// this to the actual data length, so it never causes an allocation of
/// this size.
const FULL_CONTENT: usize = usize::MAX;

/// A single matched sample, ready to be handed to the archive pipeline
/// (C9). Carries enough metadata to populate one CSV row (§6) without
/// the archive stage needing to re-consult the MFT.
#[derive(Debug, Clone)]
pub struct Sample {
    pub frn: Frn,
    pub parent_frn: Frn,
    pub full_path: String,
    pub size: u64,
    pub rule_id: String,
    pub creation_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_modified_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_access_time: Option<chrono::DateTime<chrono::Utc>>,
    pub mft_change_time: Option<chrono::DateTime<chrono::Utc>>,
    pub action: ContentAction,
    pub hashes: Vec<HashAlgo>,
    pub status: Status,
}

/// Opaque byte-pattern matcher (yara is an external collaborator per
/// §1 — this crate only defines the narrow interface a real yara
/// engine would implement; no bundled implementation ships here).
pub trait ContentMatcher: Send + Sync {
    fn matches(&self, rule_name: &str, data: &[u8]) -> Result<bool>;
}

/// A matcher that always reports no match — the default when no
/// content-matching backend is wired in. Keeps `RuleSet` usable (for
/// rules with no `yara_rules` entries) without fabricating a yara
/// dependency.
pub struct NullContentMatcher;

impl ContentMatcher for NullContentMatcher {
    fn matches(&self, _rule_name: &str, _data: &[u8]) -> Result<bool> {
        Ok(false)
    }
}

/// Candidate metadata a rule is evaluated against, gathered cheaply
/// from MFT attributes without touching file content.
pub struct Candidate<'a> {
    pub frn: Frn,
    pub parent_frn: Frn,
    pub full_path: &'a str,
    pub name: &'a str,
    pub size: u64,
    pub creation_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_modified_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_access_time: Option<chrono::DateTime<chrono::Utc>>,
    pub mft_change_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Per-rule and global byte/count quotas (§4.8 edge case: "a rule's
/// quota is exhausted mid-volume").
#[derive(Debug, Default)]
struct QuotaState {
    total_bytes: u64,
    sample_count: u64,
    per_rule_bytes: HashMap<String, u64>,
}

pub struct SampleEngine<'m> {
    rules: Vec<RuleConfig>,
    matcher: &'m dyn ContentMatcher,
    hash_lists: HashMap<String, Vec<String>>,
    quotas: QuotaState,
    limits: orc_core::config::Limits,
}

impl<'m> SampleEngine<'m> {
    pub fn new(
        rules: Vec<RuleConfig>,
        matcher: &'m dyn ContentMatcher,
        hash_lists: HashMap<String, Vec<String>>,
        limits: orc_core::config::Limits,
    ) -> Self {
        SampleEngine { rules, matcher, hash_lists, quotas: QuotaState::default(), limits }
    }

    /// Evaluates every rule against `candidate`, cheapest checks first
    /// (§4.8): name/path globs, size bounds, extension, then (only if
    /// those pass and the rule needs it) header bytes / yara / hash
    /// list, each requiring `read_prefix`/`read_all` to be called at
    /// most once. Returns `None` when no rule matches or every
    /// matching rule's quota is already exhausted; returns
    /// `Some((rule_id, Status::SkippedQuota))` rather than silently
    /// dropping a file that *would* have matched but for quota.
    pub fn evaluate<F>(
        &mut self,
        candidate: &Candidate,
        mut read_prefix: F,
    ) -> Result<Option<(String, Status)>>
    where
        F: FnMut(usize) -> Result<Vec<u8>>,
    {
        // A global quota already being exhausted doesn't stop the
        // engine from recording the hit (§4.8) — it just means no
        // further content is read for it. Structural-only matching
        // below still runs so a file that *would* match gets a
        // `skipped-quota` row instead of silently vanishing.
        let quota_exhausted = self.limits.max_total_bytes.map_or(false, |max| self.quotas.total_bytes >= max)
            || self.limits.max_sample_count.map_or(false, |max| self.quotas.sample_count >= max);

        for rule in self.rules.clone() {
            if !structural_match(&rule, candidate) {
                continue;
            }

            if quota_exhausted {
                return Ok(Some((rule.id.clone(), Status::SkippedQuota)));
            }

            let needs_prefix = !rule.header_signatures.is_empty() || !rule.yara_rules.is_empty();
            let prefix = if needs_prefix {
                Some(read_prefix(HEADER_PREFIX_LEN)?)
            } else {
                None
            };

            if !rule.header_signatures.is_empty() {
                let data = prefix.as_deref().unwrap_or(&[]);
                if !rule.header_signatures.iter().any(|sig| data.starts_with(sig)) {
                    continue;
                }
            }

            if !rule.yara_rules.is_empty() {
                let data = prefix.as_deref().unwrap_or(&[]);
                let mut any = false;
                for yara_rule in &rule.yara_rules {
                    if self.matcher.matches(yara_rule, data)? {
                        any = true;
                        break;
                    }
                }
                if !any {
                    continue;
                }
            }

            if !rule.hash_list.is_empty() {
                // Membership needs the file's actual digest, not just
                // whether the named list is configured (§4.8) — read
                // the whole content (not just the header prefix) and
                // hash it with every algorithm a hash-list entry could
                // plausibly be, then compare case-insensitively.
                let content = read_prefix(FULL_CONTENT)?;
                let mut acc = HashAccumulator::requested(&[HashAlgo::Md5, HashAlgo::Sha1, HashAlgo::Sha256]);
                acc.update(&content);
                let digests = acc.finish();
                let candidate_hashes: Vec<String> =
                    [digests.md5, digests.sha1, digests.sha256].into_iter().flatten().collect();

                let in_list = rule.hash_list.iter().any(|list_name| {
                    self.hash_lists
                        .get(list_name)
                        .map(|known| known.iter().any(|h| candidate_hashes.iter().any(|c| c.eq_ignore_ascii_case(h))))
                        .unwrap_or(false)
                });
                if !in_list {
                    continue;
                }
            }

            let rule_max = rule.max_per_sample_bytes.or(self.limits.max_per_sample_bytes);
            if let Some(max) = rule_max {
                if candidate.size > max {
                    return Ok(Some((rule.id.clone(), Status::SkippedQuota)));
                }
            }

            let rule_bytes = self.quotas.per_rule_bytes.entry(rule.id.clone()).or_insert(0);
            let would_total = self.quotas.total_bytes + candidate.size;
            if let Some(max_total) = self.limits.max_total_bytes {
                if would_total > max_total {
                    return Ok(Some((rule.id.clone(), Status::SkippedQuota)));
                }
            }

            *rule_bytes += candidate.size;
            self.quotas.total_bytes = would_total;
            self.quotas.sample_count += 1;

            return Ok(Some((rule.id.clone(), Status::ok(false))));
        }

        Ok(None)
    }

    pub fn rule(&self, id: &str) -> Result<&RuleConfig> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| OrcError::unsupported(format!("no such rule {id}")))
    }
}

fn structural_match(rule: &RuleConfig, candidate: &Candidate) -> bool {
    if let Some(min) = rule.size_min {
        if candidate.size < min {
            return false;
        }
    }
    if let Some(max) = rule.size_max {
        if candidate.size > max {
            return false;
        }
    }
    if !rule.path_globs.is_empty()
        && !rule.path_globs.iter().any(|g| glob_match(g, candidate.full_path))
    {
        return false;
    }
    if !rule.name_globs.is_empty()
        && !rule.name_globs.iter().any(|g| glob_match(g, candidate.name))
    {
        return false;
    }
    if !rule.extensions.is_empty() {
        let ext = candidate
            .name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !rule.extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext)) {
            return false;
        }
    }
    true
}

fn glob_match(pattern: &str, text: &str) -> bool {
    glob::Pattern::new(pattern).map(|p| p.matches(text)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::config::ContentAction;

    fn rule(id: &str) -> RuleConfig {
        RuleConfig {
            id: id.to_string(),
            path_globs: vec![],
            name_globs: vec!["*.docx".to_string()],
            size_min: None,
            size_max: None,
            header_signatures: vec![],
            extensions: vec![],
            yara_rules: vec![],
            hash_list: vec![],
            hashes: vec![HashAlgo::Sha256],
            action: ContentAction::CollectDataStream,
            max_per_sample_bytes: None,
        }
    }

    fn candidate<'a>(name: &'a str, path: &'a str, size: u64) -> Candidate<'a> {
        Candidate {
            frn: Frn::new(1, 1),
            parent_frn: Frn::ROOT,
            full_path: path,
            name,
            size,
            creation_time: None,
            last_modified_time: None,
            last_access_time: None,
            mft_change_time: None,
        }
    }

    #[test]
    fn matches_by_name_glob() {
        let matcher = NullContentMatcher;
        let mut engine = SampleEngine::new(vec![rule("r1")], &matcher, HashMap::new(), Default::default());
        let cand = candidate("report.docx", "\\Users\\a\\report.docx", 100);
        let result = engine.evaluate(&cand, |_| Ok(vec![])).unwrap();
        assert_eq!(result.unwrap().0, "r1");
    }

    #[test]
    fn non_matching_extension_is_skipped() {
        let matcher = NullContentMatcher;
        let mut engine = SampleEngine::new(vec![rule("r1")], &matcher, HashMap::new(), Default::default());
        let cand = candidate("report.txt", "\\Users\\a\\report.txt", 100);
        let result = engine.evaluate(&cand, |_| Ok(vec![])).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn per_sample_quota_exceeded_yields_skipped_status() {
        let mut r = rule("r1");
        r.max_per_sample_bytes = Some(10);
        let matcher = NullContentMatcher;
        let mut engine = SampleEngine::new(vec![r], &matcher, HashMap::new(), Default::default());
        let cand = candidate("report.docx", "\\Users\\a\\report.docx", 1000);
        let result = engine.evaluate(&cand, |_| Ok(vec![])).unwrap();
        assert_eq!(result.unwrap().1, Status::SkippedQuota);
    }

    #[test]
    fn global_sample_count_limit_stops_further_matches() {
        let matcher = NullContentMatcher;
        let limits = orc_core::config::Limits { max_total_bytes: None, max_per_sample_bytes: None, max_sample_count: Some(1) };
        let mut engine = SampleEngine::new(vec![rule("r1")], &matcher, HashMap::new(), limits);
        let cand = candidate("report.docx", "\\Users\\a\\report.docx", 10);
        assert_eq!(engine.evaluate(&cand, |_| Ok(vec![])).unwrap().unwrap().1, Status::Ok);
        // Past the global quota, a structurally matching file still
        // produces a row — just a `skipped-quota` one, not `None`
        // (§4.8: "the engine records the hit").
        assert_eq!(
            engine.evaluate(&cand, |_| Ok(vec![])).unwrap().unwrap().1,
            Status::SkippedQuota
        );
    }

    #[test]
    fn global_quota_exhausted_does_not_record_non_matching_files() {
        let matcher = NullContentMatcher;
        let limits = orc_core::config::Limits { max_total_bytes: None, max_per_sample_bytes: None, max_sample_count: Some(0) };
        let mut engine = SampleEngine::new(vec![rule("r1")], &matcher, HashMap::new(), limits);
        let non_matching = candidate("report.txt", "\\Users\\a\\report.txt", 10);
        assert!(engine.evaluate(&non_matching, |_| Ok(vec![])).unwrap().is_none());
    }

    #[test]
    fn hash_list_matcher_checks_digest_membership() {
        let matcher = NullContentMatcher;
        let mut r = rule("r1");
        r.hash_list = vec!["known-bad".to_string()];
        let mut hash_lists = HashMap::new();
        // An arbitrary digest that the candidate's content below does
        // not hash to.
        hash_lists.insert(
            "known-bad".to_string(),
            vec!["909e9dd7f0c64a1e50cc70b4b98b0b9d32e1ab4aa0a00a4cb10a550628c0e6b1".to_string()],
        );
        let mut engine = SampleEngine::new(vec![r], &matcher, hash_lists, Default::default());
        let cand = candidate("report.docx", "\\Users\\a\\report.docx", 7);

        let result = engine.evaluate(&cand, |_| Ok(b"not malware content".to_vec())).unwrap();
        assert!(result.is_none(), "content not in the hash list must not match");
    }

    #[test]
    fn hash_list_matcher_matches_known_digest() {
        let matcher = NullContentMatcher;
        let mut r = rule("r1");
        r.hash_list = vec!["known-bad".to_string()];
        let mut acc = HashAccumulator::requested(&[HashAlgo::Sha256]);
        acc.update(b"exact content");
        let digest = acc.finish().sha256.unwrap();
        let mut hash_lists = HashMap::new();
        hash_lists.insert("known-bad".to_string(), vec![digest]);
        let mut engine = SampleEngine::new(vec![r], &matcher, hash_lists, Default::default());
        let cand = candidate("report.docx", "\\Users\\a\\report.docx", 13);

        let result = engine.evaluate(&cand, |_| Ok(b"exact content".to_vec())).unwrap();
        assert_eq!(result.unwrap().0, "r1");
    }
}
