//! HERALD Evidence - Deduplication and Near-Duplicate Clustering
//!
//! Turns raw search hits from every lane into evidence candidates:
//! exact duplicates (same normalized URL) are dropped, near duplicates
//! (similar domain + title) are grouped, and one canonical member per group
//! is chosen by source authority. Everything here is pure and
//! deterministic for a given input order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use herald_core::{EvidenceCandidate, SearchHit, SourceType};
use serde::{Deserialize, Serialize};

/// Minimum bigram Dice similarity for two keys to share a cluster.
pub const SIMILARITY_THRESHOLD: f64 = 0.9;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Canonical form of a URL for exact-duplicate detection.
///
/// Trims and lowercases, drops the scheme's default port and a bare `/`
/// path. Query string and fragment are kept.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim().to_lowercase();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url.as_str()),
    };

    let split_at = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split_at);

    let authority = match scheme {
        Some("https") => authority.strip_suffix(":443").unwrap_or(authority),
        Some("http") => authority.strip_suffix(":80").unwrap_or(authority),
        _ => authority,
    };

    let tail = if tail == "/" {
        ""
    } else if tail.starts_with("/?") || tail.starts_with("/#") {
        &tail[1..]
    } else {
        tail
    };

    match scheme {
        Some(scheme) => format!("{}://{}{}", scheme, authority, tail),
        None => format!("{}{}", authority, tail),
    }
}

/// Lowercased host without `www.` or port.
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    let host = domain.split(':').next().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// Lowercased alphanumeric words separated by single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn similarity_key(domain: &str, title: &str) -> String {
    format!("{} {}", normalize_domain(domain), normalize_title(title))
}

fn host_from_url(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or_default().to_string()
}

// ============================================================================
// SIMILARITY
// ============================================================================

fn bigrams(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Sørensen-Dice coefficient over character bigram multisets, in [0, 1].
pub fn bigram_dice(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (ba, bb) = (bigrams(a), bigrams(b));
    let total: usize = ba.values().sum::<usize>() + bb.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let shared: usize = ba
        .iter()
        .map(|(gram, n)| (*n).min(bb.get(gram).copied().unwrap_or(0)))
        .sum();
    2.0 * shared as f64 / total as f64
}

// ============================================================================
// CLUSTERING
// ============================================================================

/// Ordering used to pick a cluster's canonical member: source authority,
/// then earliest publication (undated last), then normalized URL, lane and
/// query.
pub fn canonical_order(a: &EvidenceCandidate, b: &EvidenceCandidate) -> Ordering {
    let published = match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    a.source_type
        .priority()
        .cmp(&b.source_type.priority())
        .then(published)
        .then_with(|| normalize_url(&a.url).cmp(&normalize_url(&b.url)))
        .then_with(|| a.lane.cmp(&b.lane))
        .then_with(|| a.query.cmp(&b.query))
}

fn candidate_from_hit(hit: &SearchHit) -> EvidenceCandidate {
    let url = hit.url.trim().to_string();
    let domain = if hit.domain.trim().is_empty() {
        normalize_domain(&host_from_url(&url))
    } else {
        normalize_domain(&hit.domain)
    };
    let claim = if hit.title.trim().is_empty() {
        hit.snippet.trim().to_string()
    } else {
        hit.title.trim().to_string()
    };
    EvidenceCandidate {
        source_type: hit.source_type,
        similarity_key: similarity_key(&domain, &claim),
        url,
        domain,
        published_at: hit.published_at,
        claim,
        repeated: false,
        lane: hit.lane,
        query: hit.query.clone(),
        cluster: 0,
    }
}

/// Build evidence candidates from search hits.
///
/// Hits with an empty URL are dropped and only the first hit per
/// normalized URL is kept; candidates carry the hit's URL as given, trimmed.
/// Survivors are sorted by similarity key then normalized URL and clustered
/// greedily: each joins the first cluster whose anchor (first
/// member) has Dice similarity of at least [`SIMILARITY_THRESHOLD`], or
/// starts a new one. Exactly one member per cluster keeps
/// `repeated == false`.
pub fn build_evidence_candidates(hits: &[SearchHit]) -> Vec<EvidenceCandidate> {
    let mut seen = HashSet::new();
    let mut keyed: Vec<(String, EvidenceCandidate)> = hits
        .iter()
        .filter(|hit| !hit.url.trim().is_empty())
        .filter_map(|hit| {
            let key = normalize_url(&hit.url);
            seen.insert(key.clone()).then(|| (key, candidate_from_hit(hit)))
        })
        .collect();

    keyed.sort_by(|(ka, a), (kb, b)| {
        a.similarity_key
            .cmp(&b.similarity_key)
            .then_with(|| ka.cmp(kb))
    });
    let mut candidates: Vec<EvidenceCandidate> = keyed.into_iter().map(|(_, c)| c).collect();

    // Anchor key and member indices per cluster, in creation order.
    let mut clusters: Vec<(String, Vec<usize>)> = Vec::new();
    for (idx, candidate) in candidates.iter_mut().enumerate() {
        let found = clusters
            .iter()
            .position(|(anchor, _)| bigram_dice(anchor, &candidate.similarity_key) >= SIMILARITY_THRESHOLD);
        let cluster = match found {
            Some(c) => c,
            None => {
                clusters.push((candidate.similarity_key.clone(), Vec::new()));
                clusters.len() - 1
            }
        };
        clusters[cluster].1.push(idx);
        candidate.cluster = cluster;
    }

    for (_, members) in &clusters {
        let canonical = members
            .iter()
            .copied()
            .min_by(|&a, &b| canonical_order(&candidates[a], &candidates[b]));
        for &member in members {
            candidates[member].repeated = Some(member) != canonical;
        }
    }

    tracing::debug!(
        hits = hits.len(),
        candidates = candidates.len(),
        clusters = clusters.len(),
        "Built evidence candidates"
    );
    candidates
}

/// Canonical (non-repeated) candidates, in candidate order.
pub fn canonical_evidence(candidates: &[EvidenceCandidate]) -> Vec<EvidenceCandidate> {
    candidates.iter().filter(|c| !c.repeated).cloned().collect()
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Counts over a candidate set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub total: usize,
    pub canonical: usize,
    pub repeated: usize,
    pub clusters: usize,
    /// Canonical candidates per source type
    pub by_source: BTreeMap<SourceType, usize>,
}

impl EvidenceSummary {
    pub fn from_candidates(candidates: &[EvidenceCandidate]) -> Self {
        let mut summary = Self {
            total: candidates.len(),
            ..Self::default()
        };
        let mut clusters = HashSet::new();
        for c in candidates {
            clusters.insert(c.cluster);
            if c.repeated {
                summary.repeated += 1;
            } else {
                summary.canonical += 1;
                *summary.by_source.entry(c.source_type).or_insert(0) += 1;
            }
        }
        summary.clusters = clusters.len();
        summary
    }

    /// Number of canonical candidates from official sources.
    pub fn official(&self) -> usize {
        self.by_source.get(&SourceType::Official).copied().unwrap_or(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::SearchLane;
    use herald_test_utils::fixtures::search_hit;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("  HTTPS://Example.com/A  "), "https://example.com/a");
        assert_eq!(normalize_url("https://example.com:443/"), "https://example.com");
        assert_eq!(normalize_url("http://example.com:80/x"), "http://example.com/x");
        assert_eq!(normalize_url("http://example.com:8080/"), "http://example.com:8080");
        assert_eq!(normalize_url("https://example.com/?q=1#top"), "https://example.com?q=1#top");
        assert_eq!(normalize_url("https://example.com/x?q=1#top"), "https://example.com/x?q=1#top");
    }

    #[test]
    fn test_normalize_title_and_domain() {
        assert_eq!(normalize_title("  Fed SIGNALS: March cut!! "), "fed signals march cut");
        assert_eq!(normalize_domain("WWW.Reuters.com:443"), "reuters.com");
        assert_eq!(
            similarity_key("www.reuters.com", "Fed, again"),
            "reuters.com fed again"
        );
    }

    #[test]
    fn test_bigram_dice() {
        assert_eq!(bigram_dice("night", "night"), 1.0);
        assert!((bigram_dice("night", "nacht") - 0.25).abs() < 1e-9);
        assert_eq!(bigram_dice("a", "b"), 0.0);
        assert_eq!(bigram_dice("", ""), 1.0);
    }

    #[test]
    fn test_same_url_differing_case_and_whitespace_dedupes() {
        let hits = vec![
            search_hit(SearchLane::Update, "https://Reuters.com/Fed ", "Fed holds"),
            search_hit(SearchLane::Primary, " https://reuters.com/fed", "Fed holds rates"),
        ];
        let candidates = build_evidence_candidates(&hits);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].lane, SearchLane::Update);
        assert!(!candidates[0].repeated);
    }

    #[test]
    fn test_candidate_keeps_original_url_casing() {
        let hits = vec![
            search_hit(SearchLane::Chatter, " https://www.youtube.com/watch?v=dQw4w9WgXcQ ", "Rate call explained"),
            search_hit(SearchLane::Update, "https://WWW.YouTube.com/WATCH?v=DQW4W9WGXCQ", "Rate call explained"),
        ];
        let candidates = build_evidence_candidates(&hits);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(candidates[0].lane, SearchLane::Chatter);
    }

    #[test]
    fn test_empty_urls_dropped() {
        let hits = vec![
            search_hit(SearchLane::Update, "  ", "blank"),
            search_hit(SearchLane::Update, "https://a.com/1", "kept"),
        ];
        assert_eq!(build_evidence_candidates(&hits).len(), 1);
    }

    #[test]
    fn test_near_duplicates_cluster_with_one_canonical() {
        let hits = vec![
            search_hit(SearchLane::Update, "https://reuters.com/a", "Fed signals March cut"),
            search_hit(SearchLane::Update, "https://www.reuters.com/b", "Fed signals March cut!"),
            search_hit(SearchLane::Update, "https://reuters.com/c", "Oil prices slump"),
        ];
        let candidates = build_evidence_candidates(&hits);
        let summary = EvidenceSummary::from_candidates(&candidates);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.canonical, 2);
        assert_eq!(summary.repeated, 1);

        let fed: Vec<_> = candidates
            .iter()
            .filter(|c| c.claim.starts_with("Fed"))
            .collect();
        assert_eq!(fed[0].cluster, fed[1].cluster);
        assert_eq!(fed.iter().filter(|c| !c.repeated).count(), 1);
        assert_eq!(
            fed.iter().find(|c| !c.repeated).map(|c| c.url.as_str()),
            Some("https://reuters.com/a")
        );
    }

    #[test]
    fn test_official_wins_regardless_of_order() {
        let mut official = search_hit(SearchLane::Primary, "https://z.example.com/statement", "Rate decision statement");
        official.source_type = SourceType::Official;
        official.domain = "example.com".into();
        let mut media = search_hit(SearchLane::Update, "https://a.example.com/story", "Rate decision statement");
        media.source_type = SourceType::Media;
        media.domain = "example.com".into();

        for hits in [vec![official.clone(), media.clone()], vec![media.clone(), official.clone()]] {
            let candidates = build_evidence_candidates(&hits);
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[0].cluster, candidates[1].cluster);
            let canonical: Vec<_> = canonical_evidence(&candidates);
            assert_eq!(canonical.len(), 1);
            assert_eq!(canonical[0].source_type, SourceType::Official);
        }
    }

    #[test]
    fn test_earliest_publication_breaks_ties() {
        let mut early = search_hit(SearchLane::Update, "https://b.com/z", "Same story");
        early.domain = "b.com".into();
        early.published_at = chrono::DateTime::from_timestamp(1_000, 0);
        let mut undated = search_hit(SearchLane::Update, "https://b.com/a", "Same story");
        undated.domain = "b.com".into();

        let candidates = build_evidence_candidates(&[undated, early]);
        let canonical = canonical_evidence(&candidates);
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].url, "https://b.com/z");
    }

    #[test]
    fn test_claim_falls_back_to_snippet() {
        let mut hit = search_hit(SearchLane::Chatter, "https://reddit.com/r/x", "");
        hit.snippet = "  thread about the Fed ".into();
        let candidates = build_evidence_candidates(&[hit]);
        assert_eq!(candidates[0].claim, "thread about the Fed");
        assert_eq!(candidates[0].similarity_key, "reddit.com thread about the fed");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
