//! Search and evidence value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SOURCE TYPE
// ============================================================================

/// Kind of publisher behind a piece of evidence.
///
/// Declaration order is canonical-selection priority: an official source
/// always wins over media, media over market venues, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Official,
    Media,
    Market,
    Social,
    Onchain,
}

const SOCIAL_HOSTS: &[&str] = &[
    "x.com",
    "twitter.com",
    "reddit.com",
    "t.me",
    "facebook.com",
    "instagram.com",
    "tiktok.com",
    "youtube.com",
    "threads.net",
    "bsky.app",
    "discord.com",
];

const MARKET_HOSTS: &[&str] = &[
    "polymarket.com",
    "kalshi.com",
    "manifold.markets",
    "predictit.org",
    "metaculus.com",
    "coingecko.com",
    "coinmarketcap.com",
];

const ONCHAIN_HOSTS: &[&str] = &[
    "etherscan.io",
    "polygonscan.com",
    "solscan.io",
    "dune.com",
    "arkhamintelligence.com",
    "debank.com",
    "basescan.org",
];

const OFFICIAL_HOSTS: &[&str] = &[
    "who.int",
    "un.org",
    "europa.eu",
    "federalreserve.gov",
    "sec.gov",
    "fifa.com",
    "nba.com",
    "nfl.com",
    "olympics.com",
];

impl SourceType {
    /// Lower is more authoritative.
    pub fn priority(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Media => "media",
            Self::Market => "market",
            Self::Social => "social",
            Self::Onchain => "onchain",
        }
    }

    /// Classify a bare domain. Unknown domains are treated as media.
    pub fn classify_domain(domain: &str) -> Self {
        let domain = domain.trim().to_ascii_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain);
        let matches = |hosts: &[&str]| {
            hosts
                .iter()
                .any(|h| domain == *h || domain.ends_with(&format!(".{}", h)))
        };

        if matches(SOCIAL_HOSTS) {
            Self::Social
        } else if matches(ONCHAIN_HOSTS) {
            Self::Onchain
        } else if matches(MARKET_HOSTS) {
            Self::Market
        } else if matches(OFFICIAL_HOSTS)
            || domain.ends_with(".gov")
            || domain.ends_with(".mil")
            || domain.starts_with("gov.")
            || domain.contains(".gov.")
            || domain.contains(".gob.")
            || domain.ends_with(".int")
        {
            Self::Official
        } else {
            Self::Media
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SEARCH LANE
// ============================================================================

/// Parallel search track covering one evidence angle of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchLane {
    /// Latest developments
    Update,
    /// Primary / official sources
    Primary,
    /// Evidence against the leading outcome
    Counter,
    /// Social chatter
    Chatter,
}

impl SearchLane {
    pub const ALL: [SearchLane; 4] = [
        SearchLane::Update,
        SearchLane::Primary,
        SearchLane::Counter,
        SearchLane::Chatter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Primary => "primary",
            Self::Counter => "counter",
            Self::Chatter => "chatter",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "update" => Some(Self::Update),
            "primary" => Some(Self::Primary),
            "counter" => Some(Self::Counter),
            "chatter" => Some(Self::Chatter),
            _ => None,
        }
    }

    /// Query issued on this lane for an event title.
    pub fn query_for(&self, title: &str) -> String {
        let title = title.trim();
        match self {
            Self::Update => format!("{} latest news", title),
            Self::Primary => format!("{} official statement", title),
            Self::Counter => format!("{} unlikely OR denied OR delayed", title),
            Self::Chatter => format!("{} reddit OR twitter", title),
        }
    }
}

impl fmt::Display for SearchLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SEARCH HIT / EVIDENCE CANDIDATE
// ============================================================================

/// Uniform web-search record, independent of the upstream result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub lane: SearchLane,
    pub query: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub domain: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_type: SourceType,
}

/// Deduplicated evidence item.
///
/// Exactly one member of each near-duplicate cluster has `repeated == false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    pub source_type: SourceType,
    /// URL as returned by search, trimmed
    pub url: String,
    pub domain: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Claim text (title, or snippet when the title is empty)
    pub claim: String,
    pub similarity_key: String,
    pub repeated: bool,
    pub lane: SearchLane,
    pub query: String,
    /// Index of the cluster this candidate belongs to
    pub cluster: usize,
}
