//! Normalized identity keys for duplicate detection.
//!
//! Two spellings of the same company at the same place must collapse to one
//! key: corporate-form words, administrative-unit suffixes, whitespace, and
//! case all vary freely between data sources. The normalization is lossy on
//! purpose, but only exact normalized matches count as duplicates: there is
//! no fuzzy matching here, so the safe failure mode is a missed duplicate,
//! never a dropped lead.

use crate::models::CompanyIdentity;

/// Corporate-form markers removed from company names. Japanese forms are
/// removed wherever they appear (前株/後株 both occur in the wild); romanized
/// forms are dropped as standalone words only, so "Coca-Cola" keeps its "co".
pub const LEGAL_ENTITY_MARKERS: &[&str] = &[
    "株式会社",
    "有限会社",
    "合同会社",
    "合資会社",
    "合名会社",
    "一般社団法人",
    "一般財団法人",
    "特定非営利活動法人",
    "（株）",
    "(株)",
    "（有）",
    "(有)",
];

/// Romanized corporate-form words, matched as whole tokens after trimming
/// surrounding punctuation.
pub const LEGAL_ENTITY_WORDS: &[&str] = &[
    "inc",
    "incorporated",
    "ltd",
    "limited",
    "llc",
    "co",
    "corp",
    "corporation",
    "company",
    "kk",
    "k.k",
    "gk",
    "gmbh",
];

/// Administrative-unit words dropped from locations as standalone tokens.
pub const ADMIN_UNIT_WORDS: &[&str] = &["prefecture", "city", "ward", "county"];

/// Administrative-unit suffixes stripped from the end of a location string,
/// repeatedly, until none remains ("東京都" → "東京", "横浜市" → "横浜").
pub const ADMIN_UNIT_SUFFIXES: &[&str] = &[
    "都", "道", "府", "県", "市", "区", "町", "村", "郡", "-shi", "-ku", "-cho", "-machi", "-son",
    "-gun",
];

/// Punctuation squeezed out of both fields after suffix handling.
const SQUEEZED_PUNCTUATION: &[char] = &[
    '.', ',', '、', '。', '・', '･', '（', '）', '(', ')', '\'', '&',
];

/// Company name with corporate forms, whitespace, punctuation, and case
/// removed. Never returns an empty string for a non-empty input: if
/// stripping would erase everything, the lowercased compact form is kept.
pub fn clean_company_name(name: &str) -> String {
    let lowered = name.to_lowercase();

    let mut stripped = lowered.clone();
    for marker in LEGAL_ENTITY_MARKERS {
        stripped = stripped.replace(marker, " ");
    }

    let kept: Vec<&str> = stripped
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| SQUEEZED_PUNCTUATION.contains(&c)))
        .filter(|token| !token.is_empty() && !LEGAL_ENTITY_WORDS.contains(token))
        .collect();

    let cleaned = squeeze(&kept.join(""));
    if cleaned.is_empty() {
        squeeze(&lowered)
    } else {
        cleaned
    }
}

/// Location with administrative suffixes, whitespace, punctuation, and case
/// removed.
pub fn clean_location(location: &str) -> String {
    let lowered = location.to_lowercase();

    let kept: Vec<&str> = lowered
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| SQUEEZED_PUNCTUATION.contains(&c)))
        .filter(|token| !token.is_empty() && !ADMIN_UNIT_WORDS.contains(token))
        .collect();

    let mut compact = squeeze(&kept.join(""));

    loop {
        let before = compact.len();
        for suffix in ADMIN_UNIT_SUFFIXES {
            if let Some(rest) = compact.strip_suffix(suffix) {
                if !rest.is_empty() {
                    compact = rest.to_string();
                }
            }
        }
        if compact.len() == before {
            break;
        }
    }

    if compact.is_empty() {
        squeeze(&lowered)
    } else {
        compact
    }
}

/// Stable duplicate-detection key for a candidate identity.
///
/// Pure function of the identity: equal keys mean "same company at the same
/// place" for every consumer (duplicate gate, lead rows, batch filtering).
pub fn fingerprint(identity: &CompanyIdentity) -> String {
    format!(
        "{}|{}",
        clean_company_name(&identity.name),
        clean_location(&identity.location)
    )
}

fn squeeze(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && !SQUEEZED_PUNCTUATION.contains(c))
        .collect()
}
