//! Confidence scoring over an evidence bundle.
//!
//! Two fixed weight tables, kept as literal constants. The first scores the
//! phone evidence itself (persisted per lead as `phone_confidence`), the
//! second scores company-level verification and drives the accept decision.
//! Both are pure functions of the bundle: no I/O, no clock, no config.

use crate::models::EvidenceBundle;

// ============ Phone-Evidence Table ============

/// Extracted phone parses as a valid number for the region.
pub const PHONE_FORMAT_VALID_POINTS: u32 = 20;
/// Reverse phone search co-mentioned the company name.
pub const PHONE_ASSOCIATION_POINTS: u32 = 40;
/// Per independent corroborating source (distinct host).
pub const CORROBORATING_SOURCE_POINTS: u32 = 10;
/// Corroborating sources counted at most this many times.
pub const MAX_CORROBORATING_SOURCES: u32 = 3;
/// A recognized business-listing site carried the company.
pub const BUSINESS_LISTING_POINTS: u32 = 10;

// ============ Company-Verification Table ============

/// Company existence confirmed (active hiring signal).
pub const COMPANY_EXISTENCE_POINTS: u32 = 40;
/// Contact came from a page judged to be the company's own.
pub const OFFICIAL_SITE_POINTS: u32 = 20;
/// Phone present, format-valid, and cross-check passed.
pub const PHONE_VERIFIED_POINTS: u32 = 25;
/// Any contact channel (phone or email) extracted.
pub const CONTACT_EXTRACTED_POINTS: u32 = 10;
/// Evidence drawn from two or more independent sources.
pub const MULTI_SOURCE_POINTS: u32 = 5;

// ============ Decision Thresholds ============

/// Pipeline accept threshold on the company-verification score.
pub const COMPANY_ACCEPT_THRESHOLD: u8 = 60;
/// Orchestration-layer save gate: only leads at or above this score are
/// persisted. Deliberately distinct from the accept threshold.
pub const HIGH_QUALITY_THRESHOLD: u8 = 70;

/// Phone-evidence confidence, 0-100.
///
/// All signals firing sum to exactly 100 (20+40+30+10); the clamp is a
/// guard for the cap on corroborating sources, not a rescale.
pub fn phone_confidence(evidence: &EvidenceBundle) -> u8 {
    let mut score: u32 = 0;

    if evidence.phone_format_valid {
        score += PHONE_FORMAT_VALID_POINTS;
    }
    if evidence.phone_company_associated {
        score += PHONE_ASSOCIATION_POINTS;
    }

    let sources = (evidence.distinct_source_domains() as u32).min(MAX_CORROBORATING_SOURCES);
    score += sources * CORROBORATING_SOURCE_POINTS;

    if evidence.business_listing_found {
        score += BUSINESS_LISTING_POINTS;
    }

    score.min(100) as u8
}

/// Company-verification confidence, 0-100. Drives the accept decision
/// against `COMPANY_ACCEPT_THRESHOLD` and the save gate against
/// `HIGH_QUALITY_THRESHOLD`.
pub fn company_confidence(evidence: &EvidenceBundle) -> u8 {
    let mut score: u32 = 0;

    if evidence.job_posting_confirmed {
        score += COMPANY_EXISTENCE_POINTS;
    }
    if evidence.official_site_confirmed {
        score += OFFICIAL_SITE_POINTS;
    }
    if phone_verified(evidence) {
        score += PHONE_VERIFIED_POINTS;
    }
    if evidence.has_contact() {
        score += CONTACT_EXTRACTED_POINTS;
    }
    if evidence.distinct_source_domains() >= 2 {
        score += MULTI_SOURCE_POINTS;
    }

    score.min(100) as u8
}

/// The "phone verified" signal of the company table: a phone exists, its
/// format validated, and the reverse-search cross-check passed.
fn phone_verified(evidence: &EvidenceBundle) -> bool {
    evidence.phone_candidate.as_deref().is_some_and(|p| !p.is_empty())
        && evidence.phone_format_valid
        && evidence.phone_company_associated
}
