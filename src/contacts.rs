//! Validation and normalization of extracted contact channels.
//!
//! Extracted phones and emails come from scraped pages and LLM output, so
//! both are treated as hostile input: emails are screened for placeholder
//! patterns before format checks, phones go through libphonenumber with the
//! configured default region and come back in E.164.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;

/// Validate an email address.
///
/// Checks for:
/// - Basic email format (contains @ and .)
/// - Fake/placeholder patterns (repeated digits like 9999, 1111)
/// - Minimum length requirements
/// - Valid domain structure
pub fn is_valid_email(email: &str) -> bool {
    // Basic checks
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    // Detect fake patterns (repeated digits)
    let fake_patterns = [
        "999999",    // Common fake: 0999999999@example.com
        "111111",    // Common fake: 1111111111@
        "000000",    // Common fake: 000000@
        "123456789", // Sequential fake
    ];

    for pattern in &fake_patterns {
        if email.contains(pattern) {
            tracing::warn!(
                "❌ Invalid email detected (fake pattern '{}'): {}",
                pattern,
                email
            );
            return false;
        }
    }

    // RFC 5322 simplified email regex
    // Matches: local@domain.tld
    let email_regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();

    if !email_regex.is_match(email) {
        tracing::warn!("❌ Invalid email format: {}", email);
        return false;
    }

    true
}

/// Validate and normalize a phone number for the given default region.
///
/// Uses the phonenumber library (port of Google's libphonenumber) to:
/// - Parse the raw string with the region as the dialing context
/// - Validate it against the region's numbering plan
/// - Return normalized E.164 format (+81312345678)
///
/// Returns: (is_valid, normalized_phone_or_error_msg)
pub fn validate_phone(raw: &str, region: CountryId) -> (bool, String) {
    // Skip empty or very short strings
    if raw.trim().is_empty() || raw.len() < 8 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(Some(region), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let formatted = number.format().mode(Mode::E164).to_string();
                tracing::debug!("✓ Valid phone: {} → {}", raw, formatted);
                (true, formatted)
            } else {
                tracing::warn!("❌ Invalid phone number for region {:?}: {}", region, raw);
                (false, "Invalid phone number".to_string())
            }
        }
        Err(e) => {
            tracing::warn!("❌ Failed to parse phone '{}': {:?}", raw, e);
            (false, format!("Parse error: {:?}", e))
        }
    }
}

/// Bare digits of a phone number, as typed into a reverse search query.
/// Keeps the national format when possible ("03-1234-5678" → "0312345678").
pub fn phone_digits(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

/// First valid email found in free text, if any. Used as the extraction
/// fallback when the structured extractor returns garbage.
pub fn scan_for_email(text: &str) -> Option<String> {
    let candidate_regex =
        Regex::new(r"[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9][a-zA-Z0-9.-]*\.[a-zA-Z]{2,}")
            .unwrap();

    let result = candidate_regex
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .find(|candidate| is_valid_email(candidate));
    result
}

/// First phone number in free text that validates for the region, if any,
/// normalized to E.164.
pub fn scan_for_phone(text: &str, region: CountryId) -> Option<String> {
    let candidate_regex = Regex::new(r"\+?\d[\d()\-\s.]{6,14}\d").unwrap();

    for candidate in candidate_regex.find_iter(text) {
        let (valid, normalized) = validate_phone(candidate.as_str(), region);
        if valid {
            return Some(normalized);
        }
    }
    None
}
