//! Claim templating and expiry.
//!
//! A claim is plain text describing what the holder asserts about themselves. Nothing here binds
//! the text to underlying vault data; verification only checks that the claim exists and has not
//! expired.

use crate::constants::{
    DEFAULT_CITIZENSHIP, DEFAULT_INSURANCE_STATUS, DEFAULT_INSURANCE_TYPE, DEFAULT_MIN_AGE,
    DEFAULT_MIN_INCOME, MAX_EXPIRY_DAYS, MAX_MIN_AGE, UNDISCLOSED_BADGE,
};
use crate::types::{ProofAttributes, ProofKind};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("proof type is required")]
    MissingProofType,

    #[error("minimum age must be at most {MAX_MIN_AGE}, got {0}")]
    MinAgeOutOfRange(u8),

    #[error("expiry must be at most {MAX_EXPIRY_DAYS} days, got {0}")]
    ExpiryOutOfRange(u32),
}

/// Check a claim request before it is stored.
pub fn validate(proof_type: &str, attrs: &ProofAttributes) -> Result<ProofKind, ClaimError> {
    if proof_type.trim().is_empty() {
        return Err(ClaimError::MissingProofType);
    }
    if let Some(age) = attrs.min_age {
        if age > MAX_MIN_AGE {
            return Err(ClaimError::MinAgeOutOfRange(age));
        }
    }
    if let Some(days) = attrs.expires_in_days {
        if days > MAX_EXPIRY_DAYS {
            return Err(ClaimError::ExpiryOutOfRange(days));
        }
    }
    Ok(ProofKind::parse(proof_type))
}

/// Render the human-readable statement for a claim.
pub fn describe_claim(kind: ProofKind, attrs: &ProofAttributes) -> String {
    match kind {
        ProofKind::AgeVerification => {
            format!("User is over {} years old", attrs.min_age.unwrap_or(DEFAULT_MIN_AGE))
        }
        ProofKind::IncomeVerification => format!(
            "User's income is above ${} annually",
            group_thousands(attrs.min_income.unwrap_or(DEFAULT_MIN_INCOME))
        ),
        ProofKind::IdentityVerification => format!(
            "User is a verified citizen of {}",
            non_empty(&attrs.citizenship).unwrap_or(DEFAULT_CITIZENSHIP)
        ),
        ProofKind::MedicalVerification => describe_medical(attrs),
        ProofKind::InsuranceVerification => format!(
            "User has {} {} insurance coverage",
            non_empty(&attrs.insurance_status).unwrap_or(DEFAULT_INSURANCE_STATUS),
            non_empty(&attrs.insurance_type).unwrap_or(DEFAULT_INSURANCE_TYPE)
        ),
        ProofKind::PoliceVerification => format!(
            "Verified law enforcement officer with badge #{}",
            non_empty(&attrs.badge_number).unwrap_or(UNDISCLOSED_BADGE)
        ),
        ProofKind::Other => "Identity claim has been cryptographically verified".to_string(),
    }
}

fn describe_medical(attrs: &ProofAttributes) -> String {
    let mut parts = Vec::new();

    if !attrs.medical_conditions.is_empty() {
        parts.push(format!("Medical conditions: {}", attrs.medical_conditions.join(", ")));
    }
    if !attrs.chronic_conditions.is_empty() {
        parts.push(format!("Chronic conditions: {}", attrs.chronic_conditions.join(", ")));
    }
    if !attrs.allergies.is_empty() {
        parts.push(format!("Allergies: {}", attrs.allergies.join(", ")));
    }
    if let Some(blood_type) = non_empty(&attrs.blood_type) {
        parts.push(format!("Blood type: {blood_type}"));
    }
    if !attrs.medications.is_empty() {
        parts.push(format!("Medications: {}", attrs.medications.join(", ")));
    }

    if parts.is_empty() {
        "General medical status verified".to_string()
    } else {
        format!("Medical verification confirmed: {}", parts.join(" | "))
    }
}

/// When a claim created at `created_at` stops being valid, if ever.
pub fn expires_at(created_at: DateTime<Utc>, expires_in_days: Option<u32>) -> Option<DateTime<Utc>> {
    match expires_in_days {
        Some(days) if days > 0 => Some(created_at + Duration::days(i64::from(days))),
        _ => None,
    }
}

pub fn is_expired(created_at: DateTime<Utc>, attrs: &ProofAttributes, now: DateTime<Utc>) -> bool {
    expires_at(created_at, attrs.expires_in_days).is_some_and(|deadline| now > deadline)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn age_claim_uses_threshold_or_default() {
        let mut attrs = ProofAttributes::default();
        assert_eq!(describe_claim(ProofKind::AgeVerification, &attrs), "User is over 18 years old");

        attrs.min_age = Some(21);
        assert_eq!(describe_claim(ProofKind::AgeVerification, &attrs), "User is over 21 years old");
    }

    #[test]
    fn income_claim_groups_digits() {
        let attrs = ProofAttributes { min_income: Some(1_250_000), ..Default::default() };
        assert_eq!(
            describe_claim(ProofKind::IncomeVerification, &attrs),
            "User's income is above $1,250,000 annually"
        );
        assert_eq!(
            describe_claim(ProofKind::IncomeVerification, &ProofAttributes::default()),
            "User's income is above $50,000 annually"
        );
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
    }

    #[test]
    fn medical_claim_lists_disclosed_sections() {
        let attrs = ProofAttributes {
            allergies: vec!["penicillin".into(), "latex".into()],
            blood_type: Some("O_Neg".into()),
            ..Default::default()
        };
        assert_eq!(
            describe_claim(ProofKind::MedicalVerification, &attrs),
            "Medical verification confirmed: Allergies: penicillin, latex | Blood type: O_Neg"
        );
        assert_eq!(
            describe_claim(ProofKind::MedicalVerification, &ProofAttributes::default()),
            "General medical status verified"
        );
    }

    #[test]
    fn blank_badge_stays_undisclosed() {
        let attrs = ProofAttributes { badge_number: Some("  ".into()), ..Default::default() };
        assert_eq!(
            describe_claim(ProofKind::PoliceVerification, &attrs),
            "Verified law enforcement officer with badge #CLASSIFIED"
        );
    }

    #[test]
    fn unknown_kind_gets_generic_text() {
        assert_eq!(ProofKind::parse("education"), ProofKind::Other);
        assert_eq!(
            describe_claim(ProofKind::Other, &ProofAttributes::default()),
            "Identity claim has been cryptographically verified"
        );
    }

    #[test]
    fn validate_rejects_bad_requests() {
        let attrs = ProofAttributes::default();
        assert_eq!(validate("  ", &attrs), Err(ClaimError::MissingProofType));

        let attrs = ProofAttributes { min_age: Some(200), ..Default::default() };
        assert_eq!(validate("age_verification", &attrs), Err(ClaimError::MinAgeOutOfRange(200)));

        let attrs = ProofAttributes { expires_in_days: Some(10_000), ..Default::default() };
        assert!(matches!(validate("age_verification", &attrs), Err(ClaimError::ExpiryOutOfRange(_))));

        assert_eq!(validate("insurance", &ProofAttributes::default()), Ok(ProofKind::InsuranceVerification));
    }

    #[test]
    fn expiry_window() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let attrs = ProofAttributes { expires_in_days: Some(7), ..Default::default() };

        assert!(!is_expired(created, &attrs, created + Duration::days(7)));
        assert!(is_expired(created, &attrs, created + Duration::days(7) + Duration::seconds(1)));

        let forever = ProofAttributes { expires_in_days: Some(0), ..Default::default() };
        assert_eq!(expires_at(created, forever.expires_in_days), None);
        assert!(!is_expired(created, &forever, created + Duration::days(10_000)));
    }
}
