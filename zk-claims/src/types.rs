//! Types shared between the backend and claim templating.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of statement a claim makes.
///
/// The wire value (`proofType`) is free text; anything unrecognised maps to [`ProofKind::Other`]
/// and still gets a generic claim text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    AgeVerification,
    IncomeVerification,
    IdentityVerification,
    MedicalVerification,
    InsuranceVerification,
    PoliceVerification,
    Other,
}

impl ProofKind {
    pub fn parse(proof_type: &str) -> Self {
        match proof_type.trim() {
            "age_verification" => ProofKind::AgeVerification,
            "income_verification" | "income_range" => ProofKind::IncomeVerification,
            "identity_verification" | "residency" => ProofKind::IdentityVerification,
            "medical_verification" => ProofKind::MedicalVerification,
            "insurance_verification" | "insurance" => ProofKind::InsuranceVerification,
            "police_verification" => ProofKind::PoliceVerification,
            _ => ProofKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProofKind::AgeVerification => "age_verification",
            ProofKind::IncomeVerification => "income_verification",
            ProofKind::IdentityVerification => "identity_verification",
            ProofKind::MedicalVerification => "medical_verification",
            ProofKind::InsuranceVerification => "insurance_verification",
            ProofKind::PoliceVerification => "police_verification",
            ProofKind::Other => "other",
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes a user chose to disclose in a claim.
///
/// Each field belongs to one or more [`ProofKind`]s; unrelated fields are ignored when the
/// claim text is rendered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_income: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizenship: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medical_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chronic_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allergies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medications: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_number: Option<String>,

    /// Lifetime in days; `None` or zero means the claim never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_days: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}
