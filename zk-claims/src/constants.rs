//! Crate-wide constants used by claim templating and validation.

/// Age threshold used when an age claim does not name one.
pub const DEFAULT_MIN_AGE: u8 = 18;

/// Upper bound accepted for an age threshold.
pub const MAX_MIN_AGE: u8 = 130;

/// Income threshold (annual, whole dollars) used when an income claim does not name one.
pub const DEFAULT_MIN_INCOME: u64 = 50_000;

pub const DEFAULT_CITIZENSHIP: &str = "the United States";

pub const DEFAULT_INSURANCE_STATUS: &str = "active";
pub const DEFAULT_INSURANCE_TYPE: &str = "health";

/// Shown instead of a badge number the officer chose not to disclose.
pub const UNDISCLOSED_BADGE: &str = "CLASSIFIED";

/// Longest lifetime a claim may request. Zero means "never expires".
pub const MAX_EXPIRY_DAYS: u32 = 3650;

/// Privacy level recorded on the audit entry of a generated claim.
pub const CLAIM_AUDIT_PRIVACY_LEVEL: u8 = 2;
