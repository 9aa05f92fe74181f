//! Generation job kinds and their backend route segments.
//!
//! Each feature form submits to its own family of endpoints on the job
//! service. The kind doubles as the `tokenKey` under which an in-flight
//! token is persisted, so the names must stay stable.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Copy generation
// ---------------------------------------------------------------------------

/// Ad copy (headline + body) for paid social placements.
pub const KIND_AD_COPY: &str = "ad_copy";
/// Scroll-stopping opening hooks.
pub const KIND_HOOKS: &str = "hooks";
/// Benefit stack bullets for a landing page.
pub const KIND_BENEFIT_STACK: &str = "benefit_stack";
/// Bonus stack for an offer.
pub const KIND_BONUS_STACK: &str = "bonus_stack";
/// Frequently asked questions with answers.
pub const KIND_FAQ: &str = "faq";
/// SEO title, description and keyword tags.
pub const KIND_SEO_TAGS: &str = "seo_tags";
/// Multi-step funnel outline.
pub const KIND_FUNNEL: &str = "funnel";

// ---------------------------------------------------------------------------
// Image generation
// ---------------------------------------------------------------------------

/// Landing page hero image.
pub const KIND_HERO_IMAGE: &str = "hero_image";
/// Square/vertical creative for social ads.
pub const KIND_AD_SOCIAL_IMAGE: &str = "ad_social_image";

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Land/property recommendations for a buyer profile.
pub const KIND_LAND_MATCH: &str = "land_match";
/// Business-for-sale recommendations for a buyer profile.
pub const KIND_BUSINESS_MATCH: &str = "business_match";

/// All job kinds the job service accepts.
pub const VALID_JOB_KINDS: &[&str] = &[
    KIND_AD_COPY,
    KIND_HOOKS,
    KIND_BENEFIT_STACK,
    KIND_BONUS_STACK,
    KIND_FAQ,
    KIND_SEO_TAGS,
    KIND_FUNNEL,
    KIND_HERO_IMAGE,
    KIND_AD_SOCIAL_IMAGE,
    KIND_LAND_MATCH,
    KIND_BUSINESS_MATCH,
];

/// Validate that a job kind is one of the known constants.
pub fn validate_job_kind(kind: &str) -> Result<(), CoreError> {
    if VALID_JOB_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid job kind '{kind}'. Must be one of: {}",
            VALID_JOB_KINDS.join(", ")
        )))
    }
}

/// Whether results of this kind are images (and therefore slower to
/// generate) rather than text.
pub fn is_image_kind(kind: &str) -> bool {
    matches!(kind, KIND_HERO_IMAGE | KIND_AD_SOCIAL_IMAGE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
