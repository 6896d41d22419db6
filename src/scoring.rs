//! Reputation scoring
//!
//! Each verified platform feeds one rating:
//!
//! - Twitter -> social
//! - Discord -> community
//! - GitHub  -> dev
//!
//! A freshly verified platform is rated `40 + 10 * log2(1 + audience)`, capped
//! at 100, where audience is the follower count reported by the provider.
//! A re-verification never lowers an existing rating. The overall rating is the
//! mean of the four category ratings (missing counts as zero) and the
//! reputation score adds a flat bonus per verified platform.

use crate::models::{Platform, Ratings, User};

/// Rating of a verified account with no audience
pub const BASE_VERIFIED_RATING: f64 = 40.0;

/// Rating added each time the audience doubles
pub const POINTS_PER_AUDIENCE_DOUBLING: f64 = 10.0;

pub const MAX_RATING: f64 = 100.0;

/// Share of the overall rating carried into the reputation score
pub const OVERALL_WEIGHT: f64 = 0.8;

/// Bonus per verified platform
pub const VERIFICATION_BONUS: f64 = 5.0;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rating for a newly verified account
pub fn platform_rating(audience: u64) -> f64 {
    let doublings = (1.0 + audience as f64).ln() / std::f64::consts::LN_2;
    round2((BASE_VERIFIED_RATING + POINTS_PER_AUDIENCE_DOUBLING * doublings).min(MAX_RATING))
}

/// Mean of the four category ratings
pub fn overall_rating(ratings: &Ratings) -> f64 {
    let sum: f64 = [ratings.dev, ratings.community, ratings.social, ratings.defi]
        .iter()
        .map(|r| r.unwrap_or(0.0))
        .sum();
    round2(sum / 4.0)
}

pub fn reputation_score(overall: f64, verified_platforms: u32) -> f64 {
    let score = OVERALL_WEIGHT * overall + VERIFICATION_BONUS * verified_platforms as f64;
    round2(score.clamp(0.0, MAX_RATING))
}

/// Ratings after verifying `platform` for `user`
pub fn rescore(user: &User, platform: Platform, audience: u64) -> Ratings {
    let mut ratings = user.ratings();
    let fresh = platform_rating(audience);

    let slot = match platform {
        Platform::Twitter => &mut ratings.social,
        Platform::Discord => &mut ratings.community,
        Platform::GitHub => &mut ratings.dev,
    };
    *slot = Some(slot.map_or(fresh, |current| current.max(fresh)));

    let verified = if user.is_verified(platform) {
        user.verified_count()
    } else {
        user.verified_count() + 1
    };

    let overall = overall_rating(&ratings);
    ratings.overall = Some(overall);
    ratings.reputation_score = Some(reputation_score(overall, verified));
    ratings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_user() -> User {
        User {
            public_key: "0xabc".to_string(),
            twitter_username: None,
            twitter_verified: false,
            discord_username: None,
            discord_verified: false,
            github_username: None,
            github_verified: false,
            dev_rating: None,
            community_rating: None,
            social_rating: None,
            defi_rating: None,
            overall_rating: None,
            reputation_score: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_platform_rating() {
        assert_eq!(platform_rating(0), 40.0);
        assert_eq!(platform_rating(1), 50.0);
        assert_eq!(platform_rating(3), 60.0);
        assert_eq!(platform_rating(u64::MAX), MAX_RATING);
    }

    #[test]
    fn test_first_verification() {
        let ratings = rescore(&new_user(), Platform::Twitter, 0);
        assert_eq!(ratings.social, Some(40.0));
        assert_eq!(ratings.dev, None);
        assert_eq!(ratings.overall, Some(10.0));
        assert_eq!(ratings.reputation_score, Some(13.0));
    }

    #[test]
    fn test_reverification_keeps_higher_rating() {
        let mut user = new_user();
        user.github_verified = true;
        user.dev_rating = Some(90.0);

        let ratings = rescore(&user, Platform::GitHub, 0);
        assert_eq!(ratings.dev, Some(90.0));
        // Still one verified platform
        assert_eq!(ratings.reputation_score, Some(reputation_score(22.5, 1)));
    }

    #[test]
    fn test_score_grows_with_platforms() {
        let mut user = new_user();
        let first = rescore(&user, Platform::Twitter, 0);
        user.twitter_verified = true;
        user.social_rating = first.social;

        let second = rescore(&user, Platform::Discord, 0);
        assert!(second.reputation_score > first.reputation_score);
        assert_eq!(second.community, Some(40.0));
        assert_eq!(second.social, Some(40.0));
    }

    #[test]
    fn test_defi_rating_is_preserved() {
        let mut user = new_user();
        user.defi_rating = Some(80.0);
        let ratings = rescore(&user, Platform::Discord, 0);
        assert_eq!(ratings.defi, Some(80.0));
        assert_eq!(ratings.overall, Some(30.0));
    }

    #[test]
    fn test_score_capped() {
        // Every platform maxed out
        assert_eq!(reputation_score(100.0, 3), 95.0);
        assert_eq!(reputation_score(100.0, 10), MAX_RATING);
        assert_eq!(reputation_score(0.0, 0), 0.0);
    }
}
