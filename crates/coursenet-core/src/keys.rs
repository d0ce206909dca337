//! Cache key derivation
//!
//! Keys are `<tag>_<segment>_<segment>...` with empty segments dropped.
//! Route segments are restricted to lowercase letters, digits and hyphens, so
//! `_` only ever appears as the delimiter and tags partition the key space.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

const DELIMITER: &str = "_";

const EPFL_TAG: &str = "epfl";
const COURSE_TAG: &str = "course";
const NAV_KEY: &str = "nav";

static TREE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z-]+$").unwrap());
static COURSE_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

/// Key of a resource in the key-value store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Join a resource tag with its non-empty segments
    pub fn from_parts<'a, I>(tag: &str, segments: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut key = String::from(tag);
        for segment in segments.into_iter().filter(|s| !s.is_empty()) {
            key.push_str(DELIMITER);
            key.push_str(segment);
        }
        Self(key)
    }

    /// Node of the EPFL coursebook tree (root, level, program or specialization)
    pub fn epfl(level: Option<&str>, program: Option<&str>, specialization: Option<&str>) -> Self {
        Self::from_parts(
            EPFL_TAG,
            [level, program, specialization].into_iter().flatten(),
        )
    }

    /// Detailed course information
    pub fn course(slug: &str) -> Self {
        Self::from_parts(COURSE_TAG, [slug])
    }

    /// Navigation tree and autocomplete data
    pub fn nav() -> Self {
        Self(NAV_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Level, program or specialization segment (`[a-z-]+`)
pub fn is_tree_segment(segment: &str) -> bool {
    TREE_SEGMENT.is_match(segment)
}

/// Course slug (`[a-z0-9-]+`)
pub fn is_course_slug(slug: &str) -> bool {
    COURSE_SLUG.is_match(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_epfl_root_and_levels() {
        assert_eq!(CacheKey::epfl(None, None, None).as_str(), "epfl");
        assert_eq!(CacheKey::epfl(Some("master"), None, None).as_str(), "epfl_master");
        assert_eq!(
            CacheKey::epfl(Some("master"), Some("data-science"), Some("foundations")).as_str(),
            "epfl_master_data-science_foundations"
        );
    }

    #[test]
    fn test_empty_segments_are_filtered() {
        assert_eq!(
            CacheKey::epfl(Some(""), Some("physics"), None).as_str(),
            "epfl_physics"
        );
        assert_eq!(CacheKey::from_parts("epfl", ["", "", ""]).as_str(), "epfl");
    }

    #[test]
    fn test_course_and_nav() {
        assert_eq!(CacheKey::course("cs-101-algebra").as_str(), "course_cs-101-algebra");
        assert_eq!(CacheKey::nav().to_string(), "nav");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = CacheKey::epfl(Some("bachelor"), Some("computer-science"), None);
        let b = CacheKey::epfl(Some("bachelor"), Some("computer-science"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_routes_never_collide() {
        let keys = [
            CacheKey::nav(),
            CacheKey::epfl(None, None, None),
            CacheKey::epfl(Some("master"), None, None),
            CacheKey::epfl(Some("master"), Some("physics"), None),
            CacheKey::epfl(Some("master"), Some("physics"), Some("nuclear")),
            CacheKey::epfl(Some("bachelor"), Some("physics"), None),
            CacheKey::course("master"),
            CacheKey::course("nav"),
            CacheKey::course("epfl"),
        ];
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_segment_validators() {
        assert!(is_tree_segment("data-science"));
        assert!(!is_tree_segment("cs101"));
        assert!(!is_tree_segment("Master"));
        assert!(!is_tree_segment("a_b"));
        assert!(!is_tree_segment(""));

        assert!(is_course_slug("cs-101-algebra"));
        assert!(!is_course_slug("cs_101"));
        assert!(!is_course_slug("../etc"));
    }
}
