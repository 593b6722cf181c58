//! Stage ordering and promotion validity.

use std::{collections::HashMap, fmt, sync::LazyLock};

use promoter_github::models::PullRequest;

pub const DEFAULT_STAGES: [&str; 4] = ["main", "staging", "canary", "production"];

const BRANCH_PREFIX: &str = "refs/heads/";

static DEFAULT_PROMOTER: LazyLock<Promoter> = LazyLock::new(Promoter::default);

/// Strips every leading `refs/heads/` so that the result is a short branch name.
pub fn normalise_full_ref(mut r: &str) -> &str {
    while let Some(rest) = r.strip_prefix(BRANCH_PREFIX) {
        r = rest;
    }
    r
}

/// An ordered list of stage branches. Only adjacent forward moves are promotions.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Promoter {
    stages: Vec<String>,
}

impl Default for Promoter {
    fn default() -> Self { Self { stages: DEFAULT_STAGES.iter().map(|s| s.to_string()).collect() } }
}

impl fmt::Display for Promoter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stages.join(" → "))
    }
}

impl Promoter {
    /// Shared instance of the default stage list.
    pub fn default_ref() -> &'static Promoter { &DEFAULT_PROMOTER }

    /// `None` when no stage names remain after trimming.
    pub fn new<I, S>(stages: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stages: Vec<String> = stages
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if stages.is_empty() { None } else { Some(Self { stages }) }
    }

    /// Parses a comma-separated stage list such as `dev, qa, prod,`.
    pub fn parse(value: &str) -> Option<Self> { Self::new(value.split(',')) }

    /// Builds the promoter for a repository from its custom properties.
    ///
    /// Anything unusable falls back to the default stages with a warning.
    pub fn from_properties(properties: &HashMap<String, serde_json::Value>, key: &str) -> Self {
        let parsed = match properties.get(key) {
            None => {
                tracing::warn!("Custom property {key} not set, using default stages");
                return Self::default();
            }
            Some(serde_json::Value::String(value)) => Self::parse(value),
            Some(serde_json::Value::Array(values)) => {
                Self::new(values.iter().filter_map(|v| v.as_str()))
            }
            Some(other) => {
                tracing::warn!("Custom property {key} has unexpected value {other}");
                None
            }
        };
        parsed.unwrap_or_else(|| {
            tracing::warn!("Custom property {key} has no stages, using default stages");
            Self::default()
        })
    }

    pub fn stages(&self) -> &[String] { &self.stages }

    pub fn len(&self) -> usize { self.stages.len() }

    pub fn stage_index(&self, r: &str) -> Option<usize> {
        let name = normalise_full_ref(r);
        self.stages.iter().position(|s| s == name)
    }

    /// The next stage when `r` is a known stage before the last one.
    pub fn is_promotable_ref(&self, r: &str) -> Option<&str> {
        let index = self.stage_index(r)?;
        self.stages.get(index + 1).map(String::as_str)
    }

    pub fn is_promotion(&self, head: &str, base: &str) -> bool {
        match (self.stage_index(head), self.stage_index(base)) {
            (Some(h), Some(b)) => b == h + 1,
            _ => false,
        }
    }

    pub fn is_promotion_request(&self, pr: &PullRequest) -> bool {
        self.is_promotion(&pr.head.ref_field, &pr.base.ref_field)
    }

    /// `index+1/total`, or `?/total` for refs outside the list.
    pub fn progress(&self, r: &str) -> String {
        match self.stage_index(r) {
            Some(index) => format!("{}/{}", index + 1, self.len()),
            None => format!("?/{}", self.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use promoter_github::models::PullRequestRef;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn pr(head: &str, base: &str) -> PullRequest {
        PullRequest {
            number: 1,
            head: PullRequestRef { ref_field: head.to_string(), sha: "a".to_string() },
            base: PullRequestRef { ref_field: base.to_string(), sha: "b".to_string() },
            ..Default::default()
        }
    }

    #[test]
    fn test_stage_index() {
        let p = Promoter::default();
        let cases = [
            ("main", Some(0)),
            ("refs/heads/staging", Some(1)),
            ("refs/heads/refs/heads/canary", Some(2)),
            ("production", Some(3)),
            ("refs/tags/main", None),
            ("feature", None),
            ("", None),
        ];
        for (r, expected) in cases {
            assert_eq!(p.stage_index(r), expected, "{r}");
        }
    }

    #[test]
    fn test_is_promotable_ref() {
        let p = Promoter::default();
        assert_eq!(p.is_promotable_ref("main"), Some("staging"));
        assert_eq!(p.is_promotable_ref("refs/heads/canary"), Some("production"));
        assert_eq!(p.is_promotable_ref("production"), None);
        assert_eq!(p.is_promotable_ref("feature"), None);
    }

    #[test]
    fn test_is_promotion_request() {
        let p = Promoter::default();
        let cases = [
            ("main", "staging", true),
            ("staging", "canary", true),
            ("canary", "production", true),
            ("main", "canary", false),
            ("staging", "main", false),
            ("production", "main", false),
            ("main", "main", false),
            ("feature", "main", false),
            ("main", "feature", false),
        ];
        for (head, base, expected) in cases {
            assert_eq!(p.is_promotion_request(&pr(head, base)), expected, "{head} -> {base}");
        }
    }

    #[test]
    fn test_progress() {
        let p = Promoter::default();
        assert_eq!(p.progress("main"), "1/4");
        assert_eq!(p.progress("refs/heads/production"), "4/4");
        assert_eq!(p.progress("feature"), "?/4");
    }

    #[test]
    fn test_from_properties() {
        let default = Promoter::default();
        let key = "promotion-stages";
        let cases: [(HashMap<String, serde_json::Value>, Vec<&str>); 7] = [
            (HashMap::new(), DEFAULT_STAGES.to_vec()),
            ([(key.to_string(), json!(""))].into(), DEFAULT_STAGES.to_vec()),
            ([("other".to_string(), json!("a,b"))].into(), DEFAULT_STAGES.to_vec()),
            ([(key.to_string(), json!(" dev , qa,prod ,"))].into(), vec!["dev", "qa", "prod"]),
            ([(key.to_string(), json!("dev,,prod"))].into(), vec!["dev", "prod"]),
            ([(key.to_string(), json!(["dev", "prod"]))].into(), vec!["dev", "prod"]),
            ([(key.to_string(), json!(42))].into(), DEFAULT_STAGES.to_vec()),
        ];
        for (properties, expected) in cases {
            let p = Promoter::from_properties(&properties, key);
            assert_eq!(p.stages(), expected.as_slice(), "{properties:?}");
        }
        assert_eq!(Promoter::from_properties(&HashMap::new(), key), default);
    }

    #[test]
    fn test_single_stage_never_promotes() {
        let p = Promoter::parse("main").unwrap();
        assert_eq!(p.is_promotable_ref("main"), None);
        assert_eq!(p.progress("main"), "1/1");
    }

    #[test]
    fn test_display() {
        assert_eq!(Promoter::parse("a,b").unwrap().to_string(), "a → b");
    }

    fn arb_ref() -> impl Strategy<Value = String> {
        let name = prop_oneof![
            Just("main".to_string()),
            Just("staging".to_string()),
            Just("production".to_string()),
            "[a-z/]{0,12}",
        ];
        (0..3usize, name).prop_map(|(depth, name)| BRANCH_PREFIX.repeat(depth) + &name)
    }

    proptest! {
        #[test]
        fn prop_normalise_is_idempotent(r in arb_ref()) {
            let p = Promoter::default();
            let once = normalise_full_ref(&r);
            prop_assert_eq!(normalise_full_ref(once), once);
            prop_assert_eq!(p.stage_index(once), p.stage_index(&r));
        }

        #[test]
        fn prop_promotions_are_adjacent(head in arb_ref(), base in arb_ref()) {
            let p = Promoter::default();
            if p.is_promotion(&head, &base) {
                let h = p.stage_index(&head).unwrap();
                prop_assert_eq!(p.stage_index(&base), Some(h + 1));
                prop_assert_eq!(p.is_promotable_ref(&head), Some(normalise_full_ref(&base)));
            }
        }
    }
}
