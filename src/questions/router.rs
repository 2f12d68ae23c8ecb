//! Topic-pattern router (spec §8): dot-segmented topics matched against
//! registered patterns with NATS-style wildcards — `*` matches exactly one
//! segment, `**` matches any number of trailing segments, including zero.
//! Used to fan a question out to whichever collaborator subscribes to its
//! topic, falling back to a default route when nothing matches.

#[derive(Clone)]
struct Route<T> {
    pattern: String,
    handler: T,
}

pub struct TopicRouter<T> {
    routes: Vec<Route<T>>,
    default: T,
}

impl<T: Clone> TopicRouter<T> {
    pub fn new(default: T) -> Self {
        Self { routes: Vec::new(), default }
    }

    pub fn register(mut self, pattern: impl Into<String>, handler: T) -> Self {
        self.routes.push(Route { pattern: pattern.into(), handler });
        self
    }

    /// First registered pattern that matches wins; the default route is
    /// returned iff no pattern matches.
    pub fn route(&self, topic: &str) -> T {
        self.routes
            .iter()
            .find(|r| topic_matches(&r.pattern, topic))
            .map(|r| r.handler.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.split('.').collect();
    let topic_segs: Vec<&str> = topic.split('.').collect();
    matches_segments(&pattern_segs, &topic_segs)
}

fn matches_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=topic.len()).any(|i| matches_segments(&pattern[1..], &topic[i..]))
        }
        Some(&"*") => !topic.is_empty() && matches_segments(&pattern[1..], &topic[1..]),
        Some(seg) => topic.first() == Some(seg) && matches_segments(&pattern[1..], &topic[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_strings_are_reflexive() {
        assert!(topic_matches("plan.gap.scope", "plan.gap.scope"));
        assert!(!topic_matches("plan.gap.scope", "plan.gap.goal"));
    }

    #[test]
    fn single_star_matches_exactly_one_segment() {
        assert!(topic_matches("plan.*.scope", "plan.gap.scope"));
        assert!(!topic_matches("plan.*.scope", "plan.gap.extra.scope"));
        assert!(!topic_matches("plan.*.scope", "plan.scope"));
    }

    #[test]
    fn double_star_matches_any_suffix_including_empty() {
        assert!(topic_matches("plan.**", "plan"));
        assert!(topic_matches("plan.**", "plan.gap"));
        assert!(topic_matches("plan.**", "plan.gap.scope.deep"));
        assert!(!topic_matches("plan.**", "phase.gap"));
    }

    #[test]
    fn router_falls_back_to_default_when_nothing_matches() {
        let router = TopicRouter::new("default").register("plan.**", "plan-handler").register("phase.*", "phase-handler");
        assert_eq!(router.route("plan.gap.scope"), "plan-handler");
        assert_eq!(router.route("phase.gap"), "phase-handler");
        assert_eq!(router.route("task.gap"), "default");
    }

    #[test]
    fn first_registered_match_wins() {
        let router = TopicRouter::new("default").register("**", "catch-all").register("plan.gap", "specific");
        assert_eq!(router.route("plan.gap"), "catch-all");
    }
}
