//! Event-type subscription patterns.

/// Pattern that matches every event type.
pub const WILDCARD: &str = "*";

/// Decides whether an event type should reach an agent.
///
/// Patterns are `*`, an exact type (`action.finished`), or a namespace
/// (`conversation.*`). An empty list subscribes to everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMatcher {
    patterns: Vec<String>,
    match_all: bool,
}

impl SubscriptionMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            patterns.push(WILDCARD.to_string());
        }
        let match_all = patterns.iter().any(|p| p == WILDCARD);
        Self {
            patterns,
            match_all,
        }
    }

    /// Subscribe-all matcher.
    pub fn all() -> Self {
        Self::new([WILDCARD])
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, event_type: &str) -> bool {
        if self.match_all {
            return true;
        }
        self.patterns.iter().any(|pattern| {
            if pattern == event_type {
                return true;
            }
            match pattern.strip_suffix(".*") {
                Some(prefix) => event_type
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.')),
                None => false,
            }
        })
    }
}

impl Default for SubscriptionMatcher {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_pattern_matches_only_its_namespace() {
        let m = SubscriptionMatcher::new(["conversation.*"]);
        assert!(m.matches("conversation.started"));
        assert!(!m.matches("action.finished"));
        // the dot is part of the namespace boundary
        assert!(!m.matches("conversationX.started"));
        assert!(!m.matches("conversation"));
    }

    #[test]
    fn empty_list_matches_everything() {
        let m = SubscriptionMatcher::new(Vec::<String>::new());
        assert_eq!(m.patterns(), ["*"]);
        assert!(m.matches("action.finished"));
        assert!(m.matches("totally.unknown"));
    }

    #[test]
    fn wildcard_matches_unknown_types() {
        let m = SubscriptionMatcher::new(["*"]);
        assert!(m.matches("never.seen.before"));
    }

    #[test]
    fn exact_pattern() {
        let m = SubscriptionMatcher::new(["action.finished", " agent.state_changed "]);
        assert!(m.matches("action.finished"));
        assert!(m.matches("agent.state_changed"));
        assert!(!m.matches("agent.queue_refill_requested"));
    }

    #[test]
    fn blank_patterns_fall_back_to_wildcard() {
        let m = SubscriptionMatcher::new(["  ", ""]);
        assert!(m.matches("anything"));
    }
}
