/// Topic validation and pattern matching
///
/// Topics are dot-separated hierarchical names ("task.created"). Patterns
/// are topics where a segment may be `*`, matching exactly one concrete
/// segment. Segment counts must match - there is no recursive wildcard.
///
/// Matching is case-sensitive, deterministic, and side-effect free. Empty
/// topics and patterns are rejected at publish/subscribe time rather than
/// silently treated as no-match.
use crate::errors::RouterError;

/// Wildcard segment
pub const WILDCARD: &str = "*";

/// Separator between topic segments
pub const SEPARATOR: char = '.';

/// Validate a concrete topic (no wildcards allowed)
pub fn validate_topic(topic: &str) -> Result<(), RouterError> {
    validate_segments(topic, false)
}

/// Validate a subscription pattern (`*` allowed as a full segment)
pub fn validate_pattern(pattern: &str) -> Result<(), RouterError> {
    validate_segments(pattern, true)
}

fn validate_segments(input: &str, allow_wildcard: bool) -> Result<(), RouterError> {
    if input.is_empty() {
        return Err(RouterError::InvalidTopicPattern("empty".to_string()));
    }

    let max_segments = crate::config::with_config(|cfg| cfg.broker.max_topic_segments);
    let segments: Vec<&str> = input.split(SEPARATOR).collect();

    if segments.len() > max_segments {
        return Err(RouterError::InvalidTopicPattern(format!(
            "'{}' has {} segments (max {})",
            input,
            segments.len(),
            max_segments
        )));
    }

    for segment in segments {
        if segment.is_empty() {
            return Err(RouterError::InvalidTopicPattern(format!(
                "'{}' contains an empty segment",
                input
            )));
        }
        if segment == WILDCARD {
            if !allow_wildcard {
                return Err(RouterError::InvalidTopicPattern(format!(
                    "'{}' contains a wildcard segment in a concrete topic",
                    input
                )));
            }
        } else if segment.contains('*') {
            // '*' is only meaningful as a whole segment
            return Err(RouterError::InvalidTopicPattern(format!(
                "'{}' uses '*' inside a segment",
                input
            )));
        }
    }

    Ok(())
}

/// Whether `pattern` matches `topic`
///
/// Segment counts must be equal; a `*` pattern segment matches exactly one
/// topic segment; everything else compares exactly.
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_segments = pattern.split(SEPARATOR);
    let mut topic_segments = topic.split(SEPARATOR);

    loop {
        match (pattern_segments.next(), topic_segments.next()) {
            (Some(p), Some(t)) => {
                if p != WILDCARD && p != t {
                    return false;
                }
            }
            (None, None) => return true,
            // Segment count mismatch
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(pattern_matches("task.created", "task.created"));
        assert!(!pattern_matches("task.created", "task.completed"));
    }

    #[test]
    fn test_wildcard_matches_one_segment() {
        assert!(pattern_matches("task.*", "task.created"));
        assert!(pattern_matches("*.created", "task.created"));
        assert!(pattern_matches("agent.*.status", "agent.7.status"));
    }

    #[test]
    fn test_segment_count_must_match() {
        // "a.b" against "a.*.c" never matches: two segments vs three
        assert!(!pattern_matches("a.*.c", "a.b"));
        assert!(!pattern_matches("task.*", "task"));
        assert!(!pattern_matches("task.*", "task.created.now"));
        assert!(!pattern_matches("task.created.now", "task.created"));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(!pattern_matches("Task.created", "task.created"));
    }

    #[test]
    fn test_all_wildcards() {
        assert!(pattern_matches("*.*", "task.created"));
        assert!(!pattern_matches("*.*", "task"));
    }

    #[test]
    fn test_validate_topic_rejects_empty_and_wildcards() {
        assert!(validate_topic("").is_err());
        assert!(validate_topic("task..created").is_err());
        assert!(validate_topic(".task").is_err());
        assert!(validate_topic("task.*").is_err());
        assert!(validate_topic("task.created").is_ok());
    }

    #[test]
    fn test_validate_pattern_allows_full_segment_wildcard_only() {
        assert!(validate_pattern("task.*").is_ok());
        assert!(validate_pattern("*").is_ok());
        assert!(validate_pattern("task.cre*").is_err());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("task..*").is_err());
    }

    #[test]
    fn test_non_wildcard_segments_must_equal() {
        // Truth table: matches iff every non-wildcard pattern segment equals
        // the corresponding topic segment (equal counts assumed).
        let cases = [
            ("a.b.c", "a.b.c", true),
            ("a.*.c", "a.x.c", true),
            ("a.*.c", "a.x.d", false),
            ("*.b.*", "a.b.c", true),
            ("*.b.*", "a.c.c", false),
        ];
        for (pattern, topic, expected) in cases {
            assert_eq!(pattern_matches(pattern, topic), expected, "{} vs {}", pattern, topic);
        }
    }
}
