use std::sync::OnceLock;

use regex::Regex;

fn patterns() -> &'static [(Regex, usize)] {
    static PATTERNS: OnceLock<Vec<(Regex, usize)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)like the (.*?) I (?:created|made) (?:before|earlier|last time|previously)",
                1,
            ),
            (r"(?i)similar to (my|the) (.*?)(?:\.|\s|$)", 2),
        ]
        .into_iter()
        .filter_map(|(pattern, group)| Regex::new(pattern).ok().map(|re| (re, group)))
        .collect()
    })
}

/// Pulls a memory search query out of phrasing such as "like the castle I made
/// before" or "similar to my dragon".
pub fn extract_reference_query(prompt: &str) -> Option<String> {
    patterns().iter().find_map(|(re, group)| {
        re.captures(prompt)
            .and_then(|caps| caps.get(*group))
            .map(|found| found.as_str().trim().to_string())
            .filter(|query| !query.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_earlier_creation_phrasing() {
        assert_eq!(
            extract_reference_query("Make a castle like the dragon I created before, at night"),
            Some("dragon".to_string())
        );
        assert_eq!(
            extract_reference_query("Like the glowing forest I MADE last time"),
            Some("glowing forest".to_string())
        );
    }

    #[test]
    fn finds_similar_to_phrasing() {
        assert_eq!(
            extract_reference_query("Something similar to my robot."),
            Some("robot".to_string())
        );
        assert_eq!(
            extract_reference_query("similar to the spaceship"),
            Some("spaceship".to_string())
        );
    }

    #[test]
    fn plain_prompts_have_no_reference() {
        assert_eq!(extract_reference_query("A dragon on a mountain"), None);
    }
}
