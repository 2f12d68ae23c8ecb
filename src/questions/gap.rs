//! Gap parser (spec §8): extracts `<gap><question>...</question>
//! <urgency>...</urgency></gap>` blocks from raw producer/planner output
//! before the remainder is persisted or summarized.

use std::sync::LazyLock;

use planloop_types::{Gap, Urgency};
use regex::Regex;

static GAP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<gap>\s*<question>(.*?)</question>\s*<urgency>(.*?)</urgency>\s*</gap>").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapParseResult {
    pub has_gaps: bool,
    pub cleaned_output: String,
    pub gaps: Vec<Gap>,
}

/// Parse every well-formed gap block out of `text`. A `<gap>` block with an
/// empty `<question>` is not well-formed and is left untouched in the
/// cleaned output rather than counted.
pub fn parse_gaps(text: &str) -> GapParseResult {
    let mut gaps = Vec::new();
    for cap in GAP_REGEX.captures_iter(text) {
        let question = cap[1].trim();
        if question.is_empty() {
            continue;
        }
        gaps.push(Gap {
            question: question.to_string(),
            urgency: Urgency::parse(&cap[2]),
        });
    }

    if gaps.is_empty() {
        return GapParseResult {
            has_gaps: false,
            cleaned_output: text.to_string(),
            gaps,
        };
    }

    let cleaned_output = GAP_REGEX
        .replace_all(text, |caps: &regex::Captures| if caps[1].trim().is_empty() { caps[0].to_string() } else { String::new() })
        .trim()
        .to_string();

    GapParseResult {
        has_gaps: true,
        cleaned_output,
        gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_gaps_leaves_output_untouched() {
        let input = "Plan: ship caching layer with Redis.";
        let result = parse_gaps(input);
        assert!(!result.has_gaps);
        assert_eq!(result.cleaned_output, input);
        assert!(result.gaps.is_empty());
    }

    #[test]
    fn one_well_formed_gap_is_extracted_and_stripped() {
        let input = "Plan outline.\n<gap><question>Which database?</question><urgency>blocking</urgency></gap>\nDone.";
        let result = parse_gaps(input);
        assert!(result.has_gaps);
        assert_eq!(result.gaps.len(), 1);
        assert_eq!(result.gaps[0].question, "Which database?");
        assert_eq!(result.gaps[0].urgency, Urgency::Blocking);
        assert!(!result.cleaned_output.contains("<gap>"));
        assert!(result.cleaned_output.contains("Plan outline."));
        assert!(result.cleaned_output.contains("Done."));
    }

    #[test]
    fn multiple_gaps_all_counted() {
        let input = "<gap><question>A?</question><urgency>advisory</urgency></gap>\
                     <gap><question>B?</question><urgency>blocking</urgency></gap>";
        let result = parse_gaps(input);
        assert_eq!(result.gaps.len(), 2);
        assert_eq!(result.gaps[0].urgency, Urgency::Advisory);
        assert_eq!(result.gaps[1].urgency, Urgency::Blocking);
    }

    #[test]
    fn empty_question_is_not_well_formed_and_not_counted() {
        let input = "<gap><question></question><urgency>blocking</urgency></gap>";
        let result = parse_gaps(input);
        assert!(!result.has_gaps);
        assert!(result.gaps.is_empty());
    }
}
