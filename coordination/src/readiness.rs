//! Readiness Analyzer
//!
//! Decides whether an issue's clarifying questions have all been answered.
//!
//! ```text
//! issue body ──► "Clarifying Questions" section ──► 1. ... 2. ... 3. ...
//! comments (chronological) ──► A1: / Answer 2: / Q3: ... A: / "4. text"
//!                                    │
//!                                    ▼
//!                     unanswered = questions − answered
//! ```
//!
//! The analyzer is a pure function of `(body, comments)`: re-running it on an
//! edited issue always yields the same report for the same text.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MalformedQuestionFormat;
use crate::issue::{IssueComment, IssueSnapshot};
use crate::notices;

/// The section title at the start of a line, as a heading, in bold, or
/// followed by a colon. A mention inside prose is not a section.
static SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*[ \t]*)?clarifying[ \t]+questions[ \t]*(?:\*\*)?[ \t]*(?::|\r?$)",
    )
    .expect("SECTION_MARKER regex should compile")
});

/// A markdown heading, a bold-only line, or a `Label:` line closes the
/// questions section.
static SECTION_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}(?:#{1,6}\s|\*\*[^*]+\*\*\s*:?\s*$|[A-Za-z][\w \t/()-]*:\s*$)")
        .expect("SECTION_END regex should compile")
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d{1,3}\.|[-*+])\s").expect("LIST_ITEM regex should compile")
});

static QUESTION_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^|[ \t])(\d{1,3})\.[ \t]+").expect("QUESTION_NUMBER regex should compile")
});

static SHORT_ANSWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bA(\d{1,3})\s*:").expect("SHORT_ANSWER regex should compile")
});

static LONG_ANSWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\banswer\s*#?(\d{1,3})\s*:").expect("LONG_ANSWER regex should compile")
});

/// `Q<N>:` (group 1) or a bare `A:`.
static QUOTED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Q(\d{1,3})|A)\s*:").expect("QUOTED_TOKEN regex should compile")
});

static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(\d{1,3})\.[ \t]+\S").expect("NUMBERED_LINE regex should compile")
});

/// A numbered question extracted from the issue body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    /// 1-based index exactly as written in the body.
    pub index: u32,
    pub text: String,
}

/// Which marker form matched an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerForm {
    /// `A<N>:`
    Short,
    /// `Answer <N>:`
    Long,
    /// `Q<N>: ... A:`
    Quoted,
    /// `<N>. text` at the start of a line
    NumberedLine,
}

/// An answer marker that references an existing question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerMatch {
    pub index: u32,
    /// Position of the comment in chronological order.
    pub comment: usize,
    pub form: AnswerForm,
}

/// How the question numbers in the body were interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Numbering {
    /// No questions.
    None,
    /// `1, 2, ..., N` in document order.
    Contiguous,
    /// Gaps or out-of-order numbers; indices taken literally.
    Literal,
}

/// Output of [`analyze`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub has_section: bool,
    pub total_questions: usize,
    pub questions: Vec<ClarifyingQuestion>,
    pub answers: Vec<AnswerMatch>,
    /// Ascending.
    pub unanswered: Vec<u32>,
    pub numbering: Numbering,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<MalformedQuestionFormat>,
    pub ready: bool,
}

impl ReadinessReport {
    fn no_section() -> Self {
        Self {
            has_section: false,
            total_questions: 0,
            questions: Vec::new(),
            answers: Vec::new(),
            unanswered: Vec::new(),
            numbering: Numbering::None,
            malformed: None,
            ready: true,
        }
    }

    fn malformed(questions: Vec<ClarifyingQuestion>, reason: MalformedQuestionFormat) -> Self {
        Self {
            has_section: true,
            total_questions: questions.len(),
            questions,
            answers: Vec::new(),
            unanswered: Vec::new(),
            numbering: Numbering::None,
            malformed: Some(reason),
            ready: false,
        }
    }

    /// One-line summary for logs and dry-run output.
    pub fn summary(&self) -> String {
        if let Some(reason) = &self.malformed {
            return format!("malformed questions section ({reason}), not ready");
        }
        if !self.has_section {
            return "no clarifying questions, ready".to_string();
        }
        if self.ready {
            format!("all {} question(s) answered, ready", self.total_questions)
        } else {
            let pending: Vec<String> = self.unanswered.iter().map(|i| i.to_string()).collect();
            format!(
                "{}/{} question(s) unanswered [{}]",
                self.unanswered.len(),
                self.total_questions,
                pending.join(", ")
            )
        }
    }
}

/// Analyze an issue body and its comments.
///
/// `comments` must already be in chronological order.
pub fn analyze(body: &str, comments: &[&str]) -> ReadinessReport {
    let Some(section) = questions_section(body) else {
        return ReadinessReport::no_section();
    };

    let questions = extract_questions(&section);
    if questions.is_empty() {
        return ReadinessReport::malformed(questions, MalformedQuestionFormat::NoQuestions);
    }

    let mut seen = BTreeSet::new();
    let duplicate = questions
        .iter()
        .find(|q| !seen.insert(q.index))
        .map(|q| q.index);
    if let Some(index) = duplicate {
        return ReadinessReport::malformed(questions, MalformedQuestionFormat::DuplicateIndex(index));
    }

    let numbering = if questions
        .iter()
        .enumerate()
        .all(|(pos, q)| q.index as usize == pos + 1)
    {
        Numbering::Contiguous
    } else {
        Numbering::Literal
    };

    let mut answers = Vec::new();
    for (pos, comment) in comments.iter().enumerate() {
        for (index, form) in answer_markers(comment) {
            if seen.contains(&index) {
                answers.push(AnswerMatch {
                    index,
                    comment: pos,
                    form,
                });
            }
        }
    }

    let answered: BTreeSet<u32> = answers.iter().map(|a| a.index).collect();
    let unanswered: Vec<u32> = seen.difference(&answered).copied().collect();

    ReadinessReport {
        has_section: true,
        total_questions: questions.len(),
        questions,
        answers,
        ready: unanswered.is_empty(),
        unanswered,
        numbering,
        malformed: None,
    }
}

/// Analyze a fetched issue, skipping the orchestrator's own comments.
pub fn analyze_issue(issue: &IssueSnapshot) -> ReadinessReport {
    let comments: Vec<&str> = issue
        .comments_chronological()
        .into_iter()
        .map(|c: &IssueComment| c.body.as_str())
        .filter(|body| !notices::is_orchestrator_comment(body))
        .collect();
    analyze(&issue.body, &comments)
}

/// Text of the "Clarifying Questions" section, if the body has one.
fn questions_section(body: &str) -> Option<String> {
    let marker = SECTION_MARKER.find(body)?;
    let after = &body[marker.end()..];
    let (marker_line, rest) = match after.find('\n') {
        Some(i) => (&after[..i], &after[i + 1..]),
        None => (after, ""),
    };

    let mut section = marker_line
        .trim_start_matches(|c: char| c == ':' || c == '*' || c.is_whitespace())
        .to_string();
    let lines: Vec<&str> = rest.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if SECTION_END.is_match(line) {
            break;
        }
        // A blank line ends the section unless a list continues after it.
        if line.trim().is_empty() {
            let next = lines[i + 1..].iter().find(|l| !l.trim().is_empty());
            if !next.is_some_and(|l| LIST_ITEM.is_match(l)) {
                break;
            }
        }
        section.push('\n');
        section.push_str(line);
    }
    Some(section)
}

fn extract_questions(section: &str) -> Vec<ClarifyingQuestion> {
    let matches: Vec<(u32, usize, usize)> = QUESTION_NUMBER
        .captures_iter(section)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let index = caps.get(1)?.as_str().parse().ok()?;
            Some((index, whole.start(), whole.end()))
        })
        .filter(|(index, _, _)| *index > 0)
        .collect();

    matches
        .iter()
        .enumerate()
        .map(|(i, &(index, _, text_start))| {
            let text_end = matches
                .get(i + 1)
                .map(|&(_, next_start, _)| next_start)
                .unwrap_or(section.len());
            ClarifyingQuestion {
                index,
                text: section[text_start..text_end].trim().to_string(),
            }
        })
        .collect()
}

/// Every answer marker in one comment, in form order.
fn answer_markers(comment: &str) -> Vec<(u32, AnswerForm)> {
    let forms: [(&Regex, AnswerForm); 3] = [
        (&SHORT_ANSWER, AnswerForm::Short),
        (&LONG_ANSWER, AnswerForm::Long),
        (&NUMBERED_LINE, AnswerForm::NumberedLine),
    ];

    let mut found = Vec::new();
    for (pattern, form) in forms {
        for caps in pattern.captures_iter(comment) {
            if let Some(index) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                found.push((index, form));
            }
        }
    }
    found.extend(quoted_answers(comment).into_iter().map(|i| (i, AnswerForm::Quoted)));
    found
}

/// `A:` answers the closest `Q<N>:` before it.
fn quoted_answers(comment: &str) -> Vec<u32> {
    let mut last_question = None;
    let mut answered = Vec::new();
    for caps in QUOTED_TOKEN.captures_iter(comment) {
        match caps.get(1) {
            Some(index) => last_question = index.as_str().parse::<u32>().ok(),
            None => answered.extend(last_question.take()),
        }
    }
    answered
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_QUESTIONS: &str = "Set up storage.\n\nClarifying Questions: 1. Which DB? 2. Which region?";

    #[test]
    fn test_no_section_is_ready() {
        let report = analyze("Just build the thing.", &[]);
        assert!(report.ready);
        assert!(!report.has_section);
        assert_eq!(report.total_questions, 0);
        assert!(report.unanswered.is_empty());
    }

    #[test]
    fn test_inline_questions_unanswered() {
        let report = analyze(TWO_QUESTIONS, &[]);
        assert!(!report.ready);
        assert_eq!(report.total_questions, 2);
        assert_eq!(report.unanswered, vec![1, 2]);
        assert_eq!(report.numbering, Numbering::Contiguous);
        assert_eq!(report.questions[0].text, "Which DB?");
        assert_eq!(report.questions[1].text, "Which region?");
    }

    #[test]
    fn test_short_and_long_answers_make_ready() {
        let report = analyze(TWO_QUESTIONS, &["A1: Postgres", "Answer 2: us-west"]);
        assert!(report.ready, "{}", report.summary());
        assert!(report.unanswered.is_empty());
        assert_eq!(report.answers.len(), 2);
        assert_eq!(report.answers[0].form, AnswerForm::Short);
        assert_eq!(report.answers[1].form, AnswerForm::Long);
        assert_eq!(report.answers[1].comment, 1);
    }

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        let report = analyze(TWO_QUESTIONS, &["a1: postgres\nANSWER 2: eu"]);
        assert!(report.ready);
    }

    #[test]
    fn test_quoted_question_answer_form() {
        let report = analyze(
            TWO_QUESTIONS,
            &["Q2: Which region?\nA: us-east-1 please"],
        );
        assert_eq!(report.unanswered, vec![1]);
        assert_eq!(report.answers[0].form, AnswerForm::Quoted);
        assert_eq!(report.answers[0].index, 2);
    }

    #[test]
    fn test_bare_answer_goes_to_closest_question() {
        let report = analyze(
            TWO_QUESTIONS,
            &["Q1: Which DB?\nQ2: Which region?\nA: us-west"],
        );
        assert_eq!(report.unanswered, vec![1]);
        assert_eq!(report.answers.len(), 1);
        assert_eq!(report.answers[0].index, 2);

        let report = analyze(
            TWO_QUESTIONS,
            &["Q1: Which DB?\nA: pg\nQ2: Which region?\nA: eu"],
        );
        assert!(report.ready, "{}", report.summary());
    }

    #[test]
    fn test_bare_answer_without_question_is_ignored() {
        let report = analyze(TWO_QUESTIONS, &["A: whatever works"]);
        assert_eq!(report.unanswered, vec![1, 2]);
    }

    #[test]
    fn test_bare_numbered_line_counts_as_answer() {
        let report = analyze(TWO_QUESTIONS, &["1. Postgres\n2. us-west"]);
        assert!(report.ready);
        assert!(report
            .answers
            .iter()
            .all(|a| a.form == AnswerForm::NumberedLine));
    }

    #[test]
    fn test_answer_to_unknown_index_is_ignored() {
        let report = analyze(TWO_QUESTIONS, &["A1: Postgres", "A7: irrelevant"]);
        assert_eq!(report.unanswered, vec![2]);
        assert_eq!(report.answers.len(), 1);
    }

    #[test]
    fn test_heading_section_with_following_heading() {
        let body = "## Goal\nShip it.\n\n## Clarifying Questions\n1. Which DB?\n2. Which region?\n3. Budget?\n\n## Acceptance\n1. tests pass\n";
        let report = analyze(body, &["A3: small"]);
        assert_eq!(report.total_questions, 3);
        assert_eq!(report.unanswered, vec![1, 2]);
    }

    #[test]
    fn test_label_line_ends_inline_section() {
        let body = "Clarifying Questions: 1. Which DB? 2. Which region?\n\nAcceptance criteria:\n1. tests pass\n2. docs updated";
        let report = analyze(body, &["A1: pg", "Answer 2: us-west"]);
        assert_eq!(report.malformed, None);
        assert_eq!(report.total_questions, 2);
        assert!(report.ready, "{}", report.summary());
    }

    #[test]
    fn test_paragraph_after_blank_line_ends_section() {
        let body = "Clarifying Questions\n1. Which DB?\n\n2. Which region?\n\nSteps to reproduce\n1. open the page\n2. click save";
        let report = analyze(body, &["A1: pg", "A2: eu"]);
        assert_eq!(report.total_questions, 2);
        assert!(report.ready, "{}", report.summary());

        // Bare numbered answers still only cover the two questions.
        let report = analyze(body, &["1. pg\n2. eu\n3. unrelated"]);
        assert!(report.ready);
        assert_eq!(report.answers.len(), 2);
    }

    #[test]
    fn test_prose_mention_before_heading_is_skipped() {
        let body = "Please read the clarifying questions below.\n\n## Clarifying Questions\n1. Which DB?\n2. Which region?";
        let report = analyze(body, &["A1: pg", "A2: eu"]);
        assert_eq!(report.malformed, None);
        assert_eq!(report.total_questions, 2);
        assert!(report.ready);

        let report = analyze(body, &["A1: pg"]);
        assert_eq!(report.unanswered, vec![2]);
    }

    #[test]
    fn test_prose_mention_alone_is_no_section() {
        let report = analyze("No clarifying questions needed, the design is settled.", &[]);
        assert!(!report.has_section);
        assert!(report.ready);
    }

    #[test]
    fn test_bold_title_with_colon_opens_section() {
        let report = analyze("**Clarifying Questions:**\n1. Which DB?", &["A1: pg"]);
        assert_eq!(report.total_questions, 1);
        assert!(report.ready);
    }

    #[test]
    fn test_gap_in_numbering_uses_literal_indices() {
        let body = "Clarifying Questions\n1. Which DB?\n3. Which region?";
        let report = analyze(body, &["A3: eu"]);
        assert_eq!(report.numbering, Numbering::Literal);
        assert_eq!(report.unanswered, vec![1]);

        let report = analyze(body, &["A1: pg", "A3: eu"]);
        assert!(report.ready);
    }

    #[test]
    fn test_empty_section_is_malformed_and_not_ready() {
        let report = analyze("**Clarifying Questions**\nnone yet\n", &[]);
        assert!(!report.ready);
        assert_eq!(report.malformed, Some(MalformedQuestionFormat::NoQuestions));
    }

    #[test]
    fn test_duplicate_index_is_malformed() {
        let body = "Clarifying Questions\n1. Which DB?\n1. Which region?";
        let report = analyze(body, &["A1: pg"]);
        assert!(!report.ready);
        assert_eq!(
            report.malformed,
            Some(MalformedQuestionFormat::DuplicateIndex(1))
        );
    }

    #[test]
    fn test_quoted_question_lines_are_not_answers() {
        let report = analyze(TWO_QUESTIONS, &["> 1. Which DB?\nstill thinking"]);
        assert_eq!(report.unanswered, vec![1, 2]);
    }

    #[test]
    fn test_every_subset_of_answers() {
        let body = "Clarifying Questions:\n1. a?\n2. b?\n3. c?\n4. d?";
        for mask in 0u32..16 {
            let answers: Vec<String> = (1..=4)
                .filter(|i| mask & (1 << (i - 1)) != 0)
                .map(|i| format!("A{i}: yes"))
                .collect();
            let refs: Vec<&str> = answers.iter().map(String::as_str).collect();
            let report = analyze(body, &refs);

            let expected: Vec<u32> = (1..=4).filter(|i| mask & (1 << (i - 1)) == 0).collect();
            assert_eq!(report.unanswered, expected, "mask {mask:#06b}");
            assert_eq!(report.ready, mask == 0b1111);
        }
    }

    #[test]
    fn test_deterministic_on_repeat() {
        let comments = ["A2: eu"];
        assert_eq!(analyze(TWO_QUESTIONS, &comments), analyze(TWO_QUESTIONS, &comments));
    }

    #[test]
    fn test_summary_lists_pending() {
        let report = analyze(TWO_QUESTIONS, &["A1: pg"]);
        assert_eq!(report.summary(), "1/2 question(s) unanswered [2]");
    }
}
