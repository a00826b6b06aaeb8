//! Deterministic keyword classification of task descriptions.
//!
//! Used when the classification backend is unavailable or answers with
//! something unusable.

use crate::core::types::Domain;

const CODING_KEYWORDS: &[&str] = &[
    "code",
    "bug",
    "fix",
    "function",
    "compile",
    "refactor",
    "implement",
    "debug",
    "unit test",
    "parser",
    "syntax",
    "stack trace",
    "null-pointer",
    "segfault",
    "exception",
    "class",
    "method",
    "module",
    "library",
    "rust",
    "python",
    "javascript",
    "typescript",
    "golang",
    "java",
    "pull request",
    "commit",
    "repository",
];

const RESEARCH_KEYWORDS: &[&str] = &[
    "research",
    "investigate",
    "explain",
    "compare",
    "summarize",
    "summary",
    "overview",
    "find out",
    "learn about",
    "what is",
    "how does",
    "why does",
    "documentation",
    "literature",
    "pros and cons",
    "review",
];

const DATA_KEYWORDS: &[&str] = &[
    "data",
    "csv",
    "dataset",
    "statistics",
    "statistical",
    "plot",
    "chart",
    "graph",
    "spreadsheet",
    "excel",
    "aggregate",
    "average",
    "median",
    "column",
    "rows",
    "sql",
    "pandas",
    "parquet",
    "visualize",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "organize",
    "rename",
    "list files",
    "clean up",
    "move files",
    "directory",
    "folder",
];

/// Keyword list for `domain`.
pub fn keywords(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Coding => CODING_KEYWORDS,
        Domain::Research => RESEARCH_KEYWORDS,
        Domain::Data => DATA_KEYWORDS,
        Domain::General => GENERAL_KEYWORDS,
    }
}

/// Per-domain keyword hit counts, in [`Domain::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordScores {
    scores: [u32; 4],
}

impl KeywordScores {
    pub fn get(&self, domain: Domain) -> u32 {
        self.scores[index(domain)]
    }

    pub fn total(&self) -> u32 {
        self.scores.iter().sum()
    }

    /// Highest-scoring domain; ties go to the earlier domain in [`Domain::ALL`],
    /// and an all-zero score picks `General`.
    pub fn best(&self) -> Domain {
        if self.total() == 0 {
            return Domain::General;
        }
        let mut best = Domain::ALL[0];
        for domain in Domain::ALL {
            if self.get(domain) > self.get(best) {
                best = domain;
            }
        }
        best
    }
}

fn index(domain: Domain) -> usize {
    match domain {
        Domain::Coding => 0,
        Domain::Research => 1,
        Domain::Data => 2,
        Domain::General => 3,
    }
}

/// Count case-insensitive substring hits of each domain's keywords.
pub fn score_keywords(text: &str) -> KeywordScores {
    let haystack = text.to_lowercase();
    let mut scores = [0u32; 4];
    for domain in Domain::ALL {
        let hits = keywords(domain)
            .iter()
            .filter(|keyword| haystack.contains(*keyword))
            .count();
        scores[index(domain)] = u32::try_from(hits).unwrap_or(u32::MAX);
    }
    KeywordScores { scores }
}

/// Classify `text` by keyword score alone.
pub fn classify_by_keywords(text: &str) -> (Domain, KeywordScores) {
    let scores = score_keywords(text);
    (scores.best(), scores)
}
