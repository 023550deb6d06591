//! Search query matching
//!
//! Queries are whitespace-separated tokens matched case-insensitively
//! against file names:
//! - `word` matches names containing `word`
//! - `a+b` matches names containing both `a` and `b`
//! - `!word` rejects any name containing `word`
//!
//! A name matches when no exclusion hits and at least one other token matches.

/// A parsed query token
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Contains(String),
    All(Vec<String>),
    Exclude(String),
}

/// A parsed search query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    terms: Vec<Term>,
}

impl Query {
    /// Parse a query string
    ///
    /// Returns `None` for queries that can never match anything
    /// (blank, or a lone `-` / `+`).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "-" || trimmed == "+" {
            return None;
        }

        let terms = trimmed
            .split_whitespace()
            .filter_map(|token| {
                let token = token.to_uppercase();
                if let Some(rest) = token.strip_prefix('!') {
                    if rest.is_empty() {
                        return None;
                    }
                    Some(Term::Exclude(rest.to_string()))
                } else if token.contains('+') {
                    let parts: Vec<String> = token
                        .split('+')
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect();
                    if parts.is_empty() {
                        None
                    } else {
                        Some(Term::All(parts))
                    }
                } else {
                    Some(Term::Contains(token))
                }
            })
            .collect::<Vec<_>>();

        if terms.is_empty() {
            return None;
        }
        Some(Self { terms })
    }

    /// Check a file name against the query
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim().to_uppercase();
        let mut accepted = false;

        for term in &self.terms {
            match term {
                Term::Exclude(word) => {
                    if name.contains(word.as_str()) {
                        return false;
                    }
                }
                Term::All(words) => {
                    if words.iter().all(|w| name.contains(w.as_str())) {
                        accepted = true;
                    }
                }
                Term::Contains(word) => {
                    if name.contains(word.as_str()) {
                        accepted = true;
                    }
                }
            }
        }

        accepted
    }
}

/// One-shot helper: parse `query` and test `name` against it
pub fn matches(query: &str, name: &str) -> bool {
    Query::parse(query).is_some_and(|q| q.matches(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_queries_match_nothing() {
        assert!(Query::parse("").is_none());
        assert!(Query::parse("   ").is_none());
        assert!(Query::parse("-").is_none());
        assert!(Query::parse(" + ").is_none());
        assert!(!matches("", "anything.mp3"));
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        assert!(matches("beat", "The Beatles - Help.mp3"));
        assert!(matches("HELP", "the beatles - help.mp3"));
        assert!(!matches("stones", "The Beatles - Help.mp3"));
    }

    #[test]
    fn test_any_plain_token_matches() {
        assert!(matches("stones beatles", "The Beatles - Help.mp3"));
    }

    #[test]
    fn test_conjunction_requires_both() {
        assert!(matches("beatles+help", "The Beatles - Help.mp3"));
        assert!(!matches("beatles+yesterday", "The Beatles - Help.mp3"));
    }

    #[test]
    fn test_exclusion_rejects() {
        assert!(!matches("beatles !help", "The Beatles - Help.mp3"));
        assert!(matches("beatles !live", "The Beatles - Help.mp3"));
        assert!(!matches("!live", "The Beatles - Help.mp3"));
    }

    #[test]
    fn test_exclusion_wins_regardless_of_order() {
        assert!(!matches("!help beatles", "The Beatles - Help.mp3"));
    }
}
