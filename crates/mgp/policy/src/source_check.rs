//! Pluggable source safety checks.
//!
//! The governance core makes no assumption about the language agents are
//! written in. Syntax, import and complexity analysis of mutated sources go
//! through [`SourceSafetyCheck`]; a language-specific implementation can be
//! supplied per deployment.

use serde::{Deserialize, Serialize};

/// Result of checking one source text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCheck {
    pub ok: bool,
    pub reason: String,
}

impl SourceCheck {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }
}

/// Language-specific analysis of mutated agent sources.
pub trait SourceSafetyCheck: Send + Sync {
    /// Name of this checker, recorded in rule details.
    fn name(&self) -> &str;

    /// Does the source parse?
    fn syntax(&self, target: &str, source: &str) -> SourceCheck;

    /// Do the source's imports resolve?
    fn imports(&self, _target: &str, _source: &str) -> SourceCheck {
        SourceCheck::ok("imports_not_checked")
    }

    /// Cyclomatic-style complexity score of the source.
    fn complexity(&self, source: &str) -> u32;
}

const BRANCH_WORDS: [&str; 10] = [
    "if", "elif", "for", "while", "case", "match", "except", "catch", "and", "or",
];
const BRANCH_OPERATORS: [&str; 2] = ["&&", "||"];

/// Language-agnostic default: balanced delimiters outside string literals,
/// and a keyword-count complexity estimate.
#[derive(Clone, Debug, Default)]
pub struct DelimiterBalanceCheck;

impl SourceSafetyCheck for DelimiterBalanceCheck {
    fn name(&self) -> &str {
        "delimiter-balance"
    }

    fn syntax(&self, target: &str, source: &str) -> SourceCheck {
        if source.contains('\0') {
            return SourceCheck::fail(format!("nul_byte:{target}"));
        }
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for (line_no, line) in source.lines().enumerate() {
            let line_no = line_no + 1;
            for c in line.chars() {
                if let Some(q) = quote {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == q {
                        quote = None;
                    }
                    continue;
                }
                match c {
                    '"' | '\'' => quote = Some(c),
                    '#' => break,
                    '(' | '[' | '{' => stack.push((c, line_no)),
                    ')' | ']' | '}' => {
                        let expected = match c {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match stack.pop() {
                            Some((open, _)) if open == expected => {}
                            _ => {
                                return SourceCheck::fail(format!(
                                    "unbalanced_delimiter:{c}@{target}:{line_no}"
                                ))
                            }
                        }
                    }
                    _ => {}
                }
            }
            // Single-line string literals end at the line break.
            if matches!(quote, Some('\'')) {
                quote = None;
            }
            escaped = false;
        }
        if let Some(q) = quote {
            return SourceCheck::fail(format!("unterminated_string:{q}@{target}"));
        }
        if let Some((open, line)) = stack.pop() {
            return SourceCheck::fail(format!("unclosed_delimiter:{open}@{target}:{line}"));
        }
        SourceCheck::ok("delimiters_balanced")
    }

    fn complexity(&self, source: &str) -> u32 {
        let words = source
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| BRANCH_WORDS.contains(w))
            .count();
        let operators: usize = BRANCH_OPERATORS
            .iter()
            .map(|op| source.matches(op).count())
            .sum();
        1 + (words + operators) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_source_passes() {
        let check = DelimiterBalanceCheck;
        let src = "def f(x):\n    return [x, {'a': (1, 2)}]  # ) stray in comment\n";
        assert!(check.syntax("f.py", src).ok);
    }

    #[test]
    fn delimiters_inside_strings_ignored() {
        let check = DelimiterBalanceCheck;
        assert!(check.syntax("f.py", "s = \"(unclosed in string\"\n").ok);
    }

    #[test]
    fn unbalanced_source_fails() {
        let check = DelimiterBalanceCheck;
        let r = check.syntax("f.py", "def f(:\n    pass\n");
        assert!(!r.ok);
        assert!(r.reason.starts_with("unclosed_delimiter:("));
        let r = check.syntax("g.py", "x = ]\n");
        assert_eq!(r.reason, "unbalanced_delimiter:]@g.py:1");
    }

    #[test]
    fn complexity_counts_branches() {
        let check = DelimiterBalanceCheck;
        assert_eq!(check.complexity("x = 1"), 1);
        let src = "if a and b:\n    pass\nfor i in x:\n    if i or j: pass\n";
        assert_eq!(check.complexity(src), 1 + 5);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_source_never_panics(src in ".{0,200}") {
                let check = DelimiterBalanceCheck;
                let _ = check.syntax("x.py", &src);
                prop_assert!(check.complexity(&src) >= 1);
            }

            #[test]
            fn nesting_balances(depth in 0usize..40) {
                let src = format!("{}{}", "(".repeat(depth), ")".repeat(depth));
                prop_assert!(DelimiterBalanceCheck.syntax("x.py", &src).ok);
            }
        }
    }
}
