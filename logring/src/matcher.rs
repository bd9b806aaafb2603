use protocol::{Pattern, PatternKind};

/// Sink-name matcher compiled from a wire [`Pattern`]. An invalid pattern
/// is a value, not a fault: the failure text travels back to the remote
/// controller as an error frame.
#[derive(Debug)]
pub(crate) enum Matcher {
    All,
    Regex(regex::Regex),
}

impl Matcher {
    pub(crate) fn compile(pattern: &Pattern) -> Result<Matcher, String> {
        let text = match pattern.kind {
            PatternKind::None => return Ok(Matcher::All),
            PatternKind::Wildcard => wildcard_to_regex(&pattern.text),
            // Both POSIX dialects map onto the one dialect the regex crate
            // implements.
            PatternKind::BasicRegex | PatternKind::ExtendedRegex => pattern.text.clone(),
        };
        regex::RegexBuilder::new(&text)
            .case_insensitive(pattern.ignore_case)
            .build()
            .map(Matcher::Regex)
            .map_err(|e| e.to_string())
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Regex(re) => re.is_match(name),
        }
    }
}

/// Glob-style pattern to anchored regex: `*` and `?` translate, character
/// classes pass through, everything else is matched literally. A glob
/// matches the whole name; plain regex patterns keep substring semantics.
fn wildcard_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            '\\' => {
                out.push('\\');
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("Foo*", "Foo", true)]
    #[case("Foo*", "FooBar", true)]
    #[case("Foo*", "FobFar", false)]
    #[case("Foo*", "Baz", false)]
    #[case("F?o", "Foo", true)]
    #[case("F?o", "Fooo", false)]
    #[case("a.b", "a.b", true)]
    #[case("a.b", "axb", false)]
    #[case("[ab]x", "ax", true)]
    #[case("[ab]x", "cx", false)]
    fn test_wildcard(#[case] glob: &str, #[case] name: &str, #[case] expected: bool) {
        let m = Matcher::compile(&Pattern::wildcard(glob)).unwrap();
        assert_eq!(m.matches(name), expected);
    }

    #[rstest]
    fn test_wildcard_matches_whole_name() {
        let m = Matcher::compile(&Pattern::wildcard("oo")).unwrap();
        assert!(!m.matches("Foo"));
    }

    #[rstest]
    fn test_regex_substring_semantics() {
        let m = Matcher::compile(&Pattern::extended_regex("oo")).unwrap();
        assert!(m.matches("Foo"));
        assert!(!m.matches("Bar"));
    }

    #[rstest]
    fn test_none_matches_everything() {
        let m = Matcher::compile(&Pattern::none()).unwrap();
        assert!(m.matches("anything"));
        assert!(m.matches(""));
    }

    #[rstest]
    fn test_ignore_case() {
        let m = Matcher::compile(&Pattern::wildcard("foo*").ignore_case()).unwrap();
        assert!(m.matches("FOOBAR"));
        let m = Matcher::compile(&Pattern::wildcard("foo*")).unwrap();
        assert!(!m.matches("FOOBAR"));
    }

    #[rstest]
    fn test_invalid_regex_reports_reason() {
        let err = Matcher::compile(&Pattern::extended_regex("([")).unwrap_err();
        assert!(!err.is_empty());
    }
}
