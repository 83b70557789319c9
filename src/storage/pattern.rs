//! LIKE pattern matcher for key search.
//!
//! Supported wildcards:
//! - `%` matches any sequence of characters, including none
//! - `_` matches exactly one character
//!
//! Everything else is a literal. There is no escape character. Matching is
//! ASCII case-insensitive unless the pattern is compiled case-sensitive.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    One,
    Any,
}

/// A compiled LIKE pattern.
#[derive(Debug, Clone)]
pub struct LikePattern {
    tokens: Vec<Token>,
    case_sensitive: bool,
}

impl LikePattern {
    /// Compiles `pattern`.
    pub fn new(pattern: &str, case_sensitive: bool) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        for c in pattern.chars() {
            let token = match c {
                '%' => Token::Any,
                '_' => Token::One,
                c => Token::Literal(c),
            };
            // Runs of `%` collapse into one
            if token == Token::Any && tokens.last() == Some(&Token::Any) {
                continue;
            }
            tokens.push(token);
        }
        Self {
            tokens,
            case_sensitive,
        }
    }

    /// Literal characters before the first wildcard.
    ///
    /// Only meaningful for narrowing a sorted key scan when the pattern is
    /// case-sensitive; otherwise returns None.
    pub fn literal_prefix(&self) -> Option<String> {
        if !self.case_sensitive {
            return None;
        }
        let prefix: String = self
            .tokens
            .iter()
            .map_while(|t| match t {
                Token::Literal(c) => Some(*c),
                _ => None,
            })
            .collect();
        (!prefix.is_empty()).then_some(prefix)
    }

    /// True if the pattern matches every key.
    pub fn matches_all(&self) -> bool {
        self.tokens == [Token::Any]
    }

    /// Returns `true` if the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut p, mut t) = (0usize, 0usize);
        // Position after the last `%` seen, and the text position it was tried at
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::Any) => {
                    backtrack = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                Some(Token::One) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(Token::Literal(c)) if self.char_eq(*c, text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
            match backtrack {
                Some((after_any, tried)) => {
                    // Let the last `%` swallow one more character
                    p = after_any;
                    t = tried + 1;
                    backtrack = Some((after_any, tried + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|t| *t == Token::Any)
    }

    #[inline]
    fn char_eq(&self, a: char, b: char) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(&b)
        }
    }
}
