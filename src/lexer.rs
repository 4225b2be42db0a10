//! Template tokenizer
//!
//! Splits raw template text into a flat sequence of TEXT, VARIABLE, and TAG
//! tokens on the three delimiter pairs `{{ }}`, `{% %}`, and `{# #}`.
//! Comments are discarded, whitespace-only text segments are dropped, and
//! unterminated delimiters degrade to plain text. Nesting is the parser's
//! concern; tokenizing never fails.

/// Token categories produced by [`tokenize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Variable,
    Tag,
}

/// One template token with the 1-based line number it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub content: String,
    pub line: usize,
}

impl Token {
    fn new(kind: TokenKind, content: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            content: content.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Variable,
    Tag,
    Comment,
}

impl Delimiter {
    fn closer(self) -> &'static str {
        match self {
            Delimiter::Variable => "}}",
            Delimiter::Tag => "%}",
            Delimiter::Comment => "#}",
        }
    }
}

/// Tokenize template source. Never fails: anything that is not a complete
/// delimited construct comes through as TEXT.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let Some((offset, delimiter)) = find_opener(rest) else {
            push_text(&mut tokens, rest, line);
            break;
        };

        let text = &rest[..offset];
        push_text(&mut tokens, text, line);
        line += newlines(text);

        let body = &rest[offset + 2..];
        let Some(close) = body.find(delimiter.closer()) else {
            // Unterminated delimiter: the remainder is ordinary text.
            push_text(&mut tokens, &rest[offset..], line);
            break;
        };

        let content = &body[..close];
        match delimiter {
            Delimiter::Variable => {
                tokens.push(Token::new(TokenKind::Variable, content.trim(), line))
            }
            Delimiter::Tag => tokens.push(Token::new(TokenKind::Tag, content.trim(), line)),
            Delimiter::Comment => {}
        }
        line += newlines(&rest[offset..offset + 2 + close + 2]);
        pos += offset + 2 + close + 2;
    }

    tokens
}

/// Earliest opening delimiter in `rest`, if any.
fn find_opener(rest: &str) -> Option<(usize, Delimiter)> {
    let candidates = [
        ("{{", Delimiter::Variable),
        ("{%", Delimiter::Tag),
        ("{#", Delimiter::Comment),
    ];
    candidates
        .iter()
        .filter_map(|(open, delim)| rest.find(open).map(|at| (at, *delim)))
        .min_by_key(|(at, _)| *at)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, line: usize) {
    if !text.is_empty() && !text.chars().all(char::is_whitespace) {
        tokens.push(Token::new(TokenKind::Text, text, line));
    }
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<(TokenKind, String)> {
        tokenize(source)
            .into_iter()
            .map(|t| (t.kind, t.content))
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            kinds("hello world"),
            vec![(TokenKind::Text, "hello world".to_string())]
        );
    }

    #[test]
    fn test_variable_and_tag() {
        assert_eq!(
            kinds("a {{ name }} b {% if x %}c{% endif %}"),
            vec![
                (TokenKind::Text, "a ".to_string()),
                (TokenKind::Variable, "name".to_string()),
                (TokenKind::Text, " b ".to_string()),
                (TokenKind::Tag, "if x".to_string()),
                (TokenKind::Text, "c".to_string()),
                (TokenKind::Tag, "endif".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_discarded() {
        assert_eq!(
            kinds("a{# not for output #}b"),
            vec![
                (TokenKind::Text, "a".to_string()),
                (TokenKind::Text, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_whitespace_only_text_dropped() {
        assert_eq!(
            kinds("{{ a }}   {{ b }}"),
            vec![
                (TokenKind::Variable, "a".to_string()),
                (TokenKind::Variable, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_unterminated_delimiter_is_text() {
        assert_eq!(
            kinds("a {{ name"),
            vec![
                (TokenKind::Text, "a ".to_string()),
                (TokenKind::Text, "{{ name".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("one\ntwo {{ x }}\n{% if y %}\n{% endif %}");
        let lines: Vec<(TokenKind, usize)> =
            tokens.into_iter().map(|t| (t.kind, t.line)).collect();
        assert_eq!(
            lines,
            vec![
                (TokenKind::Text, 1),
                (TokenKind::Variable, 2),
                (TokenKind::Tag, 3),
                (TokenKind::Tag, 4),
            ]
        );
    }

    #[test]
    fn test_multiline_tag_counts_lines() {
        let tokens = tokenize("{% if\nx %}a{% endif %}b\n{{ y }}");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].content, "if\nx");
        // 'a' text and endif sit on line 2, after the embedded newline
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[4].line, 3);
    }

    #[test]
    fn test_lone_braces_are_text() {
        assert_eq!(
            kinds("a { b } c"),
            vec![(TokenKind::Text, "a { b } c".to_string())]
        );
    }
}
