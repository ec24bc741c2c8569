//! Splits template source into text and actions, and actions into tokens.

/// A piece of template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Segment {
    /// Literal text, after whitespace trimming.
    Text(String),
    /// The inside of a `{{ }}` action.
    Action {
        /// Action body without delimiters or trim markers.
        body: String,
        /// 1-based line of the opening delimiter.
        line: usize,
    },
}

/// A lexical error with its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LexError {
    pub line: usize,
    pub message: String,
}

/// Splits source into segments, applying `{{-`/`-}}` trimming and dropping
/// comments.
pub(super) fn split_segments(source: &str) -> Result<Vec<Segment>, LexError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        line += rest[..start].matches('\n').count();

        let after_open = &rest[start + 2..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_whitespace());
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let inner = if trim_left { &after_open[1..] } else { after_open };
        let is_comment = inner.trim_start().starts_with("/*");
        let end = find_close(inner, is_comment).ok_or_else(|| LexError {
            line,
            message: String::from("unclosed action"),
        })?;

        let mut body = &inner[..end];
        let trim_right = body.ends_with('-')
            && body[..body.len() - 1].ends_with(|c: char| c.is_whitespace());
        if trim_right {
            body = &body[..body.len() - 1];
        }
        let body = body.trim();

        if is_comment {
            if !body.ends_with("*/") {
                return Err(LexError {
                    line,
                    message: String::from("unclosed comment"),
                });
            }
        } else if body.is_empty() {
            return Err(LexError {
                line,
                message: String::from("empty action"),
            });
        } else {
            segments.push(Segment::Action {
                body: body.to_string(),
                line,
            });
        }

        line += inner[..end].matches('\n').count();
        rest = &inner[end + 2..];
        trim_next = trim_right;
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        segments.push(Segment::Text(tail.to_string()));
    }
    Ok(segments)
}

/// Finds the closing `}}`, skipping over quoted strings outside comments.
fn find_close(inner: &str, is_comment: bool) -> Option<usize> {
    if is_comment {
        let comment_end = inner.find("*/")?;
        return inner[comment_end..].find("}}").map(|i| comment_end + i);
    }

    let bytes = inner.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

/// A token inside an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Token {
    /// `.Name`
    Field(String),
    /// `.`
    Dot,
    /// `$name`
    Var(String),
    /// `:=`
    Declare,
    /// `|`
    Pipe,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// String literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Bare word: keyword, function name or boolean.
    Ident(String),
}

/// Tokenizes an action body.
pub(super) fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let word_end = |from: usize| {
        let mut end = from;
        while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
            end += 1;
        }
        end
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '.' => {
                let end = word_end(i + 1);
                if end == i + 1 {
                    tokens.push(Token::Dot);
                } else {
                    tokens.push(Token::Field(chars[i + 1..end].iter().collect()));
                }
                i = end;
            }
            '$' => {
                let end = word_end(i + 1);
                if end == i + 1 {
                    return Err(String::from("variable name expected after '$'"));
                }
                tokens.push(Token::Var(chars[i + 1..end].iter().collect()));
                i = end;
            }
            '"' => {
                let (text, next) = read_quoted(&chars, i + 1)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            '`' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '`')
                    .ok_or_else(|| String::from("unterminated raw string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + close].iter().collect()));
                i += close + 2;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let mut end = i + 1;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let literal: String = chars[i..end].iter().collect();
                let value = literal
                    .parse()
                    .map_err(|_| format!("integer literal {literal} out of range"))?;
                tokens.push(Token::Int(value));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = word_end(i);
                tokens.push(Token::Ident(chars[i..end].iter().collect()));
                i = end;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut text = String::new();
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((text, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| String::from("unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(String::from("unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(body: &str, line: usize) -> Segment {
        Segment::Action {
            body: body.to_string(),
            line,
        }
    }

    #[test]
    fn test_split_text_and_actions() {
        let segments = split_segments("a {{ .Domain }}\nb {{ end }}").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text(String::from("a ")),
                action(".Domain", 1),
                Segment::Text(String::from("\nb ")),
                action("end", 2),
            ]
        );
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let segments = split_segments("x  \n{{- /* note */ -}}\n  y").unwrap();
        assert_eq!(
            segments,
            vec![Segment::Text(String::from("x")), Segment::Text(String::from("y"))]
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let segments = split_segments(r#"{{ "}}" }}"#).unwrap();
        assert_eq!(segments, vec![action(r#""}}""#, 1)]);
    }

    #[test]
    fn test_unclosed_action_reports_line() {
        let err = split_segments("one\ntwo {{ .Domain").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize(r#"$x := .Hostnames | join ", " (add 1 -2) ."#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Var(String::from("x")),
                Token::Declare,
                Token::Field(String::from("Hostnames")),
                Token::Pipe,
                Token::Ident(String::from("join")),
                Token::Str(String::from(", ")),
                Token::LParen,
                Token::Ident(String::from("add")),
                Token::Int(1),
                Token::Int(-2),
                Token::RParen,
                Token::Dot,
            ]
        );
        assert!(tokenize("#").is_err());
        assert!(tokenize("\"open").is_err());
    }
}
