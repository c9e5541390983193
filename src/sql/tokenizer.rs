//! SQL Tokenizer
//!
//! Lossless lexer: `render(&tokenize(sql)) == sql` for every input. It knows just
//! enough SQL to keep string literals, quoted identifiers and comments intact so the
//! analysis and rewrite passes never look inside them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword
    Word,
    /// Identifier quoted with `"`, `` ` `` or `[]`
    QuotedIdent,
    /// Single-quoted string literal
    StringLit,
    Number,
    Punct,
    Whitespace,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    /// Identifier value with quotes removed, `None` for non-identifier tokens
    pub fn identifier(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.clone()),
            TokenKind::QuotedIdent => Some(unquote(&self.text)),
            _ => None,
        }
    }
}

fn unquote(text: &str) -> String {
    let mut chars = text.chars();
    let open = chars.next();
    let inner: String = {
        let body = &text[open.map(|c| c.len_utf8()).unwrap_or(0)..];
        let close_len = body.chars().last().map(|c| c.len_utf8()).unwrap_or(0);
        body[..body.len().saturating_sub(close_len)].to_string()
    };
    match open {
        Some('"') => inner.replace("\"\"", "\""),
        Some('`') => inner.replace("``", "`"),
        _ => inner,
    }
}

const MULTI_CHAR_OPERATORS: [&str; 9] = ["->>", "<=", ">=", "<>", "!=", "||", "::", "->", "=>"];

pub fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        let kind = if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            TokenKind::Whitespace
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            TokenKind::Comment
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            TokenKind::Comment
        } else if c == '\'' {
            i = scan_quoted(&chars, i, '\'');
            TokenKind::StringLit
        } else if c == '"' || c == '`' {
            i = scan_quoted(&chars, i, c);
            TokenKind::QuotedIdent
        } else if c == '[' && bracket_identifier_end(&chars, i).is_some() {
            i = bracket_identifier_end(&chars, i).unwrap_or(i + 1);
            TokenKind::QuotedIdent
        } else if c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit()))
        {
            i = scan_number(&chars, i);
            TokenKind::Number
        } else if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            TokenKind::Word
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let len = MULTI_CHAR_OPERATORS
                .iter()
                .find(|op| rest.starts_with(*op))
                .map(|op| op.chars().count())
                .unwrap_or(1);
            i += len;
            TokenKind::Punct
        };

        tokens.push(Token::new(kind, chars[start..i].iter().collect::<String>()));
    }

    tokens
}

/// Index one past the closing quote; doubled quotes are escapes
fn scan_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// `[name]` is an identifier only when it looks like one; `arr[1]` stays punctuation
fn bracket_identifier_end(chars: &[char], start: usize) -> Option<usize> {
    let first = *chars.get(start + 1)?;
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            ']' => return Some(i + 1),
            '[' | ',' | '(' | ')' | '\'' | '"' | '\n' => return None,
            _ => i += 1,
        }
    }
    None
}

fn scan_number(chars: &[char], start: usize) -> usize {
    let mut i = start;
    let mut seen_dot = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            i += 1;
        } else if (c == 'e' || c == 'E')
            && chars
                .get(i + 1)
                .map_or(false, |n| n.is_ascii_digit() || *n == '-' || *n == '+')
        {
            i += 2;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            break;
        } else {
            break;
        }
    }
    i
}

pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Indices of the non-trivia tokens
pub fn significant_indices(tokens: &[Token]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_trivia())
        .map(|(i, _)| i)
        .collect()
}
