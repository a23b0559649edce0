//! Search query language
//!
//! A query is a mix of `key:value` constraints and free keywords, e.g.
//! `author:q3k status:assigned "foo bar" baz`. Double quotes group words
//! (backslash escapes the next character inside quotes). Constraint keys are
//! case-insensitive and unknown keys are ignored.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Colon,
}

/// Split a query into tokens. An unterminated quoted string is dropped.
fn lex(s: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = s.chars();

    fn flush(tokens: &mut Vec<Token>, word: &mut String) {
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(word)));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            ':' => {
                flush(&mut tokens, &mut word);
                tokens.push(Token::Colon);
            }
            '"' => {
                flush(&mut tokens, &mut word);
                let mut quoted = String::new();
                let mut escaped = false;
                let mut terminated = false;
                for c in chars.by_ref() {
                    if c == '\\' && !escaped {
                        escaped = true;
                        continue;
                    }
                    if c == '"' && !escaped {
                        terminated = true;
                        break;
                    }
                    escaped = false;
                    quoted.push(c);
                }
                if !terminated {
                    return tokens;
                }
                tokens.push(Token::Word(quoted));
            }
            ' ' | '\t' => flush(&mut tokens, &mut word),
            _ => word.push(c),
        }
    }
    flush(&mut tokens, &mut word);
    tokens
}

#[derive(Debug, PartialEq, Eq)]
enum Element {
    Constraint { key: String, value: String },
    Keyword(String),
}

fn parse_elements(tokens: Vec<Token>) -> Vec<Element> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match (&tokens[i], tokens.get(i + 1), tokens.get(i + 2)) {
            (Token::Word(key), Some(Token::Colon), Some(Token::Word(value))) => {
                out.push(Element::Constraint {
                    key: key.clone(),
                    value: value.clone(),
                });
                i += 3;
            }
            (Token::Word(word), _, _) => {
                out.push(Element::Keyword(word.clone()));
                i += 1;
            }
            (Token::Colon, _, _) => i += 1,
        }
    }
    out
}

/// A parsed, lightly typed search query. Constraint values are kept as
/// text; consumers decide how strictly to interpret them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub id: Option<String>,
    pub author: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<String>,

    /// Words that are not part of a constraint
    pub keywords: Vec<String>,

    pub original: String,
}

pub fn parse(s: &str) -> Query {
    let mut q = Query {
        original: s.to_string(),
        ..Default::default()
    };

    for el in parse_elements(lex(s)) {
        match el {
            Element::Constraint { key, value } => match key.to_lowercase().as_str() {
                "id" => q.id = Some(value),
                "author" => q.author = Some(value),
                "assignee" => q.assignee = Some(value),
                "status" => q.status = Some(value),
                _ => {}
            },
            Element::Keyword(word) => q.keywords.push(word),
        }
    }
    q
}
