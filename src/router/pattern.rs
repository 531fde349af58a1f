//! Route string compilation and matching.
//!
//! Supported syntax:
//! - literal text, compared ASCII-case-insensitively unless `case_sensitive`
//! - `:name` captures up to the next `/` (up to the next `.` as well when the
//!   parameter follows a `.`, as in `/:file.:ext`)
//! - `:name?` makes the parameter and its leading `/` or `.` optional
//! - `*` captures anything, including `/`, as positional keys `"0"`, `"1"`...
//!
//! Parameters match lazily and wildcards greedily, backtracking as needed.

use crate::context::Params;
use crate::error::{PatternError, ServerError, ServerResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternOptions {
    /// The whole path must be consumed; otherwise the pattern is a prefix
    /// that must end on a `/` boundary.
    pub end: bool,
    pub strict: bool,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param {
        index: usize,
        prefix: Option<char>,
        optional: bool,
    },
    Wildcard {
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// The consumed part of the path; empty for a root prefix.
    pub path: String,
    pub params: Params,
}

#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
    keys: Vec<String>,
    options: PatternOptions,
    ends_with_slash: bool,
    matches_root: bool,
    matches_wildcard: bool,
}

impl Pattern {
    pub fn compile(pattern: &str, options: PatternOptions) -> Result<Pattern, PatternError> {
        if pattern == "*" {
            return Ok(Pattern {
                source: pattern.to_string(),
                tokens: Vec::new(),
                keys: vec!["0".to_string()],
                options,
                ends_with_slash: false,
                matches_root: false,
                matches_wildcard: true,
            });
        }

        let normalized = format!("/{}", pattern.trim_start_matches('/'));
        let invalid_name = |offset| PatternError::MissingName {
            pattern: pattern.to_string(),
            offset,
        };

        let chars: Vec<(usize, char)> = normalized.char_indices().collect();
        let mut tokens = Vec::new();
        let mut keys: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut wildcards = 0usize;
        let mut i = 0;

        while i < chars.len() {
            let (offset, ch) = chars[i];
            match ch {
                ':' => {
                    let mut name = String::new();
                    let mut j = i + 1;
                    while let Some(&(_, c)) = chars.get(j) {
                        if !(c.is_ascii_alphanumeric() || c == '_') {
                            break;
                        }
                        name.push(c);
                        j += 1;
                    }
                    if name.is_empty() {
                        return Err(invalid_name(offset));
                    }
                    let optional = matches!(chars.get(j), Some(&(_, '?')));
                    if optional {
                        j += 1;
                    }
                    let prefix = match literal.chars().last() {
                        Some(c @ ('/' | '.')) => {
                            literal.pop();
                            Some(c)
                        }
                        _ => None,
                    };
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    push_key(&mut keys, name, pattern)?;
                    tokens.push(Token::Param {
                        index: keys.len() - 1,
                        prefix,
                        optional,
                    });
                    i = j;
                }
                '*' => {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    push_key(&mut keys, wildcards.to_string(), pattern)?;
                    wildcards += 1;
                    tokens.push(Token::Wildcard {
                        index: keys.len() - 1,
                    });
                    i += 1;
                }
                '(' | ')' | '?' => {
                    return Err(PatternError::Unsupported {
                        pattern: pattern.to_string(),
                        ch,
                        offset,
                    });
                }
                _ => {
                    literal.push(ch);
                    i += 1;
                }
            }
        }

        if !options.strict && literal.ends_with('/') {
            literal.pop();
        }
        let ends_with_slash = literal.ends_with('/');
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Pattern {
            source: pattern.to_string(),
            tokens,
            keys,
            options,
            ends_with_slash,
            matches_root: normalized == "/" && !options.end,
            matches_wildcard: false,
        })
    }

    /// Prefix pattern for `/`, matching every path without consuming any of it.
    pub(crate) fn root() -> Pattern {
        Pattern {
            source: "/".to_string(),
            tokens: Vec::new(),
            keys: Vec::new(),
            options: PatternOptions::default(),
            ends_with_slash: false,
            matches_root: true,
            matches_wildcard: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parameter names in left-to-right order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn matches_root(&self) -> bool {
        self.matches_root
    }

    pub fn matches_wildcard(&self) -> bool {
        self.matches_wildcard
    }

    /// Matches `path`, decoding captured values.
    ///
    /// `Ok(None)` is a plain non-match; `Err` means the path matched but a
    /// captured value is not valid percent-encoding.
    pub fn matches(&self, path: &str) -> ServerResult<Option<PathMatch>> {
        if self.matches_root {
            return Ok(Some(PathMatch {
                path: String::new(),
                params: Params::new(),
            }));
        }

        if self.matches_wildcard {
            let mut params = Params::new();
            params.insert("0".to_string(), decode_param(path)?);
            return Ok(Some(PathMatch {
                path: path.to_string(),
                params,
            }));
        }

        let Some((end, captures)) = self.solve(path) else {
            return Ok(None);
        };

        let mut params = Params::new();
        for (key, capture) in self.keys.iter().zip(captures) {
            if let Some((start, stop)) = capture {
                params.insert(key.clone(), decode_param(&path[start..stop])?);
            }
        }

        Ok(Some(PathMatch {
            path: path[..end].to_string(),
            params,
        }))
    }

    /// Resolves every `(token, position)` state once, last token first.
    ///
    /// `reach[t][p]` is where the whole match ends when token `t` starts at
    /// byte `p`, and `stops[t][p]` where token `t` itself stops. A param takes
    /// the shortest value, and a wildcard the longest, that lets the rest match.
    fn solve(&self, path: &str) -> Option<(usize, Vec<Option<(usize, usize)>>)> {
        let len = path.len();
        let count = self.tokens.len();
        let mut reach: Vec<Vec<Option<usize>>> = vec![vec![None; len + 1]; count + 1];
        let mut stops = vec![vec![0usize; len + 1]; count];

        for pos in 0..=len {
            if path.is_char_boundary(pos) {
                reach[count][pos] = self.finish(pos, path);
            }
        }

        let slash_ends = segment_ends(path, |b| b == b'/');
        let dot_ends = segment_ends(path, |b| b == b'/' || b == b'.');

        for t in (0..count).rev() {
            let (done, rest) = reach.split_at_mut(t + 1);
            let here = &mut done[t];
            let next = &rest[0];

            match &self.tokens[t] {
                Token::Literal(text) => {
                    for pos in 0..=len {
                        let end = pos + text.len();
                        let Some(candidate) = path.get(pos..end) else {
                            continue;
                        };
                        let equal = if self.options.case_sensitive {
                            candidate == text.as_str()
                        } else {
                            candidate.eq_ignore_ascii_case(text)
                        };
                        if equal {
                            here[pos] = next[end];
                            stops[t][pos] = end;
                        }
                    }
                }
                Token::Param {
                    prefix, optional, ..
                } => {
                    let first = first_reachable(next);
                    let bounds = if *prefix == Some('.') {
                        &dot_ends
                    } else {
                        &slash_ends
                    };
                    for pos in 0..=len {
                        if !path.is_char_boundary(pos) {
                            continue;
                        }
                        let start = match prefix {
                            Some(c) if path[pos..].starts_with(*c) => Some(pos + c.len_utf8()),
                            Some(_) => None,
                            None => Some(pos),
                        };
                        let found = start.and_then(|start| {
                            first[start + 1].filter(|&end| end <= bounds[start])
                        });
                        if let Some(end) = found {
                            here[pos] = next[end];
                            stops[t][pos] = end;
                        } else if *optional {
                            here[pos] = next[pos];
                            stops[t][pos] = pos;
                        }
                    }
                }
                Token::Wildcard { .. } => {
                    let last = (0..=len).rev().find(|&end| next[end].is_some());
                    for pos in 0..=len {
                        if !path.is_char_boundary(pos) {
                            continue;
                        }
                        if let Some(end) = last.filter(|&end| end >= pos) {
                            here[pos] = next[end];
                            stops[t][pos] = end;
                        }
                    }
                }
            }
        }

        let end = reach[0][0]?;
        let mut captures = vec![None; self.keys.len()];
        let mut pos = 0;
        for (t, token) in self.tokens.iter().enumerate() {
            let stop = stops[t][pos];
            match token {
                Token::Literal(_) => {}
                Token::Param { index, prefix, .. } => {
                    // stopping where it started means the optional param was skipped
                    if stop != pos {
                        let start = pos + prefix.map_or(0, char::len_utf8);
                        captures[*index] = Some((start, stop));
                    }
                }
                Token::Wildcard { index } => captures[*index] = Some((pos, stop)),
            }
            pos = stop;
        }
        Some((end, captures))
    }

    fn finish(&self, pos: usize, path: &str) -> Option<usize> {
        let rest = &path[pos..];
        if rest.is_empty() {
            return Some(pos);
        }
        if !self.options.strict && rest == "/" {
            return Some(path.len());
        }
        if !self.options.end && (self.ends_with_slash || rest.starts_with('/')) {
            return Some(pos);
        }
        None
    }
}

/// For each byte offset, the offset of the next byte matching `stop`, or
/// the path length.
fn segment_ends(path: &str, stop: impl Fn(u8) -> bool) -> Vec<usize> {
    let bytes = path.as_bytes();
    let mut ends = vec![bytes.len(); bytes.len() + 1];
    for pos in (0..bytes.len()).rev() {
        ends[pos] = if stop(bytes[pos]) { pos } else { ends[pos + 1] };
    }
    ends
}

/// For each offset, the first offset at or after it whose state matched.
fn first_reachable(row: &[Option<usize>]) -> Vec<Option<usize>> {
    let mut first = vec![None; row.len() + 1];
    for pos in (0..row.len()).rev() {
        first[pos] = if row[pos].is_some() { Some(pos) } else { first[pos + 1] };
    }
    first
}

fn push_key(keys: &mut Vec<String>, name: String, pattern: &str) -> Result<(), PatternError> {
    if keys.contains(&name) {
        return Err(PatternError::DuplicateName {
            pattern: pattern.to_string(),
            name,
        });
    }
    keys.push(name);
    Ok(())
}

/// Percent-decodes a captured value. Malformed escapes and invalid UTF-8
/// are a client error rather than being passed through raw.
pub(crate) fn decode_param(value: &str) -> ServerResult<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(ServerError::Decode(value.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ServerError::Decode(value.to_string()))
}
