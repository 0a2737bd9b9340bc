//! Handler patterns and the per-kind matching rules.
//!
//! - command / completion: exact name
//! - signal: `;`-separated alternatives, each a `,`-segmented glob
//! - config: exact option path or trailing-`*` prefix
//! - timer: exact timer name
//! - process-exit: exact job id

use std::fmt;

use chathook_common::{EventKind, JobId};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    matcher: Matcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Any,
    Exact(String),
    Prefix(String),
    Signal(Vec<Alternative>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Alternative {
    Any,
    Segments(Vec<String>),
}

impl Pattern {
    /// Compile `raw` for handlers of `kind`, rejecting malformed patterns.
    pub fn compile(kind: EventKind, raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::invalid_pattern(kind, raw, "pattern is empty"));
        }
        let matcher = match kind {
            EventKind::Command | EventKind::Completion => compile_name(kind, raw)?,
            EventKind::Signal => compile_signal(raw)?,
            EventKind::Config => compile_option(raw)?,
            EventKind::Timer => {
                if raw.chars().any(char::is_whitespace) {
                    return Err(Error::invalid_pattern(kind, raw, "whitespace in timer name"));
                }
                Matcher::Exact(raw.to_string())
            },
            EventKind::ProcessExit => {
                raw.parse::<JobId>()
                    .map_err(|_| Error::invalid_pattern(kind, raw, "not a job id"))?;
                Matcher::Exact(raw.to_string())
            },
        };
        Ok(Self {
            raw: raw.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Exact(name) => name == subject,
            Matcher::Prefix(prefix) => subject.starts_with(prefix.as_str()),
            Matcher::Signal(alternatives) => alternatives.iter().any(|alt| match alt {
                Alternative::Any => true,
                Alternative::Segments(segments) => {
                    let mut parts = subject.split(',');
                    let all = segments
                        .iter()
                        .all(|seg| parts.next().is_some_and(|part| glob_match(seg, part)));
                    all && parts.next().is_none()
                },
            }),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn compile_name(kind: EventKind, raw: &str) -> Result<Matcher> {
    if raw.starts_with('/') {
        return Err(Error::invalid_pattern(kind, raw, "name must not start with '/'"));
    }
    if raw.contains('*') {
        return Err(Error::invalid_pattern(kind, raw, "wildcards are not allowed"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(Error::invalid_pattern(kind, raw, "whitespace in name"));
    }
    Ok(Matcher::Exact(raw.to_string()))
}

fn compile_signal(raw: &str) -> Result<Matcher> {
    let mut alternatives = Vec::new();
    for alt in raw.split(';') {
        let alt = alt.trim();
        if alt.is_empty() {
            return Err(Error::invalid_pattern(
                EventKind::Signal,
                raw,
                "empty signal alternative",
            ));
        }
        if alt == "*" {
            alternatives.push(Alternative::Any);
            continue;
        }
        let segments: Vec<String> = alt.split(',').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::invalid_pattern(EventKind::Signal, raw, "empty segment"));
        }
        alternatives.push(Alternative::Segments(segments));
    }
    Ok(Matcher::Signal(alternatives))
}

fn compile_option(raw: &str) -> Result<Matcher> {
    if raw == "*" {
        return Ok(Matcher::Any);
    }
    match raw.find('*') {
        None => Ok(Matcher::Exact(raw.to_string())),
        Some(pos) if pos == raw.len() - 1 => Ok(Matcher::Prefix(raw[..pos].to_string())),
        Some(_) => Err(Error::invalid_pattern(
            EventKind::Config,
            raw,
            "'*' is only allowed at the end",
        )),
    }
}

/// Glob match where `*` matches any run of characters (including none).
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
