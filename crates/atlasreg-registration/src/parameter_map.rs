//! Elastix parameter maps and their text file format.
//!
//! A parameter file is a sequence of parenthesised entries:
//!
//! ```text
//! // Comment
//! (Transform "EulerTransform")
//! (NumberOfResolutions 4)
//! (ImagePyramidSchedule 8 8 8 4 4 4 2 2 2 1 1 1)
//! ```
//!
//! Values are kept as strings. Numbers are written bare, everything else
//! quoted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use atlasreg_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Ordered mapping from parameter name to its values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, Vec<String>>);

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the values of `key`.
    pub fn set<K, I, V>(&mut self, key: K, values: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.0
            .insert(key.into(), values.into_iter().map(Into::into).collect());
    }

    /// Replace `key` with a single value.
    pub fn set_one(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), vec![value.to_string()]);
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// First value of `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// First value of `key` parsed as `T`; `None` if absent or unparseable.
    pub fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.first(key).and_then(|v| v.parse().ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Overlay every entry of `other` onto this map.
    pub fn merge(&mut self, other: &ParameterMap) {
        for (key, values) in other.iter() {
            self.0.insert(key.clone(), values.clone());
        }
    }

    /// Parse the elastix parameter-file format.
    ///
    /// Fails with [`PipelineError::Format`] on unbalanced parentheses,
    /// unterminated strings, entries without a name or text outside an entry.
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text).parse()
    }

    /// Render in the elastix parameter-file format.
    pub fn to_parameter_file(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.0 {
            out.push('(');
            out.push_str(key);
            for value in values {
                out.push(' ');
                if is_numeric(value) {
                    out.push_str(value);
                } else {
                    out.push('"');
                    out.push_str(value);
                    out.push('"');
                }
            }
            out.push_str(")\n");
        }
        out
    }

    /// Read and parse a parameter file.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::parse(&text).map_err(|e| match e {
            PipelineError::Format(msg) => PipelineError::format(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_parameter_file()).map_err(|e| PipelineError::io(path, e))
    }
}

impl fmt::Display for ParameterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_parameter_file())
    }
}

impl FromIterator<(String, Vec<String>)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Bare numeric token such as `4`, `-0.5` or `1e-5`.
fn is_numeric(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        && value.parse::<f64>().is_ok()
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, msg: &str) -> PipelineError {
        PipelineError::format(format!("parameter file line {}: {}", self.line, msg))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    /// Skips whitespace and `//` comments.
    fn skip_trivia(&mut self) -> Result<()> {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' {
                self.bump();
                if self.chars.peek() == Some(&'/') {
                    self.skip_line();
                } else {
                    return Err(self.error("unexpected '/'"));
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse(mut self) -> Result<ParameterMap> {
        let mut map = ParameterMap::new();
        loop {
            self.skip_trivia()?;
            match self.bump() {
                None => return Ok(map),
                Some('(') => {
                    let (key, values) = self.entry()?;
                    map.0.insert(key, values);
                }
                Some(c) => return Err(self.error(&format!("unexpected '{}' outside an entry", c))),
            }
        }
    }

    fn entry(&mut self) -> Result<(String, Vec<String>)> {
        self.skip_trivia()?;
        let key = self.bare_token();
        if key.is_empty() {
            return Err(self.error("entry without a parameter name"));
        }

        let mut values = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.chars.peek().copied() {
                None => return Err(self.error(&format!("unterminated entry '{}'", key))),
                Some(')') => {
                    self.bump();
                    return Ok((key, values));
                }
                Some('(') => return Err(self.error(&format!("nested '(' in entry '{}'", key))),
                Some('"') => {
                    self.bump();
                    values.push(self.quoted()?);
                }
                Some(_) => values.push(self.bare_token()),
            }
        }
    }

    fn bare_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                break;
            }
            token.push(c);
            self.bump();
        }
        token
    }

    fn quoted(&mut self) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some(c) => value.push(c),
            }
        }
    }
}
