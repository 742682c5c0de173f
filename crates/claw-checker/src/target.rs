//! Trigger target language.
//!
//! A target is either a metric pattern or a function call over targets:
//!
//! ```text
//! alias(sumSeries(web.*.requests), "total")
//! aliasByNode(servers.*.cpu.load, 1, -1)
//! ```
//!
//! Supported functions are `alias`, `aliasByNode`, `scale`, `absolute` and
//! `sumSeries`. Any other name fails with `EvaluationError::UnknownFunction`.

use std::fmt;

use crate::error::{EvaluationError, Result};
use crate::timeseries::TimeSeries;

/// A parsed target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A metric pattern.
    Path(String),
    /// A function applied to arguments.
    Call {
        /// Function name.
        name: String,
        /// Arguments in order.
        args: Vec<Argument>,
    },
}

/// A function argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A nested target.
    Target(Target),
    /// A numeric literal.
    Number(f64),
    /// A quoted string.
    Text(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.write_str(path),
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(target) => write!(f, "{target}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(text) => write!(f, "\"{text}\""),
        }
    }
}

/// Parses a target.
///
/// # Errors
///
/// Returns `EvaluationError::InvalidTarget` if the text is malformed.
pub fn parse(text: &str) -> std::result::Result<Target, EvaluationError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    let invalid = |reason: String| EvaluationError::InvalidTarget {
        target: text.to_string(),
        reason,
    };
    let target = parser.target().map_err(invalid)?;
    parser.skip_whitespace();
    if parser.pos < parser.chars.len() {
        return Err(invalid(format!("unexpected input at {}", parser.pos)));
    }
    Ok(target)
}

/// Returns every metric pattern a target reads, or nothing if it does not parse.
#[must_use]
pub fn extract_patterns(text: &str) -> Vec<String> {
    parse(text).map(|t| t.patterns()).unwrap_or_default()
}

impl Target {
    /// Returns the metric patterns this target reads, in order.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_patterns(&mut out);
        out
    }

    fn collect_patterns(&self, out: &mut Vec<String>) {
        match self {
            Self::Path(path) => out.push(path.clone()),
            Self::Call { args, .. } => {
                for arg in args {
                    if let Argument::Target(target) = arg {
                        target.collect_patterns(out);
                    }
                }
            }
        }
    }

    /// Evaluates the target, resolving patterns through `fetch`.
    ///
    /// # Errors
    ///
    /// Propagates fetch errors; returns `UnknownFunction` or `InvalidTarget`
    /// for bad calls.
    pub fn evaluate<F>(&self, fetch: &mut F) -> Result<Vec<TimeSeries>>
    where
        F: FnMut(&str) -> Result<Vec<TimeSeries>>,
    {
        match self {
            Self::Path(pattern) => fetch(pattern),
            Self::Call { name, args } => self.call(name, args, fetch),
        }
    }

    fn call<F>(&self, name: &str, args: &[Argument], fetch: &mut F) -> Result<Vec<TimeSeries>>
    where
        F: FnMut(&str) -> Result<Vec<TimeSeries>>,
    {
        match name {
            "alias" => {
                let mut series = self.series_arg(args, 0, fetch)?;
                let alias = self.text_arg(args, 1)?;
                for s in &mut series {
                    s.name.clone_from(&alias);
                }
                Ok(series)
            }
            "aliasByNode" => {
                let mut series = self.series_arg(args, 0, fetch)?;
                let nodes = args
                    .iter()
                    .skip(1)
                    .map(|arg| match arg {
                        Argument::Number(n) if n.fract() == 0.0 => Ok(*n as i64),
                        _ => Err(self.invalid("aliasByNode expects integer node indexes")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                if nodes.is_empty() {
                    return Err(self.invalid("aliasByNode expects at least one node index"));
                }
                for s in &mut series {
                    s.name = alias_by_node(&s.name, &nodes).ok_or_else(|| self.invalid("node index out of range"))?;
                }
                Ok(series)
            }
            "scale" => {
                let mut series = self.series_arg(args, 0, fetch)?;
                let factor = self.number_arg(args, 1)?;
                for s in &mut series {
                    s.values.iter_mut().for_each(|v| *v *= factor);
                }
                Ok(series)
            }
            "absolute" => {
                let mut series = self.series_arg(args, 0, fetch)?;
                for s in &mut series {
                    s.values.iter_mut().for_each(|v| *v = v.abs());
                }
                Ok(series)
            }
            "sumSeries" => {
                if args.is_empty() {
                    return Err(self.invalid("sumSeries expects at least one series"));
                }
                let mut all = Vec::new();
                for index in 0..args.len() {
                    all.extend(self.series_arg(args, index, fetch)?);
                }
                Ok(sum_series(self.to_string(), &all).into_iter().collect())
            }
            other => Err(EvaluationError::UnknownFunction(other.to_string()).into()),
        }
    }

    fn series_arg<F>(&self, args: &[Argument], index: usize, fetch: &mut F) -> Result<Vec<TimeSeries>>
    where
        F: FnMut(&str) -> Result<Vec<TimeSeries>>,
    {
        match args.get(index) {
            Some(Argument::Target(target)) => target.evaluate(fetch),
            _ => Err(self.invalid(&format!("argument {} must be a series", index + 1))),
        }
    }

    fn text_arg(&self, args: &[Argument], index: usize) -> Result<String> {
        match args.get(index) {
            Some(Argument::Text(text)) => Ok(text.clone()),
            _ => Err(self.invalid(&format!("argument {} must be a string", index + 1))),
        }
    }

    fn number_arg(&self, args: &[Argument], index: usize) -> Result<f64> {
        match args.get(index) {
            Some(Argument::Number(n)) => Ok(*n),
            _ => Err(self.invalid(&format!("argument {} must be a number", index + 1))),
        }
    }

    fn invalid(&self, reason: &str) -> crate::error::CheckerError {
        EvaluationError::InvalidTarget {
            target: self.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }
}

fn alias_by_node(name: &str, nodes: &[i64]) -> Option<String> {
    let parts: Vec<&str> = name.split('.').collect();
    let len = i64::try_from(parts.len()).ok()?;
    let picked = nodes
        .iter()
        .map(|&node| {
            let index = if node < 0 { len + node } else { node };
            usize::try_from(index).ok().and_then(|i| parts.get(i).copied())
        })
        .collect::<Option<Vec<_>>>()?;
    Some(picked.join("."))
}

/// Sums real series slot by slot on the grid of the first one.
///
/// Wildcard placeholders only contribute when nothing else is present.
fn sum_series(name: String, series: &[TimeSeries]) -> Option<TimeSeries> {
    let real: Vec<&TimeSeries> = series.iter().filter(|s| !s.wildcard).collect();
    let Some(base) = real.first() else {
        return series.first().map(|s| TimeSeries {
            name,
            ..s.clone()
        });
    };
    let values = base
        .timestamps()
        .map(|ts| {
            let present: Vec<f64> = real.iter().filter_map(|s| s.value_at(ts)).collect();
            if present.is_empty() {
                f64::NAN
            } else {
                present.iter().sum()
            }
        })
        .collect();
    Some(TimeSeries::new(name, base.start_time, base.step_time, values))
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn target(&mut self) -> std::result::Result<Target, String> {
        self.skip_whitespace();
        let token = self.token()?;
        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.pos += 1;
            let args = self.arguments()?;
            return Ok(Target::Call { name: token, args });
        }
        Ok(Target::Path(token))
    }

    fn arguments(&mut self) -> std::result::Result<Vec<Argument>, String> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.argument()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(format!("expected ',' or ')' at {}", self.pos)),
            }
        }
    }

    fn argument(&mut self) -> std::result::Result<Argument, String> {
        self.skip_whitespace();
        if let Some(quote @ ('"' | '\'')) = self.peek() {
            self.pos += 1;
            let start = self.pos;
            while self.peek().is_some_and(|c| c != quote) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Err("unterminated string".to_string());
            }
            let text: String = self.chars[start..self.pos].iter().collect();
            self.pos += 1;
            return Ok(Argument::Text(text));
        }

        let start = self.pos;
        let token = self.token()?;
        self.skip_whitespace();
        if self.peek() != Some('(') {
            if let Ok(number) = token.parse::<f64>() {
                return Ok(Argument::Number(number));
            }
        }
        self.pos = start;
        Ok(Argument::Target(self.target()?))
    }

    /// Reads a name or pattern; commas inside `{...}` belong to the pattern.
    fn token(&mut self) -> std::result::Result<String, String> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                ',' | '(' | ')' if depth == 0 => break,
                c if c.is_whitespace() || c == '"' || c == '\'' => break,
                _ => {}
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("expected a pattern or function at {start}"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }
}
