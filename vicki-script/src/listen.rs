//! Listen conditions
//!
//! Scripts describe which utterances they handle with a `ListenCondition`:
//! a single pattern, a list of patterns (the list index becomes the pass the
//! entry is eligible on), or a structured condition with its own pass and
//! precondition. Conditions are normalized once at registration into flat
//! `CompiledCondition`s so dispatch never has to inspect shapes.

use crate::error::ListenError;
use crate::request::Request;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Number of passes the engine runs before giving up on a request.
pub const MAX_PASSES: usize = 3;

/// Predicate over a request, evaluated before a matcher is tried.
#[derive(Clone)]
pub struct Precondition(Arc<dyn Fn(&Request) -> bool + Send + Sync>);

impl Precondition {
    pub fn new(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn check(&self, request: &Request) -> bool {
        (self.0)(request)
    }
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Precondition(..)")
    }
}

/// A regex, either already compiled or still in source form.
#[derive(Debug, Clone)]
pub enum Pattern {
    Source(String),
    Compiled(Regex),
}

impl Pattern {
    fn compile(self) -> Result<Regex, ListenError> {
        match self {
            Pattern::Compiled(re) => Ok(re),
            Pattern::Source(src) => Regex::new(&src).map_err(|e| ListenError::InvalidPattern {
                pattern: src.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Source(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Source(s)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Pattern::Compiled(re)
    }
}

/// `{ utterance, precondition, pass }` form.
#[derive(Debug, Clone, Default)]
pub struct StructuredCondition {
    pub utterance: Vec<Pattern>,
    pub precondition: Option<Precondition>,
    pub pass: Option<usize>,
}

impl StructuredCondition {
    pub fn new(pattern: impl Into<Pattern>) -> Self {
        Self {
            utterance: vec![pattern.into()],
            ..Default::default()
        }
    }

    pub fn or_utterance(mut self, pattern: impl Into<Pattern>) -> Self {
        self.utterance.push(pattern.into());
        self
    }

    pub fn pass(mut self, pass: usize) -> Self {
        self.pass = Some(pass);
        self
    }

    pub fn precondition(
        mut self,
        predicate: impl Fn(&Request) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.precondition = Some(Precondition::new(predicate));
        self
    }
}

#[derive(Debug, Clone)]
pub enum ListenCondition {
    Pattern(Pattern),
    PatternList(Vec<ListenCondition>),
    Structured(StructuredCondition),
}

impl From<&str> for ListenCondition {
    fn from(s: &str) -> Self {
        ListenCondition::Pattern(s.into())
    }
}

impl From<String> for ListenCondition {
    fn from(s: String) -> Self {
        ListenCondition::Pattern(s.into())
    }
}

impl From<Regex> for ListenCondition {
    fn from(re: Regex) -> Self {
        ListenCondition::Pattern(re.into())
    }
}

impl From<StructuredCondition> for ListenCondition {
    fn from(c: StructuredCondition) -> Self {
        ListenCondition::Structured(c)
    }
}

impl<T: Into<ListenCondition>> From<Vec<T>> for ListenCondition {
    fn from(items: Vec<T>) -> Self {
        ListenCondition::PatternList(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ListenCondition>, const N: usize> From<[T; N]> for ListenCondition {
    fn from(items: [T; N]) -> Self {
        ListenCondition::PatternList(items.into_iter().map(Into::into).collect())
    }
}

/// Which passes a compiled condition is eligible on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassFilter {
    Any,
    Exact(u8),
}

impl PassFilter {
    fn resolve(pass: usize) -> Result<Self, ListenError> {
        if pass >= MAX_PASSES {
            return Err(ListenError::PassOutOfRange {
                pass,
                max: MAX_PASSES,
            });
        }
        Ok(PassFilter::Exact(pass as u8))
    }

    pub fn admits(&self, pass: u8) -> bool {
        match self {
            PassFilter::Any => true,
            PassFilter::Exact(p) => *p == pass,
        }
    }
}

impl fmt::Display for PassFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassFilter::Any => f.write_str("any"),
            PassFilter::Exact(p) => write!(f, "{}", p),
        }
    }
}

/// Flattened (matcher, pass, precondition) triple tied to a handler slot.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub matcher: Regex,
    pub pass: PassFilter,
    pub precondition: Option<Precondition>,
    pub handler: usize,
}

impl CompiledCondition {
    pub fn is_eligible(&self, request: &Request) -> bool {
        self.pass.admits(request.pass())
            && self
                .precondition
                .as_ref()
                .map(|p| p.check(request))
                .unwrap_or(true)
    }

    pub fn match_utterance(&self, utterance: &str) -> Option<RegexMatch> {
        self.matcher.captures(utterance).map(|caps| RegexMatch {
            groups: caps
                .iter()
                .map(|g| g.map(|m| m.as_str().to_string()))
                .collect(),
        })
    }
}

/// Capture groups of the winning matcher; index 0 is the whole match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegexMatch {
    groups: Vec<Option<String>>,
}

impl RegexMatch {
    pub fn full(&self) -> &str {
        self.get(0).unwrap_or("")
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups as plain strings; unmatched optional groups become "".
    pub fn to_vec(&self) -> Vec<&str> {
        self.groups
            .iter()
            .map(|g| g.as_deref().unwrap_or(""))
            .collect()
    }
}

/// Normalize a condition into compiled entries bound to `handler`.
pub fn compile(
    condition: ListenCondition,
    handler: usize,
) -> Result<Vec<CompiledCondition>, ListenError> {
    match condition {
        ListenCondition::Pattern(p) => Ok(vec![CompiledCondition {
            matcher: p.compile()?,
            pass: PassFilter::Any,
            precondition: None,
            handler,
        }]),
        ListenCondition::Structured(s) => compile_structured(s, None, handler),
        ListenCondition::PatternList(items) => {
            let mut out = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    ListenCondition::Pattern(p) => out.push(CompiledCondition {
                        matcher: p.compile()?,
                        pass: PassFilter::resolve(index)?,
                        precondition: None,
                        handler,
                    }),
                    ListenCondition::Structured(s) => {
                        out.extend(compile_structured(s, Some(index), handler)?)
                    }
                    ListenCondition::PatternList(_) => return Err(ListenError::NestedList),
                }
            }
            Ok(out)
        }
    }
}

fn compile_structured(
    condition: StructuredCondition,
    implicit_pass: Option<usize>,
    handler: usize,
) -> Result<Vec<CompiledCondition>, ListenError> {
    if condition.utterance.is_empty() {
        return Err(ListenError::EmptyCondition);
    }
    let pass = match condition.pass.or(implicit_pass) {
        Some(p) => PassFilter::resolve(p)?,
        None => PassFilter::Any,
    };
    condition
        .utterance
        .into_iter()
        .map(|p| -> Result<CompiledCondition, ListenError> {
            Ok(CompiledCondition {
                matcher: p.compile()?,
                pass,
                precondition: condition.precondition.clone(),
                handler,
            })
        })
        .collect()
}

/// Result of scanning a script's conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerMatch {
    pub condition: usize,
    pub handler: usize,
    pub captures: RegexMatch,
}

/// First condition, in registration order, that is eligible for the request
/// and whose matcher accepts its utterance.
pub fn find_match(
    conditions: &[CompiledCondition],
    script_preconditions: &[Precondition],
    request: &Request,
) -> Option<HandlerMatch> {
    if !script_preconditions.iter().all(|p| p.check(request)) {
        return None;
    }
    conditions.iter().enumerate().find_map(|(index, c)| {
        if !c.is_eligible(request) {
            return None;
        }
        c.match_utterance(request.utterance())
            .map(|captures| HandlerMatch {
                condition: index,
                handler: c.handler,
                captures,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(utterance: &str, pass: u8) -> Request {
        Request::new(utterance, "s").at_pass(pass)
    }

    #[test]
    fn test_array_index_is_pass() {
        let compiled = compile(
            ListenCondition::from(["^hello world$", "^hello$"]),
            0,
        )
        .unwrap();
        assert_eq!(compiled[0].pass, PassFilter::Exact(0));
        assert_eq!(compiled[1].pass, PassFilter::Exact(1));

        assert_eq!(find_match(&compiled, &[], &req("hello", 0)), None);
        let m = find_match(&compiled, &[], &req("hello", 1)).unwrap();
        assert_eq!(m.condition, 1);
        assert_eq!(m.captures.to_vec(), vec!["hello"]);
    }

    #[test]
    fn test_explicit_pass_overrides_index() {
        let compiled = compile(
            ListenCondition::PatternList(vec![
                "^a$".into(),
                StructuredCondition::new("^b$").pass(0).into(),
            ]),
            3,
        )
        .unwrap();
        assert_eq!(compiled[1].pass, PassFilter::Exact(0));
        assert_eq!(compiled[1].handler, 3);
    }

    #[test]
    fn test_single_pattern_is_pass_agnostic() {
        let compiled = compile(ListenCondition::from("^zoom (in|out)$"), 0).unwrap();
        assert_eq!(compiled[0].pass, PassFilter::Any);
        for pass in 0..MAX_PASSES as u8 {
            let m = find_match(&compiled, &[], &req("zoom in", pass)).unwrap();
            assert_eq!(m.captures.to_vec(), vec!["zoom in", "in"]);
        }
    }

    #[test]
    fn test_pass_out_of_range() {
        let err = compile(ListenCondition::from(["a", "b", "c", "d"]), 0).unwrap_err();
        assert!(matches!(err, ListenError::PassOutOfRange { pass: 3, .. }));

        let err = compile(StructuredCondition::new("a").pass(5).into(), 0).unwrap_err();
        assert!(matches!(err, ListenError::PassOutOfRange { pass: 5, .. }));
    }

    #[test]
    fn test_invalid_regex_and_shapes() {
        assert!(matches!(
            compile(ListenCondition::from("(unclosed"), 0),
            Err(ListenError::InvalidPattern { .. })
        ));
        assert!(matches!(
            compile(ListenCondition::PatternList(vec![vec!["a"].into()]), 0),
            Err(ListenError::NestedList)
        ));
        assert!(matches!(
            compile(StructuredCondition::default().into(), 0),
            Err(ListenError::EmptyCondition)
        ));
    }

    #[test]
    fn test_preconditions() {
        let compiled = compile(
            StructuredCondition::new("^status$")
                .precondition(|r| r.pass() > 0)
                .into(),
            0,
        )
        .unwrap();
        assert!(find_match(&compiled, &[], &req("status", 0)).is_none());
        assert!(find_match(&compiled, &[], &req("status", 1)).is_some());

        let deny = Precondition::new(|_| false);
        assert!(find_match(&compiled, &[deny], &req("status", 1)).is_none());
    }

    #[test]
    fn test_first_registered_condition_wins() {
        let mut compiled = compile(ListenCondition::from("^open (.*)$"), 0).unwrap();
        compiled.extend(compile(ListenCondition::from("^open tab$"), 1).unwrap());
        let m = find_match(&compiled, &[], &req("open tab", 0)).unwrap();
        assert_eq!(m.handler, 0);
        assert_eq!(m.captures.get(1), Some("tab"));
    }
}
