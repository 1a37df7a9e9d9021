use crate::http::types::Method;
use crate::routing::middleware::DynHandler;
use std::sync::Arc;

/// A capture's admissible character class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureKind {
    /// `{name}` / `{name:string}` — `[A-Za-z_%0-9.-]+`
    Str,
    /// `{name:number}` — `[0-9]+`
    Number,
    /// `{name:path}` — `[A-Za-z_%0-9./-]+`, may span `/` boundaries
    Path,
}

impl CaptureKind {
    fn admits(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        text.bytes().all(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'%' | b'.' | b'-' => true,
            b'/' => matches!(self, Self::Path),
            _ => false,
        })
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Capture(CaptureKind),
}

struct CompiledRoute {
    method: Method,
    segments: Vec<Segment>,
    handler: Arc<DynHandler>,
}

/// The URL-pattern router.
///
/// Routes are compiled at registration and matched in insertion order:
/// the first registered route that fits wins, every time. Patterns are
/// literal segments mixed with named captures:
///
/// ```text
/// /user/{id:number}/post/{pid:number}
/// /files/{rest:path}
/// /tag/{name}
/// ```
///
/// Captures are handed to the handler positionally, percent-decoded,
/// through [`Request::params`](crate::Request::params).
#[derive(Default)]
pub(crate) struct Router {
    routes: Vec<CompiledRoute>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Compiles and registers a route.
    ///
    /// # Panics
    ///
    /// On a malformed pattern (unterminated `{`, unknown capture type,
    /// missing leading `/`). Route tables are static program structure;
    /// a bad pattern is a programming error caught at startup.
    pub(crate) fn add(&mut self, method: Method, pattern: &str, handler: Arc<DynHandler>) {
        self.routes.push(CompiledRoute {
            method,
            segments: compile(pattern),
            handler,
        });
    }

    /// First matching route for `(method, path)`, with its ordered
    /// decoded captures. `None` when nothing fits; the dispatcher turns
    /// that into a 404.
    pub(crate) fn lookup(&self, method: Method, path: &str) -> Option<(Arc<DynHandler>, Vec<String>)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        for route in &self.routes {
            if route.method != method {
                continue;
            }

            let mut captures = Vec::new();
            if match_segments(&route.segments, &segments, &mut captures) {
                return Some((route.handler.clone(), captures));
            }
        }

        None
    }
}

fn compile(pattern: &str) -> Vec<Segment> {
    assert!(
        pattern.starts_with('/'),
        "route pattern must start with '/': {pattern:?}"
    );

    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                let (name, kind) = match inner.split_once(':') {
                    Some((name, "string")) => (name, CaptureKind::Str),
                    Some((name, "number")) => (name, CaptureKind::Number),
                    Some((name, "path")) => (name, CaptureKind::Path),
                    Some((_, other)) => panic!("unknown capture type {other:?} in {pattern:?}"),
                    None => (inner, CaptureKind::Str),
                };
                assert!(!name.is_empty(), "empty capture name in {pattern:?}");
                Segment::Capture(kind)
            } else {
                assert!(
                    !segment.contains('{') && !segment.contains('}'),
                    "malformed capture in {pattern:?}"
                );
                Segment::Literal(segment.to_owned())
            }
        })
        .collect()
}

fn match_segments(route: &[Segment], path: &[&str], captures: &mut Vec<String>) -> bool {
    let Some((first, rest)) = route.split_first() else {
        return path.is_empty();
    };

    match first {
        Segment::Literal(literal) => match path.split_first() {
            Some((segment, tail)) => literal == segment && match_segments(rest, tail, captures),
            None => false,
        },
        Segment::Capture(kind @ (CaptureKind::Str | CaptureKind::Number)) => {
            match path.split_first() {
                Some((segment, tail)) if kind.admits(segment) => {
                    captures.push((*segment).to_owned());
                    if match_segments(rest, tail, captures) {
                        true
                    } else {
                        captures.pop();
                        false
                    }
                }
                _ => false,
            }
        }
        Segment::Capture(CaptureKind::Path) => {
            // Greedy: a path capture takes as many segments as it can
            // while still letting the rest of the pattern match.
            for take in (1..=path.len()).rev() {
                let joined = path[..take].join("/");
                if !CaptureKind::Path.admits(&joined) {
                    continue;
                }

                captures.push(joined);
                if match_segments(rest, &path[take..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
    }
}
