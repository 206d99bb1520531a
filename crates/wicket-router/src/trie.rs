//! Radix trie router implementation.

use std::collections::HashMap;
use wicket_core::Method;

use crate::r#match::RouteMatch;
use crate::RouteError;

/// Path parameter type converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// String (default).
    Str,
    /// Integer (i64).
    Int,
    /// Float (f64).
    Float,
    /// UUID.
    Uuid,
    /// The rest of the path, slashes included. Only valid last.
    Path,
}

impl Converter {
    /// Check if a value matches this converter.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Str | Self::Path => true,
            Self::Int => value.parse::<i64>().is_ok(),
            Self::Float => value.parse::<f64>().is_ok(),
            Self::Uuid => is_uuid(value),
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "str" => Some(Self::Str),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "uuid" => Some(Self::Uuid),
            "path" => Some(Self::Path),
            _ => None,
        }
    }
}

fn is_uuid(s: &str) -> bool {
    // 8-4-4-4-12 hex digits
    if s.len() != 36 {
        return false;
    }
    let parts: Vec<_> = s.split('-').collect();
    if parts.len() != 5 {
        return false;
    }
    parts[0].len() == 8
        && parts[1].len() == 4
        && parts[2].len() == 4
        && parts[3].len() == 4
        && parts[4].len() == 12
        && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Path parameter information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    /// Parameter name.
    pub name: String,
    /// Type converter.
    pub converter: Converter,
}

/// Which methods a route answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFilter {
    /// Exactly this method.
    Only(Method),
    /// Every method not registered explicitly on the same path.
    Any,
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Only(method)
    }
}

/// Trie node.
struct Node<T> {
    segment: String,
    children: Vec<Node<T>>,
    param: Option<ParamInfo>,
    routes: HashMap<Method, T>,
    any: Option<T>,
}

impl<T> Node<T> {
    fn new(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            children: Vec::new(),
            param: None,
            routes: HashMap::new(),
            any: None,
        }
    }

    fn find_static(&self, segment: &str) -> Option<&Node<T>> {
        self.children
            .iter()
            .find(|c| c.param.is_none() && c.segment == segment)
    }

    fn find_param(&self) -> Option<&Node<T>> {
        self.children.iter().find(|c| c.param.is_some())
    }

    fn value_for(&self, method: Method) -> Option<&T> {
        self.routes.get(&method).or(self.any.as_ref())
    }
}

/// Radix trie router mapping `(method, path)` to a value.
pub struct Router<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Router<T> {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::new(""),
            len: 0,
        }
    }

    /// Add a route.
    ///
    /// # Errors
    ///
    /// [`RouteError`] for malformed patterns, a parameter that clashes with
    /// another parameter at the same position, or a duplicate registration.
    pub fn add(&mut self, method: impl Into<MethodFilter>, path: &str, value: T) -> Result<(), RouteError> {
        let method = method.into();
        let segments = parse_path(path)?;
        let mut node = &mut self.root;

        for seg in segments {
            let (segment, param) = match seg {
                PathSegment::Static(s) => (s.to_owned(), None),
                PathSegment::Param { name, converter } => {
                    if let Some(existing) = node.find_param() {
                        let info = existing.param.as_ref();
                        if info.is_some_and(|i| i.name != name || i.converter != converter) {
                            return Err(RouteError::ParamConflict {
                                path: path.to_owned(),
                                existing: existing.segment.clone(),
                            });
                        }
                    }
                    let info = ParamInfo {
                        name: name.to_owned(),
                        converter,
                    };
                    (format!("{{{name}}}"), Some(info))
                }
            };

            let child_idx = node
                .children
                .iter()
                .position(|c| c.segment == segment && c.param.is_some() == param.is_some());

            let idx = match child_idx {
                Some(idx) => idx,
                None => {
                    let mut new_node = Node::new(segment);
                    new_node.param = param;
                    node.children.push(new_node);
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx];
        }

        let slot = match method {
            MethodFilter::Only(m) => {
                if node.routes.contains_key(&m) {
                    return Err(RouteError::Duplicate {
                        method: m.as_str().to_owned(),
                        path: path.to_owned(),
                    });
                }
                node.routes.insert(m, value);
                return self.added(method, path);
            }
            MethodFilter::Any => &mut node.any,
        };
        if slot.is_some() {
            return Err(RouteError::Duplicate {
                method: "ALL".to_owned(),
                path: path.to_owned(),
            });
        }
        *slot = Some(value);
        self.added(method, path)
    }

    fn added(&mut self, method: MethodFilter, path: &str) -> Result<(), RouteError> {
        self.len += 1;
        tracing::trace!(?method, path, "route registered");
        Ok(())
    }

    /// Match a path and method.
    ///
    /// Static segments are preferred over parameters; when a static branch
    /// dead-ends the parameter branch is tried instead.
    #[must_use]
    pub fn match_path<'a>(&'a self, method: Method, path: &'a str) -> Option<RouteMatch<'a, T>> {
        let segments = split_segments(path);
        let mut params = Vec::new();
        let value = match_node(&self.root, path, &segments, method, &mut params)?;
        Some(RouteMatch { value, params })
    }

    /// Methods registered for `path`, ignoring `Any` routes.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let segments = split_segments(path);
        match find_node(&self.root, &segments) {
            Some(node) => Method::ALL
                .into_iter()
                .filter(|m| node.routes.contains_key(m))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-empty segments of `path` with their byte offsets.
fn split_segments(path: &str) -> Vec<(usize, &str)> {
    let mut segments = Vec::new();
    let mut start = 0;
    for part in path.split('/') {
        if !part.is_empty() {
            segments.push((start, part));
        }
        start += part.len() + 1;
    }
    segments
}

fn match_node<'a, T>(
    node: &'a Node<T>,
    path: &'a str,
    segments: &[(usize, &'a str)],
    method: Method,
    params: &mut Vec<(&'a str, &'a str)>,
) -> Option<&'a T> {
    let Some(&(offset, segment)) = segments.first() else {
        return node.value_for(method);
    };
    let rest = &segments[1..];

    if let Some(child) = node.find_static(segment) {
        if let Some(value) = match_node(child, path, rest, method, params) {
            return Some(value);
        }
    }

    let child = node.find_param()?;
    let info = child.param.as_ref()?;
    if info.converter == Converter::Path {
        let value = child.value_for(method)?;
        params.push((info.name.as_str(), path[offset..].trim_end_matches('/')));
        return Some(value);
    }
    if !info.converter.matches(segment) {
        return None;
    }
    params.push((info.name.as_str(), segment));
    match match_node(child, path, rest, method, params) {
        Some(value) => Some(value),
        None => {
            params.pop();
            None
        }
    }
}

fn find_node<'a, T>(node: &'a Node<T>, segments: &[(usize, &str)]) -> Option<&'a Node<T>> {
    let Some(&(_, segment)) = segments.first() else {
        return Some(node);
    };
    let rest = &segments[1..];

    if let Some(found) = node
        .find_static(segment)
        .and_then(|child| find_node(child, rest))
    {
        return Some(found);
    }
    let child = node.find_param()?;
    let info = child.param.as_ref()?;
    if info.converter == Converter::Path {
        return Some(child);
    }
    if !info.converter.matches(segment) {
        return None;
    }
    find_node(child, rest)
}

enum PathSegment<'a> {
    Static(&'a str),
    Param { name: &'a str, converter: Converter },
}

fn parse_path(path: &str) -> Result<Vec<PathSegment<'_>>, RouteError> {
    if !path.starts_with('/') {
        return Err(RouteError::invalid(path, "pattern must start with '/'"));
    }

    let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut seen = Vec::new();

    for (i, s) in raw.iter().enumerate() {
        let segment = if let Some(name) = s.strip_prefix(':') {
            PathSegment::Param {
                name,
                converter: Converter::Str,
            }
        } else if s.starts_with('{') || s.ends_with('}') {
            let inner = s
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| RouteError::invalid(path, "unbalanced braces"))?;
            let (name, converter) = match inner.split_once(':') {
                Some((name, conv)) => {
                    let converter = Converter::parse(conv).ok_or_else(|| {
                        RouteError::invalid(path, format!("unknown converter '{conv}'"))
                    })?;
                    (name, converter)
                }
                None => (inner, Converter::Str),
            };
            PathSegment::Param { name, converter }
        } else {
            PathSegment::Static(s)
        };

        if let PathSegment::Param { name, converter } = &segment {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(RouteError::invalid(path, format!("invalid parameter name '{name}'")));
            }
            if seen.contains(name) {
                return Err(RouteError::invalid(path, format!("parameter '{name}' appears twice")));
            }
            if *converter == Converter::Path && i + 1 != raw.len() {
                return Err(RouteError::invalid(path, "a path parameter must be last"));
            }
            seen.push(*name);
        }
        segments.push(segment);
    }

    Ok(segments)
}
