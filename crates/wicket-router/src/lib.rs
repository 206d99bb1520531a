//! Trie-based route lookup for wicket.
//!
//! [`Router`] is a generic radix trie; [`HandlerRouter`] stores handler
//! chains in it and plugs into the bridge as its [`RouteLookup`].
//!
//! # Features
//!
//! - Path parameters in either style: `/users/:id` or `/users/{id}`
//! - Typed converters: `{id:int}`, `{ratio:float}`, `{key:uuid}`, `{rest:path}`
//! - Static segments take priority over parameters
//! - `all` routes answer every method not registered explicitly

#![forbid(unsafe_code)]

mod r#match;
mod trie;

pub use r#match::RouteMatch;
pub use trie::{Converter, MethodFilter, ParamInfo, Router};

use percent_encoding::percent_decode_str;
use wicket_core::{HandlerChain, Method, RequestContext, RouteLookup, RouteParams};

/// Route registration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The pattern cannot be parsed.
    #[error("invalid route pattern '{path}': {reason}")]
    InvalidPattern {
        /// Offending pattern.
        path: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Another parameter already occupies this position.
    #[error("route '{path}' conflicts with parameter '{existing}' at the same position")]
    ParamConflict {
        /// Offending pattern.
        path: String,
        /// The parameter segment already registered.
        existing: String,
    },
    /// Method and pattern are already registered.
    #[error("route {method} '{path}' is already registered")]
    Duplicate {
        /// Method name, or `ALL`.
        method: String,
        /// Offending pattern.
        path: String,
    },
}

impl RouteError {
    pub(crate) fn invalid(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Handler chains keyed by method and path pattern.
#[derive(Default)]
pub struct HandlerRouter {
    router: Router<HandlerChain>,
}

impl HandlerRouter {
    /// Empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `chain` for `method` and `path`.
    ///
    /// # Errors
    ///
    /// See [`Router::add`].
    pub fn add(
        &mut self,
        method: impl Into<MethodFilter>,
        path: &str,
        chain: HandlerChain,
    ) -> Result<(), RouteError> {
        self.router.add(method, path, chain)
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.router.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.router.is_empty()
    }

    /// The underlying trie.
    #[must_use]
    pub fn router(&self) -> &Router<HandlerChain> {
        &self.router
    }
}

impl std::fmt::Debug for HandlerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRouter")
            .field("routes", &self.router.len())
            .finish()
    }
}

impl RouteLookup for HandlerRouter {
    fn lookup(&self, method: Method, path: &str, ctx: &RequestContext) -> Option<HandlerChain> {
        let matched = self.router.match_path(method, path)?;
        if !matched.params.is_empty() {
            let mut params = Vec::with_capacity(matched.params.len());
            for &(name, raw) in &matched.params {
                match percent_decode_str(raw).decode_utf8() {
                    Ok(value) => params.push((name, value.into_owned())),
                    Err(_) => {
                        tracing::debug!(param = name, raw, "route parameter is not valid UTF-8");
                        return None;
                    }
                }
            }
            ctx.set_route_params(RouteParams::from_pairs(params));
        }
        Some(matched.value.clone())
    }
}
