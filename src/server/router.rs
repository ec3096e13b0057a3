//! Path routing.
//!
//! Each method gets its own tree of path segments. A segment is either
//! static text, a `:name` parameter matching exactly one non-empty segment,
//! or a terminal `*name` catch-all matching everything that is left:
//!
//! ```text
//! GET /a          -> static
//! GET /:a         -> r.query("a") == Some("x") for /x
//! GET /ab/*a      -> r.query("a") == Some("/x/y") for /ab/x/y
//! ```
//!
//! Static segments win over parameters, parameters over catch-alls, and a
//! failed branch falls back to the next candidate.

use std::collections::HashMap;

use thiserror::Error;

use crate::http::handler::{BoxedHandler, Handler};
use crate::http::request::{Method, Request};
use crate::http::response::{ResponseWriter, StatusCode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("path must begin with '/' in path {0:?}")]
    NotAbsolute(String),

    #[error("wildcards must be named with a non-empty name in path {0:?}")]
    EmptyWildcardName(String),

    #[error("{segment} in new path {path:?} conflicts with existing parameter :{existing}")]
    ParamConflict {
        segment: String,
        path: String,
        existing: String,
    },

    #[error("catch-all conflicts with existing handle for segment {segment:?} in path {path:?}")]
    CatchAllConflict { segment: String, path: String },

    #[error("catch-all routes are only allowed at the end of the path in path {0:?}")]
    CatchAllNotTerminal(String),

    #[error("a handler is already registered for {method} {path}")]
    Duplicate { method: String, path: String },
}

#[derive(Default)]
struct Node {
    handler: Option<BoxedHandler>,
    statics: Vec<(String, Node)>,
    param: Option<(String, Box<Node>)>,
    catch_all: Option<(String, BoxedHandler)>,
}

impl Node {
    fn static_child(&mut self, segment: &str) -> &mut Node {
        let index = match self.statics.iter().position(|(name, _)| name == segment) {
            Some(index) => index,
            None => {
                self.statics.push((segment.to_string(), Node::default()));
                self.statics.len() - 1
            }
        };
        &mut self.statics[index].1
    }

    fn lookup<'n>(&'n self, segments: &[&str], params: &mut Vec<(String, String)>) -> Option<&'n BoxedHandler> {
        let Some((first, rest)) = segments.split_first() else {
            return self.handler.as_ref();
        };

        for (name, child) in &self.statics {
            if name == first {
                if let Some(handler) = child.lookup(rest, params) {
                    return Some(handler);
                }
            }
        }

        if let Some((name, child)) = &self.param {
            if !first.is_empty() {
                let mark = params.len();
                params.push((name.clone(), first.to_string()));
                if let Some(handler) = child.lookup(rest, params) {
                    return Some(handler);
                }
                params.truncate(mark);
            }
        }

        if let Some((name, handler)) = &self.catch_all {
            let mut captured = String::new();
            for segment in segments {
                captured.push('/');
                captured.push_str(segment);
            }
            params.push((name.clone(), captured));
            return Some(handler);
        }

        None
    }
}

/// Dispatches requests to handlers registered per method and path.
#[derive(Default)]
pub struct Router {
    trees: HashMap<Method, Node>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` and `path`.
    pub fn route<H: Handler>(&mut self, method: Method, path: &str, handler: H) -> Result<(), RouteError> {
        let Some(relative) = path.strip_prefix('/') else {
            return Err(RouteError::NotAbsolute(path.to_string()));
        };
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let handler: BoxedHandler = std::sync::Arc::new(handler);

        let mut node = self.trees.entry(method.clone()).or_default();
        for (i, &segment) in segments.iter().enumerate() {
            if segment == ":" || segment == "*" {
                return Err(RouteError::EmptyWildcardName(path.to_string()));
            }

            if let Some(name) = segment.strip_prefix('*') {
                if i != segments.len() - 1 {
                    return Err(RouteError::CatchAllNotTerminal(path.to_string()));
                }
                if node.catch_all.is_some() || node.param.is_some() || !node.statics.is_empty() {
                    return Err(RouteError::CatchAllConflict {
                        segment: segment.to_string(),
                        path: path.to_string(),
                    });
                }
                node.catch_all = Some((name.to_string(), handler));
                return Ok(());
            }

            if node.catch_all.is_some() {
                return Err(RouteError::CatchAllConflict {
                    segment: segment.to_string(),
                    path: path.to_string(),
                });
            }

            node = match segment.strip_prefix(':') {
                Some(name) => {
                    let (existing, child) = node
                        .param
                        .get_or_insert_with(|| (name.to_string(), Box::default()));
                    if existing != name {
                        return Err(RouteError::ParamConflict {
                            segment: segment.to_string(),
                            path: path.to_string(),
                            existing: existing.clone(),
                        });
                    }
                    child.as_mut()
                }
                None => node.static_child(segment),
            };
        }

        if node.handler.is_some() {
            return Err(RouteError::Duplicate {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        node.handler = Some(handler);
        Ok(())
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.route(Method::GET, path, handler)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.route(Method::POST, path, handler)
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.route(Method::DELETE, path, handler)
    }

    /// Finds the handler for a request path along with the captured path
    /// parameters.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(&BoxedHandler, Vec<(String, String)>)> {
        let root = self.trees.get(method)?;
        let relative = path.strip_prefix('/')?;
        let segments: Vec<&str> = if relative.is_empty() {
            Vec::new()
        } else {
            relative.split('/').collect()
        };

        let mut params = Vec::new();
        let handler = root.lookup(&segments, &mut params)?;
        Some((handler, params))
    }
}

impl Handler for Router {
    async fn serve(&self, w: &mut ResponseWriter<'_>, r: &mut Request<'_>) {
        let Some((handler, params)) = self.lookup(&r.method, &r.path) else {
            tracing::debug!(method = %r.method, path = %r.path, "no route");
            w.write_status(StatusCode::NOT_FOUND);
            return;
        };

        for (name, value) in params {
            r.set_query(name, value);
        }
        handler.serve_boxed(w, r).await;
    }
}
