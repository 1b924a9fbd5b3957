//! Template rendering: [`TemplateEngine`] and its reference registry.
//!
//! Templates can call back into the engine:
//!
//! | Function               | Renders                                                 |
//! |------------------------|---------------------------------------------------------|
//! | `tpl(text)`            | `text` against the root context of the current render   |
//! | `tpl(text, ctx)`       | `text` against `ctx`                                    |
//! | `template(name, v)`    | reference `name` with `v` as `this` (plus `v`'s keys)   |
//!
//! Nesting is bounded by [`EngineConfig::max_depth`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use minijinja::value::ValueKind;
use minijinja::{AutoEscape, Environment, Error, ErrorKind, State, UndefinedBehavior, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::RenderError;
use crate::functions::register_filters;
use crate::network::register_network_functions;

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Name under which `tpl(...)` strings are compiled.
const TPL_NAME: &str = "<tpl>";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens when a template references a key the context lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeyPolicy {
    /// Fail the render with `MissingKey`.
    #[default]
    Error,
    /// Render absent keys, and lookups through them, as empty.
    Zero,
    /// Render absent keys as empty; looking up through one still fails.
    Lenient,
}

impl MissingKeyPolicy {
    fn undefined_behavior(self) -> UndefinedBehavior {
        match self {
            MissingKeyPolicy::Error => UndefinedBehavior::Strict,
            MissingKeyPolicy::Zero => UndefinedBehavior::Chainable,
            MissingKeyPolicy::Lenient => UndefinedBehavior::Lenient,
        }
    }
}

impl FromStr for MissingKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" | "strict" => Ok(MissingKeyPolicy::Error),
            "zero" => Ok(MissingKeyPolicy::Zero),
            "lenient" | "default" | "invalid" => Ok(MissingKeyPolicy::Lenient),
            other => Err(format!(
                "missing key policy must be one of [error, zero, lenient], but was: {other}"
            )),
        }
    }
}

impl fmt::Display for MissingKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingKeyPolicy::Error => "error",
            MissingKeyPolicy::Zero => "zero",
            MissingKeyPolicy::Lenient => "lenient",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub missing_key: MissingKeyPolicy,
    /// Maximum number of nested renders, the top-level one included.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            missing_key: MissingKeyPolicy::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-thread render scope
// ---------------------------------------------------------------------------

mod scope {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct RenderScope {
        roots: Vec<Value>,
        exceeded: Option<usize>,
        missing: Option<String>,
    }

    thread_local! {
        static SCOPE: RefCell<RenderScope> = RefCell::new(RenderScope::default());
    }

    /// Pops the level pushed by [`enter`] when dropped.
    pub(super) struct DepthGuard;

    impl Drop for DepthGuard {
        fn drop(&mut self) {
            SCOPE.with(|s| {
                s.borrow_mut().roots.pop();
            });
        }
    }

    /// Push one render level. The first level of a fresh render also
    /// clears whatever the previous render on this thread recorded.
    pub(super) fn enter(ctx: Value, limit: usize) -> Result<DepthGuard, Error> {
        SCOPE.with(|s| {
            let mut s = s.borrow_mut();
            if s.roots.is_empty() {
                s.exceeded = None;
                s.missing = None;
            }
            if s.roots.len() >= limit {
                s.exceeded = Some(limit);
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("render depth limit of {limit} exceeded"),
                ));
            }
            s.roots.push(ctx);
            Ok(DepthGuard)
        })
    }

    /// Context of the outermost render on this thread.
    pub(super) fn root() -> Option<Value> {
        SCOPE.with(|s| s.borrow().roots.first().cloned())
    }

    /// Remember the key behind an undefined-value error. The innermost
    /// level reports first and wins.
    pub(super) fn note_missing(err: &Error, env: &Environment<'_>, source: &str) {
        let Some(undefined) = causes(err).find(|e| e.kind() == ErrorKind::UndefinedError) else {
            return;
        };
        SCOPE.with(|s| {
            let mut s = s.borrow_mut();
            if s.missing.is_none() {
                let included = undefined
                    .name()
                    .and_then(|name| env.get_template(name).ok())
                    .map(|t| t.source().to_string());
                s.missing = Some(missing_key(undefined, included.as_deref().unwrap_or(source)));
            }
        })
    }

    pub(super) fn outcome() -> (Option<usize>, Option<String>) {
        SCOPE.with(|s| {
            let s = s.borrow();
            (s.exceeded, s.missing.clone())
        })
    }
}

/// `err` followed by the engine errors in its source chain. Failures
/// inside `{% include %}` arrive wrapped this way.
fn causes(err: &Error) -> impl Iterator<Item = &Error> {
    std::iter::successors(Some(err), |e| {
        std::error::Error::source(*e).and_then(|cause| cause.downcast_ref::<Error>())
    })
}

/// Best-effort name of the expression that evaluated to undefined.
fn missing_key(err: &Error, source: &str) -> String {
    let snippet = err
        .range()
        .and_then(|range| source.get(range))
        .or_else(|| {
            err.line()
                .and_then(|line| source.lines().nth(line.saturating_sub(1)))
        })
        .unwrap_or("");
    let expr = match snippet.find("{{") {
        Some(start) => {
            let rest = &snippet[start + 2..];
            rest.find("}}").map_or(rest, |end| &rest[..end])
        }
        None => snippet,
    };
    let key = expr.trim_matches(|c: char| matches!(c, '{' | '}' | '-' | '%') || c.is_whitespace());
    if key.is_empty() {
        "<unknown>".to_string()
    } else {
        key.to_string()
    }
}

/// `value` as `this`, plus its own keys when it is a map.
fn bind_this(value: &Value) -> Result<Value, Error> {
    let mut bound = BTreeMap::new();
    if value.kind() == ValueKind::Map {
        for key in value.try_iter()? {
            let item = value.get_item(&key)?;
            if let Some(name) = key.as_str() {
                bound.insert(name.to_string(), item);
            }
        }
    }
    bound.insert("this".to_string(), value.clone());
    Ok(Value::from(bound))
}

fn register_functions(env: &mut Environment<'static>, max_depth: usize) {
    env.add_function(
        "tpl",
        move |state: &State, text: String, ctx: Option<Value>| -> Result<String, Error> {
            let ctx = ctx
                .or_else(scope::root)
                .unwrap_or_else(|| Value::from(BTreeMap::<String, Value>::new()));
            let _guard = scope::enter(ctx.clone(), max_depth)?;
            state
                .env()
                .render_named_str(TPL_NAME, &text, ctx)
                .inspect_err(|err| scope::note_missing(err, state.env(), &text))
        },
    );
    env.add_function(
        "template",
        move |state: &State, name: String, value: Option<Value>| -> Result<String, Error> {
            let ctx = bind_this(&value.unwrap_or(Value::UNDEFINED))?;
            let _guard = scope::enter(ctx.clone(), max_depth)?;
            let tmpl = state.env().get_template(&name)?;
            tmpl.render(ctx)
                .inspect_err(|err| scope::note_missing(err, state.env(), tmpl.source()))
        },
    );
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Renders input templates with every registered reference template in
/// reach (`{% include %}`, `{% import %}`, `template(..)`).
///
/// The registry is append-only: the first registration of a name wins.
/// Registration takes a write lock, rendering a read lock, so renders on
/// several threads proceed in parallel once registration is over.
pub struct TemplateEngine {
    env: RwLock<Environment<'static>>,
    config: EngineConfig,
}

impl TemplateEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = EngineConfig {
            max_depth: config.max_depth.max(1),
            ..config
        };
        let mut env = Environment::new();
        env.set_undefined_behavior(config.missing_key.undefined_behavior());
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        register_filters(&mut env);
        register_network_functions(&mut env);
        register_functions(&mut env, config.max_depth);
        TemplateEngine {
            env: RwLock::new(env),
            config,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Parse and store a reference template under `name`. A name that is
    /// already registered is left untouched.
    pub fn register_reference(&self, name: &str, text: &str) -> Result<(), RenderError> {
        let mut env = self.env.write().unwrap_or_else(PoisonError::into_inner);
        if env.get_template(name).is_ok() {
            debug!(reference = name, "reference already registered, keeping first");
            return Ok(());
        }
        env.add_template_owned(name.to_string(), text.to_string())
            .map_err(|err| RenderError::TemplateSyntax {
                name: name.to_string(),
                message: err.to_string(),
            })?;
        debug!(reference = name, "reference registered");
        Ok(())
    }

    pub fn has_reference(&self, name: &str) -> bool {
        self.env
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_template(name)
            .is_ok()
    }

    /// Render `text` (identified as `name` in errors) against `context`.
    pub fn render(&self, name: &str, text: &str, context: &Context) -> Result<String, RenderError> {
        let env = self.env.read().unwrap_or_else(PoisonError::into_inner);
        let result = {
            let root = context.as_value().clone();
            scope::enter(root.clone(), self.config.max_depth).and_then(|_guard| {
                env.render_named_str(name, text, root)
                    .inspect_err(|err| scope::note_missing(err, &env, text))
            })
        };
        result.map_err(|err| self.classify(name, err))
    }

    fn classify(&self, name: &str, err: Error) -> RenderError {
        let (exceeded, missing) = scope::outcome();
        if let Some(limit) = exceeded {
            return RenderError::RecursionLimit { limit };
        }
        if causes(&err).any(|e| e.to_string().contains("recursion limit exceeded")) {
            return RenderError::RecursionLimit {
                limit: self.config.max_depth,
            };
        }
        let message = err.to_string();
        let kind = causes(&err)
            .map(Error::kind)
            .find(|kind| matches!(kind, ErrorKind::SyntaxError | ErrorKind::UndefinedError));
        match kind {
            Some(ErrorKind::SyntaxError) => RenderError::TemplateSyntax {
                name: name.to_string(),
                message,
            },
            Some(ErrorKind::UndefinedError) => RenderError::MissingKey {
                name: name.to_string(),
                key: missing.unwrap_or_else(|| "<unknown>".to_string()),
            },
            _ => RenderError::Render {
                name: name.to_string(),
                message,
            },
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        TemplateEngine::new(EngineConfig::default())
    }
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
