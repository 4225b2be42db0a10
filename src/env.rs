//! Environment and compiled templates
//!
//! An `Environment` owns the tag and filter registries, global values,
//! the loader, and the compiled-template cache. It is `Send + Sync`;
//! share it behind an `Arc` and render from as many threads as you like.
//! A `Template` is the immutable compiled unit: once built it never
//! changes, so concurrent renders of the same template cannot interfere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::TemplateError;
use crate::filters::{self, FilterFn};
use crate::lexer;
use crate::loader::{FileLoader, Loader};
use crate::nodes::{Node, NodeList};
use crate::parser::{Parser, TagParser};
use crate::value::Value;

pub struct Environment {
    tags: HashMap<String, TagParser>,
    filters: HashMap<String, FilterFn>,
    globals: HashMap<String, Value>,
    loader: Arc<dyn Loader>,
    cache: Mutex<HashMap<String, Arc<Template>>>,
    auto_reload: bool,
    cache_enabled: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An environment with the default filters and a [`FileLoader`]
    /// searching `templates/` and the working directory.
    pub fn new() -> Self {
        Self {
            tags: HashMap::new(),
            filters: filters::default_filters(),
            globals: HashMap::new(),
            loader: Arc::new(FileLoader::default()),
            cache: Mutex::new(HashMap::new()),
            auto_reload: true,
            cache_enabled: true,
        }
    }

    /// Build an environment from an [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new()
            .with_loader(Arc::new(FileLoader::new(config.template_dirs.clone())))
            .with_auto_reload(config.auto_reload)
            .with_cache(config.cache)
    }

    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    /// Register a tag parser under `name`.
    pub fn with_tag(
        mut self,
        name: impl Into<String>,
        tag: impl Fn(&mut Parser) -> Result<Node, TemplateError> + Send + Sync + 'static,
    ) -> Self {
        self.tags.insert(name.into(), Arc::new(tag));
        self
    }

    /// Register a filter under `name`.
    pub fn with_filter(
        mut self,
        name: impl Into<String>,
        filter: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.filters.insert(name.into(), Arc::new(filter));
        self
    }

    /// Add a global value, available to every render unless the caller's
    /// context shadows it.
    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// When off, cached templates are served without asking the loader
    /// whether their source changed.
    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = auto_reload;
        self
    }

    /// When off, every `get_template` recompiles.
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache_enabled = cache;
        self
    }

    pub fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub(crate) fn tags(&self) -> &HashMap<String, TagParser> {
        &self.tags
    }

    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    /// Compile a one-off literal template. Never cached.
    pub fn from_string(&self, source: &str) -> Result<Template, TemplateError> {
        Template::compile(source, None, self)
    }

    /// Resolve a name to a compiled template through the loader, serving
    /// the cached compile while the backing source is unchanged.
    ///
    /// The modification check, load, compile, and cache replacement all
    /// happen under one lock: concurrent calls for the same changed name
    /// recompile at most once, and no half-built template is ever visible.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, TemplateError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cache_enabled {
            if let Some(cached) = cache.get(name) {
                if !self.auto_reload || !self.loader.is_modified(name) {
                    debug!("template cache hit for '{}'", name);
                    return Ok(Arc::clone(cached));
                }
                debug!("template '{}' modified, recompiling", name);
            }
        }
        let source = self.loader.load(name)?;
        let template = Arc::new(Template::compile(&source, Some(name.to_string()), self)?);
        if self.cache_enabled {
            cache.insert(name.to_string(), Arc::clone(&template));
        }
        Ok(template)
    }

    /// Load (or serve from cache) and render a named template.
    pub fn render_template(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        self.get_template(name)?.render(self, context)
    }

    /// Compile and render a literal template source.
    pub fn render_str(&self, source: &str, context: &Context) -> Result<String, TemplateError> {
        self.from_string(source)?.render(self, context)
    }
}

/// A compiled template: immutable AST plus bookkeeping.
#[derive(Debug, Clone)]
pub struct Template {
    name: Option<String>,
    source: String,
    nodelist: NodeList,
}

impl Template {
    /// Tokenize and parse `source` with the environment's tag table.
    /// Syntax errors come back with the offending line number and that
    /// line's source text.
    pub fn compile(
        source: &str,
        name: Option<String>,
        env: &Environment,
    ) -> Result<Self, TemplateError> {
        let tokens = lexer::tokenize(source);
        let mut parser = Parser::new(tokens).with_tags(env.tags().clone());
        let nodelist = parser.parse().map_err(|err| enrich(err, source))?;
        check_duplicate_blocks(&nodelist).map_err(|err| enrich(err, source))?;
        Ok(Self {
            name,
            source: source.to_string(),
            nodelist,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn nodes(&self) -> &NodeList {
        &self.nodelist
    }

    /// Render with a caller-supplied context. The caller's mapping is
    /// never mutated; globals are layered underneath it.
    pub fn render(&self, env: &Environment, context: &Context) -> Result<String, TemplateError> {
        let mut ctx = Context::new();
        for (name, value) in env.globals() {
            ctx.insert(name.clone(), value.clone());
        }
        for (name, value) in context.iter() {
            ctx.insert(name.clone(), value.clone());
        }
        self.nodelist.render(&mut ctx, env)
    }

    /// Render into an existing scope; used by `include`, which shares the
    /// caller's context rather than copying it.
    pub(crate) fn render_with(
        &self,
        ctx: &mut Context,
        env: &Environment,
    ) -> Result<String, TemplateError> {
        self.nodelist.render(ctx, env)
    }
}

/// Fill in the offending source line for syntax errors.
fn enrich(err: TemplateError, source: &str) -> TemplateError {
    match err {
        TemplateError::Syntax(mut e) => {
            if e.source_line.is_none() {
                if let Some(line) = e.line {
                    e.source_line = source
                        .lines()
                        .nth(line.saturating_sub(1))
                        .map(|text| text.trim().to_string());
                }
            }
            TemplateError::Syntax(e)
        }
        other => other,
    }
}

/// Block names must be unique within one template body (both a plain body
/// and the body of an `extends`).
fn check_duplicate_blocks(nodelist: &NodeList) -> Result<(), TemplateError> {
    check_body(nodelist)?;
    if let Some(Node::Extend(extend)) = nodelist.nodes().first() {
        check_body(&extend.body)?;
    }
    Ok(())
}

fn check_body(body: &NodeList) -> Result<(), TemplateError> {
    let mut seen = std::collections::HashSet::new();
    for node in body.nodes() {
        if let Node::Block(block) = node {
            if !seen.insert(block.name.as_str()) {
                return Err(crate::error::SyntaxError::new(format!(
                    "duplicate block name '{}'",
                    block.name
                ))
                .into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_environment_and_template_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Environment>();
        assert_send_sync::<Template>();
    }

    #[test]
    fn test_render_str() {
        let env = Environment::new();
        let mut ctx = Context::new();
        ctx.insert("name", "world");
        assert_eq!(
            env.render_str("Hello {{ name }}!", &ctx).unwrap(),
            "Hello world!"
        );
    }

    #[test]
    fn test_globals_are_layered_under_context() {
        let env = Environment::new()
            .with_global("site", "smalt")
            .with_global("shadowed", "global");
        let mut ctx = Context::new();
        ctx.insert("shadowed", "local");
        assert_eq!(
            env.render_str("{{ site }}/{{ shadowed }}", &ctx).unwrap(),
            "smalt/local"
        );
    }

    #[test]
    fn test_custom_filter() {
        let env = Environment::new().with_filter("exclaim", |value| {
            Value::String(format!("{}!", value))
        });
        assert_eq!(
            env.render_str("{{ 'hey' | exclaim }}", &Context::new()).unwrap(),
            "hey!"
        );
    }

    #[test]
    fn test_compile_error_carries_line_and_source() {
        let env = Environment::new();
        let err = env
            .from_string("line one\n{% bogus %}\nline three")
            .unwrap_err();
        match err {
            TemplateError::Syntax(e) => {
                assert_eq!(e.line, Some(2));
                assert_eq!(e.source_line.as_deref(), Some("{% bogus %}"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_block_names_rejected() {
        let env = Environment::new();
        let err = env
            .from_string("{% block a %}1{% endblock %}{% block a %}2{% endblock %}")
            .unwrap_err();
        assert!(err.to_string().contains("duplicate block name 'a'"));
    }

    #[test]
    fn test_get_template_caches_until_modified() {
        let loader = Arc::new(MemoryLoader::new());
        loader.insert("page.html", "v1 {{ n }}");
        let env = Environment::new().with_loader(loader.clone());

        let first = env.get_template("page.html").unwrap();
        let second = env.get_template("page.html").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        loader.insert("page.html", "v2 {{ n }}");
        let third = env.get_template("page.html").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.source(), "v2 {{ n }}");
    }

    #[test]
    fn test_from_string_is_never_cached() {
        let env = Environment::new();
        let a = env.from_string("x").unwrap();
        let b = env.from_string("x").unwrap();
        // distinct compiles of the same source render identically
        assert_eq!(
            a.render(&env, &Context::new()).unwrap(),
            b.render(&env, &Context::new()).unwrap()
        );
    }

    #[test]
    fn test_template_not_found() {
        let env = Environment::new().with_loader(Arc::new(MemoryLoader::new()));
        assert!(matches!(
            env.get_template("missing.html"),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn test_no_partial_ast_cached_on_error() {
        let loader = Arc::new(MemoryLoader::new());
        loader.insert("broken.html", "{% if x %}no endif");
        let env = Environment::new().with_loader(loader.clone());
        assert!(env.get_template("broken.html").is_err());

        // fixing the source must not be masked by a stale cache entry
        loader.insert("broken.html", "{% if x %}y{% endif %}");
        assert!(env.get_template("broken.html").is_ok());
    }
}
