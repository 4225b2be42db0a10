//! AST nodes and rendering
//!
//! Every node renders itself against a context and an environment and
//! returns a string. Nodes never mutate themselves during render: a
//! compiled tree is immutable and may be rendered concurrently, so any
//! structural work (template inheritance) builds new trees instead.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::env::Environment;
use crate::error::TemplateError;
use crate::expr::{Condition, Expr};
use crate::inherit;
use crate::value::Value;

/// Render behavior for host-registered tags.
///
/// A custom tag parser returns `Node::Custom(Arc<dyn CustomNode>)`; the
/// engine treats it like any built-in node.
pub trait CustomNode: fmt::Debug + Send + Sync {
    fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError>;
}

/// One renderable AST node.
#[derive(Debug, Clone)]
pub enum Node {
    Text(TextNode),
    Var(VarNode),
    If(IfNode),
    For(ForNode),
    Filter(FilterNode),
    Set(SetNode),
    Block(BlockNode),
    Extend(ExtendNode),
    Include(IncludeNode),
    List(NodeList),
    Custom(Arc<dyn CustomNode>),
}

impl Node {
    pub fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        match self {
            Node::Text(node) => Ok(node.text.clone()),
            Node::Var(node) => Ok(node.expr.render(ctx, env)),
            Node::If(node) => node.render(ctx, env),
            Node::For(node) => node.render(ctx, env),
            Node::Filter(node) => node.render(ctx, env),
            Node::Set(node) => node.render(ctx, env),
            Node::Block(node) => node.body.render(ctx, env),
            Node::Extend(node) => inherit::render_extends(node, ctx, env),
            Node::Include(node) => node.render(ctx, env),
            Node::List(list) => list.render(ctx, env),
            Node::Custom(node) => node.render(ctx, env),
        }
    }
}

/// Raw template text, emitted verbatim.
#[derive(Debug, Clone)]
pub struct TextNode {
    pub text: String,
}

/// `{{ expr }}` interpolation.
#[derive(Debug, Clone)]
pub struct VarNode {
    pub expr: Expr,
}

/// `{% if %}` / `{% elif %}` / `{% else %}` / `{% endif %}`.
#[derive(Debug, Clone)]
pub struct IfNode {
    pub condition: Condition,
    pub body: NodeList,
    pub elifs: Vec<ElifBranch>,
    pub else_body: Option<NodeList>,
}

#[derive(Debug, Clone)]
pub struct ElifBranch {
    pub condition: Condition,
    pub body: NodeList,
}

impl IfNode {
    fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        if self.condition.eval(ctx, env) {
            return self.body.render(ctx, env);
        }
        for branch in &self.elifs {
            if branch.condition.eval(ctx, env) {
                return branch.body.render(ctx, env);
            }
        }
        match &self.else_body {
            Some(body) => body.render(ctx, env),
            None => Ok(String::new()),
        }
    }
}

/// `{% for var[, var2] in expr %}` / `{% else %}` / `{% endfor %}`.
#[derive(Debug, Clone)]
pub struct ForNode {
    pub loopvars: Vec<String>,
    pub iterable: Expr,
    pub body: NodeList,
    pub else_body: Option<NodeList>,
}

impl ForNode {
    fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        let Some(items) = iter_items(&self.iterable.eval(ctx, env)) else {
            // Not iterable at all: render nothing, not even the else body.
            return Ok(String::new());
        };
        let mut scope = ctx.clone();
        if items.is_empty() {
            return match &self.else_body {
                Some(body) => body.render(&mut scope, env),
                None => Ok(String::new()),
            };
        }
        let total = items.len();
        let multi = self.loopvars.len() > 1;
        let mut out = String::new();
        for (index, item) in items.into_iter().enumerate() {
            if multi {
                let values = match item {
                    Value::List(values) => values,
                    other => vec![other],
                };
                if values.len() != self.loopvars.len() {
                    return Err(TemplateError::Render(format!(
                        "for loop sequence '{}' yielded an element with {} value(s), \
                         but there are {} loop variable(s) ({})",
                        self.iterable.raw(),
                        values.len(),
                        self.loopvars.len(),
                        self.loopvars.join(", ")
                    )));
                }
                for (name, value) in self.loopvars.iter().zip(values) {
                    scope.insert(name.clone(), value);
                }
            } else {
                scope.insert(self.loopvars[0].clone(), item);
            }
            scope.insert("loop", loop_value(index, total));
            out.push_str(&self.body.render(&mut scope, env)?);
        }
        Ok(out)
    }
}

/// What `{% for %}` iterates: list items, string chars, or map entries as
/// `[key, value]` pairs. `None` when the value is not iterable.
fn iter_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::List(items) => Some(items.clone()),
        Value::String(s) => Some(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Map(map) => Some(
            map.iter()
                .map(|(key, value)| {
                    Value::List(vec![Value::String(key.clone()), value.clone()])
                })
                .collect(),
        ),
        _ => None,
    }
}

/// The per-iteration `loop` object.
fn loop_value(index: usize, total: usize) -> Value {
    let mut map = BTreeMap::new();
    map.insert("index".to_string(), Value::Int(index as i64 + 1));
    map.insert("index_0".to_string(), Value::Int(index as i64));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == total));
    Value::Map(map)
}

/// `{% filter name[, name...] %}` body `{% end %}`: renders the body, then
/// pipes the rendered string through the named filters in order.
#[derive(Debug, Clone)]
pub struct FilterNode {
    pub filters: Vec<String>,
    pub body: NodeList,
}

impl FilterNode {
    fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        let mut value = Value::String(self.body.render(ctx, env)?);
        for name in &self.filters {
            match env.filter(name) {
                Some(filter) => value = filter(value),
                None => log::debug!("unknown filter '{}' skipped", name),
            }
        }
        Ok(value.to_string())
    }
}

/// `{% set name = expr[, name2 = expr2] %}`: injects values into the
/// current scope for the remainder of that scope.
#[derive(Debug, Clone)]
pub struct SetNode {
    pub assignments: Vec<(String, Expr)>,
}

impl SetNode {
    fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        for (name, expr) in &self.assignments {
            let value = expr.eval(ctx, env);
            ctx.insert(name.clone(), value);
        }
        Ok(String::new())
    }
}

/// How a child block combines with the parent block of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Plain `{% block name %}`: substitute the parent block entirely
    Replace,
    /// `{% block name super %}`: child content after the parent's
    AppendAfterParent,
    /// `{% endblock super %}`: child content before the parent's
    PrependBeforeParent,
}

/// `{% block name %}` body `{% endblock %}`: a named, overridable region.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub name: String,
    pub body: NodeList,
    pub mode: BlockMode,
}

/// `{% extends expr %}`: the rest of the template body belongs to this
/// node; rendering resolves the extends chain and renders the merged
/// parent tree.
#[derive(Debug, Clone)]
pub struct ExtendNode {
    pub parent: Expr,
    pub body: NodeList,
}

/// `{% include expr %}`: renders the named template with the current
/// context (shared, not copied).
#[derive(Debug, Clone)]
pub struct IncludeNode {
    pub template: Expr,
}

impl IncludeNode {
    fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        let name = inherit::resolve_template_name(&self.template, ctx, env, "include")?;
        let template = env.get_template(&name)?;
        template.render_with(ctx, env)
    }
}

/// Ordered sequence of nodes; renders by concatenating children in order.
#[derive(Debug, Clone, Default)]
pub struct NodeList {
    nodes: Vec<Node>,
}

impl NodeList {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn render(&self, ctx: &mut Context, env: &Environment) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            out.push_str(&node.render(ctx, env)?);
        }
        Ok(out)
    }
}
