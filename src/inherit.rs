//! Template inheritance resolution
//!
//! `{% extends %}` is resolved at render time by walking the chain of
//! parent templates until one with no `extends` is found, merging child
//! block overrides upward as it goes, and rendering the merged root body.
//!
//! Resolution is pure tree construction: compiled templates are shared
//! read-only across concurrent renders, so the merge builds new
//! `NodeList`s and never touches the originals.

use std::collections::HashMap;

use crate::context::Context;
use crate::env::Environment;
use crate::error::TemplateError;
use crate::expr::Expr;
use crate::nodes::{BlockMode, BlockNode, ExtendNode, Node, NodeList};
use crate::value::Value;

/// Render an `extends` node: resolve the chain, merge blocks, render.
pub(crate) fn render_extends(
    node: &ExtendNode,
    ctx: &mut Context,
    env: &Environment,
) -> Result<String, TemplateError> {
    let mut overrides = collect_blocks(&node.body);
    let mut chain: Vec<String> = Vec::new();
    let mut parent_name = resolve_template_name(&node.parent, ctx, env, "extends")?;

    loop {
        if chain.contains(&parent_name) {
            chain.push(parent_name);
            return Err(TemplateError::CircularExtends(chain.join(" -> ")));
        }
        chain.push(parent_name.clone());

        let parent = env.get_template(&parent_name)?;
        match first_extend(parent.nodes()) {
            Some(extend) => {
                // The parent extends too: fold its blocks into the override
                // set and keep walking up.
                let parent_blocks = collect_blocks(&extend.body);
                overrides = merge_level(parent_blocks, overrides);
                parent_name = resolve_template_name(&extend.parent, ctx, env, "extends")?;
            }
            None => {
                let merged = apply_overrides(parent.nodes(), &overrides);
                return merged.render(ctx, env);
            }
        }
    }
}

/// Evaluate a template-name expression for `extends`/`include`; no value
/// is a render error naming the tag.
pub(crate) fn resolve_template_name(
    expr: &Expr,
    ctx: &Context,
    env: &Environment,
    tag: &str,
) -> Result<String, TemplateError> {
    match expr.eval(ctx, env) {
        Value::None => Err(TemplateError::Render(format!(
            "couldn't resolve template name '{}' in {} tag",
            expr.raw(),
            tag
        ))),
        value => Ok(value.to_string()),
    }
}

/// A template takes part in inheritance only when its body *begins* with
/// an `extends` node.
fn first_extend(body: &NodeList) -> Option<&ExtendNode> {
    match body.nodes().first() {
        Some(Node::Extend(extend)) => Some(extend),
        _ => None,
    }
}

/// Collect a body's top-level blocks by name.
fn collect_blocks(body: &NodeList) -> HashMap<String, BlockNode> {
    body.nodes()
        .iter()
        .filter_map(|node| match node {
            Node::Block(block) => Some((block.name.clone(), block.clone())),
            _ => None,
        })
        .collect()
}

/// Fold one level of the chain: the current template's own blocks,
/// overridden by what came from below. Overrides with no matching block
/// here propagate up untouched.
fn merge_level(
    parent_blocks: HashMap<String, BlockNode>,
    child_overrides: HashMap<String, BlockNode>,
) -> HashMap<String, BlockNode> {
    let mut merged = parent_blocks;
    for (name, child) in child_overrides {
        let combined = match merged.remove(&name) {
            Some(parent) => merge_block(&parent, &child),
            None => child,
        };
        merged.insert(name, combined);
    }
    merged
}

/// Combine a child override with the parent block of the same name under
/// the child's override mode. The result carries the child's mode so it
/// composes the same way against the next ancestor.
fn merge_block(parent: &BlockNode, child: &BlockNode) -> BlockNode {
    let body = match child.mode {
        BlockMode::Replace => child.body.clone(),
        BlockMode::AppendAfterParent => concat(&parent.body, &child.body),
        BlockMode::PrependBeforeParent => concat(&child.body, &parent.body),
    };
    BlockNode {
        name: child.name.clone(),
        body,
        mode: child.mode,
    }
}

fn concat(a: &NodeList, b: &NodeList) -> NodeList {
    NodeList::new(a.nodes().iter().chain(b.nodes()).cloned().collect())
}

/// Build the final tree: the root body with every overridden block
/// replaced by its merged form. Overrides that match nothing anywhere in
/// the chain are dropped silently.
fn apply_overrides(root: &NodeList, overrides: &HashMap<String, BlockNode>) -> NodeList {
    NodeList::new(
        root.nodes()
            .iter()
            .map(|node| match node {
                Node::Block(block) => match overrides.get(&block.name) {
                    Some(child) => Node::Block(merge_block(block, child)),
                    None => node.clone(),
                },
                other => other.clone(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn parse_body(source: &str) -> NodeList {
        Parser::new(tokenize(source)).parse().unwrap()
    }

    fn block(source: &str) -> BlockNode {
        match parse_body(source).nodes().first() {
            Some(Node::Block(b)) => b.clone(),
            other => panic!("expected block, got {:?}", other),
        }
    }

    fn render(body: &NodeList) -> String {
        let env = Environment::new();
        let mut ctx = Context::new();
        body.render(&mut ctx, &env).unwrap()
    }

    #[test]
    fn test_merge_block_replace() {
        let parent = block("{% block t %}Default{% endblock %}");
        let child = block("{% block t %}Child{% endblock %}");
        let merged = merge_block(&parent, &child);
        assert_eq!(render(&merged.body), "Child");
    }

    #[test]
    fn test_merge_block_append() {
        let parent = block("{% block t %}Default{% endblock %}");
        let child = block("{% block t super %}Child{% endblock %}");
        let merged = merge_block(&parent, &child);
        assert_eq!(render(&merged.body), "DefaultChild");
        assert_eq!(merged.mode, BlockMode::AppendAfterParent);
    }

    #[test]
    fn test_merge_block_prepend() {
        let parent = block("{% block t %}Default{% endblock %}");
        let child = block("{% block t %}Child{% endblock super %}");
        let merged = merge_block(&parent, &child);
        assert_eq!(render(&merged.body), "ChildDefault");
    }

    #[test]
    fn test_merge_level_propagates_unmatched() {
        let parent = collect_blocks(&parse_body("{% block a %}A{% endblock %}"));
        let child = collect_blocks(&parse_body(
            "{% block a %}X{% endblock %}{% block b %}B{% endblock %}",
        ));
        let merged = merge_level(parent, child);
        assert_eq!(merged.len(), 2);
        assert_eq!(render(&merged["a"].body), "X");
        assert_eq!(render(&merged["b"].body), "B");
    }

    #[test]
    fn test_apply_overrides_keeps_unknown_blocks_out() {
        let root = parse_body("x{% block a %}A{% endblock %}y");
        let overrides = collect_blocks(&parse_body("{% block zz %}Z{% endblock %}"));
        let merged = apply_overrides(&root, &overrides);
        assert_eq!(render(&merged), "xAy");
    }
}
