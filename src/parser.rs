//! Recursive-descent template parser
//!
//! Consumes the token sequence and produces an AST. Each TAG token's
//! leading word selects a parser callback from the dispatch table; the
//! callback consumes the tokens of its construct (including its closing
//! tag) and returns one node. Hosts extend the language by registering
//! callbacks under new tag names.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{SyntaxError, TemplateError};
use crate::expr::{is_identifier, parse_condition, parse_expr};
use crate::lexer::{Token, TokenKind};
use crate::nodes::{
    BlockMode, BlockNode, ElifBranch, ExtendNode, FilterNode, ForNode, IfNode, IncludeNode,
    Node, NodeList, SetNode, TextNode, VarNode,
};

/// A tag parser callback: consumes this construct's tokens, returns one
/// node.
pub type TagParser = Arc<dyn Fn(&mut Parser) -> Result<Node, TemplateError> + Send + Sync>;

/// Split a TAG token into its leading word and remaining argument text.
pub fn split_tag(token: &Token) -> Result<(String, String), TemplateError> {
    let content = token.content.trim();
    let mut parts = content.splitn(2, char::is_whitespace);
    match parts.next().filter(|cmd| !cmd.is_empty()) {
        Some(cmd) => Ok((
            cmd.to_string(),
            parts.next().unwrap_or("").trim().to_string(),
        )),
        None => Err(SyntaxError::new("empty tag").at_line(token.line).into()),
    }
}

pub struct Parser {
    tokens: VecDeque<Token>,
    tags: HashMap<String, TagParser>,
    /// Currently open block-style tags, innermost last. Only used to
    /// produce precise error messages.
    open_tags: Vec<Token>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
            tags: default_tags(),
            open_tags: Vec::new(),
        }
    }

    /// Merge host-registered tags over the built-in table.
    pub fn with_tags(mut self, tags: HashMap<String, TagParser>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Peek at the next token without consuming it.
    pub fn next_token(&self) -> Option<&Token> {
        self.tokens.front()
    }

    /// Consume and return the next token.
    pub fn pop_token(&mut self) -> Option<Token> {
        self.tokens.pop_front()
    }

    /// Un-consume a token; it becomes the next token again.
    pub fn push_back(&mut self, token: Token) {
        self.tokens.push_front(token);
    }

    /// Consume the next token, which a tag callback knows must exist
    /// (its own tag token, or a closing tag guaranteed by `parse_until`).
    pub fn take_tag(&mut self) -> Result<Token, TemplateError> {
        self.pop_token()
            .ok_or_else(|| SyntaxError::new("unexpected end of template").into())
    }

    /// Parse the whole remaining token stream.
    pub fn parse(&mut self) -> Result<NodeList, TemplateError> {
        self.parse_nodes(&[])
    }

    /// Parse until a TAG whose leading word is in `stop_at`; that token is
    /// pushed back for the caller. `opened` is the construct's opening tag,
    /// reported if input runs out first.
    pub fn parse_until(
        &mut self,
        stop_at: &[&str],
        opened: &Token,
    ) -> Result<NodeList, TemplateError> {
        self.open_tags.push(opened.clone());
        let result = self.parse_nodes(stop_at);
        if result.is_ok() {
            self.open_tags.pop();
        }
        result
    }

    fn parse_nodes(&mut self, stop_at: &[&str]) -> Result<NodeList, TemplateError> {
        let mut nodes = Vec::new();
        loop {
            let Some(token) = self.pop_token() else {
                if stop_at.is_empty() {
                    break;
                }
                return Err(self.unclosed_error(stop_at));
            };
            match token.kind {
                TokenKind::Text => nodes.push(Node::Text(TextNode {
                    text: token.content.clone(),
                })),
                TokenKind::Variable => {
                    let expr =
                        parse_expr(&token.content).map_err(|e| e.at_line(token.line))?;
                    nodes.push(Node::Var(VarNode { expr }));
                }
                TokenKind::Tag => {
                    let (cmd, _) = split_tag(&token)?;
                    if stop_at.contains(&cmd.as_str()) {
                        self.push_back(token);
                        break;
                    }
                    nodes.push(self.dispatch(token, &cmd)?);
                }
            }
        }
        Ok(NodeList::new(nodes))
    }

    fn dispatch(&mut self, token: Token, cmd: &str) -> Result<Node, TemplateError> {
        let Some(tag) = self.tags.get(cmd).cloned() else {
            if is_closing_word(cmd) {
                let context = match self.open_tags.last() {
                    Some(open) => format!(
                        " while '{{% {} %}}' from line {} is still open",
                        open.content, open.line
                    ),
                    None => String::new(),
                };
                return Err(SyntaxError::new(format!(
                    "unexpected closing tag '{{% {} %}}'{}",
                    token.content, context
                ))
                .at_line(token.line)
                .into());
            }
            return Err(
                SyntaxError::new(format!("unknown tag '{{% {} %}}'", token.content))
                    .at_line(token.line)
                    .into(),
            );
        };
        // The callback re-reads its own tag token.
        self.push_back(token);
        tag(self)
    }

    fn unclosed_error(&self, stop_at: &[&str]) -> TemplateError {
        let expected = stop_at.join(", ");
        match self.open_tags.last() {
            Some(open) => SyntaxError::new(format!(
                "unclosed tag '{{% {} %}}', expected one of: {}",
                open.content, expected
            ))
            .at_line(open.line)
            .into(),
            None => SyntaxError::new(format!(
                "unexpected end of template, expected one of: {}",
                expected
            ))
            .into(),
        }
    }
}

/// Words like `endif`/`endfor` that close a construct. A bare `end`
/// (the filter tag's closer) is not one.
fn is_closing_word(cmd: &str) -> bool {
    cmd.len() > 3 && cmd.starts_with("end")
}

fn default_tags() -> HashMap<String, TagParser> {
    let mut tags: HashMap<String, TagParser> = HashMap::new();
    tags.insert("if".into(), Arc::new(parse_if));
    tags.insert("for".into(), Arc::new(parse_for));
    tags.insert("filter".into(), Arc::new(parse_filter));
    tags.insert("set".into(), Arc::new(parse_set));
    tags.insert("block".into(), Arc::new(parse_block));
    tags.insert("extends".into(), Arc::new(parse_extends));
    tags.insert("include".into(), Arc::new(parse_include));
    tags
}

fn parse_if(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    let condition = parse_condition(&args).map_err(|e| e.at_line(token.line))?;
    let body = parser.parse_until(&["elif", "else", "endif"], &token)?;

    let mut elifs = Vec::new();
    loop {
        let cmd = match parser.next_token() {
            Some(next) => split_tag(next)?.0,
            None => break,
        };
        if cmd != "elif" {
            break;
        }
        let elif_token = parser.take_tag()?;
        let (_, elif_args) = split_tag(&elif_token)?;
        let condition =
            parse_condition(&elif_args).map_err(|e| e.at_line(elif_token.line))?;
        let body = parser.parse_until(&["elif", "else", "endif"], &elif_token)?;
        elifs.push(ElifBranch { condition, body });
    }

    let else_body = parse_else(parser, &["endif"])?;
    parser.take_tag()?; // endif
    Ok(Node::If(IfNode {
        condition,
        body,
        elifs,
        else_body,
    }))
}

/// Optional `{% else %}` branch shared by `if` and `for`.
fn parse_else(parser: &mut Parser, stop: &[&str]) -> Result<Option<NodeList>, TemplateError> {
    let is_else = match parser.next_token() {
        Some(next) if next.kind == TokenKind::Tag => split_tag(next)?.0 == "else",
        _ => false,
    };
    if !is_else {
        return Ok(None);
    }
    let else_token = parser.take_tag()?;
    Ok(Some(parser.parse_until(stop, &else_token)?))
}

fn parse_for(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    let body = parser.parse_until(&["endfor", "else"], &token)?;
    let else_body = parse_else(parser, &["endfor"])?;
    parser.take_tag()?; // endfor

    let Some(at) = find_keyword(&args, "in") else {
        return Err(SyntaxError::new(format!("for tag expects 'in': '{}'", args))
            .at_line(token.line)
            .into());
    };
    let var_part = args[..at].trim().trim_end_matches(',');
    let iter_part = args[at + 2..].trim();

    let mut loopvars = Vec::new();
    for var in var_part.split(',') {
        let var = var.trim();
        if !is_identifier(var) {
            return Err(SyntaxError::new(format!("invalid loop variable '{}'", var))
                .at_line(token.line)
                .into());
        }
        loopvars.push(var.to_string());
    }
    let iterable = parse_expr(iter_part).map_err(|e| e.at_line(token.line))?;
    Ok(Node::For(ForNode {
        loopvars,
        iterable,
        body,
        else_body,
    }))
}

/// First occurrence of `word` as a standalone word, byte offset.
fn find_keyword(s: &str, word: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut from = 0;
    while let Some(found) = s[from..].find(word) {
        let at = from + found;
        let before_ok = at == 0 || !is_word_byte(bytes[at - 1]);
        let end = at + word.len();
        let after_ok = end >= s.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_filter(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    let body = parser.parse_until(&["end"], &token)?;
    parser.take_tag()?; // end

    let mut filters = Vec::new();
    for name in args.trim_end_matches(',').split(',') {
        let name = name.trim();
        if !is_identifier(name) {
            return Err(SyntaxError::new(format!(
                "filter tag requires an identifier, got '{}'",
                name
            ))
            .at_line(token.line)
            .into());
        }
        filters.push(name.to_string());
    }
    Ok(Node::Filter(FilterNode { filters, body }))
}

fn parse_set(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    if args.is_empty() {
        return Err(
            SyntaxError::new("set tag requires at least one assignment")
                .at_line(token.line)
                .into(),
        );
    }
    let mut assignments = Vec::new();
    for part in split_outside_quotes(&args, ',') {
        let part = part.trim();
        let Some((name, expr_src)) = part.split_once('=') else {
            return Err(SyntaxError::new(format!(
                "set tag expects name=expression, got '{}'",
                part
            ))
            .at_line(token.line)
            .into());
        };
        let name = name.trim();
        if !is_identifier(name) {
            return Err(
                SyntaxError::new(format!("invalid name '{}' in set tag", name))
                    .at_line(token.line)
                    .into(),
            );
        }
        let expr = parse_expr(expr_src).map_err(|e| e.at_line(token.line))?;
        assignments.push((name.to_string(), expr));
    }
    Ok(Node::Set(SetNode { assignments }))
}

/// Split on `sep`, ignoring separators inside quoted strings.
fn split_outside_quotes(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == sep => parts.push(std::mem::take(&mut current)),
            None => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_block(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    let words: Vec<&str> = args.split_whitespace().collect();
    let (name, opening_super) = match words.as_slice() {
        [name] => (*name, false),
        [name, "super"] => (*name, true),
        [_, other] => {
            return Err(SyntaxError::new(format!(
                "second argument of block tag must be 'super', not '{}'",
                other
            ))
            .at_line(token.line)
            .into())
        }
        _ => {
            return Err(SyntaxError::new("block tag requires a name")
                .at_line(token.line)
                .into())
        }
    };

    let body = parser.parse_until(&["endblock"], &token)?;
    let end_token = parser.take_tag()?;
    let (_, end_args) = split_tag(&end_token)?;
    let closing_super = match end_args.as_str() {
        "" => false,
        "super" => true,
        other => {
            return Err(SyntaxError::new(format!(
                "unexpected argument '{}' to endblock",
                other
            ))
            .at_line(end_token.line)
            .into())
        }
    };
    if opening_super && closing_super {
        return Err(SyntaxError::new(format!(
            "block '{}' marks super on both its opening and closing tag",
            name
        ))
        .at_line(token.line)
        .into());
    }
    let mode = if opening_super {
        BlockMode::AppendAfterParent
    } else if closing_super {
        BlockMode::PrependBeforeParent
    } else {
        BlockMode::Replace
    };
    Ok(Node::Block(BlockNode {
        name: name.to_string(),
        body,
        mode,
    }))
}

fn parse_extends(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    let mut words = args.split_whitespace();
    let (Some(name), None) = (words.next(), words.next()) else {
        return Err(SyntaxError::new("extends tag requires exactly one argument")
            .at_line(token.line)
            .into());
    };
    let parent = parse_expr(name).map_err(|e| e.at_line(token.line))?;
    // The remainder of the token stream is the child body.
    let body = parser.parse()?;
    Ok(Node::Extend(ExtendNode { parent, body }))
}

fn parse_include(parser: &mut Parser) -> Result<Node, TemplateError> {
    let token = parser.take_tag()?;
    let (_, args) = split_tag(&token)?;
    let mut words = args.split_whitespace();
    let (Some(name), None) = (words.next(), words.next()) else {
        return Err(SyntaxError::new("include tag requires exactly one argument")
            .at_line(token.line)
            .into());
    };
    let template = parse_expr(name).map_err(|e| e.at_line(token.line))?;
    Ok(Node::Include(IncludeNode { template }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Result<NodeList, TemplateError> {
        Parser::new(tokenize(source)).parse()
    }

    fn syntax_message(result: Result<NodeList, TemplateError>) -> String {
        match result {
            Err(TemplateError::Syntax(err)) => err.message,
            other => panic!("expected syntax error, got {:?}", other.map(|n| n.len())),
        }
    }

    #[test]
    fn test_parse_text_and_variable() {
        let nodes = parse_source("hello {{ name }}").unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(nodes.nodes()[0], Node::Text(_)));
        assert!(matches!(nodes.nodes()[1], Node::Var(_)));
    }

    #[test]
    fn test_parse_if_elif_else() {
        let nodes =
            parse_source("{% if a %}1{% elif b %}2{% elif c %}3{% else %}4{% endif %}")
                .unwrap();
        assert_eq!(nodes.len(), 1);
        match &nodes.nodes()[0] {
            Node::If(node) => {
                assert_eq!(node.elifs.len(), 2);
                assert!(node.else_body.is_some());
            }
            other => panic!("expected if node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_with_else() {
        let nodes = parse_source("{% for x in items %}{{ x }}{% else %}none{% endfor %}")
            .unwrap();
        match &nodes.nodes()[0] {
            Node::For(node) => {
                assert_eq!(node.loopvars, ["x"]);
                assert!(node.else_body.is_some());
            }
            other => panic!("expected for node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_multiple_vars() {
        let nodes = parse_source("{% for k, v in entries %}x{% endfor %}").unwrap();
        match &nodes.nodes()[0] {
            Node::For(node) => assert_eq!(node.loopvars, ["k", "v"]),
            other => panic!("expected for node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_invalid_loop_variable() {
        let message = syntax_message(parse_source("{% for 1x in items %}a{% endfor %}"));
        assert!(message.contains("invalid loop variable '1x'"), "{message}");
    }

    #[test]
    fn test_parse_for_missing_in() {
        let message = syntax_message(parse_source("{% for x items %}a{% endfor %}"));
        assert!(message.contains("expects 'in'"), "{message}");
    }

    #[test]
    fn test_unclosed_if_names_expected_tags() {
        let message = syntax_message(parse_source("{% if x %}body"));
        assert!(message.contains("endif"), "{message}");
        assert!(message.contains("if x"), "{message}");
    }

    #[test]
    fn test_unexpected_closing_tag() {
        let message = syntax_message(parse_source("text {% endif %}"));
        assert!(message.contains("unexpected closing tag"), "{message}");
    }

    #[test]
    fn test_unexpected_closing_reports_innermost_open() {
        let message = syntax_message(parse_source("{% if x %}{% endfor %}"));
        // endfor is not a stop word for if bodies and not a known tag
        assert!(message.contains("endfor"), "{message}");
        assert!(message.contains("still open"), "{message}");
    }

    #[test]
    fn test_unknown_tag() {
        let message = syntax_message(parse_source("{% frobnicate x %}"));
        assert!(message.contains("unknown tag"), "{message}");
        assert!(message.contains("frobnicate"), "{message}");
    }

    #[test]
    fn test_empty_tag() {
        let message = syntax_message(parse_source("{%  %}"));
        assert!(message.contains("empty tag"), "{message}");
    }

    #[test]
    fn test_parse_filter_tag() {
        let nodes = parse_source("{% filter upper, trim %}x{% end %}").unwrap();
        match &nodes.nodes()[0] {
            Node::Filter(node) => assert_eq!(node.filters, ["upper", "trim"]),
            other => panic!("expected filter node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_filter_rejects_non_identifier() {
        let message = syntax_message(parse_source("{% filter up per %}x{% end %}"));
        assert!(message.contains("identifier"), "{message}");
    }

    #[test]
    fn test_parse_set() {
        let nodes = parse_source("{% set a = 1, b = name %}").unwrap();
        match &nodes.nodes()[0] {
            Node::Set(node) => {
                assert_eq!(node.assignments.len(), 2);
                assert_eq!(node.assignments[0].0, "a");
                assert_eq!(node.assignments[1].0, "b");
            }
            other => panic!("expected set node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_set_quoted_comma() {
        let nodes = parse_source("{% set a = 'x,y' %}").unwrap();
        match &nodes.nodes()[0] {
            Node::Set(node) => assert_eq!(node.assignments.len(), 1),
            other => panic!("expected set node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_block_modes() {
        let replace = parse_source("{% block title %}x{% endblock %}").unwrap();
        let append = parse_source("{% block title super %}x{% endblock %}").unwrap();
        let prepend = parse_source("{% block title %}x{% endblock super %}").unwrap();
        let mode = |nodes: &NodeList| match &nodes.nodes()[0] {
            Node::Block(node) => node.mode,
            other => panic!("expected block node, got {:?}", other),
        };
        assert_eq!(mode(&replace), BlockMode::Replace);
        assert_eq!(mode(&append), BlockMode::AppendAfterParent);
        assert_eq!(mode(&prepend), BlockMode::PrependBeforeParent);
    }

    #[test]
    fn test_parse_block_double_super_rejected() {
        let message =
            syntax_message(parse_source("{% block title super %}x{% endblock super %}"));
        assert!(message.contains("both its opening and closing"), "{message}");
    }

    #[test]
    fn test_parse_extends_consumes_rest() {
        let nodes = parse_source("{% extends \"base.html\" %}{% block a %}x{% endblock %}")
            .unwrap();
        assert_eq!(nodes.len(), 1);
        match &nodes.nodes()[0] {
            Node::Extend(node) => assert_eq!(node.body.len(), 1),
            other => panic!("expected extend node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_extends_requires_one_argument() {
        let message = syntax_message(parse_source("{% extends %}"));
        assert!(message.contains("empty tag") || message.contains("one argument"));
        let message = syntax_message(parse_source("{% extends a b %}"));
        assert!(message.contains("exactly one argument"), "{message}");
    }

    #[test]
    fn test_custom_tag_dispatch() {
        use crate::context::Context;
        use crate::env::Environment;
        use crate::nodes::CustomNode;

        #[derive(Debug)]
        struct Shout(String);
        impl CustomNode for Shout {
            fn render(
                &self,
                _ctx: &mut Context,
                _env: &Environment,
            ) -> Result<String, TemplateError> {
                Ok(self.0.to_uppercase())
            }
        }

        let shout: TagParser = Arc::new(|parser: &mut Parser| {
            let token = parser.take_tag()?;
            let (_, args) = split_tag(&token)?;
            Ok(Node::Custom(Arc::new(Shout(args))))
        });
        let mut tags = HashMap::new();
        tags.insert("shout".to_string(), shout);

        let nodes = Parser::new(tokenize("{% shout hello %}"))
            .with_tags(tags)
            .parse()
            .unwrap();
        let mut ctx = Context::new();
        let env = Environment::new();
        assert_eq!(nodes.render(&mut ctx, &env).unwrap(), "HELLO");
    }

    #[test]
    fn test_find_keyword() {
        assert_eq!(find_keyword("x in items", "in"), Some(2));
        assert_eq!(find_keyword("index in items", "in"), Some(6));
        assert_eq!(find_keyword("x items", "in"), None);
    }
}
