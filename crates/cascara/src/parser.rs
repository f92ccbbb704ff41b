use crate::diagnostics::SessionRef;
use crate::lexer::Lexer;
use crate::node::{Node, NodeId, NodeType, Tree};

/// Recursive-descent consumer of the lexer, producing the node tree the
/// compiler rewrites. The grammar stays deliberately shallow: everything
/// between two `;` (or up to a `{}`-block) becomes one COMPONENT_VALUE whose
/// classification happens later, in the compiler.
pub struct Parser<'t> {
    tree: &'t mut Tree,
    lexer: Lexer,
    current: Node,
    session: SessionRef,
}

impl<'t> Parser<'t> {
    pub fn new(tree: &'t mut Tree, input: &str, filename: &str, session: &SessionRef) -> Self {
        let mut lexer = Lexer::new(input, filename, session);
        let current = lexer.next_token();
        Parser {
            tree,
            lexer,
            current,
            session: SessionRef::clone(session),
        }
    }

    fn next(&mut self) {
        self.current = self.lexer.next_token();
    }

    /// Consumes the current token into the tree and advances.
    fn take(&mut self) -> NodeId {
        let token = std::mem::replace(&mut self.current, self.lexer.next_token());
        self.tree.add(token)
    }

    /// Parses a whole stylesheet into a LIST node. CDO/CDC tokens are valid
    /// only here and are dropped.
    pub fn stylesheet(&mut self) -> NodeId {
        let root = self.tree.add_typed(NodeType::List, self.current.pos.clone());
        loop {
            match self.current.node_type {
                NodeType::Eof => break,
                NodeType::Whitespace | NodeType::Cdo | NodeType::Cdc => self.next(),
                NodeType::Comment => {
                    let comment = self.take();
                    self.tree.append_child(root, comment);
                }
                NodeType::CloseCurlybracket => {
                    self.session
                        .error(&self.current.pos, "unexpected '}' at the top level");
                    self.next();
                }
                NodeType::AtKeyword => {
                    let at = self.at_keyword();
                    self.tree.append_child(root, at);
                }
                _ => {
                    let component = self.component_value();
                    if self.tree.child_count(component) > 0 {
                        self.tree.append_child(root, component);
                    }
                }
            }
        }
        root
    }

    /// One component value: tokens up to a `;` (consumed, not kept) or up to
    /// and including a `{}`-block, which always ends the component value.
    fn component_value(&mut self) -> NodeId {
        let component = self
            .tree
            .add_typed(NodeType::ComponentValue, self.current.pos.clone());
        loop {
            match self.current.node_type {
                NodeType::Eof | NodeType::CloseCurlybracket => break,
                NodeType::Semicolon => {
                    self.next();
                    break;
                }
                NodeType::OpenCurlybracket => {
                    self.trim_trailing_whitespace(component);
                    let block = self.block();
                    self.tree.append_child(component, block);
                    break;
                }
                NodeType::Whitespace => {
                    if self.tree.child_count(component) == 0 {
                        self.next();
                    } else {
                        let whitespace = self.take();
                        self.tree.append_child(component, whitespace);
                    }
                }
                _ => {
                    if let Some(term) = self.term() {
                        self.tree.append_child(component, term);
                    }
                }
            }
        }
        self.trim_trailing_whitespace(component);
        component
    }

    /// A single term inside a component value; brackets, parenthesis and
    /// functions nest recursively.
    fn term(&mut self) -> Option<NodeId> {
        match self.current.node_type {
            NodeType::OpenParenthesis => {
                let group = self.take();
                self.group_contents(group, "parenthesis");
                Some(group)
            }
            NodeType::OpenSquarebracket => {
                let group = self.take();
                self.square_contents(group);
                Some(group)
            }
            NodeType::Function | NodeType::VariableFunction => {
                let function = self.take();
                self.group_contents(function, "function call");
                Some(function)
            }
            NodeType::CloseParenthesis | NodeType::CloseSquarebracket => {
                self.session.error(
                    &self.current.pos,
                    "unexpected closing bracket without a matching opening one",
                );
                self.next();
                None
            }
            _ => Some(self.take()),
        }
    }

    /// Children of a `(...)` group or function call, ending at `)`.
    fn group_contents(&mut self, group: NodeId, what: &str) {
        loop {
            match self.current.node_type {
                NodeType::Eof => {
                    self.session.error(
                        &self.current.pos,
                        &format!("a {what} was not closed before the end of the input"),
                    );
                    break;
                }
                NodeType::CloseParenthesis => {
                    self.next();
                    break;
                }
                NodeType::Whitespace => {
                    if self.tree.child_count(group) == 0 {
                        self.next();
                    } else {
                        let whitespace = self.take();
                        self.tree.append_child(group, whitespace);
                    }
                }
                NodeType::OpenCurlybracket => {
                    let block = self.block();
                    self.tree.append_child(group, block);
                }
                _ => {
                    if let Some(term) = self.term() {
                        self.tree.append_child(group, term);
                    }
                }
            }
        }
        self.trim_trailing_whitespace(group);
    }

    /// Children of a `[...]` group, ending at `]`.
    fn square_contents(&mut self, group: NodeId) {
        loop {
            match self.current.node_type {
                NodeType::Eof => {
                    self.session.error(
                        &self.current.pos,
                        "a '[' was not closed before the end of the input",
                    );
                    break;
                }
                NodeType::CloseSquarebracket => {
                    self.next();
                    break;
                }
                NodeType::Whitespace => {
                    if self.tree.child_count(group) == 0 {
                        self.next();
                    } else {
                        let whitespace = self.take();
                        self.tree.append_child(group, whitespace);
                    }
                }
                _ => {
                    if let Some(term) = self.term() {
                        self.tree.append_child(group, term);
                    }
                }
            }
        }
        self.trim_trailing_whitespace(group);
    }

    /// A `{}`-block; its items parse like a small stylesheet.
    fn block(&mut self) -> NodeId {
        let block = self.take();
        loop {
            match self.current.node_type {
                NodeType::Eof => {
                    self.session.error(
                        &self.current.pos,
                        "a block was not closed before the end of the input",
                    );
                    break;
                }
                NodeType::CloseCurlybracket => {
                    self.next();
                    break;
                }
                NodeType::Whitespace => self.next(),
                NodeType::Comment => {
                    let comment = self.take();
                    self.tree.append_child(block, comment);
                }
                NodeType::AtKeyword => {
                    let at = self.at_keyword();
                    self.tree.append_child(block, at);
                }
                _ => {
                    let component = self.component_value();
                    if self.tree.child_count(component) > 0 {
                        self.tree.append_child(block, component);
                    }
                }
            }
        }
        block
    }

    /// An at-rule: `@name` plus its prelude, ended by `;` or a block.
    fn at_keyword(&mut self) -> NodeId {
        let at = self.take();
        loop {
            match self.current.node_type {
                NodeType::Eof | NodeType::CloseCurlybracket => break,
                NodeType::Semicolon => {
                    self.next();
                    break;
                }
                NodeType::OpenCurlybracket => {
                    self.trim_trailing_whitespace(at);
                    let block = self.block();
                    self.tree.append_child(at, block);
                    break;
                }
                NodeType::Whitespace => {
                    if self.tree.child_count(at) == 0 {
                        self.next();
                    } else {
                        let whitespace = self.take();
                        self.tree.append_child(at, whitespace);
                    }
                }
                _ => {
                    if let Some(term) = self.term() {
                        self.tree.append_child(at, term);
                    }
                }
            }
        }
        self.trim_trailing_whitespace(at);
        at
    }

    fn trim_trailing_whitespace(&mut self, node: NodeId) {
        while self.tree.child_count(node) > 0 {
            let last = self.tree.child(node, self.tree.child_count(node) - 1);
            if !self.tree.node(last).is(NodeType::Whitespace) {
                break;
            }
            self.tree.remove_child(node, self.tree.child_count(node) - 1);
        }
    }
}

/// Regroups the children of `list` into ARG nodes split on `separator`
/// tokens (whitespace around separators is dropped, a trailing block is left
/// in place after the arguments). Returns false when an argument is empty.
pub fn argify(
    tree: &mut Tree,
    list: NodeId,
    separator: NodeType,
    session: &SessionRef,
) -> bool {
    let mut children = std::mem::take(&mut tree.node_mut(list).children);
    let block = match children.last() {
        Some(&last) if tree.node(last).is(NodeType::OpenCurlybracket) => children.pop(),
        _ => None,
    };
    if children.is_empty() {
        // Nothing to argify; put the block back untouched.
        if let Some(block) = block {
            tree.append_child(list, block);
        }
        return true;
    }

    let pos = tree.node(children[0]).pos.clone();
    let mut args: Vec<NodeId> = Vec::new();
    let mut current = tree.add_typed(NodeType::Arg, pos);
    let mut ok = true;
    for child in children {
        if tree.node(child).node_type == separator {
            if tree.child_count(current) == 0 {
                session.error(
                    &tree.node(child).pos,
                    "dangling separator or empty argument in a list of arguments",
                );
                ok = false;
            }
            args.push(current);
            current = tree.add_typed(NodeType::Arg, tree.node(child).pos.clone());
            continue;
        }
        if tree.node(child).is(NodeType::Whitespace)
            && tree.child_count(current) == 0
        {
            continue;
        }
        tree.append_child(current, child);
    }
    if tree.child_count(current) == 0 {
        let pos = tree.node(list).pos.clone();
        session.error(&pos, "dangling separator at the end of a list of arguments");
        ok = false;
    }
    args.push(current);

    for arg in &args {
        trim_whitespace(tree, *arg);
    }
    tree.node_mut(list).children = args;
    if let Some(block) = block {
        tree.append_child(list, block);
    }
    ok
}

fn trim_whitespace(tree: &mut Tree, node: NodeId) {
    while tree.child_count(node) > 0 {
        let last = tree.child(node, tree.child_count(node) - 1);
        if !tree.node(last).is(NodeType::Whitespace) {
            break;
        }
        tree.remove_child(node, tree.child_count(node) - 1);
    }
    while tree.child_count(node) > 0 {
        let first = tree.child(node, 0);
        if !tree.node(first).is(NodeType::Whitespace) {
            break;
        }
        tree.remove_child(node, 0);
    }
}

/// True when the component value is a variable assignment
/// (`$name: ...` or `$name(args): ...`); with `with_block` the assigned
/// value must be a `{}`-block.
pub fn is_variable_set(tree: &Tree, component: NodeId, with_block: bool) -> bool {
    if !tree.node(component).is(NodeType::ComponentValue) {
        return false;
    }
    let children = tree.children(component);
    if children.is_empty() {
        return false;
    }
    let first = tree.node(children[0]);
    if !first.is(NodeType::Variable) && !first.is(NodeType::VariableFunction) {
        return false;
    }
    let mut index = 1;
    if index < children.len() && tree.node(children[index]).is(NodeType::Whitespace) {
        index += 1;
    }
    if index >= children.len() || !tree.node(children[index]).is(NodeType::Colon) {
        return false;
    }
    if with_block {
        let last = children[children.len() - 1];
        return tree.node(last).is(NodeType::OpenCurlybracket);
    }
    true
}

/// True when the component value is a nested declaration
/// (`field: { sub-declarations }`): identifier, colon, then directly the
/// block. A pseudo-class selector (`a:hover { ... }`) has terms between the
/// colon and the block and does not match.
pub fn is_nested_declaration(tree: &Tree, component: NodeId) -> bool {
    if !tree.node(component).is(NodeType::ComponentValue) {
        return false;
    }
    let children = tree.children(component);
    if children.len() < 3 {
        return false;
    }
    if !tree.node(children[0]).is(NodeType::Identifier) {
        return false;
    }
    let mut index = 1;
    if tree.node(children[index]).is(NodeType::Whitespace) {
        index += 1;
    }
    if index >= children.len() || !tree.node(children[index]).is(NodeType::Colon) {
        return false;
    }
    index += 1;
    if index < children.len() && tree.node(children[index]).is(NodeType::Whitespace) {
        index += 1;
    }
    index == children.len() - 1 && tree.node(children[index]).is(NodeType::OpenCurlybracket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Session;

    fn parse(src: &str) -> (Tree, NodeId, SessionRef) {
        let session = Session::new();
        let mut tree = Tree::new();
        let root = Parser::new(&mut tree, src, "test.scss", &session).stylesheet();
        (tree, root, session)
    }

    #[test]
    fn rule_becomes_component_value_with_block() {
        let (tree, root, session) = parse("div { color: red; }");
        assert_eq!(session.error_count(), 0);
        assert_eq!(tree.child_count(root), 1);
        let rule = tree.child(root, 0);
        assert!(tree.node(rule).is(NodeType::ComponentValue));
        let children = tree.children(rule);
        assert!(tree.node(children[0]).is(NodeType::Identifier));
        assert_eq!(tree.node(children[0]).string, "div");
        let block = *children.last().unwrap();
        assert!(tree.node(block).is(NodeType::OpenCurlybracket));
        assert_eq!(tree.child_count(block), 1);
        let declaration = tree.child(block, 0);
        let parts: Vec<NodeType> = tree
            .children(declaration)
            .iter()
            .map(|&id| tree.node(id).node_type)
            .collect();
        assert_eq!(
            parts,
            vec![
                NodeType::Identifier,
                NodeType::Colon,
                NodeType::Whitespace,
                NodeType::Identifier,
            ]
        );
    }

    #[test]
    fn semicolons_split_component_values() {
        let (tree, root, _) = parse("a { color: red; width: 10px }");
        let rule = tree.child(root, 0);
        let block = tree.child(rule, tree.child_count(rule) - 1);
        assert_eq!(tree.child_count(block), 2);
    }

    #[test]
    fn cdo_cdc_dropped_at_top_level() {
        let (tree, root, session) = parse("<!-- div { color: red } -->");
        assert_eq!(session.error_count(), 0);
        assert_eq!(tree.child_count(root), 1);
        assert!(tree.node(tree.child(root, 0)).is(NodeType::ComponentValue));
    }

    #[test]
    fn at_keyword_with_prelude_and_block() {
        let (tree, root, _) = parse("@media screen { a { b: c } }");
        let at = tree.child(root, 0);
        assert!(tree.node(at).is(NodeType::AtKeyword));
        assert_eq!(tree.node(at).string, "media");
        let children = tree.children(at);
        assert!(tree.node(children[0]).is(NodeType::Identifier));
        let block = *children.last().unwrap();
        assert!(tree.node(block).is(NodeType::OpenCurlybracket));
        assert_eq!(tree.child_count(block), 1);
    }

    #[test]
    fn at_keyword_without_block_ends_at_semicolon() {
        let (tree, root, _) = parse("@import \"file\"; div{a:b}");
        assert_eq!(tree.child_count(root), 2);
        let at = tree.child(root, 0);
        assert!(tree.node(at).is(NodeType::AtKeyword));
        let children = tree.children(at);
        assert_eq!(children.len(), 1);
        assert!(tree.node(children[0]).is(NodeType::String));
    }

    #[test]
    fn functions_nest_their_arguments() {
        let (tree, root, session) = parse("a { b: rgba(0, 0, 0, 0.5) }");
        assert_eq!(session.error_count(), 0);
        let rule = tree.child(root, 0);
        let block = tree.child(rule, tree.child_count(rule) - 1);
        let declaration = tree.child(block, 0);
        let children = tree.children(declaration);
        let function = *children.last().unwrap();
        assert!(tree.node(function).is(NodeType::Function));
        assert_eq!(tree.node(function).string, "rgba");
        assert!(tree.child_count(function) > 0);
    }

    #[test]
    fn unclosed_block_reports() {
        let (_, _, session) = parse("div { color: red;");
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn stray_close_bracket_reports_and_recovers() {
        let (tree, root, session) = parse("] div { a: b }");
        assert!(session.error_count() >= 1);
        assert!(tree.child_count(root) >= 1);
    }

    #[test]
    fn argify_splits_on_commas() {
        let (mut tree, root, session) = parse("a, b c, d { e: f }");
        let rule = tree.child(root, 0);
        assert!(argify(&mut tree, rule, NodeType::Comma, &session));
        let children = tree.children(rule).to_vec();
        assert_eq!(children.len(), 4);
        assert!(tree.node(children[0]).is(NodeType::Arg));
        assert!(tree.node(children[1]).is(NodeType::Arg));
        assert!(tree.node(children[2]).is(NodeType::Arg));
        assert!(tree.node(children[3]).is(NodeType::OpenCurlybracket));
        assert_eq!(tree.child_count(children[0]), 1);
        assert_eq!(tree.child_count(children[1]), 3);
        assert_eq!(tree.child_count(children[2]), 1);
    }

    #[test]
    fn argify_rejects_empty_arguments() {
        let (mut tree, root, session) = parse("a,, b { c: d }");
        let rule = tree.child(root, 0);
        assert!(!argify(&mut tree, rule, NodeType::Comma, &session));
        assert!(session.error_count() >= 1);
    }

    #[test]
    fn detects_variable_set() {
        let (tree, root, _) = parse("$width: 300px;");
        let component = tree.child(root, 0);
        assert!(is_variable_set(&tree, component, false));
        assert!(!is_variable_set(&tree, component, true));

        let (tree, root, _) = parse("$theme: { color: red };");
        let component = tree.child(root, 0);
        assert!(is_variable_set(&tree, component, true));

        let (tree, root, _) = parse("div { a: b }");
        let component = tree.child(root, 0);
        assert!(!is_variable_set(&tree, component, false));
    }

    #[test]
    fn detects_nested_declaration() {
        let (tree, root, _) = parse("a { font: { family: serif; } }");
        let rule = tree.child(root, 0);
        let block = tree.child(rule, tree.child_count(rule) - 1);
        let nested = tree.child(block, 0);
        assert!(is_nested_declaration(&tree, nested));
    }

    #[test]
    fn pseudo_class_rule_is_not_a_nested_declaration() {
        let (tree, root, _) = parse("div { a:hover { b: c } }");
        let rule = tree.child(root, 0);
        let block = tree.child(rule, tree.child_count(rule) - 1);
        let inner = tree.child(block, 0);
        assert!(!is_nested_declaration(&tree, inner));
    }
}
