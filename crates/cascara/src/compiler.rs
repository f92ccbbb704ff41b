use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::diagnostics::{Position, SessionRef};
use crate::expression::{self, Expression, VariableHandler};
use crate::node::{Node, NodeId, NodeType, Tree};
use crate::parser::{self, Parser};

mod selectors;
#[cfg(test)]
mod tests;

const ACCEPTS_VARS: &str = "accepts_vars";

/// Limits runaway substitution loops (`$x: $x;`) that would otherwise spin
/// forever; imports have their own visited-set guard.
const SUBSTITUTION_FUEL: usize = 10_000;

/// The part of the compiler the expression evaluator talks to: the scope
/// stack, the global root and the undefined-variable policy.
pub struct CompilerState {
    root: NodeId,
    /// Live stack of enclosing variable-accepting `{}`-scopes, innermost
    /// last. Empty between passes.
    scopes: Vec<NodeId>,
    /// Parameter frames while a user function body is being evaluated.
    locals: Vec<HashMap<String, NodeId>>,
    empty_on_undefined_variable: bool,
}

impl CompilerState {
    /// Walks the scope stack innermost first, then the root's globals.
    /// Returns the binding LIST `[name-node, value-node]`.
    fn lookup(&self, tree: &Tree, name: &str) -> Option<NodeId> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = tree.get_variable(*scope, name) {
                return Some(binding);
            }
        }
        tree.get_variable(self.root, name)
    }

    fn binding_is_function(tree: &Tree, binding: NodeId) -> bool {
        let name_node = tree.child(binding, 0);
        matches!(
            tree.node_type(name_node),
            NodeType::Function | NodeType::VariableFunction
        )
    }
}

impl VariableHandler for CompilerState {
    fn get_variable(&mut self, tree: &mut Tree, name: &str, _pos: &Position) -> Option<NodeId> {
        for frame in self.locals.iter().rev() {
            if let Some(&value) = frame.get(name) {
                return Some(tree.deep_clone(value));
            }
        }
        let binding = self.lookup(tree, name)?;
        if Self::binding_is_function(tree, binding) {
            return None;
        }
        let value = tree.child(binding, 1);
        Some(tree.deep_clone(value))
    }

    fn execute_user_function(
        &mut self,
        tree: &mut Tree,
        session: &SessionRef,
        call: NodeId,
    ) -> Option<NodeId> {
        let name = tree.node(call).string.clone();
        let pos = tree.node(call).pos.clone();
        let binding = self.lookup(tree, &name)?;
        let name_node = tree.child(binding, 0);
        let value = tree.child(binding, 1);

        if !Self::binding_is_function(tree, binding) {
            // A value variable invoked with parenthesis; arguments ignored.
            return Some(tree.deep_clone(value));
        }
        if tree.node(value).is(NodeType::OpenCurlybracket) {
            session.error(
                &pos,
                &format!("function \"{name}\" expands to a block and cannot be used in an expression"),
            );
            return None;
        }

        if !parser::argify(tree, call, NodeType::Comma, session) {
            return None;
        }
        let params = tree.children(name_node).to_vec();
        let args = tree.children(call).to_vec();
        let mut frame: HashMap<String, NodeId> = HashMap::new();
        for (index, param) in params.iter().enumerate() {
            let param_children = tree.children(*param).to_vec();
            let param_name = tree.node(param_children[0]).string.clone();
            let bound = match args.get(index) {
                Some(&arg) if tree.child_count(arg) > 0 => {
                    let values = tree.children(arg).to_vec();
                    clone_values(tree, &values, &pos)
                }
                _ => match default_value(tree, &param_children) {
                    Some(default) => default,
                    None => {
                        session.error(
                            &pos,
                            &format!(
                                "missing argument ${param_name} in call to function \"{name}\""
                            ),
                        );
                        return None;
                    }
                },
            };
            frame.insert(param_name, bound);
        }

        let body: Vec<NodeId> = match tree.node_type(value) {
            NodeType::List => tree
                .children(value)
                .to_vec()
                .into_iter()
                .map(|child| tree.deep_clone(child))
                .collect(),
            _ => vec![tree.deep_clone(value)],
        };
        self.locals.push(frame);
        let result = Expression::new(tree, body, session, &mut *self).compile();
        self.locals.pop();
        result
    }

    fn empty_on_undefined_variable(&self) -> bool {
        self.empty_on_undefined_variable
    }
}

/// Clones a list of value tokens into a single node (wrapping several
/// tokens in a LIST).
fn clone_values(tree: &mut Tree, values: &[NodeId], pos: &Position) -> NodeId {
    if values.len() == 1 {
        return tree.deep_clone(values[0]);
    }
    let list = tree.add_typed(NodeType::List, pos.clone());
    for &value in values {
        let clone = tree.deep_clone(value);
        tree.append_child(list, clone);
    }
    list
}

/// Default value of a parameter ARG (`$param: default`), if declared.
fn default_value(tree: &mut Tree, param_children: &[NodeId]) -> Option<NodeId> {
    let colon = param_children
        .iter()
        .position(|&id| tree.node(id).is(NodeType::Colon))?;
    let defaults: Vec<NodeId> = param_children[colon + 1..]
        .iter()
        .copied()
        .filter(|&id| !tree.node(id).is(NodeType::Whitespace))
        .collect();
    if defaults.is_empty() {
        return None;
    }
    let pos = tree.node(defaults[0]).pos.clone();
    Some(clone_values(tree, &defaults, &pos))
}

/// The tree-rewriting compiler. Passes run strictly in order over the whole
/// tree; the scope stack is empty before and after each one.
pub struct Compiler {
    tree: Tree,
    root: NodeId,
    state: CompilerState,
    session: SessionRef,
    search_paths: Vec<PathBuf>,
    imported: HashSet<PathBuf>,
}

impl Compiler {
    pub fn new(tree: Tree, root: NodeId, session: &SessionRef) -> Self {
        let state = CompilerState {
            root,
            scopes: Vec::new(),
            locals: Vec::new(),
            empty_on_undefined_variable: false,
        };
        Compiler {
            tree,
            root,
            state,
            session: SessionRef::clone(session),
            search_paths: Vec::new(),
            imported: HashSet::new(),
        }
    }

    pub fn set_empty_on_undefined_variable(&mut self, empty: bool) {
        self.state.empty_on_undefined_variable = empty;
    }

    pub fn clear_paths(&mut self) {
        self.search_paths.clear();
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn into_tree(self) -> (Tree, NodeId) {
        (self.tree, self.root)
    }

    pub fn compile(&mut self) {
        self.mark_selectors(self.root);
        self.replace_variables(self.root);
        debug_assert!(
            self.state.scopes.is_empty(),
            "cascara internal error: scope stack not empty between passes"
        );
        self.compile_components(self.root);
        self.remove_empty_rules(self.root);
        self.expand_nested_components(self.root);
    }

    // ----- pass 1: mark variable-accepting scopes -----

    /// Marks every `{}`-block that directly follows a selector list (not an
    /// at-rule, not a variable assignment) as a variable-accepting scope.
    fn mark_selectors(&mut self, parent: NodeId) {
        for child in self.tree.children(parent).to_vec() {
            match self.tree.node_type(child) {
                NodeType::ComponentValue => {
                    let count = self.tree.child_count(child);
                    if count < 2 {
                        continue;
                    }
                    let block = self.tree.child(child, count - 1);
                    if !self.tree.node(block).is(NodeType::OpenCurlybracket) {
                        continue;
                    }
                    let first = self.tree.child(child, 0);
                    if !matches!(
                        self.tree.node_type(first),
                        NodeType::Variable | NodeType::VariableFunction
                    ) {
                        self.tree.node_mut(block).add_flag(ACCEPTS_VARS);
                    }
                    self.mark_selectors(block);
                }
                NodeType::AtKeyword | NodeType::OpenCurlybracket => {
                    self.mark_selectors(child);
                }
                _ => {}
            }
        }
    }

    // ----- pass 2: variable substitution and at-keyword control flow -----

    fn replace_variables(&mut self, parent: NodeId) {
        let mut fuel = SUBSTITUTION_FUEL;
        let mut index = 0;
        while index < self.tree.child_count(parent) {
            if fuel == 0 {
                let pos = self.tree.node(parent).pos.clone();
                self.session
                    .error(&pos, "giving up on a circular variable substitution");
                break;
            }
            fuel -= 1;
            let child = self.tree.child(parent, index);
            match self.tree.node_type(child) {
                NodeType::Variable => {
                    self.substitute_variable(parent, index);
                }
                NodeType::VariableFunction => {
                    // Arguments resolve in the caller's scope first.
                    self.replace_variables(child);
                    self.substitute_function(parent, index);
                }
                NodeType::AtKeyword => {
                    if self.replace_at_keyword(parent, index) {
                        index += 1;
                    }
                }
                NodeType::ComponentValue => {
                    if parser::is_variable_set(&self.tree, child, false) {
                        self.set_variable(child);
                        self.tree.remove_child(parent, index);
                        continue;
                    }
                    if self.expand_statement_variable(parent, index) {
                        continue;
                    }
                    self.replace_variables(child);
                    index += 1;
                }
                NodeType::OpenCurlybracket => {
                    let scoped = self.tree.node(child).has_flag(ACCEPTS_VARS);
                    if scoped {
                        self.state.scopes.push(child);
                    }
                    self.replace_variables(child);
                    if scoped {
                        self.state.scopes.pop();
                    }
                    index += 1;
                }
                NodeType::Function
                | NodeType::OpenParenthesis
                | NodeType::OpenSquarebracket
                | NodeType::Arg
                | NodeType::List => {
                    self.replace_variables(child);
                    index += 1;
                }
                _ => index += 1,
            }
        }
    }

    /// `$name` used inline among other tokens: the bound value replaces the
    /// token. The substituted tokens are processed again, so variables can
    /// reference variables.
    fn substitute_variable(&mut self, parent: NodeId, index: usize) {
        let child = self.tree.child(parent, index);
        let name = self.tree.node(child).string.clone();
        let pos = self.tree.node(child).pos.clone();
        let Some(binding) = self.state.lookup(&self.tree, &name) else {
            if !self.state.empty_on_undefined_variable {
                self.session
                    .error(&pos, &format!("variable named \"{name}\" is not set"));
            }
            self.tree.remove_child(parent, index);
            return;
        };
        if CompilerState::binding_is_function(&self.tree, binding) {
            self.session.error(
                &pos,
                &format!("variable named \"{name}\" is a function, parenthesis are required"),
            );
            self.tree.remove_child(parent, index);
            return;
        }
        let value = self.tree.child(binding, 1);
        match self.tree.node_type(value) {
            NodeType::OpenCurlybracket => {
                self.session.error(
                    &pos,
                    &format!("variable named \"{name}\" holds a block and cannot be used inline"),
                );
                self.tree.remove_child(parent, index);
            }
            NodeType::List => {
                let clone = self.tree.deep_clone(value);
                let tokens = self.tree.children(clone).to_vec();
                self.tree.splice_children(parent, index, tokens);
            }
            _ => {
                let clone = self.tree.deep_clone(value);
                self.tree.replace_child(parent, index, clone);
            }
        }
    }

    /// `$name(args)` used inline: expands through a nested compilation and
    /// splices the resulting tokens.
    fn substitute_function(&mut self, parent: NodeId, index: usize) {
        let call = self.tree.child(parent, index);
        let name = self.tree.node(call).string.clone();
        let pos = self.tree.node(call).pos.clone();
        let Some(binding) = self.state.lookup(&self.tree, &name) else {
            if !self.state.empty_on_undefined_variable {
                self.session
                    .error(&pos, &format!("variable named \"{name}\" is not set"));
            }
            self.tree.remove_child(parent, index);
            return;
        };
        match self.expand_call(binding, Some(call), &pos) {
            Some(content) => {
                self.tree.splice_children(parent, index, content);
            }
            None => {
                self.tree.remove_child(parent, index);
            }
        }
    }

    /// A component value holding nothing but `$name` or `$name(args)` whose
    /// binding is a block (or a function): the whole statement is replaced
    /// by the expanded content.
    fn expand_statement_variable(&mut self, parent: NodeId, index: usize) -> bool {
        let component = self.tree.child(parent, index);
        if self.tree.child_count(component) != 1 {
            return false;
        }
        let only = self.tree.child(component, 0);
        let node_type = self.tree.node_type(only);
        if !matches!(node_type, NodeType::Variable | NodeType::VariableFunction) {
            return false;
        }
        let name = self.tree.node(only).string.clone();
        let pos = self.tree.node(only).pos.clone();
        let Some(binding) = self.state.lookup(&self.tree, &name) else {
            if !self.state.empty_on_undefined_variable {
                self.session
                    .error(&pos, &format!("variable named \"{name}\" is not set"));
            }
            self.tree.remove_child(parent, index);
            return true;
        };
        let is_function = CompilerState::binding_is_function(&self.tree, binding);
        let value = self.tree.child(binding, 1);
        let is_block = self.tree.node(value).is(NodeType::OpenCurlybracket);
        if !is_function && !is_block {
            // A plain value; let the inline substitution handle it.
            return false;
        }
        let call = if node_type == NodeType::VariableFunction {
            self.replace_variables(only);
            Some(only)
        } else {
            None
        };
        match self.expand_call(binding, call, &pos) {
            Some(content) => {
                self.tree.splice_children(parent, index, content);
            }
            None => {
                self.tree.remove_child(parent, index);
            }
        }
        true
    }

    /// Expands a binding, optionally with a call carrying arguments, into a
    /// list of nodes ready to be spliced at the call site. Parameterized
    /// bindings compile inside a synthetic root holding the bound parameters
    /// plus a copy of the globals.
    fn expand_call(
        &mut self,
        binding: NodeId,
        call: Option<NodeId>,
        pos: &Position,
    ) -> Option<Vec<NodeId>> {
        let name_node = self.tree.child(binding, 0);
        let value = self.tree.child(binding, 1);
        let parameterized = CompilerState::binding_is_function(&self.tree, binding);

        if !parameterized {
            let clone = self.tree.deep_clone(value);
            return Some(match self.tree.node_type(clone) {
                NodeType::OpenCurlybracket | NodeType::List => {
                    let children = self.tree.children(clone).to_vec();
                    self.tree.clear_children(clone);
                    children
                }
                _ => vec![clone],
            });
        }

        let function_name = self.tree.node(name_node).string.clone();
        if let Some(call) = call {
            if !parser::argify(&mut self.tree, call, NodeType::Comma, &self.session) {
                return None;
            }
        }
        let synthetic = self.tree.add_typed(NodeType::List, pos.clone());

        // Bind each declared parameter to the caller's argument or to its
        // declared default; extra caller arguments are ignored per position.
        let params = self.tree.children(name_node).to_vec();
        let args: Vec<NodeId> = match call {
            Some(call) => self.tree.children(call).to_vec(),
            None => Vec::new(),
        };
        for (index, &param) in params.iter().enumerate() {
            let param_children = self.tree.children(param).to_vec();
            let param_name = self.tree.node(param_children[0]).string.clone();
            let bound = match args.get(index) {
                Some(&arg) if self.tree.child_count(arg) > 0 => {
                    let values = self.tree.children(arg).to_vec();
                    clone_values(&mut self.tree, &values, pos)
                }
                _ => match default_value(&mut self.tree, &param_children) {
                    Some(default) => default,
                    None => {
                        self.session.error(
                            pos,
                            &format!(
                                "missing argument ${param_name} in call to \"{function_name}\""
                            ),
                        );
                        return None;
                    }
                },
            };
            let name_clone = self.tree.deep_clone(param_children[0]);
            let binding_list = self.tree.add_typed(NodeType::List, pos.clone());
            self.tree.append_child(binding_list, name_clone);
            self.tree.append_child(binding_list, bound);
            self.tree.set_variable(synthetic, &param_name, binding_list);
        }

        // Globals are copied so the fragment cannot mutate the caller's
        // bindings across the invocation.
        let globals: Vec<(String, NodeId)> = self
            .tree
            .node(self.state.root)
            .variables
            .iter()
            .map(|(name, &binding)| (name.clone(), binding))
            .collect();
        for (global_name, global_binding) in globals {
            if self.tree.get_variable(synthetic, &global_name).is_none() {
                let clone = self.tree.deep_clone(global_binding);
                self.tree.set_variable(synthetic, &global_name, clone);
            }
        }

        match self.tree.node_type(value) {
            NodeType::OpenCurlybracket | NodeType::List => {
                for child in self.tree.children(value).to_vec() {
                    let clone = self.tree.deep_clone(child);
                    self.tree.append_child(synthetic, clone);
                }
            }
            _ => {
                let clone = self.tree.deep_clone(value);
                self.tree.append_child(synthetic, clone);
            }
        }

        self.compile_fragment(synthetic);
        let content = self.tree.children(synthetic).to_vec();
        self.tree.clear_children(synthetic);
        Some(content)
    }

    /// Runs the variable-substitution pass over a synthetic root with its
    /// own scope, leaving the enclosing state untouched.
    fn compile_fragment(&mut self, synthetic_root: NodeId) {
        let saved_root = self.state.root;
        let saved_scopes = std::mem::take(&mut self.state.scopes);
        self.state.root = synthetic_root;
        self.replace_variables(synthetic_root);
        self.state.root = saved_root;
        self.state.scopes = saved_scopes;
    }

    /// Stores a `$name: value` (or `$name(params): value`) assignment in the
    /// right scope, honoring `!global` and `!default`.
    fn set_variable(&mut self, component: NodeId) {
        let children = self.tree.children(component).to_vec();
        let name_node = children[0];
        let name = self.tree.node(name_node).string.clone();
        let pos = self.tree.node(name_node).pos.clone();

        let mut index = 1;
        while self.tree.node(children[index]).is(NodeType::Whitespace) {
            index += 1;
        }
        debug_assert!(
            self.tree.node(children[index]).is(NodeType::Colon),
            "cascara internal error: variable set without a colon"
        );
        index += 1;

        // Split off the !global / !default flags from the value tokens.
        let mut global = false;
        let mut default = false;
        let mut value_tokens: Vec<NodeId> = Vec::new();
        let mut iter = children[index..].iter().copied().peekable();
        while let Some(token) = iter.next() {
            if self.tree.node(token).is(NodeType::Exclamation) {
                let mut flag = iter.next();
                while flag.is_some_and(|id| self.tree.node(id).is(NodeType::Whitespace)) {
                    flag = iter.next();
                }
                let flag_name = flag.map(|id| self.tree.node(id).string.clone());
                match flag_name.as_deref() {
                    Some(word) if word.eq_ignore_ascii_case("global") => global = true,
                    Some(word) if word.eq_ignore_ascii_case("default") => default = true,
                    _ => {
                        self.session
                            .error(&pos, "unsupported flag on a variable assignment");
                    }
                }
                continue;
            }
            value_tokens.push(token);
        }
        while value_tokens
            .last()
            .is_some_and(|&id| self.tree.node(id).is(NodeType::Whitespace))
        {
            value_tokens.pop();
        }
        while value_tokens
            .first()
            .is_some_and(|&id| self.tree.node(id).is(NodeType::Whitespace))
        {
            value_tokens.remove(0);
        }
        if value_tokens.is_empty() {
            self.session
                .error(&pos, &format!("variable \"{name}\" is set to nothing"));
            return;
        }

        if default && self.state.lookup(&self.tree, &name).is_some() {
            return;
        }

        // A parameterized set argifies its parameter list.
        if self.tree.node(name_node).is(NodeType::VariableFunction) {
            parser::argify(&mut self.tree, name_node, NodeType::Comma, &self.session);
        }

        let value = if value_tokens.len() == 1 {
            value_tokens[0]
        } else {
            let list = self.tree.add_typed(NodeType::List, pos.clone());
            for token in value_tokens {
                self.tree.append_child(list, token);
            }
            list
        };

        let binding = self.tree.add_typed(NodeType::List, pos);
        self.tree.append_child(binding, name_node);
        self.tree.append_child(binding, value);
        // The binding took over the interesting children; the component
        // value must not keep aliases to them.
        self.tree.clear_children(component);

        let target = if global || self.state.scopes.is_empty() {
            self.state.root
        } else {
            *self.state.scopes.last().unwrap()
        };
        self.tree.set_variable(target, &name, binding);
    }

    /// Control-flow at-keywords. Returns true when the node stays in place
    /// and the caller should advance past it.
    fn replace_at_keyword(&mut self, parent: NodeId, index: usize) -> bool {
        let at = self.tree.child(parent, index);
        let name = self.tree.node(at).string.clone();
        match name.as_str() {
            "if" => {
                self.at_if(parent, index);
                false
            }
            "else" => {
                let pos = self.tree.node(at).pos.clone();
                self.session.error(
                    &pos,
                    "a standalone @else is not allowed, it must follow an @if or @else if",
                );
                self.tree.remove_child(parent, index);
                false
            }
            "import" => self.at_import(parent, index),
            "mixin" => {
                self.at_mixin(at);
                self.tree.remove_child(parent, index);
                false
            }
            "include" => {
                self.at_include(parent, index);
                false
            }
            "charset" => {
                self.at_charset(at);
                self.tree.remove_child(parent, index);
                false
            }
            "error" | "warning" | "info" | "message" | "debug" => {
                self.at_message(at, &name);
                self.tree.remove_child(parent, index);
                false
            }
            "keyframes" | "-webkit-keyframes" | "-o-keyframes" => {
                self.replace_variables(at);
                self.at_keyframes(at);
                true
            }
            _ => {
                // Unknown at-rules (@media, @supports, ...) keep their node;
                // variables inside still resolve.
                self.replace_variables(at);
                true
            }
        }
    }

    /// Evaluates the condition tokens of an @if / @else if node.
    fn evaluate_condition(&mut self, condition: Vec<NodeId>, pos: &Position) -> Option<bool> {
        if condition.is_empty() {
            self.session.error(pos, "@if must be followed by an expression");
            return None;
        }
        let session = SessionRef::clone(&self.session);
        let result =
            Expression::new(&mut self.tree, condition, &session, &mut self.state).compile()?;
        match expression::boolean(&self.tree, result) {
            Some(value) => Some(value),
            None => {
                self.session
                    .error(pos, "the expression of an @if must be a boolean");
                None
            }
        }
    }

    /// Splices the block contents of `at` in place of it; returns how many
    /// nodes were inserted.
    fn splice_block_contents(&mut self, parent: NodeId, index: usize, at: NodeId) -> usize {
        let count = self.tree.child_count(at);
        let block = self.tree.child(at, count - 1);
        let content = self.tree.children(block).to_vec();
        self.tree.clear_children(block);
        let inserted = content.len();
        self.tree.splice_children(parent, index, content);
        inserted
    }

    fn trailing_block(&self, at: NodeId) -> Option<NodeId> {
        let count = self.tree.child_count(at);
        if count == 0 {
            return None;
        }
        let last = self.tree.child(at, count - 1);
        self.tree.node(last).is(NodeType::OpenCurlybracket).then_some(last)
    }

    /// `@if expr { }` followed by any number of `@else if expr { }` and a
    /// final `@else { }`. Exactly one branch survives; its content is
    /// spliced in place and processed by the main loop afterwards.
    fn at_if(&mut self, parent: NodeId, index: usize) {
        let at = self.tree.child(parent, index);
        let pos = self.tree.node(at).pos.clone();
        if self.trailing_block(at).is_none() {
            self.session.error(&pos, "@if requires a block");
            self.tree.remove_child(parent, index);
            return;
        }
        let condition: Vec<NodeId> = self.tree.children(at)
            [..self.tree.child_count(at) - 1]
            .to_vec();
        // An unevaluable condition poisons the whole chain: every branch is
        // dropped but the chain is still consumed.
        let mut executed = match self.evaluate_condition(condition, &pos) {
            Some(value) => value,
            None => true,
        };
        let mut chain_index = index;
        if executed {
            chain_index += self.splice_block_contents(parent, index, at);
        } else {
            self.tree.remove_child(parent, index);
        }

        while chain_index < self.tree.child_count(parent) {
            let next = self.tree.child(parent, chain_index);
            let node = self.tree.node(next);
            if !node.is(NodeType::AtKeyword) || node.string != "else" {
                break;
            }
            let pos = node.pos.clone();
            let children = self.tree.children(next).to_vec();
            let else_if = children.first().is_some_and(|&id| {
                let first = self.tree.node(id);
                first.is(NodeType::Identifier) && first.string.eq_ignore_ascii_case("if")
            });
            if self.trailing_block(next).is_none() {
                self.session.error(&pos, "@else requires a block");
                self.tree.remove_child(parent, chain_index);
                if !else_if {
                    break;
                }
                continue;
            }
            if executed {
                self.tree.remove_child(parent, chain_index);
                if !else_if {
                    break;
                }
                continue;
            }
            let taken = if else_if {
                let condition: Vec<NodeId> = children[1..children.len() - 1]
                    .iter()
                    .copied()
                    .filter(|&id| !self.tree.node(id).is(NodeType::Whitespace))
                    .collect();
                match self.evaluate_condition(condition, &pos) {
                    Some(value) => value,
                    None => {
                        executed = true;
                        self.tree.remove_child(parent, chain_index);
                        if !else_if {
                            break;
                        }
                        continue;
                    }
                }
            } else {
                true
            };
            if taken {
                executed = true;
                chain_index += self.splice_block_contents(parent, chain_index, next);
            } else {
                self.tree.remove_child(parent, chain_index);
            }
            if !else_if {
                break;
            }
        }
    }

    /// `@import "file"`: locates the file through the search paths and
    /// splices its parsed content in place. Unresolvable imports are kept
    /// as-is with an INFO diagnostic (assumed to be real external CSS).
    /// Returns true when the node is left in the tree.
    fn at_import(&mut self, parent: NodeId, index: usize) -> bool {
        let at = self.tree.child(parent, index);
        let pos = self.tree.node(at).pos.clone();
        self.replace_variables(at);
        let target = self
            .tree
            .children(at)
            .iter()
            .copied()
            .find(|&id| matches!(self.tree.node_type(id), NodeType::String | NodeType::Url));
        let Some(target) = target else {
            self.session
                .error(&pos, "@import must name a string or a url()");
            self.tree.remove_child(parent, index);
            return false;
        };
        let name = self.tree.node(target).string.clone();

        let Some(path) = self.resolve_import(&name) else {
            self.session.info(
                &pos,
                &format!("@import \"{name}\" left as-is, the file was not found locally"),
            );
            return true;
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        if !self.imported.insert(canonical) {
            self.session.error(
                &pos,
                &format!("circular @import of \"{name}\" detected"),
            );
            self.tree.remove_child(parent, index);
            return false;
        }
        let content = match std::fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                self.session.error(
                    &pos,
                    &format!("could not read \"{}\": {err}", path.display()),
                );
                self.tree.remove_child(parent, index);
                return false;
            }
        };
        let filename = path.display().to_string();
        let imported_root = {
            let mut parser = Parser::new(&mut self.tree, &content, &filename, &self.session);
            parser.stylesheet()
        };
        // Freshly parsed blocks still need their scope markers.
        self.mark_selectors(imported_root);
        let content = self.tree.children(imported_root).to_vec();
        self.tree.clear_children(imported_root);
        self.tree.splice_children(parent, index, content);
        false
    }

    fn resolve_import(&self, name: &str) -> Option<PathBuf> {
        let name = name.strip_prefix("file://").unwrap_or(name);
        if name.contains("://") {
            return None;
        }
        let direct = Path::new(name);
        if direct.is_absolute() {
            return try_scss(direct);
        }
        for dir in &self.search_paths {
            if let Some(found) = try_scss(&dir.join(name)) {
                return Some(found);
            }
        }
        None
    }

    /// `@mixin name { }` or `@mixin name(params) { }`: stored as a global
    /// binding; emits nothing by itself.
    fn at_mixin(&mut self, at: NodeId) {
        let pos = self.tree.node(at).pos.clone();
        let Some(block) = self.trailing_block(at) else {
            self.session.error(&pos, "@mixin requires a block");
            return;
        };
        let children = self.tree.children(at).to_vec();
        let name_node = children[0];
        let name = match self.tree.node_type(name_node) {
            NodeType::Identifier | NodeType::Function => {
                // Mixin names share the variable namespace and its dash
                // folding.
                self.tree.node(name_node).string.replace('-', "_")
            }
            _ => {
                self.session
                    .error(&pos, "@mixin must be given a name, possibly with parameters");
                return;
            }
        };
        if self.tree.node(name_node).is(NodeType::Function) {
            parser::argify(&mut self.tree, name_node, NodeType::Comma, &self.session);
        }
        let binding = self.tree.add_typed(NodeType::List, pos);
        self.tree.append_child(binding, name_node);
        self.tree.append_child(binding, block);
        self.tree.clear_children(at);
        self.tree.set_variable(self.root, &name, binding);
    }

    /// `@include name` / `@include name(args)`: identical to referencing
    /// `$name` / `$name(args)`.
    fn at_include(&mut self, parent: NodeId, index: usize) {
        let at = self.tree.child(parent, index);
        let pos = self.tree.node(at).pos.clone();
        let children = self.tree.children(at).to_vec();
        let Some(&name_node) = children.first() else {
            self.session.error(&pos, "@include must name a mixin");
            self.tree.remove_child(parent, index);
            return;
        };
        let (name, call) = match self.tree.node_type(name_node) {
            NodeType::Identifier => (self.tree.node(name_node).string.replace('-', "_"), None),
            NodeType::Function => {
                self.replace_variables(name_node);
                (
                    self.tree.node(name_node).string.replace('-', "_"),
                    Some(name_node),
                )
            }
            _ => {
                self.session.error(&pos, "@include must name a mixin");
                self.tree.remove_child(parent, index);
                return;
            }
        };
        let Some(binding) = self.state.lookup(&self.tree, &name) else {
            self.session
                .error(&pos, &format!("mixin named \"{name}\" is not set"));
            self.tree.remove_child(parent, index);
            return;
        };
        match self.expand_call(binding, call, &pos) {
            Some(content) => {
                self.tree.splice_children(parent, index, content);
            }
            None => {
                self.tree.remove_child(parent, index);
            }
        }
    }

    /// `@charset "utf-8"` is accepted and dropped; anything else errors.
    fn at_charset(&mut self, at: NodeId) {
        let pos = self.tree.node(at).pos.clone();
        let charset = self
            .tree
            .children(at)
            .iter()
            .copied()
            .find(|&id| self.tree.node(id).is(NodeType::String));
        match charset {
            Some(value) if self.tree.node(value).string.trim().eq_ignore_ascii_case("utf-8") => {}
            _ => {
                self.session
                    .error(&pos, "only a @charset of \"utf-8\" is supported");
            }
        }
    }

    /// `@error` / `@warning` / `@info` / `@message` / `@debug`: evaluates
    /// the message expression, reports at the matching severity, vanishes.
    fn at_message(&mut self, at: NodeId, name: &str) {
        let pos = self.tree.node(at).pos.clone();
        let children: Vec<NodeId> = self
            .tree
            .children(at)
            .iter()
            .copied()
            .filter(|&id| !self.tree.node(id).is(NodeType::Whitespace))
            .collect();
        let message = if children.is_empty() {
            String::new()
        } else {
            let session = SessionRef::clone(&self.session);
            match Expression::new(&mut self.tree, children, &session, &mut self.state).compile() {
                Some(result) => self.message_text(result),
                None => return,
            }
        };
        match name {
            "error" => self.session.error(&pos, &message),
            "warning" => self.session.warning(&pos, &message),
            "debug" => self.session.debug(&pos, &message),
            _ => self.session.info(&pos, &message),
        }
    }

    fn message_text(&self, id: NodeId) -> String {
        let node = self.tree.node(id);
        match node.node_type {
            NodeType::String | NodeType::Identifier | NodeType::Url => node.string.clone(),
            NodeType::Integer => format!("{}{}", node.integer, node.string),
            NodeType::DecimalNumber => format!("{}{}", node.decimal, node.string),
            NodeType::Percent => format!("{}%", node.decimal * 100.0),
            NodeType::Boolean => node.boolean.to_string(),
            NodeType::Null => "null".to_string(),
            NodeType::List => node
                .children
                .iter()
                .map(|&child| self.message_text(child))
                .collect::<Vec<_>>()
                .join(" "),
            _ => format!("{:?}", node.node_type),
        }
    }

    /// `@keyframes` (and vendor variants): every rule of the block becomes a
    /// FRAME tagged with its normalized position in [0.0, 1.0].
    fn at_keyframes(&mut self, at: NodeId) {
        let Some(block) = self.trailing_block(at) else {
            let pos = self.tree.node(at).pos.clone();
            self.session.error(&pos, "@keyframes requires a block");
            return;
        };
        let mut frames: Vec<NodeId> = Vec::new();
        for component in self.tree.children(block).to_vec() {
            if !self.tree.node(component).is(NodeType::ComponentValue) {
                continue;
            }
            let pos = self.tree.node(component).pos.clone();
            let Some(frame_block) = self.trailing_block(component) else {
                self.session.error(&pos, "a keyframe requires a block");
                continue;
            };
            if !parser::argify(&mut self.tree, component, NodeType::Comma, &self.session) {
                continue;
            }
            let args: Vec<NodeId> = self.tree.children(component)
                [..self.tree.child_count(component) - 1]
                .to_vec();
            for (arg_index, &arg) in args.iter().enumerate() {
                let Some(position) = self.frame_position(arg) else {
                    self.session.error(
                        &pos,
                        "a frame position must be 'from', 'to' or a percentage between 0% and 100%",
                    );
                    continue;
                };
                let mut frame = Node::new(NodeType::Frame, pos.clone());
                frame.decimal = position;
                let frame = self.tree.add(frame);
                if arg_index + 1 == args.len() {
                    self.tree.take_over_children(frame, frame_block);
                } else {
                    for child in self.tree.children(frame_block).to_vec() {
                        let clone = self.tree.deep_clone(child);
                        self.tree.append_child(frame, clone);
                    }
                }
                frames.push(frame);
            }
        }
        self.tree.node_mut(block).children = frames;
    }

    fn frame_position(&self, arg: NodeId) -> Option<f64> {
        if self.tree.child_count(arg) != 1 {
            return None;
        }
        let node = self.tree.node(self.tree.child(arg, 0));
        match node.node_type {
            NodeType::Identifier if node.string.eq_ignore_ascii_case("from") => Some(0.0),
            NodeType::Identifier if node.string.eq_ignore_ascii_case("to") => Some(1.0),
            NodeType::Percent if (0.0..=1.0).contains(&node.decimal) => Some(node.decimal),
            NodeType::Integer if node.integer == 0 => Some(0.0),
            _ => None,
        }
    }

    // ----- pass 3: classify and compile component values -----

    fn compile_components(&mut self, parent: NodeId) {
        let mut index = 0;
        while index < self.tree.child_count(parent) {
            let child = self.tree.child(parent, index);
            match self.tree.node_type(child) {
                NodeType::ComponentValue => {
                    assert!(
                        !parser::is_variable_set(&self.tree, child, false),
                        "cascara internal error: a variable set survived variable substitution"
                    );
                    let advanced = if self.trailing_block(child).is_some()
                        && !parser::is_nested_declaration(&self.tree, child)
                    {
                        self.compile_rule(parent, index)
                    } else {
                        self.compile_declaration(parent, index)
                    };
                    if advanced {
                        index += 1;
                    }
                }
                NodeType::AtKeyword => {
                    if let Some(block) = self.trailing_block(child) {
                        self.compile_components(block);
                    }
                    index += 1;
                }
                NodeType::Frame | NodeType::OpenCurlybracket => {
                    self.compile_components(child);
                    index += 1;
                }
                NodeType::Comment | NodeType::Declaration => index += 1,
                _ => {
                    let pos = self.tree.node(child).pos.clone();
                    self.session.error(
                        &pos,
                        &format!(
                            "unexpected {:?} at the rule level",
                            self.tree.node_type(child)
                        ),
                    );
                    self.tree.remove_child(parent, index);
                }
            }
        }
    }

    /// A qualified rule: selector list, then the block. Invalid selectors
    /// abandon the rule but sibling rules still compile.
    fn compile_rule(&mut self, parent: NodeId, index: usize) -> bool {
        let component = self.tree.child(parent, index);
        if !parser::argify(&mut self.tree, component, NodeType::Comma, &self.session) {
            self.tree.remove_child(parent, index);
            return false;
        }
        let checkpoint = self.session.checkpoint();
        selectors::validate_selector_list(&mut self.tree, component, &self.session);
        if self.session.error_happened_since(checkpoint) {
            self.tree.remove_child(parent, index);
            return false;
        }
        let block = self.trailing_block(component).unwrap();
        self.compile_components(block);
        true
    }

    /// A declaration (`field: value...`), possibly nested
    /// (`field: { sub-declarations }`).
    fn compile_declaration(&mut self, parent: NodeId, index: usize) -> bool {
        let component = self.tree.child(parent, index);
        let pos = self.tree.node(component).pos.clone();
        let children = self.tree.children(component).to_vec();
        if children.len() < 2 {
            self.session
                .error(&pos, "a declaration requires a field name and a value");
            self.tree.remove_child(parent, index);
            return false;
        }

        let name_node = children[0];
        if !self.tree.node(name_node).is(NodeType::Identifier) {
            self.session
                .error(&pos, "expected an identifier to name a declaration field");
            self.tree.remove_child(parent, index);
            return false;
        }
        let field = self.tree.node(name_node).string.to_ascii_lowercase();

        let mut value_index = 1;
        if self.tree.node(children[value_index]).is(NodeType::Whitespace) {
            value_index += 1;
        }
        if value_index >= children.len()
            || !self.tree.node(children[value_index]).is(NodeType::Colon)
        {
            self.session.error(
                &pos,
                &format!("expected a ':' after the field name \"{field}\""),
            );
            self.tree.remove_child(parent, index);
            return false;
        }
        value_index += 1;
        let mut values: Vec<NodeId> = children[value_index..].to_vec();
        while values
            .first()
            .is_some_and(|&id| self.tree.node(id).is(NodeType::Whitespace))
        {
            values.remove(0);
        }

        let mut declaration = Node::new(NodeType::Declaration, pos.clone());
        declaration.string = field.clone();

        // Nested declaration: the block flattens during nesting expansion.
        if values.len() == 1 && self.tree.node(values[0]).is(NodeType::OpenCurlybracket) {
            let declaration = self.tree.add(declaration);
            self.tree.append_child(declaration, values[0]);
            self.compile_components(values[0]);
            self.tree.replace_child(parent, index, declaration);
            return true;
        }

        // Browser-specific filter hacks bypass the expression compiler.
        if field == "filter" || field == "-ms-filter" {
            self.session.warning(
                &pos,
                &format!("the \"{field}\" field is browser specific and was not validated"),
            );
            let declaration = self.tree.add(declaration);
            let arg = self.tree.add_typed(NodeType::Arg, pos);
            self.tree.node_mut(arg).children = values;
            self.tree.append_child(declaration, arg);
            self.tree.replace_child(parent, index, declaration);
            return true;
        }

        // Fold `!important` into a flag on the declaration.
        let mut cleaned: Vec<NodeId> = Vec::new();
        let mut iter = values.iter().copied().peekable();
        while let Some(token) = iter.next() {
            if self.tree.node(token).is(NodeType::Exclamation) {
                let mut flag = iter.next();
                while flag.is_some_and(|id| self.tree.node(id).is(NodeType::Whitespace)) {
                    flag = iter.next();
                }
                let word = flag.map(|id| self.tree.node(id).string.clone());
                if word.as_deref().is_some_and(|w| w.eq_ignore_ascii_case("important")) {
                    declaration.add_flag("important");
                } else {
                    self.session
                        .error(&pos, "unsupported '!' flag in a declaration");
                }
                continue;
            }
            cleaned.push(token);
        }
        while cleaned
            .last()
            .is_some_and(|&id| self.tree.node(id).is(NodeType::Whitespace))
        {
            cleaned.pop();
        }
        if cleaned.is_empty() {
            self.session
                .error(&pos, &format!("declaration \"{field}\" has no value"));
            self.tree.remove_child(parent, index);
            return false;
        }

        // Argument-ify on commas and, for fields that use it as a separator,
        // on slashes; each argument compiles through the expression
        // evaluator.
        let slash = selectors::field_uses_slash(&field);
        let declaration = self.tree.add(declaration);
        let mut arg_tokens: Vec<NodeId> = Vec::new();
        let mut separators: Vec<i64> = Vec::new();
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        for token in cleaned {
            match self.tree.node_type(token) {
                NodeType::Comma => {
                    groups.push(std::mem::take(&mut arg_tokens));
                    separators.push(1);
                }
                NodeType::Divide if slash => {
                    groups.push(std::mem::take(&mut arg_tokens));
                    separators.push(2);
                }
                _ => arg_tokens.push(token),
            }
        }
        groups.push(arg_tokens);
        separators.push(0);

        for (group, separator) in groups.into_iter().zip(separators) {
            let group: Vec<NodeId> = group
                .into_iter()
                .skip_while(|&id| self.tree.node(id).is(NodeType::Whitespace))
                .collect();
            if group.is_empty() {
                self.session
                    .error(&pos, &format!("empty value group in declaration \"{field}\""));
                self.tree.remove_child(parent, index);
                return false;
            }
            let arg_pos = self.tree.node(group[0]).pos.clone();
            let session = SessionRef::clone(&self.session);
            let Some(result) =
                Expression::new(&mut self.tree, group, &session, &mut self.state).compile()
            else {
                // Already reported; the declaration is skipped entirely.
                self.tree.remove_child(parent, index);
                return false;
            };
            let arg = self.tree.add_typed(NodeType::Arg, arg_pos);
            self.tree.node_mut(arg).integer = separator;
            self.tree.append_child(arg, result);
            self.tree.append_child(declaration, arg);
        }
        self.tree.replace_child(parent, index, declaration);
        true
    }

    // ----- pass 4: drop rules with empty blocks -----

    fn remove_empty_rules(&mut self, parent: NodeId) {
        let mut index = 0;
        while index < self.tree.child_count(parent) {
            let child = self.tree.child(parent, index);
            match self.tree.node_type(child) {
                NodeType::ComponentValue => {
                    if let Some(block) = self.trailing_block(child) {
                        self.remove_empty_rules(block);
                        if self.tree.child_count(block) == 0 {
                            self.tree.remove_child(parent, index);
                            continue;
                        }
                    }
                    index += 1;
                }
                NodeType::AtKeyword => {
                    if let Some(block) = self.trailing_block(child) {
                        self.remove_empty_rules(block);
                    }
                    index += 1;
                }
                _ => index += 1,
            }
        }
    }

    // ----- pass 5: flatten nesting -----

    fn expand_nested_components(&mut self, parent: NodeId) {
        let mut index = 0;
        while index < self.tree.child_count(parent) {
            let child = self.tree.child(parent, index);
            match self.tree.node_type(child) {
                NodeType::ComponentValue => {
                    if self.trailing_block(child).is_some() {
                        self.expand_rule(parent, index);
                    }
                    index += 1;
                }
                NodeType::AtKeyword => {
                    if let Some(block) = self.trailing_block(child) {
                        self.expand_nested_components(block);
                    }
                    index += 1;
                }
                NodeType::Frame => {
                    self.expand_declarations_in(child);
                    index += 1;
                }
                NodeType::Declaration => {
                    index += self.flatten_declaration(parent, index);
                }
                _ => index += 1,
            }
        }
    }

    /// Hoists rules nested inside `rule`'s block to sibling position right
    /// after it, combining selector lists, and flattens nested declarations.
    /// Hoisted rules are themselves expanded when the caller's loop reaches
    /// them.
    fn expand_rule(&mut self, parent: NodeId, index: usize) {
        let rule = self.tree.child(parent, index);
        let block = self.trailing_block(rule).unwrap();
        let mut insert_at = index + 1;
        let mut inner = 0;
        while inner < self.tree.child_count(block) {
            let child = self.tree.child(block, inner);
            match self.tree.node_type(child) {
                NodeType::ComponentValue if self.trailing_block(child).is_some() => {
                    self.tree.remove_child(block, inner);
                    let hoisted = self.combine_rules(rule, child);
                    self.tree.insert_child(parent, insert_at, hoisted);
                    insert_at += 1;
                }
                NodeType::Declaration => {
                    inner += self.flatten_declaration(block, inner);
                }
                _ => inner += 1,
            }
        }
    }

    /// Cross-product of the enclosing rule's selector list and the nested
    /// rule's: the parent selector text is prepended to each combination and
    /// `&` references on the nested side are dropped.
    fn combine_rules(&mut self, outer: NodeId, nested: NodeId) -> NodeId {
        let pos = self.tree.node(nested).pos.clone();
        let outer_args: Vec<NodeId> = self
            .tree
            .children(outer)
            .iter()
            .copied()
            .filter(|&id| self.tree.node(id).is(NodeType::Arg))
            .collect();
        let nested_args: Vec<NodeId> = self
            .tree
            .children(nested)
            .iter()
            .copied()
            .filter(|&id| self.tree.node(id).is(NodeType::Arg))
            .collect();
        let nested_block = self.trailing_block(nested).unwrap();

        let combined = self.tree.add_typed(NodeType::ComponentValue, pos.clone());
        for &outer_arg in &outer_args {
            for &nested_arg in &nested_args {
                let arg = self.tree.add_typed(NodeType::Arg, pos.clone());
                for child in self.tree.children(outer_arg).to_vec() {
                    let clone = self.tree.deep_clone(child);
                    self.tree.append_child(arg, clone);
                }
                let whitespace = self.tree.add_typed(NodeType::Whitespace, pos.clone());
                self.tree.append_child(arg, whitespace);
                let mut leading = true;
                for child in self.tree.children(nested_arg).to_vec() {
                    let node = self.tree.node(child);
                    if node.is(NodeType::Reference) {
                        continue;
                    }
                    if leading && node.is(NodeType::Whitespace) {
                        continue;
                    }
                    leading = false;
                    let clone = self.tree.deep_clone(child);
                    self.tree.append_child(arg, clone);
                }
                self.tree.append_child(combined, arg);
            }
        }
        self.tree.append_child(combined, nested_block);
        combined
    }

    /// Flattens one nested declaration in place; returns the number of
    /// declarations spliced in.
    fn flatten_declaration(&mut self, parent: NodeId, index: usize) -> usize {
        let declaration = self.tree.child(parent, index);
        let flattened = self.flattened_declarations(declaration);
        let count = flattened.len();
        self.tree.splice_children(parent, index, flattened);
        count
    }

    /// `font: { family: a; size: b }` → `font-family: a; font-size: b`,
    /// recursively.
    fn flattened_declarations(&mut self, declaration: NodeId) -> Vec<NodeId> {
        let is_nested = self.tree.child_count(declaration) == 1
            && self
                .tree
                .node(self.tree.child(declaration, 0))
                .is(NodeType::OpenCurlybracket);
        if !is_nested {
            return vec![declaration];
        }
        let name = self.tree.node(declaration).string.clone();
        let block = self.tree.child(declaration, 0);
        let mut result = Vec::new();
        for child in self.tree.children(block).to_vec() {
            if !self.tree.node(child).is(NodeType::Declaration) {
                continue;
            }
            let sub_name = self.tree.node(child).string.clone();
            self.tree.node_mut(child).string = format!("{name}-{sub_name}");
            result.extend(self.flattened_declarations(child));
        }
        result
    }

    /// Nested declarations inside keyframe frames flatten the same way.
    fn expand_declarations_in(&mut self, parent: NodeId) {
        let mut index = 0;
        while index < self.tree.child_count(parent) {
            let child = self.tree.child(parent, index);
            if self.tree.node(child).is(NodeType::Declaration) {
                index += self.flatten_declaration(parent, index);
            } else {
                index += 1;
            }
        }
    }
}

fn try_scss(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let mut with_extension = path.as_os_str().to_owned();
    with_extension.push(".scss");
    let with_extension = PathBuf::from(with_extension);
    with_extension.is_file().then_some(with_extension)
}
