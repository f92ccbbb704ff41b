use crate::diagnostics::{Position, SessionRef};
use crate::node::{Node, NodeId, NodeType, Tree};

/// Seam between the expression evaluator and whoever owns the variable
/// scopes. The compiler state implements this; tests plug in a stub.
pub trait VariableHandler {
    /// Returns a clone of the variable's value, or None when unset.
    fn get_variable(&mut self, tree: &mut Tree, name: &str, pos: &Position) -> Option<NodeId>;
    /// Expands a `$name(args)` call into its compiled result.
    fn execute_user_function(
        &mut self,
        tree: &mut Tree,
        session: &SessionRef,
        call: NodeId,
    ) -> Option<NodeId>;
    /// When set, an undefined variable evaluates to an empty value instead
    /// of being an error.
    fn empty_on_undefined_variable(&self) -> bool;
}

/// Evaluates one component-value slice (a list of token node ids). Items
/// are whitespace-separated; operators only apply where the lexer produced
/// operator tokens, so `1px solid red` stays a list of three values while
/// `3 + 4` folds to one.
pub struct Expression<'a, 't> {
    tree: &'t mut Tree,
    nodes: Vec<NodeId>,
    index: usize,
    session: SessionRef,
    handler: &'a mut dyn VariableHandler,
}

impl<'a, 't> Expression<'a, 't> {
    pub fn new(
        tree: &'t mut Tree,
        nodes: Vec<NodeId>,
        session: &SessionRef,
        handler: &'a mut dyn VariableHandler,
    ) -> Self {
        Expression {
            tree,
            nodes,
            index: 0,
            session: SessionRef::clone(session),
            handler,
        }
    }

    /// Compiles the whole slice; several whitespace-separated results fold
    /// into a LIST node. None means the expression could not be evaluated
    /// (already reported) and the caller should drop the construct.
    pub fn compile(&mut self) -> Option<NodeId> {
        let mut results: Vec<NodeId> = Vec::new();
        loop {
            self.skip_whitespace();
            if self.index >= self.nodes.len() {
                break;
            }
            let item = self.conditional()?;
            results.push(item);
        }
        match results.len() {
            0 => {
                // An empty expression has no position of its own.
                let pos = Position::new("");
                self.session.error(&pos, "an expression without any token");
                None
            }
            1 => Some(results[0]),
            _ => {
                let pos = self.tree.node(results[0]).pos.clone();
                let list = self.tree.add_typed(NodeType::List, pos);
                for item in results {
                    self.tree.append_child(list, item);
                }
                Some(list)
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .nodes
            .get(self.index)
            .is_some_and(|&id| self.tree.node(id).is(NodeType::Whitespace))
        {
            self.index += 1;
        }
    }

    fn peek_type(&mut self) -> Option<NodeType> {
        let save = self.index;
        self.skip_whitespace();
        let result = self
            .nodes
            .get(self.index)
            .map(|&id| self.tree.node(id).node_type);
        self.index = save;
        result
    }

    /// Looks past whitespace for an identifier with the given (lowercase)
    /// name, e.g. the `and` / `or` / `not` operators.
    fn peek_word(&mut self, word: &str) -> bool {
        let save = self.index;
        self.skip_whitespace();
        let matched = self.nodes.get(self.index).is_some_and(|&id| {
            let node = self.tree.node(id);
            node.is(NodeType::Identifier) && node.string.eq_ignore_ascii_case(word)
        });
        self.index = save;
        matched
    }

    fn accept(&mut self) -> NodeId {
        self.skip_whitespace();
        let id = self.nodes[self.index];
        self.index += 1;
        id
    }

    fn conditional(&mut self) -> Option<NodeId> {
        let condition = self.logical_or()?;
        if self.peek_type() != Some(NodeType::Conditional) {
            return Some(condition);
        }
        let question = self.accept();
        let when_true = self.conditional()?;
        self.skip_whitespace();
        if self.peek_type() != Some(NodeType::Colon) {
            let pos = self.tree.node(question).pos.clone();
            self.session
                .error(&pos, "a conditional expression requires a ':' after the first result");
            return None;
        }
        self.accept();
        let when_false = self.conditional()?;
        match boolean(self.tree, condition) {
            Some(true) => Some(when_true),
            Some(false) => Some(when_false),
            None => {
                let pos = self.tree.node(condition).pos.clone();
                self.session
                    .error(&pos, "the condition of a conditional expression is not a boolean");
                None
            }
        }
    }

    fn logical_or(&mut self) -> Option<NodeId> {
        let mut left = self.logical_and()?;
        loop {
            let is_or = self.peek_type() == Some(NodeType::Column) || self.peek_word("or");
            if !is_or {
                return Some(left);
            }
            let op = self.accept();
            let right = self.logical_and()?;
            let pos = self.tree.node(op).pos.clone();
            let (Some(a), Some(b)) = (boolean(self.tree, left), boolean(self.tree, right)) else {
                self.session
                    .error(&pos, "the operands of 'or' must be booleans");
                return None;
            };
            left = self.boolean_node(a || b, pos);
        }
    }

    fn logical_and(&mut self) -> Option<NodeId> {
        let mut left = self.equality()?;
        loop {
            let is_and = self.peek_type() == Some(NodeType::And) || self.peek_word("and");
            if !is_and {
                return Some(left);
            }
            let op = self.accept();
            let right = self.equality()?;
            let pos = self.tree.node(op).pos.clone();
            let (Some(a), Some(b)) = (boolean(self.tree, left), boolean(self.tree, right)) else {
                self.session
                    .error(&pos, "the operands of 'and' must be booleans");
                return None;
            };
            left = self.boolean_node(a && b, pos);
        }
    }

    fn equality(&mut self) -> Option<NodeId> {
        let mut left = self.relational()?;
        loop {
            let operator = match self.peek_type() {
                Some(NodeType::Equal) => NodeType::Equal,
                Some(NodeType::NotEqual) => NodeType::NotEqual,
                _ => return Some(left),
            };
            let op = self.accept();
            let right = self.relational()?;
            let pos = self.tree.node(op).pos.clone();
            let equal = self.values_equal(left, right, &pos)?;
            let result = if operator == NodeType::Equal { equal } else { !equal };
            left = self.boolean_node(result, pos);
        }
    }

    fn relational(&mut self) -> Option<NodeId> {
        let mut left = self.additive()?;
        loop {
            let operator = match self.peek_type() {
                Some(t @ (NodeType::LessThan
                | NodeType::LessEqual
                | NodeType::GreaterThan
                | NodeType::GreaterEqual)) => t,
                _ => return Some(left),
            };
            let op = self.accept();
            let right = self.additive()?;
            let pos = self.tree.node(op).pos.clone();
            let (a, b) = self.comparable_pair(left, right, &pos)?;
            let result = match operator {
                NodeType::LessThan => a < b,
                NodeType::LessEqual => a <= b,
                NodeType::GreaterThan => a > b,
                NodeType::GreaterEqual => a >= b,
                _ => unreachable!(),
            };
            left = self.boolean_node(result, pos);
        }
    }

    fn additive(&mut self) -> Option<NodeId> {
        let mut left = self.multiplicative()?;
        loop {
            let operator = match self.peek_type() {
                Some(t @ (NodeType::Add | NodeType::Subtract)) => t,
                _ => return Some(left),
            };
            let op = self.accept();
            let right = self.multiplicative()?;
            let pos = self.tree.node(op).pos.clone();
            left = self.add_or_subtract(operator, left, right, &pos)?;
        }
    }

    fn multiplicative(&mut self) -> Option<NodeId> {
        let mut left = self.power()?;
        loop {
            let operator = match self.peek_type() {
                Some(t @ (NodeType::Multiply | NodeType::Divide | NodeType::Modulo)) => t,
                _ => return Some(left),
            };
            let op = self.accept();
            let right = self.power()?;
            let pos = self.tree.node(op).pos.clone();
            left = self.multiply_or_divide(operator, left, right, &pos)?;
        }
    }

    fn power(&mut self) -> Option<NodeId> {
        let base = self.unary()?;
        if self.peek_type() != Some(NodeType::Power) {
            return Some(base);
        }
        let op = self.accept();
        let exponent = self.power()?;
        let pos = self.tree.node(op).pos.clone();
        let base_node = self.tree.node(base);
        let exponent_node = self.tree.node(exponent);
        match (base_node.node_type, exponent_node.node_type) {
            (NodeType::Integer, NodeType::Integer) if exponent_node.integer >= 0 => {
                let value = base_node
                    .integer
                    .checked_pow(exponent_node.integer.min(u32::MAX as i64) as u32);
                match value {
                    Some(value) => {
                        let unit = base_node.string.clone();
                        Some(self.integer_node(value, unit, pos))
                    }
                    None => {
                        self.session.error(&pos, "number too large after '**'");
                        None
                    }
                }
            }
            _ => {
                let (a, unit) = self.numeric_value(base, &pos)?;
                let (b, _) = self.numeric_value(exponent, &pos)?;
                Some(self.decimal_node(a.powf(b), unit, pos))
            }
        }
    }

    fn unary(&mut self) -> Option<NodeId> {
        match self.peek_type() {
            Some(NodeType::Add) => {
                self.accept();
                self.unary()
            }
            Some(NodeType::Subtract) => {
                let op = self.accept();
                let pos = self.tree.node(op).pos.clone();
                let value = self.unary()?;
                let node = self.tree.node(value);
                match node.node_type {
                    NodeType::Integer => {
                        let (value, unit) = (node.integer, node.string.clone());
                        Some(self.integer_node(0i64.saturating_sub(value), unit, pos))
                    }
                    NodeType::DecimalNumber | NodeType::Percent => {
                        let node_type = node.node_type;
                        let (value, unit) = (node.decimal, node.string.clone());
                        let mut negated = Node::new(node_type, pos);
                        negated.decimal = -value;
                        negated.string = unit;
                        Some(self.tree.add(negated))
                    }
                    _ => {
                        self.session
                            .error(&pos, "only numbers can be negated with '-'");
                        None
                    }
                }
            }
            Some(NodeType::Exclamation) => {
                let op = self.accept();
                let pos = self.tree.node(op).pos.clone();
                let value = self.unary()?;
                match boolean(self.tree, value) {
                    Some(b) => Some(self.boolean_node(!b, pos)),
                    None => {
                        self.session
                            .error(&pos, "the operand of '!' must be a boolean");
                        None
                    }
                }
            }
            _ if self.peek_word("not") => {
                let op = self.accept();
                let pos = self.tree.node(op).pos.clone();
                let value = self.unary()?;
                match boolean(self.tree, value) {
                    Some(b) => Some(self.boolean_node(!b, pos)),
                    None => {
                        self.session
                            .error(&pos, "the operand of 'not' must be a boolean");
                        None
                    }
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Option<NodeId> {
        self.skip_whitespace();
        let Some(&id) = self.nodes.get(self.index) else {
            let pos = Position::new("");
            self.session
                .error(&pos, "missing operand at the end of an expression");
            return None;
        };
        let node_type = self.tree.node(id).node_type;
        match node_type {
            NodeType::Integer
            | NodeType::DecimalNumber
            | NodeType::Percent
            | NodeType::String
            | NodeType::Url
            | NodeType::Hash
            | NodeType::UnicodeRange
            | NodeType::Comment
            | NodeType::Placeholder => {
                self.index += 1;
                Some(id)
            }
            NodeType::Identifier => {
                self.index += 1;
                let node = self.tree.node(id);
                let pos = node.pos.clone();
                if node.string.eq_ignore_ascii_case("true") {
                    return Some(self.boolean_node(true, pos));
                }
                if node.string.eq_ignore_ascii_case("false") {
                    return Some(self.boolean_node(false, pos));
                }
                if node.string.eq_ignore_ascii_case("null") {
                    return Some(self.tree.add_typed(NodeType::Null, pos));
                }
                Some(id)
            }
            NodeType::Function => {
                // CSS functions pass through; their arguments were already
                // variable-substituted.
                self.index += 1;
                Some(id)
            }
            NodeType::OpenParenthesis => {
                self.index += 1;
                let children = self.tree.children(id).to_vec();
                Expression::new(self.tree, children, &self.session, self.handler).compile()
            }
            NodeType::Variable => {
                self.index += 1;
                let node = self.tree.node(id);
                let (name, pos) = (node.string.clone(), node.pos.clone());
                match self.handler.get_variable(self.tree, &name, &pos) {
                    Some(value) => Some(value),
                    None => {
                        if self.handler.empty_on_undefined_variable() {
                            return Some(self.tree.add_typed(NodeType::Null, pos));
                        }
                        self.session
                            .error(&pos, &format!("variable named \"{name}\" is not set"));
                        None
                    }
                }
            }
            NodeType::VariableFunction => {
                self.index += 1;
                let pos = self.tree.node(id).pos.clone();
                let session = SessionRef::clone(&self.session);
                match self.handler.execute_user_function(self.tree, &session, id) {
                    Some(value) => Some(value),
                    None => {
                        let name = self.tree.node(id).string.clone();
                        self.session.error(
                            &pos,
                            &format!("user function named \"{name}\" could not be expanded"),
                        );
                        None
                    }
                }
            }
            _ => {
                let pos = self.tree.node(id).pos.clone();
                self.session.error(
                    &pos,
                    &format!("unsupported node type {node_type:?} in an expression"),
                );
                None
            }
        }
    }

    fn boolean_node(&mut self, value: bool, pos: Position) -> NodeId {
        let mut node = Node::new(NodeType::Boolean, pos);
        node.boolean = value;
        self.tree.add(node)
    }

    fn integer_node(&mut self, value: i64, unit: String, pos: Position) -> NodeId {
        let mut node = Node::new(NodeType::Integer, pos);
        node.integer = value;
        node.string = unit;
        self.tree.add(node)
    }

    fn decimal_node(&mut self, value: f64, unit: String, pos: Position) -> NodeId {
        let mut node = Node::new(NodeType::DecimalNumber, pos);
        node.decimal = value;
        node.string = unit;
        self.tree.add(node)
    }

    /// Numeric value and unit of a node, or an error for non-numbers.
    /// Percents read as their 0..1 decimal with a pseudo-unit of "%".
    fn numeric_value(&mut self, id: NodeId, pos: &Position) -> Option<(f64, String)> {
        let node = self.tree.node(id);
        match node.node_type {
            NodeType::Integer => Some((node.integer as f64, node.string.clone())),
            NodeType::DecimalNumber => Some((node.decimal, node.string.clone())),
            NodeType::Percent => Some((node.decimal, "%".to_string())),
            _ => {
                self.session.error(
                    pos,
                    &format!("expected a number, found {:?}", node.node_type),
                );
                None
            }
        }
    }

    fn add_or_subtract(
        &mut self,
        operator: NodeType,
        left: NodeId,
        right: NodeId,
        pos: &Position,
    ) -> Option<NodeId> {
        let left_node = self.tree.node(left);
        let right_node = self.tree.node(right);

        // String concatenation with '+'.
        if operator == NodeType::Add
            && left_node.is(NodeType::String)
            && right_node.is(NodeType::String)
        {
            let value = format!("{}{}", left_node.string, right_node.string);
            let mut node = Node::new(NodeType::String, pos.clone());
            node.string = value;
            return Some(self.tree.add(node));
        }

        if left_node.is(NodeType::Integer) && right_node.is(NodeType::Integer) {
            let unit = self.merged_unit(left, right, pos)?;
            let (a, b) = (self.tree.node(left).integer, self.tree.node(right).integer);
            let value = if operator == NodeType::Add {
                a.saturating_add(b)
            } else {
                a.saturating_sub(b)
            };
            return Some(self.integer_node(value, unit, pos.clone()));
        }

        if left_node.is(NodeType::Percent) && right_node.is(NodeType::Percent) {
            let (a, b) = (left_node.decimal, right_node.decimal);
            let value = if operator == NodeType::Add { a + b } else { a - b };
            let mut node = Node::new(NodeType::Percent, pos.clone());
            node.decimal = value;
            return Some(self.tree.add(node));
        }

        let unit = self.merged_unit(left, right, pos)?;
        let (a, _) = self.numeric_value(left, pos)?;
        let (b, _) = self.numeric_value(right, pos)?;
        let value = if operator == NodeType::Add { a + b } else { a - b };
        Some(self.decimal_node(value, unit, pos.clone()))
    }

    /// Units of both operands for additive/comparison operators; they must
    /// be equal or one of them empty.
    fn merged_unit(&mut self, left: NodeId, right: NodeId, pos: &Position) -> Option<String> {
        let (_, left_unit) = self.numeric_value(left, pos)?;
        let (_, right_unit) = self.numeric_value(right, pos)?;
        if left_unit.is_empty() {
            return Some(right_unit);
        }
        if right_unit.is_empty() || left_unit == right_unit {
            return Some(left_unit);
        }
        self.session.error(
            pos,
            &format!("incompatible dimensions \"{left_unit}\" and \"{right_unit}\""),
        );
        None
    }

    fn multiply_or_divide(
        &mut self,
        operator: NodeType,
        left: NodeId,
        right: NodeId,
        pos: &Position,
    ) -> Option<NodeId> {
        let (a, left_unit) = self.numeric_value(left, pos)?;
        let (b, right_unit) = self.numeric_value(right, pos)?;

        let unit = match operator {
            NodeType::Multiply => {
                if !left_unit.is_empty() && !right_unit.is_empty() && left_unit != "%" && right_unit != "%" {
                    self.session
                        .error(pos, "cannot multiply two values that both have a dimension");
                    return None;
                }
                if left_unit.is_empty() { right_unit.clone() } else { left_unit.clone() }
            }
            _ => {
                if b == 0.0 {
                    self.session.error(pos, "division by zero");
                    return None;
                }
                if left_unit == right_unit {
                    String::new()
                } else if right_unit.is_empty() {
                    left_unit.clone()
                } else {
                    self.session.error(
                        pos,
                        &format!("incompatible dimensions \"{left_unit}\" and \"{right_unit}\""),
                    );
                    return None;
                }
            }
        };

        // Percent combined with a plain number keeps the percent form.
        let percent = unit == "%";
        let both_integers = self.tree.node(left).is(NodeType::Integer)
            && self.tree.node(right).is(NodeType::Integer);
        let value = match operator {
            NodeType::Multiply => a * b,
            NodeType::Divide => a / b,
            NodeType::Modulo => a % b,
            _ => unreachable!(),
        };
        if percent {
            let mut node = Node::new(NodeType::Percent, pos.clone());
            node.decimal = value;
            return Some(self.tree.add(node));
        }
        if both_integers && value.fract() == 0.0 {
            return Some(self.integer_node(value as i64, unit, pos.clone()));
        }
        Some(self.decimal_node(value, unit, pos.clone()))
    }

    fn values_equal(&mut self, left: NodeId, right: NodeId, pos: &Position) -> Option<bool> {
        let left_node = self.tree.node(left);
        let right_node = self.tree.node(right);
        match (left_node.node_type, right_node.node_type) {
            (NodeType::String, NodeType::String) => Some(left_node.string == right_node.string),
            (NodeType::Identifier, NodeType::Identifier) => {
                Some(left_node.string.eq_ignore_ascii_case(&right_node.string))
            }
            (NodeType::Boolean, NodeType::Boolean) => {
                Some(left_node.boolean == right_node.boolean)
            }
            (NodeType::Null, NodeType::Null) => Some(true),
            (NodeType::Null, _) | (_, NodeType::Null) => Some(false),
            _ => {
                let (a, b) = self.comparable_pair(left, right, pos)?;
                Some(a == b)
            }
        }
    }

    /// Two numeric values reduced to comparable floats (units must agree).
    fn comparable_pair(
        &mut self,
        left: NodeId,
        right: NodeId,
        pos: &Position,
    ) -> Option<(f64, f64)> {
        self.merged_unit(left, right, pos)?;
        let (a, _) = self.numeric_value(left, pos)?;
        let (b, _) = self.numeric_value(right, pos)?;
        Some((a, b))
    }
}

/// Truthiness of an evaluated expression result; None when the node cannot
/// be interpreted as a boolean.
pub fn boolean(tree: &Tree, id: NodeId) -> Option<bool> {
    let node = tree.node(id);
    match node.node_type {
        NodeType::Boolean => Some(node.boolean),
        NodeType::Null => Some(false),
        NodeType::Integer => Some(node.integer != 0),
        NodeType::DecimalNumber | NodeType::Percent => Some(node.decimal != 0.0),
        NodeType::String => Some(!node.string.is_empty()),
        NodeType::Identifier => {
            if node.string.eq_ignore_ascii_case("true") {
                Some(true)
            } else if node.string.eq_ignore_ascii_case("false")
                || node.string.eq_ignore_ascii_case("null")
            {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Session;
    use crate::parser::Parser;

    struct NoVariables;

    impl VariableHandler for NoVariables {
        fn get_variable(&mut self, _: &mut Tree, _: &str, _: &Position) -> Option<NodeId> {
            None
        }
        fn execute_user_function(
            &mut self,
            _: &mut Tree,
            _: &SessionRef,
            _: NodeId,
        ) -> Option<NodeId> {
            None
        }
        fn empty_on_undefined_variable(&self) -> bool {
            false
        }
    }

    /// Parses `a { x: <src> }` and evaluates the declaration value.
    fn eval(src: &str) -> (Tree, Option<NodeId>, SessionRef) {
        let session = Session::new();
        let mut tree = Tree::new();
        let source = format!("a {{ x: {src} }}");
        let root = Parser::new(&mut tree, &source, "test.scss", &session).stylesheet();
        let rule = tree.child(root, 0);
        let block = tree.child(rule, tree.child_count(rule) - 1);
        let declaration = tree.child(block, 0);
        // Skip "x", ":" and the following whitespace.
        let nodes: Vec<NodeId> = tree.children(declaration)[2..].to_vec();
        let mut handler = NoVariables;
        let result = Expression::new(&mut tree, nodes, &session, &mut handler).compile();
        (tree, result, session)
    }

    #[test]
    fn integer_arithmetic_keeps_units() {
        let (tree, result, session) = eval("3px + 4px");
        assert_eq!(session.error_count(), 0);
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::Integer));
        assert_eq!(node.integer, 7);
        assert_eq!(node.string, "px");
    }

    #[test]
    fn mixed_units_report_an_error() {
        let (_, result, session) = eval("3px + 4em");
        assert!(result.is_none());
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn multiplication_against_scalar() {
        let (tree, result, _) = eval("5px * 3");
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::Integer));
        assert_eq!(node.integer, 15);
        assert_eq!(node.string, "px");
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let (_, result, session) = eval("5 / 0");
        assert!(result.is_none());
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn division_produces_decimal_when_inexact() {
        let (tree, result, _) = eval("600px / 4");
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::Integer));
        assert_eq!(node.integer, 150);
        let (tree, result, _) = eval("5 / 2");
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::DecimalNumber));
        assert!((node.decimal - 2.5).abs() < 1e-9);
    }

    #[test]
    fn power_operator() {
        let (tree, result, _) = eval("2 ** 10");
        assert_eq!(tree.node(result.unwrap()).integer, 1024);
    }

    #[test]
    fn percent_arithmetic_stays_percent() {
        let (tree, result, _) = eval("25% + 25%");
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::Percent));
        assert!((node.decimal - 0.5).abs() < 1e-9);
    }

    #[test]
    fn string_concatenation() {
        let (tree, result, _) = eval("\"foo\" + \"bar\"");
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::String));
        assert_eq!(node.string, "foobar");
    }

    #[test]
    fn comparisons_produce_booleans() {
        let (tree, result, _) = eval("5 > 3");
        assert_eq!(boolean(&tree, result.unwrap()), Some(true));
        let (tree, result, _) = eval("5 = 3");
        assert_eq!(boolean(&tree, result.unwrap()), Some(false));
        let (tree, result, _) = eval("5 != 3");
        assert_eq!(boolean(&tree, result.unwrap()), Some(true));
    }

    #[test]
    fn logical_operators() {
        let (tree, result, _) = eval("true and false");
        assert_eq!(boolean(&tree, result.unwrap()), Some(false));
        let (tree, result, _) = eval("true or false");
        assert_eq!(boolean(&tree, result.unwrap()), Some(true));
        let (tree, result, _) = eval("not true");
        assert_eq!(boolean(&tree, result.unwrap()), Some(false));
    }

    #[test]
    fn conditional_selects_branch() {
        let (tree, result, session) = eval("5 > 3 ? 1px : 2px");
        assert_eq!(session.error_count(), 0);
        let node = tree.node(result.unwrap());
        assert_eq!(node.integer, 1);
    }

    #[test]
    fn space_separated_values_form_a_list() {
        let (tree, result, session) = eval("1px solid red");
        assert_eq!(session.error_count(), 0);
        let node = tree.node(result.unwrap());
        assert!(node.is(NodeType::List));
        assert_eq!(node.children.len(), 3);
    }

    #[test]
    fn parenthesized_subexpressions() {
        let (tree, result, _) = eval("(1 + 2) * 3");
        assert_eq!(tree.node(result.unwrap()).integer, 9);
    }

    #[test]
    fn undefined_variable_reports() {
        let (_, result, session) = eval("$missing");
        assert!(result.is_none());
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn css_functions_pass_through() {
        let (tree, result, session) = eval("rgba(0, 0, 0, 0.5)");
        assert_eq!(session.error_count(), 0);
        assert!(tree.node(result.unwrap()).is(NodeType::Function));
    }
}
