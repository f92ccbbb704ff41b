use std::collections::HashMap;

use serde::Serialize;

use crate::diagnostics::Position;

/// Every lexer token and every grammar construct is a `Node`; which payload
/// fields are meaningful depends on `node_type`. Reading a payload the type
/// does not define is a bug in the compiler, not bad user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeType {
    Add,
    And,
    AnPlusB,
    Arg,
    Array,
    Assignment,
    AtKeyword,
    Boolean,
    Cdc,
    Cdo,
    CloseCurlybracket,
    CloseParenthesis,
    CloseSquarebracket,
    Colon,
    Color,
    Column,
    Comma,
    Comment,
    ComponentValue,
    Conditional,
    DashMatch,
    DecimalNumber,
    Declaration,
    Divide,
    Dollar,
    Eof,
    Equal,
    Exclamation,
    FontMetrics,
    Frame,
    Function,
    GreaterEqual,
    GreaterThan,
    Hash,
    Identifier,
    IncludeMatch,
    Integer,
    LessEqual,
    LessThan,
    List,
    Modulo,
    Multiply,
    NotEqual,
    Null,
    OpenCurlybracket,
    OpenParenthesis,
    OpenSquarebracket,
    Percent,
    Period,
    Placeholder,
    Power,
    Preceded,
    PrefixMatch,
    Reference,
    Scope,
    Semicolon,
    String,
    SubstringMatch,
    Subtract,
    SuffixMatch,
    UnicodeRange,
    Url,
    Variable,
    VariableFunction,
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub node_type: NodeType,
    pub pos: Position,
    /// Text payload; doubles as the unit for INTEGER/DECIMAL_NUMBER and the
    /// field name for DECLARATION.
    pub string: String,
    pub integer: i64,
    pub decimal: f64,
    pub boolean: bool,
    pub flags: Vec<String>,
    pub children: Vec<NodeId>,
    /// Variable bindings; populated only on scope nodes (the root LIST and
    /// `{}`-blocks marked as variable-accepting).
    pub variables: HashMap<String, NodeId>,
}

impl Node {
    pub fn new(node_type: NodeType, pos: Position) -> Self {
        Node {
            node_type,
            pos,
            string: String::new(),
            integer: 0,
            decimal: 0.0,
            boolean: false,
            flags: Vec::new(),
            children: Vec::new(),
            variables: HashMap::new(),
        }
    }

    pub fn is(&self, node_type: NodeType) -> bool {
        self.node_type == node_type
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.iter().any(|flag| flag == name)
    }

    pub fn add_flag(&mut self, name: &str) {
        if !self.has_flag(name) {
            self.flags.push(name.to_string());
        }
    }
}

/// Index arena owning every node of one compilation. Children are referenced
/// by `NodeId`; a node has exactly one parent by convention and moving a
/// subtree means splicing ids, never copying nodes.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Tree { nodes: Vec::new() }
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn add_typed(&mut self, node_type: NodeType, pos: Position) -> NodeId {
        self.add(Node::new(node_type, pos))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node_type(&self, id: NodeId) -> NodeType {
        self.nodes[id.index()].node_type
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id.index()].children.len()
    }

    pub fn child(&self, id: NodeId, index: usize) -> NodeId {
        self.nodes[id.index()].children[index]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.index()].children.push(child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.nodes[parent.index()].children.insert(index, child);
    }

    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> NodeId {
        self.nodes[parent.index()].children.remove(index)
    }

    pub fn replace_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> NodeId {
        std::mem::replace(&mut self.nodes[parent.index()].children[index], child)
    }

    /// Splices `replacement` in place of child `index`, so the replaced
    /// node's slot grows to hold several siblings.
    pub fn splice_children(&mut self, parent: NodeId, index: usize, replacement: Vec<NodeId>) {
        self.nodes[parent.index()]
            .children
            .splice(index..=index, replacement);
    }

    /// Moves all of `src`'s children onto the end of `dst`, leaving `src`
    /// empty. The single-owner convention requires the source to be cleared.
    pub fn take_over_children(&mut self, dst: NodeId, src: NodeId) {
        let mut taken = std::mem::take(&mut self.nodes[src.index()].children);
        self.nodes[dst.index()].children.append(&mut taken);
    }

    pub fn clear_children(&mut self, id: NodeId) {
        self.nodes[id.index()].children.clear();
    }

    /// Clones a whole subtree, variable bindings included.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes[id.index()].clone();
        let children = std::mem::take(&mut node.children);
        let variables = std::mem::take(&mut node.variables);
        let clone = self.add(node);
        for child in children {
            let child_clone = self.deep_clone(child);
            self.append_child(clone, child_clone);
        }
        for (name, binding) in variables {
            let binding_clone = self.deep_clone(binding);
            self.nodes[clone.index()]
                .variables
                .insert(name, binding_clone);
        }
        clone
    }

    pub fn set_variable(&mut self, scope: NodeId, name: &str, binding: NodeId) {
        self.nodes[scope.index()]
            .variables
            .insert(name.to_string(), binding);
    }

    pub fn get_variable(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[scope.index()].variables.get(name).copied()
    }

    pub fn to_json(&self, id: NodeId) -> serde_json::Value {
        let node = self.node(id);
        let mut object = serde_json::Map::new();
        object.insert("type".to_string(), serde_json::json!(node.node_type));
        object.insert("line".to_string(), serde_json::json!(node.pos.line));
        if !node.string.is_empty() {
            object.insert("string".to_string(), serde_json::json!(node.string));
        }
        match node.node_type {
            NodeType::Integer | NodeType::UnicodeRange => {
                object.insert("integer".to_string(), serde_json::json!(node.integer));
            }
            NodeType::DecimalNumber | NodeType::Percent | NodeType::Frame => {
                object.insert("decimal".to_string(), serde_json::json!(node.decimal));
            }
            NodeType::Boolean => {
                object.insert("boolean".to_string(), serde_json::json!(node.boolean));
            }
            _ => {}
        }
        if !node.flags.is_empty() {
            object.insert("flags".to_string(), serde_json::json!(node.flags));
        }
        if !node.children.is_empty() {
            let children: Vec<serde_json::Value> = node
                .children
                .clone()
                .into_iter()
                .map(|child| self.to_json(child))
                .collect();
            object.insert("children".to_string(), serde_json::Value::Array(children));
        }
        serde_json::Value::Object(object)
    }

    /// Indented text form used by tests and `--dump-ast`-style debugging.
    pub fn dump(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(id, 0, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{:?}", node.node_type));
        match node.node_type {
            NodeType::Integer => {
                out.push_str(&format!(" I:{}", node.integer));
                if !node.string.is_empty() {
                    out.push_str(&format!(" \"{}\"", node.string));
                }
            }
            NodeType::DecimalNumber | NodeType::Percent | NodeType::Frame => {
                out.push_str(&format!(" D:{}", node.decimal));
                if !node.string.is_empty() {
                    out.push_str(&format!(" \"{}\"", node.string));
                }
            }
            NodeType::Boolean => {
                out.push_str(&format!(" B:{}", node.boolean));
            }
            NodeType::UnicodeRange => {
                out.push_str(&format!(" I:{}", node.integer));
            }
            _ => {
                if !node.string.is_empty() {
                    out.push_str(&format!(" \"{}\"", node.string));
                }
            }
        }
        for flag in &node.flags {
            out.push_str(&format!(" !{flag}"));
        }
        out.push('\n');
        for child in &node.children {
            self.dump_into(*child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::new("test.scss")
    }

    #[test]
    fn children_are_spliced_in_place() {
        let mut tree = Tree::new();
        let list = tree.add_typed(NodeType::List, pos());
        let a = tree.add_typed(NodeType::Identifier, pos());
        let b = tree.add_typed(NodeType::Identifier, pos());
        let c = tree.add_typed(NodeType::Identifier, pos());
        tree.append_child(list, a);
        tree.append_child(list, b);
        let replacement = vec![c, a];
        tree.splice_children(list, 0, replacement);
        assert_eq!(tree.children(list), &[c, a, b]);
    }

    #[test]
    fn take_over_children_empties_the_source() {
        let mut tree = Tree::new();
        let src = tree.add_typed(NodeType::OpenCurlybracket, pos());
        let dst = tree.add_typed(NodeType::List, pos());
        let child = tree.add_typed(NodeType::Identifier, pos());
        tree.append_child(src, child);
        tree.take_over_children(dst, src);
        assert_eq!(tree.child_count(src), 0);
        assert_eq!(tree.children(dst), &[child]);
    }

    #[test]
    fn deep_clone_copies_payloads_and_bindings() {
        let mut tree = Tree::new();
        let scope = tree.add_typed(NodeType::OpenCurlybracket, pos());
        let value = tree.add(Node {
            integer: 42,
            string: "px".to_string(),
            ..Node::new(NodeType::Integer, pos())
        });
        tree.append_child(scope, value);
        let binding = tree.add_typed(NodeType::List, pos());
        tree.set_variable(scope, "width", binding);

        let clone = tree.deep_clone(scope);
        assert_ne!(clone, scope);
        assert_eq!(tree.child_count(clone), 1);
        let cloned_value = tree.child(clone, 0);
        assert_ne!(cloned_value, value);
        assert_eq!(tree.node(cloned_value).integer, 42);
        assert_eq!(tree.node(cloned_value).string, "px");
        let cloned_binding = tree.get_variable(clone, "width").expect("binding");
        assert_ne!(cloned_binding, binding);
    }

    #[test]
    fn dump_shows_types_and_payloads() {
        let mut tree = Tree::new();
        let list = tree.add_typed(NodeType::List, pos());
        let ident = tree.add(Node {
            string: "div".to_string(),
            ..Node::new(NodeType::Identifier, pos())
        });
        tree.append_child(list, ident);
        let dump = tree.dump(list);
        assert_eq!(dump, "List\n  Identifier \"div\"\n");
    }
}
