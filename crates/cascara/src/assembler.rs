use std::fmt;

use crate::diagnostics::SessionRef;
use crate::node::{NodeId, NodeType, Tree};
use crate::nth_child::NthChild;

/// How the final tree is serialized back to CSS text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Compact,
    Compressed,
    Expanded,
    Tidy,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputMode::Compact => "compact",
            OutputMode::Compressed => "compressed",
            OutputMode::Expanded => "expanded",
            OutputMode::Tidy => "tidy",
        };
        write!(f, "{name}")
    }
}

impl OutputMode {
    pub fn parse(name: &str) -> Option<OutputMode> {
        match name {
            "compact" => Some(OutputMode::Compact),
            "compressed" => Some(OutputMode::Compressed),
            "expanded" => Some(OutputMode::Expanded),
            "tidy" => Some(OutputMode::Tidy),
            _ => None,
        }
    }
}

// Operator emission flags; each mode decides independently what to honor.
pub const OPTIONAL_OPERATOR: u32 = 1 << 0;
pub const OPTIONAL_SPACE_BEFORE: u32 = 1 << 1;
pub const OPTIONAL_SPACE_AFTER: u32 = 1 << 2;
const NEWLINE_BEFORE: u32 = 1 << 3;
const NEWLINE_AFTER: u32 = 1 << 4;
const HARD_NEWLINE_AFTER: u32 = 1 << 5;
pub const OPTIONAL_SPACES: u32 = OPTIONAL_SPACE_BEFORE | OPTIONAL_SPACE_AFTER;
pub const OPTIONAL_SPACE_BEFORE_OR_NEWLINE: u32 = OPTIONAL_SPACE_BEFORE | NEWLINE_BEFORE;
pub const OPTIONAL_SPACE_AFTER_OR_NEWLINE: u32 = OPTIONAL_SPACE_AFTER | NEWLINE_AFTER;
pub const OPTIONAL_NEWLINE_AFTER: u32 = HARD_NEWLINE_AFTER;

/// One formatting strategy. The assembler walks the tree once and emits
/// text and operators through this; the strategy decides the decoration.
trait Format {
    fn text(&mut self, out: &mut String, text: &str) {
        out.push_str(text);
    }
    fn operator(&mut self, out: &mut String, op: &str, flags: u32);
    fn newline(&mut self, _out: &mut String) {}
    fn newline_if_not_empty(&mut self, out: &mut String) {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
    }
    fn indent_in(&mut self) {}
    fn indent_out(&mut self) {}
}

/// No decoration at all; optional operators are dropped.
struct Compressed;

impl Format for Compressed {
    fn operator(&mut self, out: &mut String, op: &str, flags: u32) {
        if flags & OPTIONAL_OPERATOR != 0 {
            return;
        }
        out.push_str(op);
    }
}

/// Compressed plus a newline after each rule.
struct Tidy;

impl Format for Tidy {
    fn operator(&mut self, out: &mut String, op: &str, flags: u32) {
        if flags & OPTIONAL_OPERATOR != 0 {
            return;
        }
        out.push_str(op);
        if flags & HARD_NEWLINE_AFTER != 0 {
            out.push('\n');
        }
    }
    fn newline(&mut self, out: &mut String) {
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
}

/// Single spaces around operators, one rule per line.
struct Compact;

impl Format for Compact {
    fn operator(&mut self, out: &mut String, op: &str, flags: u32) {
        if flags & OPTIONAL_OPERATOR != 0 {
            return;
        }
        if flags & OPTIONAL_SPACE_BEFORE != 0 && !out.is_empty() && !out.ends_with([' ', '\n']) {
            out.push(' ');
        }
        out.push_str(op);
        if flags & HARD_NEWLINE_AFTER != 0 {
            out.push('\n');
        } else if flags & OPTIONAL_SPACE_AFTER != 0 {
            out.push(' ');
        }
    }
    fn newline(&mut self, out: &mut String) {
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
}

/// Newlines and two-space indentation.
struct Expanded {
    indent: usize,
    pending_newline: bool,
}

impl Expanded {
    fn flush(&mut self, out: &mut String) {
        if self.pending_newline {
            self.pending_newline = false;
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&"  ".repeat(self.indent));
        }
    }
}

impl Format for Expanded {
    fn text(&mut self, out: &mut String, text: &str) {
        self.flush(out);
        out.push_str(text);
    }
    fn operator(&mut self, out: &mut String, op: &str, flags: u32) {
        if flags & NEWLINE_BEFORE != 0 {
            self.pending_newline = true;
        }
        self.flush(out);
        if flags & NEWLINE_BEFORE == 0
            && flags & OPTIONAL_SPACE_BEFORE != 0
            && !out.is_empty()
            && !out.ends_with([' ', '\n'])
        {
            out.push(' ');
        }
        out.push_str(op);
        if flags & (NEWLINE_AFTER | HARD_NEWLINE_AFTER) != 0 {
            self.pending_newline = true;
        } else if flags & OPTIONAL_SPACE_AFTER != 0 {
            out.push(' ');
        }
    }
    fn newline(&mut self, _out: &mut String) {
        self.pending_newline = true;
    }
    fn newline_if_not_empty(&mut self, out: &mut String) {
        if !out.is_empty() {
            self.pending_newline = true;
        }
    }
    fn indent_in(&mut self) {
        self.indent += 1;
    }
    fn indent_out(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }
}

/// Serializes a compiled tree under the selected output mode.
pub fn assemble(tree: &Tree, root: NodeId, mode: OutputMode, session: &SessionRef) -> String {
    let format: Box<dyn Format> = match mode {
        OutputMode::Compressed => Box::new(Compressed),
        OutputMode::Tidy => Box::new(Tidy),
        OutputMode::Compact => Box::new(Compact),
        OutputMode::Expanded => Box::new(Expanded {
            indent: 0,
            pending_newline: false,
        }),
    };
    let mut assembler = Assembler {
        tree,
        format,
        out: String::new(),
        precision: session.precision(),
    };
    assembler.output_list(root);
    let mut out = assembler.out;
    while out.ends_with('\n') {
        out.pop();
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

struct Assembler<'t> {
    tree: &'t Tree,
    format: Box<dyn Format>,
    out: String,
    precision: usize,
}

impl<'t> Assembler<'t> {
    fn text(&mut self, text: &str) {
        self.format.text(&mut self.out, text);
    }

    fn operator(&mut self, op: &str, flags: u32) {
        self.format.operator(&mut self.out, op, flags);
    }

    fn output_list(&mut self, parent: NodeId) {
        for child in self.tree.children(parent).to_vec() {
            match self.tree.node_type(child) {
                NodeType::ComponentValue => self.output_rule(child),
                NodeType::AtKeyword => self.output_at_keyword(child),
                NodeType::Comment => self.output_comment(child),
                NodeType::Declaration => {
                    // Declarations can sit directly in at-rule blocks
                    // (@font-face and friends).
                    self.output_declaration(child, false);
                }
                _ => {}
            }
        }
    }

    /// A qualified rule; rules whose block ended up empty produce nothing.
    fn output_rule(&mut self, rule: NodeId) {
        let Some(&block) = self.tree.children(rule).last() else {
            return;
        };
        if !self.tree.node(block).is(NodeType::OpenCurlybracket) {
            return;
        }
        if self.tree.child_count(block) == 0 {
            return;
        }
        let mut first = true;
        for child in self.tree.children(rule).to_vec() {
            if !self.tree.node(child).is(NodeType::Arg) {
                continue;
            }
            if !first {
                self.operator(",", OPTIONAL_SPACE_AFTER);
            }
            first = false;
            self.output_selector(child);
        }
        self.output_block(block);
    }

    fn output_block(&mut self, block: NodeId) {
        self.operator(
            "{",
            OPTIONAL_SPACE_BEFORE | OPTIONAL_SPACE_AFTER_OR_NEWLINE,
        );
        self.format.indent_in();
        let children = self.tree.children(block).to_vec();
        for (index, &child) in children.iter().enumerate() {
            let last = index + 1 == children.len();
            match self.tree.node_type(child) {
                NodeType::Declaration => self.output_declaration(child, last),
                NodeType::ComponentValue => self.output_rule(child),
                NodeType::AtKeyword => self.output_at_keyword(child),
                NodeType::Comment => self.output_comment(child),
                NodeType::Frame => self.output_frame(child, last),
                _ => {}
            }
        }
        self.format.indent_out();
        self.operator(
            "}",
            OPTIONAL_SPACE_BEFORE_OR_NEWLINE | OPTIONAL_NEWLINE_AFTER,
        );
    }

    fn output_selector(&mut self, arg: NodeId) {
        let children = self.tree.children(arg).to_vec();
        let combinator = |assembler: &Self, id: NodeId| {
            matches!(
                assembler.tree.node_type(id),
                NodeType::GreaterThan | NodeType::Add | NodeType::Preceded
            )
        };
        for (index, &child) in children.iter().enumerate() {
            match self.tree.node_type(child) {
                NodeType::Whitespace => {
                    // Blanks around an explicit combinator are its own
                    // spacing decision, not a descendant combinator.
                    let next_to_combinator = children
                        .get(index + 1)
                        .is_some_and(|&next| combinator(self, next))
                        || (index > 0 && combinator(self, children[index - 1]));
                    if !next_to_combinator {
                        self.text(" ");
                    }
                }
                NodeType::GreaterThan => self.operator(">", OPTIONAL_SPACES),
                NodeType::Add => self.operator("+", OPTIONAL_SPACES),
                NodeType::Preceded => self.operator("~", OPTIONAL_SPACES),
                _ => self.output_value(child),
            }
        }
    }

    fn output_declaration(&mut self, declaration: NodeId, last: bool) {
        let node = self.tree.node(declaration);
        let name = escape_id(&node.string);
        let important = node.has_flag("important");
        self.text(&name);
        self.operator(":", OPTIONAL_SPACE_AFTER);
        for arg in self.tree.children(declaration).to_vec() {
            if !self.tree.node(arg).is(NodeType::Arg) {
                continue;
            }
            self.output_value_list(arg);
            match self.tree.node(arg).integer {
                1 => self.operator(",", OPTIONAL_SPACE_AFTER),
                2 => self.text("/"),
                _ => {}
            }
        }
        if important {
            self.operator("!important", OPTIONAL_SPACE_BEFORE);
        }
        let mut flags = OPTIONAL_SPACE_AFTER_OR_NEWLINE;
        if last {
            flags |= OPTIONAL_OPERATOR;
        }
        self.operator(";", flags);
    }

    /// The children of a value ARG, space separated where the tree says so.
    fn output_value_list(&mut self, parent: NodeId) {
        let mut after_comma = false;
        for child in self.tree.children(parent).to_vec() {
            match self.tree.node_type(child) {
                NodeType::Whitespace => {
                    if !after_comma {
                        self.text(" ");
                    }
                }
                NodeType::Comma => {
                    self.operator(",", OPTIONAL_SPACE_AFTER);
                    after_comma = true;
                    continue;
                }
                _ => self.output_value(child),
            }
            after_comma = false;
        }
    }

    fn output_value(&mut self, id: NodeId) {
        let node = self.tree.node(id);
        match node.node_type {
            NodeType::Identifier => {
                let text = escape_id(&node.string);
                self.text(&text);
            }
            NodeType::String => {
                let text = quote_string(&node.string);
                self.text(&text);
            }
            NodeType::Integer => {
                let text = format!("{}{}", node.integer, node.string);
                self.text(&text);
            }
            NodeType::DecimalNumber => {
                let text = format!(
                    "{}{}",
                    decimal_to_string(node.decimal, self.precision),
                    node.string
                );
                self.text(&text);
            }
            NodeType::Percent => {
                let text = format!(
                    "{}%",
                    decimal_to_string(node.decimal * 100.0, self.precision)
                );
                self.text(&text);
            }
            NodeType::Boolean => {
                self.text(if node.boolean { "true" } else { "false" });
            }
            NodeType::Null => {}
            NodeType::Url => {
                let text = output_url(&node.string);
                self.text(&text);
            }
            NodeType::Hash => {
                let text = format!("#{}", node.string);
                self.text(&text);
            }
            NodeType::Placeholder => {
                let text = format!("%{}", escape_id(&node.string));
                self.text(&text);
            }
            NodeType::UnicodeRange => {
                let text = unicode_range_to_string(node.integer);
                self.text(&text);
            }
            NodeType::AnPlusB => {
                let text = NthChild::from_nth(node.integer).to_string();
                self.text(&text);
            }
            NodeType::Function => {
                let text = format!("{}(", node.string);
                self.text(&text);
                self.output_value_list(id);
                self.text(")");
            }
            NodeType::OpenParenthesis => {
                self.text("(");
                self.output_value_list(id);
                self.text(")");
            }
            NodeType::OpenSquarebracket => {
                self.text("[");
                self.output_value_list(id);
                self.text("]");
            }
            NodeType::List => {
                let children = self.tree.children(id).to_vec();
                for (index, &child) in children.iter().enumerate() {
                    if index > 0 {
                        self.text(" ");
                    }
                    self.output_value(child);
                }
            }
            NodeType::Whitespace => self.text(" "),
            NodeType::Colon => self.text(":"),
            NodeType::Period => self.text("."),
            NodeType::Multiply => self.text("*"),
            NodeType::Scope => self.text("|"),
            NodeType::Divide => self.text("/"),
            NodeType::Exclamation => self.text("!"),
            NodeType::Equal => self.operator("=", 0),
            NodeType::NotEqual => self.operator("!=", 0),
            NodeType::IncludeMatch => self.operator("~=", 0),
            NodeType::PrefixMatch => self.operator("^=", 0),
            NodeType::SuffixMatch => self.operator("$=", 0),
            NodeType::SubstringMatch => self.operator("*=", 0),
            NodeType::DashMatch => self.operator("|=", 0),
            NodeType::GreaterThan => self.operator(">", OPTIONAL_SPACES),
            NodeType::Add => self.operator("+", OPTIONAL_SPACES),
            NodeType::Subtract => self.operator("-", OPTIONAL_SPACES),
            NodeType::Comment => self.output_comment(id),
            _ => {}
        }
    }

    fn output_comment(&mut self, id: NodeId) {
        let node = self.tree.node(id);
        self.format.newline_if_not_empty(&mut self.out);
        if node.integer == 1 {
            // A preserved C++ style comment keeps its line form.
            let text = node
                .string
                .lines()
                .map(|line| format!("// {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            self.text(&text);
        } else {
            let text = format!("/* {} */", node.string);
            self.text(&text);
        }
        self.format.newline(&mut self.out);
        // Comments keep their own line even in compressed output.
        if !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn output_at_keyword(&mut self, at: NodeId) {
        let node = self.tree.node(at);
        let name = format!("@{}", node.string);
        self.text(&name);
        let children = self.tree.children(at).to_vec();
        let block = children
            .last()
            .copied()
            .filter(|&last| self.tree.node(last).is(NodeType::OpenCurlybracket));
        let prelude = &children[..children.len() - block.is_some() as usize];
        if !prelude.is_empty() {
            self.text(" ");
            for &child in prelude {
                match self.tree.node_type(child) {
                    NodeType::Whitespace => self.text(" "),
                    _ => self.output_value(child),
                }
            }
        }
        match block {
            Some(block) => self.output_block(block),
            None => self.operator(";", OPTIONAL_SPACE_AFTER_OR_NEWLINE | OPTIONAL_NEWLINE_AFTER),
        }
    }

    /// One @keyframes frame: the normalized position then the block.
    fn output_frame(&mut self, frame: NodeId, _last: bool) {
        let position = self.tree.node(frame).decimal;
        if position == 0.0 {
            self.text("from");
        } else if position == 1.0 {
            self.text("to");
        } else {
            let text = format!("{}%", decimal_to_string(position * 100.0, self.precision));
            self.text(&text);
        }
        // Frames borrow the rule-block shape: the frame node itself plays
        // the block.
        self.operator(
            "{",
            OPTIONAL_SPACE_BEFORE | OPTIONAL_SPACE_AFTER_OR_NEWLINE,
        );
        self.format.indent_in();
        let children = self.tree.children(frame).to_vec();
        for (index, &child) in children.iter().enumerate() {
            let last = index + 1 == children.len();
            if self.tree.node(child).is(NodeType::Declaration) {
                self.output_declaration(child, last);
            }
        }
        self.format.indent_out();
        self.operator(
            "}",
            OPTIONAL_SPACE_BEFORE_OR_NEWLINE | OPTIONAL_NEWLINE_AFTER,
        );
    }
}

/// Escapes a string for CSS identifier positions: code points that cannot
/// start or continue an identifier are backslash escaped, digits in leading
/// position take the `\3X ` hex form with a disambiguating blank.
pub fn escape_id(text: &str) -> String {
    let mut out = String::new();
    let chars: Vec<char> = text.chars().collect();
    for (index, &c) in chars.iter().enumerate() {
        let legal = if index == 0 {
            c.is_ascii_alphabetic() || c == '_' || c >= '\u{80}' || (c == '-' && chars.len() > 1)
        } else if index == 1 && chars[0] == '-' {
            c.is_ascii_alphabetic() || c == '_' || c >= '\u{80}'
        } else {
            c.is_ascii_alphanumeric() || c == '_' || c == '-' || c >= '\u{80}'
        };
        if legal {
            out.push(c);
            continue;
        }
        if c.is_ascii_graphic() && !c.is_ascii_hexdigit() {
            out.push('\\');
            out.push(c);
            continue;
        }
        // Hex escape, blank-terminated when the next character could be
        // read as part of the escape.
        out.push_str(&format!("\\{:x}", c as u32));
        let next_is_hexish = chars
            .get(index + 1)
            .is_some_and(|next| next.is_ascii_hexdigit() || *next == ' ');
        if next_is_hexish {
            out.push(' ');
        }
    }
    out
}

/// Picks the quote style needing the fewest escapes (double quotes win
/// ties) and escapes the content accordingly.
fn quote_string(text: &str) -> String {
    let doubles = text.matches('"').count();
    let singles = text.matches('\'').count();
    let quote = if doubles > singles { '\'' } else { '"' };
    let mut out = String::new();
    out.push(quote);
    for c in text.chars() {
        if c == quote || c == '\\' {
            out.push('\\');
            out.push(c);
        } else if c == '\n' {
            out.push_str("\\a ");
        } else {
            out.push(c);
        }
    }
    out.push(quote);
    out
}

/// `url(...)` prints its target raw unless a character would break the
/// direct form.
fn output_url(url: &str) -> String {
    let needs_quotes = url.is_empty()
        || url
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '"' | '\'' | '(' | ')' | '\\') || (c as u32) < 0x20);
    if needs_quotes {
        format!("url({})", quote_string(url))
    } else {
        format!("url({url})")
    }
}

fn unicode_range_to_string(packed: i64) -> String {
    let start = (packed & 0xFFFF_FFFF) as u32;
    let end = (packed >> 32) as u32;
    if start == end {
        return format!("U+{start:x}");
    }
    // Reconstruct the wildcard form when the range is exactly a mask.
    let mut wildcards = 0;
    let mut masked_start = start;
    let mut masked_end = end;
    while wildcards < 6 && masked_start % 16 == 0 && masked_end % 16 == 15 {
        wildcards += 1;
        masked_start /= 16;
        masked_end /= 16;
    }
    if wildcards > 0 && masked_start == masked_end {
        return format!("U+{:x}{}", masked_start, "?".repeat(wildcards));
    }
    format!("U+{start:x}-{end:x}")
}

/// Formats a decimal under the current precision, dropping trailing zeros
/// and the leading zero of a pure fraction.
fn decimal_to_string(value: f64, precision: usize) -> String {
    let mut text = format!("{value:.precision$}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    if text == "-0" {
        text = "0".to_string();
    }
    if let Some(rest) = text.strip_prefix("0.") {
        text = format!(".{rest}");
    } else if let Some(rest) = text.strip_prefix("-0.") {
        text = format!("-.{rest}");
    }
    text
}
