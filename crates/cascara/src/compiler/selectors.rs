use crate::diagnostics::SessionRef;
use crate::node::{Node, NodeId, NodeType, Tree};
use crate::nth_child::NthChild;

/// Pseudo-classes that take no argument.
const PSEUDO_CLASSES: &[&str] = &[
    "active",
    "checked",
    "default",
    "disabled",
    "empty",
    "enabled",
    "first",
    "first-child",
    "first-of-type",
    "focus",
    "focus-within",
    "hover",
    "in-range",
    "indeterminate",
    "invalid",
    "last-child",
    "last-of-type",
    "link",
    "only-child",
    "only-of-type",
    "optional",
    "out-of-range",
    "read-only",
    "read-write",
    "required",
    "root",
    "scope",
    "target",
    "valid",
    "visited",
];

/// Pseudo-elements; the CSS 2 ones also accept the single-colon form.
const PSEUDO_ELEMENTS: &[&str] = &[
    "after",
    "backdrop",
    "before",
    "first-letter",
    "first-line",
    "grammar-error",
    "marker",
    "placeholder",
    "selection",
    "spelling-error",
];

const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["after", "before", "first-letter", "first-line"];

/// Pseudo-classes written as functions.
const PSEUDO_FUNCTIONS: &[&str] = &[
    "lang",
    "not",
    "nth-child",
    "nth-last-child",
    "nth-last-of-type",
    "nth-of-type",
];

/// ISO 639-1 codes accepted by `:lang()`.
const LANGUAGES: &[&str] = &[
    "ar", "bg", "bn", "ca", "cs", "cy", "da", "de", "el", "en", "es", "et", "eu", "fa", "fi",
    "fr", "ga", "gd", "he", "hi", "hr", "hu", "id", "is", "it", "ja", "ko", "lt", "lv", "mn",
    "ms", "nb", "nl", "nn", "no", "pa", "pl", "pt", "ro", "ru", "sk", "sl", "sq", "sr", "sv",
    "sw", "ta", "te", "th", "tr", "uk", "ur", "vi", "zh",
];

/// ISO 3166-1 alpha-2 codes accepted as the country half of `:lang()`.
const COUNTRIES: &[&str] = &[
    "ar", "at", "au", "be", "bg", "br", "ca", "ch", "cl", "cn", "co", "cz", "de", "dk", "ee",
    "eg", "es", "fi", "fr", "gb", "gr", "hk", "hr", "hu", "id", "ie", "il", "in", "is", "it",
    "jp", "kr", "lt", "lu", "lv", "ma", "mx", "my", "nl", "no", "nz", "pe", "ph", "pl", "pt",
    "ro", "rs", "ru", "se", "sg", "si", "sk", "th", "tr", "tw", "ua", "us", "vn", "za",
];

/// Fields whose value uses '/' as an argument separator rather than a
/// division.
const SLASH_FIELDS: &[&str] = &[
    "background",
    "border-image",
    "border-radius",
    "font",
    "grid-area",
    "grid-column",
    "grid-row",
    "mask",
];

pub fn field_uses_slash(field: &str) -> bool {
    SLASH_FIELDS.contains(&field)
}

/// Validates every selector (ARG) of a qualified rule. Problems are
/// reported as errors; the caller checks the sink and abandons the rule.
pub fn validate_selector_list(tree: &mut Tree, component: NodeId, session: &SessionRef) {
    for child in tree.children(component).to_vec() {
        if tree.node(child).is(NodeType::Arg) {
            validate_selector(tree, child, session);
        }
    }
}

/// One selector: a sequence of simple terms separated by combinators.
fn validate_selector(tree: &mut Tree, arg: NodeId, session: &SessionRef) {
    let mut ids_seen: Vec<String> = Vec::new();
    let mut last_was_combinator = false;
    let mut index = 0;
    while index < tree.child_count(arg) {
        let child = tree.child(arg, index);
        let node_type = tree.node_type(child);
        let pos = tree.node(child).pos.clone();
        match node_type {
            NodeType::Whitespace => {
                // Implied descendant combinator; the parser trims edges so
                // a term always follows.
                index += 1;
            }
            NodeType::GreaterThan | NodeType::Add | NodeType::Preceded => {
                last_was_combinator = true;
                index += 1;
                continue;
            }
            NodeType::Reference => {
                if index != 0 {
                    session.error(
                        &pos,
                        "the '&' reference is only allowed at the beginning of a selector",
                    );
                }
                index += 1;
            }
            NodeType::Placeholder | NodeType::Identifier | NodeType::Multiply => {
                index += 1;
            }
            NodeType::Scope => {
                index += 1;
                let next = (index < tree.child_count(arg)).then(|| tree.child(arg, index));
                let valid = next.is_some_and(|id| {
                    matches!(
                        tree.node_type(id),
                        NodeType::Identifier | NodeType::Multiply
                    )
                });
                if !valid {
                    session.error(
                        &pos,
                        "a scope '|' must be followed by an element name or '*'",
                    );
                    return;
                }
                index += 1;
            }
            NodeType::Hash => {
                let id = tree.node(child).string.clone();
                if ids_seen.contains(&id) {
                    session.error(
                        &pos,
                        &format!("the same id \"#{id}\" appears twice in one selector"),
                    );
                } else if !ids_seen.is_empty() {
                    session.info(
                        &pos,
                        "a selector with multiple distinct ids is never going to match more than one element",
                    );
                }
                ids_seen.push(id);
                index += 1;
            }
            NodeType::Period => {
                index += 1;
                let next = (index < tree.child_count(arg)).then(|| tree.child(arg, index));
                let valid = next.is_some_and(|id| tree.node(id).is(NodeType::Identifier));
                if !valid {
                    session.error(&pos, "a class name must follow the '.'");
                    return;
                }
                index += 1;
            }
            NodeType::Colon => {
                index += 1;
                if !validate_pseudo(tree, arg, &mut index, session) {
                    return;
                }
            }
            NodeType::OpenSquarebracket => {
                match validate_attribute(tree, arg, index, session) {
                    Some(advance) => index += advance,
                    None => return,
                }
            }
            _ => {
                session.error(&pos, &format!("unexpected {node_type:?} in a selector"));
                return;
            }
        }
        if node_type != NodeType::Whitespace {
            last_was_combinator = false;
        }
    }
    if last_was_combinator {
        let pos = tree.node(arg).pos.clone();
        session.error(&pos, "a selector cannot end with a combinator");
    }
}

/// Everything after a ':' — pseudo-class, pseudo-element or pseudo
/// function. `index` points right after the colon and is advanced past the
/// construct.
fn validate_pseudo(
    tree: &mut Tree,
    arg: NodeId,
    index: &mut usize,
    session: &SessionRef,
) -> bool {
    let count = tree.child_count(arg);
    if *index >= count {
        let pos = tree.node(arg).pos.clone();
        session.error(&pos, "a selector cannot end with a lone ':'");
        return false;
    }
    let child = tree.child(arg, *index);
    let node = tree.node(child);
    let pos = node.pos.clone();
    match node.node_type {
        NodeType::Colon => {
            // '::' pseudo-element.
            *index += 1;
            if *index >= count {
                session.error(&pos, "a pseudo-element name must follow the '::'");
                return false;
            }
            let name_id = tree.child(arg, *index);
            let name_node = tree.node(name_id);
            let name = name_node.string.to_ascii_lowercase();
            if !name_node.is(NodeType::Identifier) || !PSEUDO_ELEMENTS.contains(&name.as_str()) {
                session.error(&pos, &format!("unknown pseudo-element \"::{name}\""));
                return false;
            }
            *index += 1;
            if *index != count {
                session.error(&pos, "a pseudo-element must be the last part of a selector");
                return false;
            }
            true
        }
        NodeType::Identifier => {
            let name = node.string.to_ascii_lowercase();
            if PSEUDO_CLASSES.contains(&name.as_str()) {
                *index += 1;
                return true;
            }
            if LEGACY_PSEUDO_ELEMENTS.contains(&name.as_str()) {
                // CSS 2 pseudo-elements with a single colon.
                *index += 1;
                if *index != count {
                    session
                        .error(&pos, "a pseudo-element must be the last part of a selector");
                    return false;
                }
                return true;
            }
            session.error(&pos, &format!("unknown pseudo-class \":{name}\""));
            false
        }
        NodeType::Function => {
            let name = node.string.clone();
            if !PSEUDO_FUNCTIONS.contains(&name.as_str()) {
                session.error(&pos, &format!("unknown pseudo-function \":{name}()\""));
                return false;
            }
            let valid = match name.as_str() {
                "not" => validate_not(tree, child, session),
                "lang" => validate_lang(tree, child, session),
                _ => validate_nth(tree, child, session),
            };
            *index += 1;
            valid
        }
        _ => {
            session.error(&pos, "expected a pseudo-class or pseudo-element after ':'");
            false
        }
    }
}

/// `:not(...)` accepts exactly one simple term.
fn validate_not(tree: &mut Tree, function: NodeId, session: &SessionRef) -> bool {
    let pos = tree.node(function).pos.clone();
    let children: Vec<NodeId> = tree
        .children(function)
        .iter()
        .copied()
        .filter(|&id| !tree.node(id).is(NodeType::Whitespace))
        .collect();
    let types: Vec<NodeType> = children
        .iter()
        .map(|&id| tree.node_type(id))
        .collect();
    let valid = match types.as_slice() {
        [NodeType::Hash]
        | [NodeType::Identifier]
        | [NodeType::Multiply]
        | [NodeType::OpenSquarebracket] => true,
        [NodeType::Period, NodeType::Identifier] => true,
        [NodeType::Colon, NodeType::Identifier] => {
            let name = tree.node(children[1]).string.to_ascii_lowercase();
            PSEUDO_CLASSES.contains(&name.as_str())
        }
        _ => false,
    };
    if !valid {
        session.error(&pos, "':not()' accepts exactly one simple term");
        return false;
    }
    if types == [NodeType::OpenSquarebracket] {
        return validate_attribute_children(tree, children[0], session);
    }
    true
}

/// `:lang(xx)` or `:lang(xx-YY)`.
fn validate_lang(tree: &mut Tree, function: NodeId, session: &SessionRef) -> bool {
    let pos = tree.node(function).pos.clone();
    let children: Vec<NodeId> = tree
        .children(function)
        .iter()
        .copied()
        .filter(|&id| !tree.node(id).is(NodeType::Whitespace))
        .collect();
    let [name_id] = children.as_slice() else {
        session.error(&pos, "':lang()' expects exactly one language name");
        return false;
    };
    let name_node = tree.node(*name_id);
    if !name_node.is(NodeType::Identifier) {
        session.error(&pos, "':lang()' expects exactly one language name");
        return false;
    }
    let name = name_node.string.to_ascii_lowercase();
    let (language, country) = match name.split_once('-') {
        Some((language, country)) => (language, Some(country)),
        None => (name.as_str(), None),
    };
    if !LANGUAGES.contains(&language) {
        session.error(&pos, &format!("unknown language \"{language}\" in ':lang()'"));
        return false;
    }
    if let Some(country) = country {
        if !COUNTRIES.contains(&country) {
            session.error(&pos, &format!("unknown country \"{country}\" in ':lang()'"));
            return false;
        }
    }
    true
}

/// `:nth-child(...)` and friends: the argument tokens must form a valid
/// An+B value; on success they are replaced by a single AN_PLUS_B node.
fn validate_nth(tree: &mut Tree, function: NodeId, session: &SessionRef) -> bool {
    let pos = tree.node(function).pos.clone();
    let mut text = String::new();
    for &child in tree.children(function) {
        let node = tree.node(child);
        match node.node_type {
            NodeType::Whitespace => {}
            NodeType::Identifier => text.push_str(&node.string),
            NodeType::Integer => {
                if text.is_empty() {
                    text.push_str(&format!("{}{}", node.integer, node.string));
                } else {
                    text.push_str(&format!("{:+}{}", node.integer, node.string));
                }
            }
            NodeType::Add => text.push('+'),
            NodeType::Subtract => text.push('-'),
            _ => {
                session.error(
                    &pos,
                    &format!("unexpected {:?} in an An+B value", node.node_type),
                );
                return false;
            }
        }
    }
    let mut nth = NthChild::new(0, 0);
    if !nth.parse(&text) {
        session.error(&pos, nth.error());
        return false;
    }
    let mut replacement = Node::new(NodeType::AnPlusB, pos);
    replacement.integer = nth.get_nth();
    let replacement = tree.add(replacement);
    tree.node_mut(function).children = vec![replacement];
    true
}

/// `[attr]` / `[attr op value]`; `[attr != value]` rewrites in place to
/// `:not([attr = value])`. Returns how many children of `arg` the
/// construct now spans, or None when invalid.
fn validate_attribute(
    tree: &mut Tree,
    arg: NodeId,
    index: usize,
    session: &SessionRef,
) -> Option<usize> {
    let bracket = tree.child(arg, index);
    if !validate_attribute_children(tree, bracket, session) {
        return None;
    }
    let not_equal = tree
        .children(bracket)
        .iter()
        .copied()
        .position(|id| tree.node(id).is(NodeType::NotEqual));
    let Some(op_index) = not_equal else {
        return Some(1);
    };
    let pos = tree.node(bracket).pos.clone();
    let equal = tree.add_typed(NodeType::Equal, pos.clone());
    tree.replace_child(bracket, op_index, equal);
    tree.remove_child(arg, index);
    let colon = tree.add_typed(NodeType::Colon, pos.clone());
    let mut not_function = Node::new(NodeType::Function, pos);
    not_function.string = "not".to_string();
    let not_function = tree.add(not_function);
    tree.append_child(not_function, bracket);
    tree.insert_child(arg, index, not_function);
    tree.insert_child(arg, index, colon);
    Some(2)
}

fn validate_attribute_children(
    tree: &mut Tree,
    bracket: NodeId,
    session: &SessionRef,
) -> bool {
    let pos = tree.node(bracket).pos.clone();
    let children: Vec<NodeId> = tree
        .children(bracket)
        .iter()
        .copied()
        .filter(|&id| !tree.node(id).is(NodeType::Whitespace))
        .collect();
    let valid = match children.len() {
        1 => tree.node(children[0]).is(NodeType::Identifier),
        3 => {
            tree.node(children[0]).is(NodeType::Identifier)
                && matches!(
                    tree.node_type(children[1]),
                    NodeType::Equal
                        | NodeType::NotEqual
                        | NodeType::IncludeMatch
                        | NodeType::PrefixMatch
                        | NodeType::SuffixMatch
                        | NodeType::SubstringMatch
                        | NodeType::DashMatch
                )
                && matches!(
                    tree.node_type(children[2]),
                    NodeType::Identifier
                        | NodeType::String
                        | NodeType::Integer
                        | NodeType::DecimalNumber
                )
        }
        _ => false,
    };
    if !valid {
        session.error(
            &pos,
            "an attribute check must be '[name]' or '[name operator value]'",
        );
        return false;
    }
    true
}
