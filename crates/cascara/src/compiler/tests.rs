use std::io::Write;

use crate::assembler::{assemble, OutputMode};
use crate::compiler::Compiler;
use crate::diagnostics::{Session, SessionRef, Severity};
use crate::node::{NodeId, NodeType, Tree};
use crate::parser::Parser;

fn compile(src: &str) -> (Tree, NodeId, SessionRef) {
    compile_with(src, |_| {})
}

fn compile_with(src: &str, configure: impl FnOnce(&mut Compiler)) -> (Tree, NodeId, SessionRef) {
    let session = Session::new();
    let mut tree = Tree::new();
    let root = Parser::new(&mut tree, src, "test.scss", &session).stylesheet();
    let mut compiler = Compiler::new(tree, root, &session);
    configure(&mut compiler);
    compiler.compile();
    let (tree, root) = compiler.into_tree();
    (tree, root, session)
}

/// Compiles and assembles compressed, asserting no errors were reported.
fn css(src: &str) -> String {
    let (tree, root, session) = compile(src);
    assert_eq!(
        session.error_count(),
        0,
        "unexpected diagnostics: {:?}",
        session.diagnostics()
    );
    assemble(&tree, root, OutputMode::Compressed, &session)
}

/// Compressed output without asserting on diagnostics.
fn css_lossy(src: &str) -> (String, SessionRef) {
    let (tree, root, session) = compile(src);
    let out = assemble(&tree, root, OutputMode::Compressed, &session);
    (out, session)
}

fn collect_types(tree: &Tree, id: NodeId, found: &mut Vec<NodeType>) {
    found.push(tree.node_type(id));
    for &child in tree.children(id) {
        collect_types(tree, child, found);
    }
}

// ----- variables -----

#[test]
fn variable_substitution_leaves_no_variable_nodes() {
    let (tree, root, session) = compile("$x: 5px; div { width: $x; }");
    assert_eq!(session.error_count(), 0);
    let mut types = Vec::new();
    collect_types(&tree, root, &mut types);
    assert!(!types.contains(&NodeType::Variable));
    assert!(!types.contains(&NodeType::VariableFunction));
    let out = assemble(&tree, root, OutputMode::Compressed, &session);
    assert_eq!(out, "div{width:5px}\n");
}

#[test]
fn default_flag_does_not_override() {
    assert_eq!(css("$x: 1; $x: 2 !default; a { top: $x }"), "a{top:1}\n");
    assert_eq!(css("$x: 2 !default; a { top: $x }"), "a{top:2}\n");
}

#[test]
fn global_flag_stores_at_the_root() {
    let out = css("div { $x: 1px !global; width: $x } span { width: $x }");
    assert_eq!(out, "div{width:1px}span{width:1px}\n");
}

#[test]
fn scoped_variable_is_invisible_outside_its_block() {
    // The unset variable reports, then the emptied declaration reports too.
    let (out, session) = css_lossy("div { $x: 1; width: $x } span { top: $x }");
    assert!(session.error_count() >= 1);
    assert!(out.contains("div{width:1}"), "{out}");
    assert!(!out.contains("span"), "{out}");
}

#[test]
fn inner_scope_shadows_outer() {
    let out = css("$x: 1; div { $x: 2; width: $x } span { width: $x }");
    assert!(out.contains("div{width:2}"), "{out}");
    assert!(out.contains("span{width:1}"), "{out}");
}

#[test]
fn variables_can_reference_variables() {
    assert_eq!(css("$a: 2px; $b: $a; i { top: $b }"), "i{top:2px}\n");
}

#[test]
fn circular_variable_reference_reports_instead_of_hanging() {
    let (_, session) = css_lossy("$x: $x; a { top: $x }");
    assert!(session.error_count() >= 1);
}

#[test]
fn undefined_variable_reports() {
    let (out, session) = css_lossy("a { top: $nope }");
    assert!(session.error_count() >= 1);
    assert_eq!(out, "");
}

#[test]
fn empty_on_undefined_variable_substitutes_nothing() {
    let (tree, root, session) = compile_with("a { top: $nope; left: 1px }", |compiler| {
        compiler.set_empty_on_undefined_variable(true);
    });
    assert_eq!(session.error_count(), 1, "{:?}", session.diagnostics());
    // The declaration with the empty value still errors out, the sibling
    // declaration survives.
    let out = assemble(&tree, root, OutputMode::Compressed, &session);
    assert!(out.contains("left:1px"), "{out}");
}

#[test]
fn block_variable_expands_as_declarations() {
    let out = css("$theme: { color: red; top: 1px }; div { $theme; }");
    assert_eq!(out, "div{color:red;top:1px}\n");
}

#[test]
fn variable_list_value_keeps_all_tokens() {
    assert_eq!(
        css("$m: 1px 2px 3px 4px; a { margin: $m }"),
        "a{margin:1px 2px 3px 4px}\n"
    );
}

// ----- user functions / mixins -----

#[test]
fn variable_function_computes_with_arguments() {
    assert_eq!(
        css("$double($w): $w * 2; a { width: $double(4px) }"),
        "a{width:8px}\n"
    );
}

#[test]
fn variable_function_uses_declared_defaults() {
    assert_eq!(
        css("$pad($x: 3px): $x; a { padding: $pad() }"),
        "a{padding:3px}\n"
    );
}

#[test]
fn missing_required_argument_is_an_error() {
    let (_, session) = css_lossy("$f($a, $b): $a; div { top: $f(1) }");
    assert!(session.error_count() >= 1);
}

#[test]
fn extra_arguments_are_ignored() {
    assert_eq!(css("$f($a): $a; a { top: $f(1px, 2px, 3px) }"), "a{top:1px}\n");
}

#[test]
fn plain_mixin_inserts_its_block() {
    let out = css("@mixin box { border: 1px; } div { @include box; }");
    assert_eq!(out, "div{border:1px}\n");
}

#[test]
fn mixin_with_parameters_binds_them() {
    let out = css(
        "@mixin edge($size, $extra: 1px) { margin: $size $extra; }\n\
         div { @include edge(2px); }",
    );
    assert_eq!(out, "div{margin:2px 1px}\n");
}

#[test]
fn mixin_can_emit_whole_rules() {
    let out = css("@mixin all { i { top: 1px } } @include all;");
    assert_eq!(out, "i{top:1px}\n");
}

#[test]
fn unknown_mixin_reports() {
    let (_, session) = css_lossy("div { @include nothing; }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn mixin_body_sees_globals_but_cannot_mutate_them() {
    let out = css(
        "$color: red;\n\
         @mixin paint { color: $color; $color: blue; }\n\
         a { @include paint; }\n\
         b { color: $color; }",
    );
    assert!(out.contains("a{color:red}"), "{out}");
    assert!(out.contains("b{color:red}"), "{out}");
}

// ----- @if / @else -----

#[test]
fn if_true_keeps_only_the_first_branch() {
    let out = css("@if true { a { color: red } } @else { a { color: blue } }");
    assert_eq!(out, "a{color:red}\n");
}

#[test]
fn if_false_keeps_only_the_else_branch() {
    let out = css("@if false { a { color: red } } @else { a { color: blue } }");
    assert_eq!(out, "a{color:blue}\n");
}

#[test]
fn else_if_chain_takes_exactly_one_branch() {
    let src = "$x: 2;\n\
               @if $x = 1 { a { top: 1px } }\n\
               @else if $x = 2 { a { top: 2px } }\n\
               @else if $x = 2 { a { top: 22px } }\n\
               @else { a { top: 3px } }";
    assert_eq!(css(src), "a{top:2px}\n");
}

#[test]
fn else_chain_falls_through_to_the_last() {
    let src = "@if false { a { top: 1px } }\n\
               @else if false { a { top: 2px } }\n\
               @else { a { top: 3px } }";
    assert_eq!(css(src), "a{top:3px}\n");
}

#[test]
fn standalone_else_is_an_error() {
    let (_, session) = css_lossy("@else { a { color: red } }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn if_condition_can_use_variables() {
    let out = css("$wide: true; @if $wide { a { width: 100% } }");
    assert_eq!(out, "a{width:100%}\n");
}

// ----- @import -----

#[test]
fn import_splices_the_file_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut file = std::fs::File::create(dir.path().join("colors.scss")).expect("create");
    writeln!(file, "$main: #336699;\nb {{ color: $main }}").expect("write");

    let dir_path = dir.path().to_path_buf();
    let (tree, root, session) = compile_with(
        "@import \"colors\"; a { color: $main }",
        move |compiler| {
            compiler.clear_paths();
            compiler.add_path(dir_path);
        },
    );
    assert_eq!(
        session.error_count(),
        0,
        "unexpected diagnostics: {:?}",
        session.diagnostics()
    );
    let out = assemble(&tree, root, OutputMode::Tidy, &session);
    assert_eq!(out, "b{color:#336699}\na{color:#336699}\n");
}

#[test]
fn unresolvable_import_is_left_in_place_with_info() {
    let (out, session) = css_lossy("@import url(http://example.com/base.css); a { top: 0 }");
    assert_eq!(session.error_count(), 0);
    assert!(session
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Info));
    assert!(out.contains("@import url(http://example.com/base.css)"), "{out}");
}

#[test]
fn circular_import_reports_instead_of_recursing() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.scss"), "@import \"b\";\n").expect("write");
    std::fs::write(dir.path().join("b.scss"), "@import \"a\";\n").expect("write");

    let dir_path = dir.path().to_path_buf();
    let (_, _, session) = compile_with("@import \"a\";", move |compiler| {
        compiler.clear_paths();
        compiler.add_path(dir_path);
    });
    assert!(session.error_count() >= 1);
}

// ----- other at-keywords -----

#[test]
fn charset_utf8_is_dropped() {
    let (out, session) = css_lossy("@charset \"UTF-8\"; a { top: 0 }");
    assert_eq!(session.error_count(), 0);
    assert_eq!(out, "a{top:0}\n");
}

#[test]
fn other_charsets_are_an_error() {
    let (_, session) = css_lossy("@charset \"iso-8859-1\";");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn message_keywords_report_and_vanish() {
    let (out, session) = css_lossy(
        "@error \"boom\"; @warning \"careful\"; @debug \"peek\"; @info \"fyi\"; a { top: 0 }",
    );
    assert_eq!(out, "a{top:0}\n");
    let severities: Vec<Severity> = session.diagnostics().iter().map(|d| d.severity).collect();
    assert!(severities.contains(&Severity::Error));
    assert!(severities.contains(&Severity::Warning));
    assert!(severities.contains(&Severity::Debug));
    assert!(severities.contains(&Severity::Info));
    let messages: Vec<String> = session
        .diagnostics()
        .iter()
        .map(|d| d.message.clone())
        .collect();
    assert!(messages.contains(&"boom".to_string()));
}

#[test]
fn media_blocks_pass_through_and_compile_inside() {
    let out = css("@media screen { $x: 2px; div { width: $x } }");
    assert_eq!(out, "@media screen{div{width:2px}}\n");
}

#[test]
fn keyframes_positions_are_normalized() {
    let (tree, root, session) = compile(
        "@keyframes fade { from { opacity: 0 } 50% { opacity: 0.5 } to { opacity: 1 } }",
    );
    assert_eq!(session.error_count(), 0, "{:?}", session.diagnostics());
    let mut frames = Vec::new();
    fn collect_frames(tree: &Tree, id: NodeId, out: &mut Vec<f64>) {
        if tree.node_type(id) == NodeType::Frame {
            out.push(tree.node(id).decimal);
        }
        for &child in tree.children(id) {
            collect_frames(tree, child, out);
        }
    }
    collect_frames(&tree, root, &mut frames);
    assert_eq!(frames, vec![0.0, 0.5, 1.0]);
    let out = assemble(&tree, root, OutputMode::Compressed, &session);
    assert_eq!(
        out,
        "@keyframes fade{from{opacity:0}50%{opacity:.5}to{opacity:1}}\n"
    );
}

#[test]
fn keyframe_position_out_of_range_is_an_error() {
    let (_, session) = css_lossy("@keyframes x { 150% { opacity: 1 } }");
    assert!(session.error_count() >= 1);
}

// ----- nesting expansion -----

#[test]
fn nested_rule_cross_product() {
    let out = css("a { color: red; b { color: blue; } }");
    assert_eq!(out, "a{color:red}a b{color:blue}\n");
}

#[test]
fn nested_rules_hoist_in_order() {
    let out = css("a { color: red; b { color: blue; } i { color: green } }");
    let a = out.find("a{").expect("a rule");
    let ab = out.find("a b{").expect("a b rule");
    let ai = out.find("a i{").expect("a i rule");
    assert!(a < ab && ab < ai, "{out}");
}

#[test]
fn nested_rule_with_comma_lists_multiplies() {
    let out = css("a, b { c, d { color: red } }");
    assert_eq!(out, "a c,a d,b c,b d{color:red}\n");
}

#[test]
fn deeply_nested_rules_flatten_completely() {
    let out = css("a { b { c { color: red } } }");
    assert_eq!(out, "a b c{color:red}\n");
}

#[test]
fn reference_token_is_dropped_in_the_combination() {
    // '&' is a placeholder only: the parent text is prepended verbatim and
    // the reference itself vanishes, so `&:hover` becomes a descendant
    // `a :hover`, not `a:hover`.
    let out = css("a { &:hover { color: red } }");
    assert_eq!(out, "a :hover{color:red}\n");
}

#[test]
fn nested_declarations_join_with_dashes() {
    let out = css("a { font: { family: serif; size: 12px; } }");
    assert_eq!(out, "a{font-family:serif;font-size:12px}\n");
}

#[test]
fn doubly_nested_declarations_join_recursively() {
    let out = css("a { font: { variant: { caps: small-caps; } } }");
    assert_eq!(out, "a{font-variant-caps:small-caps}\n");
}

#[test]
fn empty_rules_are_removed() {
    assert_eq!(css("div {} a { top: 0 }"), "a{top:0}\n");
    // A rule emptied by hoisting its only nested rule disappears too.
    assert_eq!(css("a { b { top: 0 } }"), "a b{top:0}\n");
}

// ----- declarations -----

#[test]
fn declaration_expressions_are_evaluated() {
    assert_eq!(css("a { width: 2 * 3px + 4px }"), "a{width:10px}\n");
}

#[test]
fn invalid_declaration_is_skipped_but_siblings_survive() {
    let (out, session) = css_lossy("a { width: 1px + 1em; top: 0 }");
    assert_eq!(session.error_count(), 1);
    assert_eq!(out, "a{top:0}\n");
}

#[test]
fn slash_separated_fields_keep_the_slash() {
    assert_eq!(css("a { font: 12px/30px serif }"), "a{font:12px/30px serif}\n");
    // For ordinary fields the slash divides.
    assert_eq!(css("a { width: 600px/3 }"), "a{width:200px}\n");
}

#[test]
fn filter_fields_pass_through_with_a_warning() {
    let (out, session) = css_lossy("a { filter: alpha(opacity=50) }");
    assert_eq!(session.error_count(), 0);
    assert_eq!(session.warning_count(), 1);
    assert!(out.contains("filter:alpha(opacity=50)"), "{out}");
}

#[test]
fn field_names_are_case_folded() {
    assert_eq!(css("a { COLOR: red }"), "a{color:red}\n");
}

// ----- selector validation -----

#[test]
fn duplicate_id_in_one_selector_is_an_error() {
    let (out, session) = css_lossy("#a #a { color: red } b { top: 0 }");
    assert_eq!(session.error_count(), 1);
    // The bad rule is abandoned, the sibling still compiles.
    assert_eq!(out, "b{top:0}\n");
}

#[test]
fn distinct_ids_in_one_selector_is_only_info() {
    let (out, session) = css_lossy("#a #b { color: red }");
    assert_eq!(session.error_count(), 0);
    assert!(session
        .diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Info));
    assert_eq!(out, "#a #b{color:red}\n");
}

#[test]
fn unknown_pseudo_class_is_an_error() {
    let (_, session) = css_lossy("a:hovver { color: red }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn known_pseudo_classes_and_elements_validate() {
    assert_eq!(css("a:hover { top: 0 }"), "a:hover{top:0}\n");
    assert_eq!(css("p::first-line { top: 0 }"), "p::first-line{top:0}\n");
    assert_eq!(css("p:before { top: 0 }"), "p:before{top:0}\n");
}

#[test]
fn pseudo_element_must_be_last() {
    let (_, session) = css_lossy("p::before a { top: 0 }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn not_equal_attribute_rewrites_to_not() {
    let out = css("a[b!=c] { top: 0 }");
    assert_eq!(out, "a:not([b=c]){top:0}\n");
}

#[test]
fn attribute_operators_validate() {
    assert_eq!(css("a[b~=c] { top: 0 }"), "a[b~=c]{top:0}\n");
    assert_eq!(css("a[b] { top: 0 }"), "a[b]{top:0}\n");
    let (_, session) = css_lossy("a[3=c] { top: 0 }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn nth_child_arguments_normalize() {
    assert_eq!(css("b:nth-child(2n+1) { top: 0 }"), "b:nth-child(odd){top:0}\n");
    assert_eq!(css("b:nth-child(even) { top: 0 }"), "b:nth-child(2n){top:0}\n");
    let (_, session) = css_lossy("b:nth-child(bogus) { top: 0 }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn lang_checks_language_and_country() {
    assert_eq!(css("i:lang(fr) { top: 0 }"), "i:lang(fr){top:0}\n");
    assert_eq!(css("i:lang(fr-be) { top: 0 }"), "i:lang(fr-be){top:0}\n");
    let (_, session) = css_lossy("i:lang(qq) { top: 0 }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn not_accepts_exactly_one_simple_term() {
    assert_eq!(css("a:not(.busy) { top: 0 }"), "a:not(.busy){top:0}\n");
    let (_, session) = css_lossy("a:not(.busy b) { top: 0 }");
    assert_eq!(session.error_count(), 1);
}

#[test]
fn combinator_cannot_end_a_selector() {
    let (_, session) = css_lossy("a > { top: 0 }");
    assert_eq!(session.error_count(), 1);
}

// ----- comments -----

#[test]
fn preserved_comments_survive_to_the_output() {
    let out = css("/* @preserve (c) 2026 cascara */ a { top: 0 }");
    assert!(out.contains("/* @preserve (c) 2026 cascara */"), "{out}");
}
