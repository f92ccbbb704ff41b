use std::fs;
use std::path::{Path, PathBuf};

pub mod assembler;
pub mod compiler;
pub mod diagnostics;
pub mod expression;
pub mod lexer;
pub mod node;
pub mod nth_child;
pub mod parser;

pub use assembler::{assemble, OutputMode};
pub use compiler::Compiler;
pub use diagnostics::{
    render_diagnostic, render_diagnostics, Diagnostic, Position, PrecisionGuard, Session,
    SessionRef, Severity,
};
pub use lexer::Lexer;
pub use node::{Node, NodeId, NodeType, Tree};
pub use nth_child::NthChild;
pub use parser::Parser;

#[derive(Debug, thiserror::Error)]
pub enum CascaraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("compilation produced errors")]
    Diagnostics,
    #[error("fatal error, exit code {0}")]
    Exit(i32),
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub mode: OutputMode,
    pub precision: usize,
    pub search_paths: Vec<PathBuf>,
    pub empty_on_undefined_variable: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            mode: OutputMode::Expanded,
            precision: 3,
            search_paths: Vec::new(),
            empty_on_undefined_variable: false,
        }
    }
}

/// Runs the whole pipeline over a source string. Output is produced even
/// when diagnostics were reported; check the session to decide whether the
/// run should be treated as failed.
pub fn compile_text(
    source: &str,
    filename: &str,
    options: &CompileOptions,
    session: &SessionRef,
) -> String {
    let (tree, root) = compile_tree(source, filename, options, session);
    let _guard = PrecisionGuard::new(session, options.precision);
    assemble(&tree, root, options.mode, session)
}

/// Like `compile_text` but stops before assembly, handing back the
/// compiled node tree.
pub fn compile_tree(
    source: &str,
    filename: &str,
    options: &CompileOptions,
    session: &SessionRef,
) -> (Tree, NodeId) {
    let mut tree = Tree::new();
    let root = Parser::new(&mut tree, source, filename, session).stylesheet();
    let mut compiler = Compiler::new(tree, root, session);
    compiler.set_empty_on_undefined_variable(options.empty_on_undefined_variable);
    for path in &options.search_paths {
        compiler.add_path(path);
    }
    compiler.compile();
    compiler.into_tree()
}

/// Reads and compiles a file; the file's own directory heads the search
/// path list so sibling imports resolve naturally.
pub fn compile_file(
    path: &Path,
    options: &CompileOptions,
    session: &SessionRef,
) -> Result<String, CascaraError> {
    let bytes = fs::read(path)?;
    let source = String::from_utf8_lossy(&bytes);
    let mut options = options.clone();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            options.search_paths.insert(0, parent.to_path_buf());
        }
    }
    Ok(compile_text(
        &source,
        &path.display().to_string(),
        &options,
        session,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_text_runs_the_whole_pipeline() {
        let session = Session::new();
        let options = CompileOptions {
            mode: OutputMode::Compressed,
            ..CompileOptions::default()
        };
        let css = compile_text(
            "$width: 80px; div { width: $width; }",
            "inline.scss",
            &options,
            &session,
        );
        assert_eq!(session.error_count(), 0);
        assert_eq!(css, "div{width:80px}\n");
    }

    #[test]
    fn diagnostics_do_not_prevent_partial_output() {
        let session = Session::new();
        let options = CompileOptions {
            mode: OutputMode::Compressed,
            ..CompileOptions::default()
        };
        let css = compile_text(
            "div { width: $missing; color: red; }",
            "inline.scss",
            &options,
            &session,
        );
        assert!(session.error_count() > 0);
        assert_eq!(css, "div{color:red}\n");
    }

    #[test]
    fn compile_file_reports_missing_input() {
        let session = Session::new();
        let result = compile_file(
            Path::new("definitely/not/here.scss"),
            &CompileOptions::default(),
            &session,
        );
        assert!(matches!(result, Err(CascaraError::Io(_))));
    }
}
