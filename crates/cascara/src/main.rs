use std::env;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use cascara::{
    compile_file, compile_text, compile_tree, render_diagnostics, CascaraError, CompileOptions,
    OutputMode, Session,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CascaraError::Diagnostics) => ExitCode::FAILURE,
        Err(CascaraError::Exit(code)) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CascaraError> {
    let mut options = CompileOptions::default();
    let mut input: Option<String> = None;
    let mut output: Option<PathBuf> = None;
    let mut dump_ast = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "--version" => {
                println!("cascara {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "-o" | "--output" => {
                let Some(path) = args.next() else {
                    return Err(CascaraError::InvalidPath(
                        "-o expects a file name".to_string(),
                    ));
                };
                output = Some(PathBuf::from(path));
            }
            "--style" => {
                let Some(name) = args.next() else {
                    return Err(CascaraError::InvalidPath(
                        "--style expects one of compact, compressed, expanded, tidy".to_string(),
                    ));
                };
                let Some(mode) = OutputMode::parse(&name) else {
                    return Err(CascaraError::InvalidPath(format!(
                        "unknown style \"{name}\", expected compact, compressed, expanded or tidy"
                    )));
                };
                options.mode = mode;
            }
            "-I" => {
                let Some(path) = args.next() else {
                    return Err(CascaraError::InvalidPath(
                        "-I expects a directory".to_string(),
                    ));
                };
                options.search_paths.push(PathBuf::from(path));
            }
            "--precision" => {
                let Some(value) = args.next() else {
                    return Err(CascaraError::InvalidPath(
                        "--precision expects a number".to_string(),
                    ));
                };
                let Ok(precision) = value.parse::<usize>() else {
                    return Err(CascaraError::InvalidPath(format!(
                        "invalid precision \"{value}\""
                    )));
                };
                options.precision = precision.min(20);
            }
            "--empty-on-undefined" => {
                options.empty_on_undefined_variable = true;
            }
            "--dump-ast" => {
                dump_ast = true;
            }
            _ if arg.starts_with('-') && arg != "-" => {
                return Err(CascaraError::InvalidPath(format!(
                    "unknown option \"{arg}\", try --help"
                )));
            }
            _ => {
                if input.is_some() {
                    return Err(CascaraError::InvalidPath(
                        "only one input file is supported".to_string(),
                    ));
                }
                input = Some(arg);
            }
        }
    }

    let Some(input) = input else {
        print_help();
        return Ok(());
    };
    options.search_paths.push(PathBuf::from("."));

    let session = Session::new();
    let css = if input == "-" {
        let mut source = Vec::new();
        std::io::stdin().read_to_end(&mut source)?;
        let source = String::from_utf8_lossy(&source).into_owned();
        if dump_ast {
            let (tree, root) = compile_tree(&source, "-", &options, &session);
            serde_json::to_string_pretty(&tree.to_json(root))
                .map_err(|err| CascaraError::Io(std::io::Error::other(err)))?
                + "\n"
        } else {
            compile_text(&source, "-", &options, &session)
        }
    } else if dump_ast {
        let path = PathBuf::from(&input);
        let bytes = fs::read(&path)?;
        let source = String::from_utf8_lossy(&bytes).into_owned();
        let mut options = options.clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                options.search_paths.insert(0, parent.to_path_buf());
            }
        }
        let (tree, root) = compile_tree(&source, &input, &options, &session);
        serde_json::to_string_pretty(&tree.to_json(root))
            .map_err(|err| CascaraError::Io(std::io::Error::other(err)))?
            + "\n"
    } else {
        compile_file(PathBuf::from(&input).as_path(), &options, &session)?
    };

    let diagnostics = session.diagnostics();
    if !diagnostics.is_empty() {
        eprintln!("{}", render_diagnostics(&diagnostics));
    }

    match output {
        Some(path) => fs::write(path, css)?,
        None => print!("{css}"),
    }

    if session.error_count() > 0 {
        return Err(CascaraError::Diagnostics);
    }
    Ok(())
}

fn print_help() {
    println!("cascara -- a CSS preprocessor");
    println!();
    println!("usage: cascara [options] <input.scss | ->");
    println!();
    println!("options:");
    println!("  -h, --help            print this help and exit");
    println!("      --version         print the version and exit");
    println!("  -o, --output <file>   write the CSS to <file> instead of stdout");
    println!("      --style <name>    compact, compressed, expanded (default) or tidy");
    println!("  -I <dir>              add a directory to the @import search path");
    println!("      --precision <n>   number of decimal digits in the output (default 3)");
    println!("      --empty-on-undefined");
    println!("                        undefined variables expand to nothing instead of erroring");
    println!("      --dump-ast        print the compiled node tree as JSON instead of CSS");
}
