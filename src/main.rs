use chtl_compiler::{compile_with, scan, CompileError, CompileOutput, Options};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "chtl")]
#[command(about = "CHTL - compile template documents to HTML, CSS and JavaScript")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile .chtl files to .html/.css/.js beside the input
    Compile {
        /// Path to .chtl file or directory
        #[arg(required_unless_present = "stdin")]
        file: Option<PathBuf>,

        /// Read from stdin and print the result
        #[arg(long)]
        stdin: bool,

        /// Print the result as JSON (with --stdin)
        #[arg(long)]
        json: bool,

        /// Fail on syntax errors instead of recovering
        #[arg(long)]
        strict: bool,

        /// Compile embedded fragments in parallel
        #[arg(long)]
        parallel: bool,
    },
    /// Show how the scanner splits a document into placeholders
    Scan {
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Compile output plus rendered diagnostics, for --json
#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    output: &'a CompileOutput,
    diagnostics: Vec<String>,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { file, stdin, json, strict, parallel } => {
            let options = Options { strict, parallel };
            if stdin {
                compile_stdin(json, &options);
            } else if let Some(path) = file {
                compile_path(&path, &options);
            } else {
                eprintln!("Error: provide a file/directory or use --stdin");
                std::process::exit(1);
            }
        }
        Commands::Scan { file, json } => scan_file(&file, json),
    }
}

fn read_source(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: cannot read {}: {}", path.display(), err);
            std::process::exit(1);
        }
    }
}

fn compile_stdin(json_output: bool, options: &Options) {
    let mut source = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut source) {
        eprintln!("Error: failed to read stdin: {}", err);
        std::process::exit(1);
    }

    let output = match compile_with(&source, options) {
        Ok(output) => output,
        Err(err) => {
            print_error(&err, &source, "<stdin>");
            std::process::exit(1);
        }
    };

    if json_output {
        let report = JsonReport {
            output: &output,
            diagnostics: output.diagnostics.iter().map(|d| d.render(&source, "<stdin>")).collect(),
        };
        match serde_json::to_string(&report) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("Error: {}", err);
                std::process::exit(1);
            }
        }
    } else {
        print_diagnostics(&output, &source, "<stdin>");
        println!("{}", output.html);
        if !output.css.is_empty() {
            println!("<style>\n{}</style>", output.css);
        }
        if !output.js.is_empty() {
            println!("<script>\n{}\n</script>", output.js);
        }
    }
}

fn compile_path(path: &Path, options: &Options) {
    if path.is_file() {
        if path.extension().is_none_or(|ext| ext != "chtl") {
            eprintln!("Error: {} is not a .chtl file", path.display());
            std::process::exit(1);
        }
        let start = Instant::now();
        let ok = compile_file(path, options);
        print_summary(usize::from(ok), start.elapsed());
        if !ok {
            std::process::exit(1);
        }
    } else if path.is_dir() {
        compile_directory(path, options);
    } else {
        eprintln!("Error: {} does not exist", path.display());
        std::process::exit(1);
    }
}

fn compile_directory(dir: &Path, options: &Options) {
    let start = Instant::now();
    let mut compiled = 0;
    let mut failed = 0;

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "chtl"))
    {
        if compile_file(entry.path(), options) {
            compiled += 1;
        } else {
            failed += 1;
        }
    }

    if compiled + failed == 0 {
        eprintln!("No .chtl files found in {}", dir.display());
        std::process::exit(1);
    }

    print_summary(compiled, start.elapsed());
    if failed > 0 {
        std::process::exit(1);
    }
}

/// Returns `false` when the file failed to compile or could not be written
fn compile_file(path: &Path, options: &Options) -> bool {
    let source = read_source(path);
    let filename = path.display().to_string();

    let output = match compile_with(&source, options) {
        Ok(output) => output,
        Err(err) => {
            print_error(&err, &source, &filename);
            return false;
        }
    };
    print_diagnostics(&output, &source, &filename);

    let targets = [("html", &output.html), ("css", &output.css), ("js", &output.js)];
    for (extension, content) in targets {
        if extension != "html" && content.is_empty() {
            continue;
        }
        let target = path.with_extension(extension);
        if let Err(err) = fs::write(&target, content) {
            eprintln!("Error: cannot write {}: {}", target.display(), err);
            return false;
        }
        debug!(path = %target.display(), bytes = content.len(), "written");
        print_generated(&target.display().to_string());
    }
    true
}

fn scan_file(path: &Path, json_output: bool) {
    let source = read_source(path);
    let result = match scan(&source) {
        Ok(result) => result,
        Err(err) => {
            eprint!("{}", err.render(&source, &path.display().to_string(), io::stderr().is_terminal()));
            std::process::exit(1);
        }
    };

    if json_output {
        match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("Error: {}", err);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("{}", result.rewritten);
    for span in &result.spans {
        println!("\n{} ({:?}, {}..{})\n  {}", span.id, span.sublanguage, span.start, span.end, span.original);
    }
}

fn print_error(err: &CompileError, source: &str, filename: &str) {
    if io::stderr().is_terminal() {
        eprint!("{}", err.render_color(source, filename));
    } else {
        eprint!("{}", err.render(source, filename));
    }
}

fn print_diagnostics(output: &CompileOutput, source: &str, filename: &str) {
    let is_tty = io::stderr().is_terminal();
    for diagnostic in &output.diagnostics {
        if is_tty {
            eprint!("{}", diagnostic.render_color(source, filename));
        } else {
            eprint!("{}", diagnostic.render(source, filename));
        }
    }
    for warning in &output.warnings {
        if is_tty {
            eprintln!("  \x1b[33mwarning:\x1b[0m {}", warning);
        } else {
            eprintln!("  warning: {}", warning);
        }
    }
}

fn print_generated(path: &str) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("  \x1b[32m✓\x1b[0m {}", path);
    } else {
        eprintln!("  ✓ {}", path);
    }
}

fn print_summary(count: usize, elapsed: std::time::Duration) {
    let is_tty = io::stderr().is_terminal();
    let time_str = format_duration(elapsed);
    let files_word = if count == 1 { "file" } else { "files" };

    if is_tty {
        eprintln!("\n\x1b[1m✨ Compiled {} {} in {}\x1b[0m", count, files_word, time_str);
    } else {
        eprintln!("\n✨ Compiled {} {} in {}", count, files_word, time_str);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
