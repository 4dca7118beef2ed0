//! Matcha CLI — command-line driver for the match-transform compiler.

use clap::{Parser as ClapParser, Subcommand};
use matcha_compiler::{
    compile_source, diagnostics, BundleWriter, CompileError, CompileOptions, Component,
    KeyRegistry, TestOpRegistry,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

// ANSI color helpers
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}
fn green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

fn error_mark() -> String {
    format!("[{}] ", red(&bold("ERROR")))
}

#[derive(ClapParser)]
#[command(
    name = "matcha",
    version,
    about = "Compiler for match-transform decision programs",
    help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}

Examples:
  matcha check flags/                  Compile without writing outputs
  matcha build flags/ -p out/bundles   Write one JSON file per bundle
  matcha build flags/ -p out -d out/debug.map -O 1
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every `.mtc` file in DIR and write bundle JSON
    Build {
        /// Input directory containing `.mtc` files
        dir: PathBuf,

        /// Output directory for bundle JSON files
        #[arg(short = 'p', long = "program-dir")]
        program_dir: PathBuf,

        /// Optional debug map output file
        #[arg(short = 'd', long = "debug-map")]
        debug_map: Option<PathBuf>,

        /// Optimization level (0, 1, or 2)
        #[arg(short = 'O', long = "optimize", default_value_t = 2)]
        optimize: u8,
    },
    /// Compile every `.mtc` file in DIR without writing outputs
    Check {
        /// Input directory containing `.mtc` files
        dir: PathBuf,

        /// Optimization level (0, 1, or 2)
        #[arg(short = 'O', long = "optimize", default_value_t = 2)]
        optimize: u8,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::Build {
            dir,
            program_dir,
            debug_map,
            optimize,
        } => run_build(&dir, Some(&program_dir), debug_map.as_deref(), optimize),
        Commands::Check { dir, optimize } => run_build(&dir, None, None, optimize),
    };
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Returns `false` when compilation or output writing failed.
fn run_build(
    dir: &Path,
    program_dir: Option<&Path>,
    debug_map: Option<&Path>,
    optimize: u8,
) -> bool {
    let source_files = match collect_source_files(dir) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{}{}", error_mark(), e);
            return false;
        }
    };
    if source_files.is_empty() {
        eprintln!("{}no mtc file found in {:?}", error_mark(), dir.display());
        return false;
    }

    let mut ops = TestOpRegistry::builtin();
    let overlay_file = dir.join(".custom_test_op_infos.json");
    if overlay_file.exists() {
        if let Err(e) = ops.load_overlay_from_file(&overlay_file) {
            eprintln!("{}{}", error_mark(), e);
            return false;
        }
    }

    let mut key_registry = KeyRegistry::new();
    let options = CompileOptions {
        optimization_level: optimize,
    };

    let mut components: Vec<Component> = Vec::new();
    for source_file in &source_files {
        let source = match std::fs::read_to_string(source_file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!(
                    "{}failed to read {:?}: {}",
                    error_mark(),
                    source_file.display(),
                    e
                );
                return false;
            }
        };
        let short_file_name = source_file
            .strip_prefix(dir)
            .unwrap_or(source_file)
            .display()
            .to_string();

        match compile_source(
            &source,
            &source_file.display().to_string(),
            &short_file_name,
            &mut key_registry,
            &ops,
            &options,
        ) {
            Ok(component) => components.push(component),
            Err(e) => {
                report_error(&e, &source);
                return false;
            }
        }
    }

    if let Some(program_dir) = program_dir {
        if let Err(e) = std::fs::create_dir_all(program_dir) {
            eprintln!(
                "{}failed to create {:?}: {}",
                error_mark(),
                program_dir.display(),
                e
            );
            return false;
        }
        let mut writer = BundleWriter::new(&components, &key_registry);
        if let Err(e) = writer.write_bundles(program_dir, debug_map) {
            report_error(&CompileError::Emit(e), "");
            return false;
        }
    }

    println!(
        "{} {} component{} from {} file{}",
        green(&bold("Compiled")),
        components.len(),
        plural(components.len()),
        source_files.len(),
        plural(source_files.len()),
    );
    true
}

fn report_error(error: &CompileError, source: &str) {
    let diagnostic = diagnostics::diagnose(error, source);
    eprint!("{}{}", error_mark(), diagnostic.render_ansi());
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn collect_source_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("mtc") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_source_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mtc"), "").unwrap();
        std::fs::write(dir.path().join("a.mtc"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = collect_source_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.mtc", "b.mtc"]);
    }

    #[test]
    fn test_build_writes_bundle_json() {
        let source_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();

        std::fs::write(
            source_dir.path().join("keys.json"),
            r#"[{"Key": "Country", "Idx": 1001, "Type": "string"},
                {"Key": "Flag", "Idx": 5001, "Type": "string"}]"#,
        )
        .unwrap();
        std::fs::write(
            source_dir.path().join("demo.mtc"),
            r#"component demo
import "keys.json"

bundle flags {
    unit choose {
        if test("Country", "eq", "US") as "country is US" {
            return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"set\", \"values\": [\"on\"]}]}") as "flag on"
        }
        return transform("{\"to\": \"Flag\", \"operators\": [{\"op\": \"set\", \"values\": [\"off\"]}]}") as "flag off"
    }
}
"#,
        )
        .unwrap();

        let debug_map = out_dir.path().join("debug.map");
        assert!(run_build(source_dir.path(), Some(out_dir.path()), Some(&debug_map), 2));

        let bundle: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(out_dir.path().join("flags.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(bundle[0]["__unit_name__"], "choose");
        assert!(debug_map.exists());
    }

    #[test]
    fn test_build_fails_on_bad_source() {
        let source_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("bad.mtc"), "component demo\nbundle b {\nunit u {\n}\n}\n")
            .unwrap();
        assert!(!run_build(source_dir.path(), None, None, 2));
    }

    #[test]
    fn test_empty_directory_fails() {
        let source_dir = tempfile::tempdir().unwrap();
        assert!(!run_build(source_dir.path(), None, None, 2));
    }
}
