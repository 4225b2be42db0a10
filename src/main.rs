//! Smalt CLI
//!
//! Usage:
//!   smalt [OPTIONS] [FILE]
//!
//! Options:
//!   -c, --context <FILE>  Context values from a TOML file
//!   -d, --dir <DIR>       Template search directory (repeatable)
//!       --config <FILE>   Engine configuration file (TOML)
//!   -h, --help            Print help

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::Parser;

use smalt::{Context, EngineConfig, Environment, TemplateError, Value};

#[derive(Parser)]
#[command(name = "smalt")]
#[command(about = "A small template language with inheritance, filters, and extensible tags")]
struct Cli {
    /// Template file (reads from stdin if not provided)
    input: Option<PathBuf>,

    /// Context values from a TOML file
    #[arg(short, long)]
    context: Option<PathBuf>,

    /// Template search directory for extends/include (repeatable)
    #[arg(short = 'd', long = "dir")]
    dirs: Vec<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // If no input file and stdin is a terminal (interactive), show intro help
    if cli.input.is_none() && io::stdin().is_terminal() {
        print_intro();
        return;
    }

    let mut config = match &cli.config {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };
    if !cli.dirs.is_empty() {
        // CLI directories take priority over configured ones
        let mut dirs = cli.dirs.clone();
        dirs.append(&mut config.template_dirs);
        config.template_dirs = dirs;
    }
    let env = Environment::from_config(&config);

    let context = match &cli.context {
        Some(path) => match load_context(path) {
            Ok(context) => context,
            Err(e) => {
                eprintln!("Error loading context '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Context::new(),
    };

    // Read input
    let (source, filename) = match &cli.input {
        Some(path) => match fs::read_to_string(path) {
            Ok(content) => (content, path.display().to_string()),
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            let mut buffer = String::new();
            match io::stdin().read_to_string(&mut buffer) {
                Ok(_) => (buffer, "<stdin>".to_string()),
                Err(e) => {
                    eprintln!("Error reading from stdin: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    match env.render_str(&source, &context) {
        Ok(out) => {
            println!("{}", out);
        }
        Err(TemplateError::Syntax(err)) => {
            eprintln!("{}", err.format(&source, &filename));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_context(path: &PathBuf) -> Result<Context, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let table: toml::Table = toml::from_str(&raw).map_err(|e| e.to_string())?;
    let mut context = Context::new();
    for (key, value) in table {
        context.insert(key, Value::from(value));
    }
    Ok(context)
}

fn print_intro() {
    println!(
        r#"Smalt - a small template language

USAGE:
    smalt [OPTIONS] [FILE]
    echo '<template>' | smalt

OPTIONS:
    -c, --context <FILE>  Context values from a TOML file
    -d, --dir <DIR>       Template search directory (repeatable)
        --config <FILE>   Engine configuration file (TOML)
    -h, --help            Print help

QUICK START:
    echo 'Hello {{{{ name | upper }}}}!' | smalt -c context.toml

SYNTAX:
    {{{{ expr }}}}                   Interpolation with | filter pipes
    {{% if x > 1 %}}...{{% endif %}}   Conditionals (elif/else supported)
    {{% for x in items %}}...{{% endfor %}}
    {{% set name = expr %}}          Scoped assignment
    {{% filter upper %}}...{{% end %}}
    {{% extends "base.html" %}}      Template inheritance
    {{% block title %}}...{{% endblock %}}
    {{% include "nav.html" %}}
    {{# comment #}}

Templates referenced by extends/include resolve against --dir
directories (default: ./templates)."#
    );
}
