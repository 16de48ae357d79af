//! Command-line interface for the Weave executor.
//!
//! # Usage
//!
//! ```bash
//! # Run a query against the demo schema, one JSON payload per line
//! weave run query.graphql
//!
//! # Read the query from stdin
//! echo '{ hero { name ... @defer { friends { name } } } }' | weave run -
//!
//! # Pick an operation and pass variables
//! weave run ops.graphql --operation-name Countdown --variables '{"from": 5}'
//!
//! # Check documents for syntax errors
//! weave check ops.graphql
//! ```

pub mod demo;

use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use weave_core::GraphQLError;
use weave_runtime::{Executor, ExecutorConfig, Request, Variables};

#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a document against the demo schema
    Run {
        /// Document path, `-` for stdin
        document: PathBuf,

        /// Operation to run when the document has several
        #[arg(short, long)]
        operation_name: Option<String>,

        /// Variables as a JSON object
        #[arg(long)]
        variables: Option<String>,

        /// Ignore @defer and @stream
        #[arg(long)]
        no_incremental: bool,

        /// Log every resolved field
        #[arg(long)]
        field_tracing: bool,
    },

    /// Check documents for syntax errors
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            document,
            operation_name,
            variables,
            no_incremental,
            field_tracing,
        } => {
            let source = read_document(&document)?;
            tracing::debug!(document = %document.display(), bytes = source.len(), "read document");
            let variables = match variables {
                Some(json) => serde_json::from_str::<Variables>(&json)?,
                None => Variables::new(),
            };
            let config = ExecutorConfig::default()
                .with_incremental_delivery(!no_incremental)
                .with_field_tracing(field_tracing);
            let options = RunOptions {
                operation_name,
                variables,
                config,
            };
            let code = run_document(&source, options, &mut std::io::stdout().lock()).await?;
            if !cli.quiet {
                if code == 0 {
                    eprintln!("{} {}", "OK".green(), document.display());
                } else {
                    eprintln!("{} {}", "Failed".red().bold(), document.display());
                }
            }
            Ok(code)
        }
        Commands::Check { files } => check_files(&files, cli.verbose, cli.quiet),
    }
}

/// Settings of a single `run`.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub operation_name: Option<String>,
    pub variables: Variables,
    pub config: ExecutorConfig,
}

/// Executes `source` against the demo schema and writes every payload to
/// `out` as one line of JSON. Returns 1 when any payload carries errors.
pub async fn run_document(
    source: &str,
    options: RunOptions,
    out: &mut impl Write,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut request = match Request::parse(source) {
        Ok(request) => request,
        Err(errors) => {
            print_errors(&errors);
            return Ok(1);
        }
    };
    if let Some(name) = options.operation_name {
        request = request.operation_name(name);
    }
    let request = request.variables(options.variables).root_value(demo::root());

    let executor = Executor::new(demo::schema()?, demo::resolvers()).with_config(options.config);
    let mut payloads = executor.execute(request).await.into_stream().boxed();

    let mut code = 0;
    while let Some(payload) = payloads.next().await {
        if has_errors(&payload) {
            code = 1;
        }
        writeln!(out, "{}", serde_json::to_string(&payload)?)?;
        out.flush()?;
    }
    Ok(code)
}

fn has_errors(payload: &serde_json::Value) -> bool {
    if payload.get("errors").is_some() {
        return true;
    }
    let nested = |key: &str| {
        payload
            .get(key)
            .and_then(serde_json::Value::as_array)
            .is_some_and(|entries| entries.iter().any(|entry| entry.get("errors").is_some()))
    };
    nested("incremental") || nested("completed")
}

fn read_document(path: &Path) -> std::io::Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        Ok(source)
    } else {
        std::fs::read_to_string(path)
    }
}

fn print_errors(errors: &[GraphQLError]) {
    for error in errors {
        match error.locations.first() {
            Some(location) => eprintln!(
                "  {} {} ({}:{})",
                "-->".blue(),
                error.message,
                location.line,
                location.column
            ),
            None => eprintln!("  {} {}", "-->".blue(), error.message),
        }
    }
}

fn check_files(
    files: &[PathBuf],
    verbose: bool,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut has_errors = false;

    for file in files {
        if verbose {
            eprintln!("{} {}", "Checking".blue(), file.display());
        }

        let source = read_document(file)?;
        let result = weave_syntax::parse(&source);

        if result.diagnostics.has_errors() {
            has_errors = true;
            eprintln!("{} {}", "Error".red().bold(), file.display());
            print_errors(&result.diagnostics.to_graphql_errors(&source));
        } else if verbose {
            eprintln!("{} {}", "OK".green(), file.display());
        }
    }

    if has_errors {
        Ok(1)
    } else {
        if !quiet {
            eprintln!(
                "{} {} file(s) checked",
                "Success:".green().bold(),
                files.len()
            );
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    async fn run_lines(source: &str, options: RunOptions) -> (i32, Vec<Value>) {
        let mut out = Vec::new();
        let code = run_document(source, options, &mut out).await.unwrap();
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (code, lines)
    }

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "weave",
            "run",
            "-",
            "--operation-name",
            "Hero",
            "--variables",
            "{\"from\": 2}",
            "--no-incremental",
            "-q",
        ]);
        assert!(cli.quiet);
        match cli.command {
            Commands::Run {
                document,
                operation_name,
                variables,
                no_incremental,
                field_tracing,
            } => {
                assert_eq!(document, PathBuf::from("-"));
                assert_eq!(operation_name.as_deref(), Some("Hero"));
                assert_eq!(variables.as_deref(), Some("{\"from\": 2}"));
                assert!(no_incremental);
                assert!(!field_tracing);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_prints_one_line_per_payload() {
        let (code, lines) = run_lines(
            "{ scalarList @stream(initialCount: 2) }",
            RunOptions::default(),
        )
        .await;
        assert_eq!(code, 0);
        assert_eq!(
            lines,
            vec![
                json!({"data": {"scalarList": ["apple", "banana"]}, "hasNext": true}),
                json!({
                    "incremental": [{"items": ["coconut"], "path": ["scalarList", 2]}],
                    "completed": [{"path": ["scalarList"]}],
                    "hasNext": false
                }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_incremental_delivery() {
        let options = RunOptions {
            config: ExecutorConfig::default().with_incremental_delivery(false),
            ..RunOptions::default()
        };
        let (code, lines) = run_lines("{ scalarList @stream(initialCount: 0) }", options).await;
        assert_eq!(code, 0);
        assert_eq!(
            lines,
            vec![json!({"data": {"scalarList": ["apple", "banana", "coconut"]}})]
        );
    }

    #[tokio::test]
    async fn test_run_reports_errors_with_exit_code() {
        let mut variables = Variables::new();
        variables.insert("from".to_string(), json!(-1));
        let options = RunOptions {
            operation_name: Some("Countdown".to_string()),
            variables,
            ..RunOptions::default()
        };
        let (code, lines) = run_lines(
            "query Hero { hero { name } } query Countdown($from: Int) { countdown(from: $from) }",
            options,
        )
        .await;
        assert_eq!(code, 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["data"], json!({"countdown": null}));
        assert_eq!(
            lines[0]["errors"][0]["message"],
            json!("countdown must start at zero or above")
        );
    }

    #[tokio::test]
    async fn test_syntax_errors_print_nothing() {
        let (code, lines) = run_lines("{ hero { name }", RunOptions::default()).await;
        assert_eq!(code, 1);
        assert!(lines.is_empty());
    }
}
