//! Selplan CLI
//!
//! Command-line front-end for the selection compiler:
//! - `check`: load a schema config and list its types and fields
//! - `compile`: compile a request against a schema and print the plans
//! - `run`: compile, then execute against a JSON data file and canned services

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use selplan_compiler::{
    CompileOptions, CompiledOperation, CompiledPlan, Executor, OperationCompiler, RequestConfig,
    Schema, SchemaConfig, ServiceRegistry,
};
use selplan_ir::pretty;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod fixture;

#[derive(Parser)]
#[command(name = "selplan")]
#[command(author, version, about = "Compile field selections into execution plans")]
struct Cli {
    /// Log compiler decisions to stderr (`RUST_LOG` takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schema config and list its types.
    Check {
        /// Schema config (JSON)
        #[arg(long)]
        schema: PathBuf,
    },

    /// Compile a request and print the shape and service passes.
    Compile {
        #[command(flatten)]
        input: CompileInput,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Compile a request and execute it against a data file.
    Run {
        #[command(flatten)]
        input: CompileInput,
        /// Root data the query type reads from (JSON)
        #[arg(long)]
        data: PathBuf,
        /// Canned service responses (JSON)
        #[arg(long)]
        services: Option<PathBuf>,
    },
}

#[derive(Args)]
struct CompileInput {
    /// Schema config (JSON)
    #[arg(long)]
    schema: PathBuf,
    /// Selection request (JSON)
    #[arg(long)]
    request: PathBuf,
    /// Variable values (JSON object)
    #[arg(long)]
    variables: Option<PathBuf>,
    /// Compile options (JSON)
    #[arg(long)]
    options: Option<PathBuf>,
    /// Compile service-backed fields in the same pass as everything else
    #[arg(long)]
    single_pass: bool,
    /// Override the maximum selection depth
    #[arg(long)]
    max_depth: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Check { schema } => cmd_check(&schema),
        Commands::Compile { input, format } => cmd_compile(&input, format),
        Commands::Run {
            input,
            data,
            services,
        } => cmd_run(&input, &data, services.as_deref()),
    }
}

// ============================================================================
// Loading
// ============================================================================

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid {what} {}", path.display()))
}

fn load_schema(path: &Path) -> Result<Schema> {
    let config: SchemaConfig = read_json(path, "schema")?;
    let schema = config
        .build()
        .map_err(|e| anyhow!("schema {}: {e}", path.display()))?;
    info!(path = %path.display(), "schema loaded");
    Ok(schema)
}

impl CompileInput {
    fn options(&self) -> Result<CompileOptions> {
        let mut options = match &self.options {
            Some(path) => read_json(path, "options")?,
            None => CompileOptions::default(),
        };
        if self.single_pass {
            options.execute_service_fields_separately = false;
        }
        if let Some(depth) = self.max_depth {
            options.max_depth = depth;
        }
        Ok(options)
    }

    fn variables(&self) -> Result<Map<String, Value>> {
        match &self.variables {
            Some(path) => read_json(path, "variables"),
            None => Ok(Map::new()),
        }
    }

    fn compile(&self, schema: &Schema, services: Option<&ServiceRegistry>) -> Result<CompiledOperation> {
        let request: RequestConfig = read_json(&self.request, "request")?;
        let tree = request
            .build(schema)
            .map_err(|e| anyhow!("request {}: {e}", self.request.display()))?;
        debug!(roots = tree.roots().len(), "selection tree built");

        let mut compiler = OperationCompiler::new(schema).with_options(self.options()?);
        if let Some(services) = services {
            compiler = compiler.with_service_provider(services);
        }
        compiler
            .compile(&tree, &self.variables()?)
            .map_err(|e| anyhow!("compile failed: {e}"))
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_check(path: &Path) -> Result<()> {
    let schema = load_schema(path)?;
    println!("{} {}", "Schema".green().bold(), path.display());
    println!("  query type: {}", schema.query_type());
    if let Some(mutation) = schema.mutation_type() {
        println!("  mutation type: {mutation}");
    }
    for object in schema.objects() {
        println!("  {}", object.name.bold());
        for field in object.fields.values() {
            let marker = if field.has_services() { " (service)" } else { "" };
            println!("    {}: {}{}", field.name, field.ty, marker.dimmed());
        }
    }
    Ok(())
}

fn print_plan(label: &str, plan: &CompiledPlan) {
    println!("  {} ({}: {})", label.cyan(), plan.root, plan.root.ty());
    for (param, binding) in &plan.bindings {
        println!("    bind {param} = {}", json!(binding));
    }
    for line in pretty(&plan.body).lines() {
        println!("    {line}");
    }
}

fn print_errors(operation: &CompiledOperation) {
    for error in &operation.errors {
        eprintln!("{} [{}] {error}", "error".red().bold(), error.field);
    }
}

fn cmd_compile(input: &CompileInput, format: OutputFormat) -> Result<()> {
    let schema = load_schema(&input.schema)?;
    let operation = input.compile(&schema, None)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&operation)?),
        OutputFormat::Text => {
            for field in &operation.fields {
                println!("{} {}", "Field".green().bold(), field.name);
                if let Some(plan) = &field.shape_pass {
                    print_plan("shape pass", plan);
                }
                if let Some(plan) = &field.service_pass {
                    print_plan("service pass", plan);
                }
            }
        }
    }

    print_errors(&operation);
    if operation.is_ok() {
        Ok(())
    } else {
        Err(anyhow!("{} root field(s) failed to compile", operation.errors.len()))
    }
}

fn cmd_run(input: &CompileInput, data: &Path, services: Option<&Path>) -> Result<()> {
    let schema = load_schema(&input.schema)?;
    let registry = match services {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read services {}", path.display()))?;
            fixture::registry_from_json(&text)
                .with_context(|| format!("invalid services {}", path.display()))?
        }
        None => ServiceRegistry::new(),
    };
    let operation = input.compile(&schema, Some(&registry))?;
    let data: Value = read_json(data, "data")?;

    let result = Executor::new(&registry)
        .execute_operation(&operation, &data)
        .map_err(|e| anyhow!("execution failed: {e}"))?;

    let mut out = json!({ "data": result });
    if !operation.is_ok() {
        out["errors"] = json!(operation.errors);
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
