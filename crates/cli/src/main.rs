use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use formflow_api::{ClientConfig, EnvTokenSupplier, QueryClient};
use formflow_engine::{
    EngineConfig, FormEngine, FormSchema, FormScope, QueryContext, ScreenConfig, TracingNotifier, build_query, check_screen,
    parse_screen_file,
};
use formflow_types::QueryDocument;
use formflow_util::{date_handling::parse_date, redact_sensitive};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "formflow", version, about = "Check screen configurations and inspect the queries they produce")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a screen file: keys, dependencies, cycles, report levels, and stages.
    Check { file: PathBuf },
    /// Print the option query a field would send, without contacting the server.
    Query(FieldArgs),
    /// Fetch and print a field's options from the configured endpoint.
    Options(FieldArgs),
}

#[derive(Debug, Args)]
struct FieldArgs {
    file: PathBuf,
    /// Field whose option list is requested.
    #[arg(long)]
    field: String,
    /// Field values as KEY=VALUE, applied in order.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    values: Vec<String>,
    /// Reference date for relative date helpers (defaults to the local date).
    #[arg(long)]
    today: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Check { file } => run_check(&file),
        Command::Query(args) => run_query(&args),
        Command::Options(args) => run_options(&args).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .try_init();
}

fn log_filter(directives: Option<String>) -> EnvFilter {
    EnvFilter::new(directives.unwrap_or_else(|| "info".into()))
}

fn run_check(file: &Path) -> Result<()> {
    let screen = parse_screen_file(file)?;
    check_screen(&screen).with_context(|| format!("{} failed validation", file.display()))?;
    let schema = FormSchema::load("form", screen.form.clone())?;
    let dependencies: Vec<serde_json::Value> = schema
        .graph()
        .topological_order()
        .into_iter()
        .map(|key| serde_json::json!({"field": key, "parents": schema.graph().parents_of(&key)}))
        .collect();

    let summary = serde_json::json!({
        "fields": screen.form.len(),
        "dependencies": dependencies,
        "reportLevels": screen.report.as_ref().map(|report| report.levels.len()),
        "stages": screen.workflow.as_ref().map(|workflow| workflow.stages.len()),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn query_context(args: &FieldArgs, config: &EngineConfig) -> Result<QueryContext> {
    let context = match &args.today {
        Some(raw) => QueryContext::new(parse_date(raw).ok_or_else(|| anyhow!("invalid --today '{raw}'"))?),
        None => QueryContext::today_local(),
    };
    Ok(context.with_api_context(config.api_context.clone()))
}

fn open_scope(screen: ScreenConfig, args: &FieldArgs) -> Result<FormScope> {
    let schema = FormSchema::load("form", screen.form)?;
    let mut scope = FormScope::new(Arc::new(schema));
    for pair in &args.values {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{pair}'"))?;
        let value = scope.schema().coerce(key, raw)?;
        debug!(field = %key, "setting value");
        scope.set_value(key, value)?;
    }
    Ok(scope)
}

fn option_document(scope: &FormScope, field_key: &str, context: &QueryContext) -> Result<QueryDocument> {
    let field = scope.schema().require(field_key)?;
    let source = field
        .option_source()
        .ok_or_else(|| anyhow!("field '{field_key}' has no option source"))?;
    let document = build_query(
        &source.query_template,
        source.depends_on.as_ref(),
        &scope.parent_values(field),
        context,
    )?;
    Ok(document)
}

fn print_document(document: &QueryDocument) -> Result<()> {
    let rendered = serde_json::to_string_pretty(document)?;
    println!("{}", redact_sensitive(&rendered));
    Ok(())
}

fn run_query(args: &FieldArgs) -> Result<()> {
    let screen = parse_screen_file(&args.file)?;
    let config = EngineConfig::from_env()?;
    let context = query_context(args, &config)?;
    let scope = open_scope(screen, args)?;
    print_document(&option_document(&scope, &args.field, &context)?)
}

async fn run_options(args: &FieldArgs) -> Result<()> {
    let screen = parse_screen_file(&args.file)?;
    let config = EngineConfig::from_env()?;
    let context = query_context(args, &config)?;
    let client = QueryClient::new(ClientConfig::from_env()?, Arc::new(EnvTokenSupplier::default()))?;
    let mut engine = FormEngine::new(config, Arc::new(client), Arc::new(TracingNotifier));
    engine.set_today(context.today);

    let scope = open_scope(screen, args)?;
    let Some(request) = engine.resolver().option_request(&scope, &args.field)? else {
        bail!("dependencies of '{}' are not all set", args.field);
    };
    print_document(&request.document)?;

    let outcome = engine.resolver().fetch(request).await;
    let options = outcome.result?;
    println!("{}", serde_json::to_string_pretty(options.as_slice())?);
    Ok(())
}
