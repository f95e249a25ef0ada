use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tfbackend::aws::cli::AwsCli;
use tfbackend::config;
use tfbackend::core::analyzer::{analyze, analyze_state_file, run_analysis, BackendPosture};
use tfbackend::formatters::output;
use tfbackend::shared::logging;
use tfbackend::terraform::backend::{BackendDescriptor, DEFAULT_STATE_KEY};

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Advisory health and compliance report for Terraform state and its S3 backend.
///
/// Always exits 0: anything that could not be checked is listed under `errors`.
#[derive(Parser)]
#[command(name = "tfstate-analyzer", version)]
struct Cli {
    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    dynamodb_table: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long, default_value = DEFAULT_STATE_KEY)]
    key: String,

    /// Analyze a local state file instead of the object in the bucket
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    logging::init_logging();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return;
        }
        Err(e) => {
            // Argument errors become part of the report; the exit status stays 0.
            let mut report = analyze(None, None, BackendPosture::default());
            report
                .errors
                .push(format!("arguments: {}", e.to_string().trim_end()));
            print!("{}", output::report_text(&report));
            return;
        }
    };

    let settings = match config::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            logging::warn(&format!("Ignoring configuration: {:#}", e));
            config::Config::default()
        }
    };
    let region = cli.region.clone().unwrap_or(settings.aws.region.clone());

    let report = match (&cli.bucket, &cli.dynamodb_table) {
        (Some(bucket), Some(table)) => {
            let descriptor = BackendDescriptor::new(bucket, &cli.key, &region, table);
            match config::resolve_executable(settings.aws.executable_path.as_deref(), "aws") {
                Ok(aws_path) => {
                    let aws = AwsCli::new(aws_path, &region);
                    run_analysis(&aws, &aws, &descriptor, cli.state_file.as_deref()).await
                }
                Err(e) => {
                    let mut report = match &cli.state_file {
                        Some(path) => analyze_state_file(path),
                        None => analyze(None, Some(&descriptor), BackendPosture::default()),
                    };
                    report.backend = Some(descriptor);
                    report.errors.push(format!("aws cli: {:#}", e));
                    report
                }
            }
        }
        _ => match &cli.state_file {
            Some(path) => {
                let mut report = analyze_state_file(path);
                report
                    .errors
                    .push("backend checks skipped: --bucket and --dynamodb-table not given".to_string());
                report
            }
            None => {
                let mut report = analyze(None, None, BackendPosture::default());
                report
                    .errors
                    .push("either --bucket and --dynamodb-table, or --state-file, is required".to_string());
                report
            }
        },
    };

    match cli.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&output::report_json(&report)) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("{}", output::json_error(&e.to_string())),
        },
        OutputFormat::Text => print!("{}", output::report_text(&report)),
    }
}
