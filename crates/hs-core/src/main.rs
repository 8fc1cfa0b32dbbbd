//! histsan - shell history sanitizer
//!
//! The main entry point, handling:
//! - Single sanitization passes (`run`)
//! - The default RESH job with full and trimmed hashes (`sanitize`)
//! - Rule inspection and validation
//! - HMAC key generation

use clap::{Args, Parser, Subcommand};
use hs_core::config::{load_config, load_rules_file, ConfigError, ConfigOptions, ResolvedConfig};
use hs_core::exit_codes::ExitCode;
use hs_core::log_event;
use hs_core::logging::{
    event_names, generate_run_id, init_logging, LogConfig, LogContext, LogFormat, Stage,
};
use hs_core::output::{print_json, OutputFormat, REPORT_SCHEMA_VERSION};
use hs_core::pipeline::{JobReport, JobSpec, MalformedPolicy, PassState, Pipeline, PipelineError};
use hs_redact::{HashAlgorithm, KeyManager, Preset, RedactionError, TrimLength};
use std::path::{Path, PathBuf};

/// Default RESH history file, relative to the home directory.
const RESH_HISTORY_FILE: &str = ".resh_history.json";

/// Prefix of sanitized artifacts written by `sanitize`.
const SANITIZED_PREFIX: &str = "resh_history_sanitized";

/// histsan - replace sensitive shell history content with hashes
#[derive(Parser)]
#[command(name = "histsan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Rules file (JSON)
    #[arg(long, global = true, env = "HISTSAN_RULES")]
    rules: Option<PathBuf>,

    /// Override config directory
    #[arg(long, global = true, env = "HISTSAN_CONFIG")]
    config: Option<PathBuf>,

    /// Built-in rule preset (strict by default, standard, empty)
    #[arg(long, global = true)]
    preset: Option<Preset>,

    /// Hash algorithm (sha256, sha512, hmac-sha256)
    #[arg(long, global = true)]
    algorithm: Option<HashAlgorithm>,

    /// Key file for hmac-sha256
    #[arg(long, global = true, env = "HISTSAN_KEY")]
    key: Option<PathBuf>,

    /// What to do with records that do not parse
    #[arg(long, global = true, value_enum, default_value_t = MalformedPolicy::Skip)]
    on_malformed: MalformedPolicy,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr
    #[arg(long, global = true, value_enum, env = "HISTSAN_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize one history file into one output at one trim length
    Run(RunArgs),

    /// Sanitize the RESH history with full and trimmed hashes
    Sanitize(SanitizeArgs),

    /// Inspect or validate rules
    Rules(RulesArgs),

    /// Create an HMAC key file
    Keygen(KeygenArgs),

    /// Print version information
    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct RunArgs {
    /// History file to read (JSON Lines)
    #[arg(long)]
    input: PathBuf,

    /// Sanitized file to write
    #[arg(long)]
    output: PathBuf,

    /// Keep only the first N hex characters of each hash (0 = full)
    #[arg(long = "trim-hashes", alias = "trim", default_value_t = 0, allow_negative_numbers = true)]
    trim_hashes: i64,
}

#[derive(Args, Debug)]
struct SanitizeArgs {
    /// History file to read [default: ~/.resh_history.json]
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory for sanitized files [default: home directory]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Trim lengths, one pass each
    #[arg(long, default_values_t = vec![0, 12], allow_negative_numbers = true)]
    trim: Vec<i64>,
}

#[derive(Args, Debug)]
struct RulesArgs {
    #[command(subcommand)]
    command: RulesCommands,
}

#[derive(Subcommand, Debug)]
enum RulesCommands {
    /// Print the effective rules in evaluation order
    List,
    /// Validate a rules file
    Check {
        /// Rules file to validate
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct KeygenArgs {
    /// Key file to create (must not exist)
    #[arg(long)]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    init_logging(&LogConfig::from_flags(
        cli.global.quiet,
        cli.global.verbose,
        cli.global.log_format,
    ));

    let exit_code = match &cli.command {
        Commands::Run(args) => run_single(&cli.global, args),
        Commands::Sanitize(args) => run_sanitize(&cli.global, args),
        Commands::Rules(args) => match &args.command {
            RulesCommands::List => run_rules_list(&cli.global),
            RulesCommands::Check { path } => run_rules_check(&cli.global, path),
        },
        Commands::Keygen(args) => run_keygen(&cli.global, args),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Success
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_single(global: &GlobalOpts, args: &RunArgs) -> ExitCode {
    let trim = match TrimLength::from_signed(args.trim_hashes) {
        Ok(trim) => trim,
        Err(e) => return output_error(global, ExitCode::ConfigError, &e.to_string()),
    };
    let job = JobSpec::fan_out(
        &args.input,
        vec![(args.output.clone(), trim)],
        global.on_malformed,
    );
    match execute_job(global, &job) {
        Ok((config, report)) => {
            match global.format {
                OutputFormat::Json => print_json(&job_payload(&config, &report)),
                OutputFormat::Human => print_pass_summary(&report),
            }
            job_exit_code(&report)
        }
        Err(code) => code,
    }
}

fn run_sanitize(global: &GlobalOpts, args: &SanitizeArgs) -> ExitCode {
    let home = dirs::home_dir();
    let input = match (&args.input, &home) {
        (Some(input), _) => input.clone(),
        (None, Some(home)) => home.join(RESH_HISTORY_FILE),
        (None, None) => {
            return output_error(
                global,
                ExitCode::ArgsError,
                "cannot determine the home directory; pass --input and --output-dir",
            )
        }
    };
    let output_dir = match (&args.output_dir, &home) {
        (Some(dir), _) => dir.clone(),
        (None, Some(home)) => home.clone(),
        (None, None) => {
            return output_error(
                global,
                ExitCode::ArgsError,
                "cannot determine the home directory; pass --output-dir",
            )
        }
    };

    let mut targets = Vec::with_capacity(args.trim.len());
    for &value in &args.trim {
        match TrimLength::from_signed(value) {
            Ok(trim) => targets.push((output_dir.join(sanitized_file_name(trim)), trim)),
            Err(e) => return output_error(global, ExitCode::ConfigError, &e.to_string()),
        }
    }

    let job = JobSpec::fan_out(&input, targets, global.on_malformed);
    match execute_job(global, &job) {
        Ok((config, report)) => {
            match global.format {
                OutputFormat::Json => print_json(&job_payload(&config, &report)),
                OutputFormat::Human => {
                    print_pass_summary(&report);
                    print_guidance(&report);
                }
            }
            job_exit_code(&report)
        }
        Err(code) => code,
    }
}

/// Resolve config, build the engine and run the job.
fn execute_job(global: &GlobalOpts, job: &JobSpec) -> Result<(ResolvedConfig, JobReport), ExitCode> {
    let ctx = LogContext::new(generate_run_id());
    log_event!(
        ctx,
        INFO,
        event_names::RUN_STARTED,
        Stage::Init,
        "run started",
        passes = job.passes.len() as u64
    );

    let config = load_config(&config_options(global))
        .map_err(|e| output_config_error(global, &ctx, &e))?;
    match &config.rules_path {
        Some(path) => {
            let path = path.display().to_string();
            log_event!(
                ctx,
                INFO,
                event_names::CONFIG_LOADED,
                Stage::Config,
                "rules loaded",
                path = path.as_str(),
                preset = config.rules.preset.as_str()
            );
        }
        None => log_event!(
            ctx,
            INFO,
            event_names::CONFIG_DEFAULT_USED,
            Stage::Config,
            "using built-in preset",
            preset = config.rules.preset.as_str()
        ),
    }
    let engine = config
        .build_engine()
        .map_err(|e| output_config_error(global, &ctx, &e))?;

    let pipeline = Pipeline::new(&engine).with_log_context(ctx.clone());
    let report = pipeline.run_job(job).map_err(|e| {
        let code = pipeline_exit_code(&e);
        log_event!(
            ctx,
            ERROR,
            event_names::CONFIG_ERROR,
            Stage::Config,
            "job rejected",
            kind = e.kind()
        );
        output_error(global, code, &e.to_string())
    })?;

    log_event!(
        ctx,
        INFO,
        event_names::RUN_FINISHED,
        Stage::Report,
        "run finished",
        success = report.success
    );
    Ok((config, report))
}

fn config_options(global: &GlobalOpts) -> ConfigOptions {
    ConfigOptions {
        config_dir: global.config.clone(),
        rules_path: global.rules.clone(),
        preset: global.preset,
        algorithm: global.algorithm,
        key_path: global.key.clone(),
    }
}

fn job_exit_code(report: &JobReport) -> ExitCode {
    if report.success {
        ExitCode::Success
    } else {
        ExitCode::PassFailed
    }
}

/// Artifact name for one trim length.
fn sanitized_file_name(trim: TrimLength) -> String {
    if trim.is_full() {
        format!("{}.json", SANITIZED_PREFIX)
    } else {
        format!("{}_trim{}.json", SANITIZED_PREFIX, trim)
    }
}

fn job_payload(config: &ResolvedConfig, report: &JobReport) -> serde_json::Value {
    serde_json::json!({
        "schema_version": REPORT_SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "status": if report.success { "ok" } else { "failed" },
        "config": config.snapshot(),
        "job": report,
    })
}

fn print_pass_summary(report: &JobReport) {
    for pass in &report.passes {
        let trim = if pass.trim.is_full() {
            "full hashes".to_string()
        } else {
            format!("trim {}", pass.trim)
        };
        match pass.state {
            PassState::Succeeded => {
                print!(
                    "{}: {} records written to {}",
                    trim,
                    pass.records_written,
                    pass.output.display()
                );
                if pass.records_skipped > 0 {
                    print!(" ({} malformed skipped)", pass.records_skipped);
                }
                println!();
            }
            _ => eprintln!(
                "{}: FAILED: {}",
                trim,
                pass.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Post-run operator guidance for the passes that published an artifact.
fn print_guidance(report: &JobReport) {
    let published: Vec<_> = report.passes.iter().filter(|p| p.succeeded()).collect();
    if published.is_empty() {
        return;
    }

    println!();
    println!("HOW IT WORKS");
    println!("  Sensitive parts of your history (secrets, paths, hosts, git remotes)");
    println!("  are replaced by their hashes. Equal values get equal hashes, so the");
    println!("  sanitized history can still be analyzed without revealing the text.");
    println!("  Shorter hashes are easier to read; full hashes never collide in practice.");
    println!();
    println!("OUTPUT FILES");
    for pass in &published {
        let note = if pass.trim.is_full() {
            "full-length hashes".to_string()
        } else {
            format!("hashes trimmed to {} characters", pass.trim)
        };
        println!("  {}  ({})", pass.output.display(), note);
    }
    if let Some(pass) = published
        .iter()
        .find(|p| !p.trim.is_full())
        .or(published.first())
    {
        let path = pass.output.display();
        println!();
        println!("INSPECT");
        println!("  cat {} | jq", path);
        println!("  jq '.cmdLine' {}", path);
    }
}

fn run_rules_list(global: &GlobalOpts) -> ExitCode {
    let ctx = LogContext::new(generate_run_id());
    let config = match load_config(&config_options(global)) {
        Ok(config) => config,
        Err(e) => return output_config_error(global, &ctx, &e),
    };
    let engine = match config.build_engine() {
        Ok(engine) => engine,
        Err(e) => return output_config_error(global, &ctx, &e),
    };

    match global.format {
        OutputFormat::Json => {
            let rules: Vec<_> = engine
                .rules()
                .rules()
                .iter()
                .map(|rule| {
                    let spec = rule.spec();
                    serde_json::json!({
                        "name": spec.name,
                        "priority": spec.priority,
                        "scope": spec.scope,
                        "match": spec.matcher.kind(),
                        "fields": spec.fields,
                        "description": spec.description,
                    })
                })
                .collect();
            print_json(&serde_json::json!({
                "schema_version": REPORT_SCHEMA_VERSION,
                "config": config.snapshot(),
                "rules": rules,
            }));
        }
        OutputFormat::Human => {
            println!(
                "# {} rules (preset: {}, algorithm: {})",
                engine.rules().len(),
                config.rules.preset,
                engine.algorithm()
            );
            for rule in engine.rules().rules() {
                let spec = rule.spec();
                println!(
                    "{:>4}  {:<22} {:<16} {:<6} {}",
                    spec.priority,
                    spec.name,
                    spec.matcher.kind(),
                    spec.scope.to_string(),
                    spec.fields.join(",")
                );
            }
        }
    }
    ExitCode::Success
}

fn run_rules_check(global: &GlobalOpts, path: &Path) -> ExitCode {
    let ctx = LogContext::new(generate_run_id());
    if !path.exists() {
        let error = ConfigError::NotFound {
            path: path.to_path_buf(),
        };
        return output_config_error(global, &ctx, &error);
    }
    let (rules, hash) = match load_rules_file(path) {
        Ok(loaded) => loaded,
        Err(e) => return output_config_error(global, &ctx, &e),
    };
    let count = rules.effective_rules().len();

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": REPORT_SCHEMA_VERSION,
            "status": "valid",
            "path": path.display().to_string(),
            "rules_hash": hash,
            "preset": rules.preset,
            "rule_count": count,
        })),
        OutputFormat::Human => {
            println!("{}: valid ({} rules, preset {})", path.display(), count, rules.preset)
        }
    }
    ExitCode::Success
}

fn run_keygen(global: &GlobalOpts, args: &KeygenArgs) -> ExitCode {
    let ctx = LogContext::new(generate_run_id());
    let result = KeyManager::generate().and_then(|manager| {
        manager.save(&args.output)?;
        Ok(manager.active_key_id)
    });
    match result {
        Ok(key_id) => {
            let path = args.output.display().to_string();
            log_event!(
                ctx,
                INFO,
                event_names::KEY_GENERATED,
                Stage::Init,
                "key file created",
                key_id = key_id.as_str(),
                path = path.as_str()
            );
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "schema_version": REPORT_SCHEMA_VERSION,
                    "key_id": key_id,
                    "path": path,
                })),
                OutputFormat::Human => println!("created key '{}' in {}", key_id, path),
            }
            ExitCode::Success
        }
        Err(e) => {
            let code = match e {
                RedactionError::Io(_) => ExitCode::IoError,
                _ => ExitCode::InternalError,
            };
            output_error(global, code, &e.to_string())
        }
    }
}

/// Output a config error in the appropriate format.
fn output_config_error(global: &GlobalOpts, ctx: &LogContext, error: &ConfigError) -> ExitCode {
    let exit_code = match error {
        ConfigError::IoError { .. } => ExitCode::IoError,
        ConfigError::NotFound { .. } | ConfigError::Invalid { .. } | ConfigError::Engine(_) => {
            ExitCode::ConfigError
        }
    };
    let message = error.to_string();
    log_event!(
        ctx,
        ERROR,
        event_names::CONFIG_ERROR,
        Stage::Config,
        "configuration rejected",
        code = exit_code.code_name()
    );
    output_error(global, exit_code, &message)
}

/// Report a fatal error on stderr and return its exit code.
fn output_error(global: &GlobalOpts, exit_code: ExitCode, message: &str) -> ExitCode {
    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "schema_version": REPORT_SCHEMA_VERSION,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "error": {
                    "code": exit_code.as_i32(),
                    "name": exit_code.code_name(),
                    "message": message,
                }
            });
            match serde_json::to_string_pretty(&response) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("Error: {}", message),
            }
        }
        OutputFormat::Human => eprintln!("Error: {}", message),
    }
    exit_code
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": REPORT_SCHEMA_VERSION,
            "histsan_version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
        })),
        OutputFormat::Human => {
            println!("histsan {}", env!("CARGO_PKG_VERSION"));
            println!("report schema version: {}", REPORT_SCHEMA_VERSION);
        }
    }
}

/// Exit code for a job rejected before any pass started.
fn pipeline_exit_code(error: &PipelineError) -> ExitCode {
    if error.is_configuration() {
        ExitCode::ConfigError
    } else {
        ExitCode::InternalError
    }
}
