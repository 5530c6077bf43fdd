//! Command handlers for CLI operations

use std::fmt::{Error as FmtError, Write as _};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead as _, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{Datelike as _, Days, NaiveDate, Utc};
use devassist_core::{
    DevAssistConfig, GenerationRequest, GenerationResult, HealthStatus, MemoryStore, ProviderKind,
    StreamChunk, TaskType,
};
use devassist_core::config::LimitsConfig;
use devassist_orchestrator::{
    Orchestrator, PromptManager, PromptTemplate, UsageQuery, UsageRecord, UsageReport,
    UsageSummary, UsageTracker,
};
use futures::StreamExt as _;
use tracing::{debug, info, warn};

use crate::cli::RequestArgs;

/// File under the config directory that keeps usage between runs
const USAGE_LOG: &str = "usage.jsonl";

/// Load the configuration file, falling back to defaults for the implicit location
///
/// # Errors
/// Returns an error if an explicitly named file cannot be loaded
pub fn load_config(path: Option<&Path>) -> Result<DevAssistConfig> {
    if let Some(path) = path {
        return DevAssistConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    Ok(DevAssistConfig::load_or_create().unwrap_or_else(|error| {
        warn!("Failed to load config from ~/.devassist/config.toml: {error}");
        warn!("Using default configuration");
        DevAssistConfig::default()
    }))
}

/// Generate once and print the result
///
/// # Errors
/// Returns an error if the request is invalid or every provider failed
pub async fn handle_generate(config: &DevAssistConfig, args: RequestArgs, json: bool) -> Result<()> {
    let usage_log = usage_log_path()?;
    let orchestrator = build_orchestrator(config, Some(&usage_log)).await?;
    let request = build_request(args)?;
    let started = Utc::now().date_naive();
    let result = orchestrator.generate(&request).await?;
    persist_usage(&orchestrator, &request.correlation_id, started, &usage_log).await;

    let mut stdout = io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&result)?)?;
    } else if result.is_success() {
        writeln!(stdout, "{}", result.content)?;
    }
    log_result(&result);

    match result.error {
        Some(error) if !json => Err(anyhow!("Generation failed: {error}")),
        _ => Ok(()),
    }
}

/// Stream a generation to stdout as it arrives
///
/// # Errors
/// Returns an error if the request is invalid or the stream ends in failure
pub async fn handle_stream(config: &DevAssistConfig, args: RequestArgs) -> Result<()> {
    let usage_log = usage_log_path()?;
    let orchestrator = build_orchestrator(config, Some(&usage_log)).await?;
    let request = build_request(args)?;
    let started = Utc::now().date_naive();
    let mut stream = orchestrator.generate_stream(&request).await?;

    let mut stdout = io::stdout();
    let mut failure = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            StreamChunk::Delta(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            StreamChunk::Done(summary) => {
                writeln!(stdout)?;
                info!(
                    "{} via {}/{}: {} tokens, ${:.6}, {} ms",
                    summary.correlation_id,
                    summary.provider_used,
                    summary.model_used,
                    summary.usage.total(),
                    summary.cost_usd,
                    summary.latency_ms
                );
            }
            StreamChunk::Error(message) => {
                failure = Some(message);
            }
        }
    }
    persist_usage(&orchestrator, &request.correlation_id, started, &usage_log).await;

    failure.map_or(Ok(()), |message| Err(anyhow!("Stream failed: {message}")))
}

/// Check every configured provider
///
/// # Errors
/// Returns an error if adapters cannot be built or output fails
pub async fn handle_health(config: &DevAssistConfig, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config, None).await?;
    let statuses = orchestrator.get_health().await;

    let output = if json {
        serde_json::to_string_pretty(&statuses)?
    } else {
        format_health(&statuses)?
    };
    writeln!(io::stdout(), "{output}")?;
    Ok(())
}

/// Summarize usage recorded by earlier runs
///
/// # Errors
/// Returns an error if the usage log cannot be read
pub async fn handle_usage(
    config: &DevAssistConfig,
    days: u32,
    user: Option<String>,
    org: Option<String>,
    provider: Option<ProviderKind>,
) -> Result<()> {
    let end = Utc::now().date_naive();
    let start = end
        .checked_sub_days(Days::new(u64::from(days.max(1) - 1)))
        .ok_or_else(|| anyhow!("--days {days} reaches before the calendar start"))?;

    let mut query = UsageQuery::between(start, end);
    if let Some(user) = user {
        query = query.for_user(user);
    }
    if let Some(org) = org {
        query = query.for_organization(org);
    }
    if let Some(provider) = provider {
        query = query.for_provider(provider);
    }

    let records = load_records(&usage_log_path()?)?;
    let summary = summarize(&records, &query, config.limits.clone()).await?;
    writeln!(io::stdout(), "{}", UsageReport::format_summary(&summary)?)?;
    Ok(())
}

/// List prompt templates or print one in full
///
/// # Errors
/// Returns an error if the template sources are invalid or the named template is missing
pub fn handle_templates(
    config: &DevAssistConfig,
    task: Option<TaskType>,
    show: Option<&str>,
) -> Result<()> {
    let manager = PromptManager::from_config(&config.prompts)?;

    let output = match (task, show) {
        (Some(task), Some(name)) => format_template(&manager.get(task, name)?)?,
        _ => {
            let templates: Vec<_> = manager
                .list()
                .into_iter()
                .filter(|template| task.is_none_or(|wanted| template.task_type == wanted))
                .collect();
            format_template_list(&templates)?
        }
    };
    write!(io::stdout(), "{output}")?;
    Ok(())
}

/// Build an orchestrator over a fresh store, seeded with this month's spend from
/// the usage log so daily and monthly limits carry over between runs
async fn build_orchestrator(
    config: &DevAssistConfig,
    usage_log: Option<&Path>,
) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::from_config(config, Arc::new(MemoryStore::new()))?;
    if let Some(path) = usage_log {
        let today = Utc::now().date_naive();
        let month_start = today.with_day(1).unwrap_or(today);
        let replayed = replay(orchestrator.tracker(), &load_records(path)?, month_start).await;
        debug!("Replayed {replayed} usage record(s) since {month_start}");
    }
    if orchestrator.registry().is_empty() {
        warn!("No providers configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY or GOOGLE_API_KEY");
    }
    Ok(orchestrator)
}

/// Turn parsed arguments into a request, reading content from the file or stdin
fn build_request(args: RequestArgs) -> Result<GenerationRequest> {
    let content = match (args.content, &args.file) {
        (Some(content), _) => content,
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => io::read_to_string(io::stdin()).context("Failed to read stdin")?,
    };
    if content.trim().is_empty() {
        bail!("No content given; pass it as an argument, with --file or on stdin");
    }

    let mut request = GenerationRequest::new(args.task, content);
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    if let Some(tier) = args.tier {
        request = request.with_tier(tier);
    }
    if let Some(system) = args.system {
        request = request.with_system_prompt(system);
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(user) = args.user {
        request = request.for_user(user);
    }
    if let Some(org) = args.org {
        request = request.for_organization(org);
    }
    Ok(request)
}

fn log_result(result: &GenerationResult) {
    if result.cached {
        info!("{} served from cache", result.correlation_id);
        return;
    }
    info!(
        "{} via {}/{}: {} tokens, ${:.6}, {} ms, {} attempt(s)",
        result.correlation_id,
        result.provider_used,
        result.model_used,
        result.usage.total(),
        result.cost_usd,
        result.latency_ms,
        result.attempts
    );
}

fn usage_log_path() -> Result<PathBuf> {
    Ok(DevAssistConfig::config_dir()?.join(USAGE_LOG))
}

/// Append the records of one request to the usage log. The in-memory store
/// dies with the process.
async fn persist_usage(
    orchestrator: &Orchestrator,
    correlation_id: &str,
    started: NaiveDate,
    usage_log: &Path,
) {
    orchestrator.flush_usage().await;
    let today = Utc::now().date_naive();
    let mut records = Vec::new();
    for date in started.iter_days().take_while(|date| *date <= today) {
        match orchestrator.tracker().records(date).await {
            Ok(day) => records.extend(
                day.into_iter()
                    .filter(|record| record.correlation_id == correlation_id),
            ),
            Err(error) => {
                warn!("Failed to read usage for {correlation_id}: {error}");
                return;
            }
        }
    }
    if let Err(error) = append_records(usage_log, &records) {
        warn!("Failed to persist usage: {error}");
    }
}

fn append_records(path: &Path, records: &[UsageRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for record in records {
        writeln!(file, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

/// Read the usage log, skipping lines that do not parse
fn load_records(path: &Path) -> Result<Vec<UsageRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(error) => warn!("Skipping {}:{}: {error}", path.display(), index + 1),
        }
    }
    Ok(records)
}

/// Feed records from `since` onwards into a tracker. Returns how many were replayed.
async fn replay(tracker: &UsageTracker, records: &[UsageRecord], since: NaiveDate) -> usize {
    let mut replayed = 0;
    for record in records.iter().filter(|record| record.date() >= since) {
        tracker.record(record).await;
        replayed += 1;
    }
    replayed
}

/// Replay records into a scratch tracker and roll them up
async fn summarize(
    records: &[UsageRecord],
    query: &UsageQuery,
    limits: LimitsConfig,
) -> Result<UsageSummary> {
    let tracker = UsageTracker::new(Arc::new(MemoryStore::new()), limits);
    replay(&tracker, records, query.start).await;
    Ok(tracker.get_usage(query).await?)
}

fn format_health(statuses: &[HealthStatus]) -> Result<String, FmtError> {
    let mut output = String::new();
    if statuses.is_empty() {
        writeln!(output, "No providers configured")?;
    }
    for status in statuses {
        if status.available {
            writeln!(
                output,
                "{}: available ({} ms) - {}",
                status.provider,
                status.latency_ms,
                status.models.join(", ")
            )?;
        } else {
            writeln!(
                output,
                "{}: unavailable - {}",
                status.provider,
                status.error.as_deref().unwrap_or("unknown error")
            )?;
        }
    }
    Ok(output)
}

fn format_template_list(templates: &[PromptTemplate]) -> Result<String, FmtError> {
    let mut output = String::new();
    if templates.is_empty() {
        writeln!(output, "No templates")?;
    }
    for template in templates {
        write!(output, "{}/{} v{}", template.task_type, template.name, template.version)?;
        if template.description.is_empty() {
            writeln!(output)?;
        } else {
            writeln!(output, " - {}", template.description)?;
        }
    }
    Ok(output)
}

fn format_template(template: &PromptTemplate) -> Result<String, FmtError> {
    let mut output = String::new();
    writeln!(output, "Name: {}", template.name)?;
    writeln!(output, "Task: {}", template.task_type)?;
    writeln!(output, "Version: {}", template.version)?;
    if !template.description.is_empty() {
        writeln!(output, "Description: {}", template.description)?;
    }
    writeln!(output, "Variables: {}", template.variables.join(", "))?;
    if !template.system_prompt.is_empty() {
        writeln!(output, "\n[system]\n{}", template.system_prompt)?;
    }
    writeln!(output, "\n[user]\n{}", template.user_prompt)?;
    Ok(output)
}
