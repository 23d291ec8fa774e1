mod config;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use log::warn;

use deskform_core::differ::{create_plan, destroy_plan};
use deskform_core::effect::Effect;
use deskform_core::interpreter::{EffectOutcome, Interpreter};
use deskform_core::plan::Plan;
use deskform_core::provider::{Provider, ResourceType};
use deskform_core::resource::{Resource, ResourceId, State, Value};
use deskform_core::schema::ResourceSchema;
use deskform_provider_workspace::client::JsonExt;
use deskform_provider_workspace::jobs;
use deskform_provider_workspace::{Service, WorkspaceProvider};
use deskform_state::{LocalBackend, LockInfo, StateBackend, StateFile};

use crate::config::ConfigFile;

#[derive(Parser)]
#[command(name = "deskform")]
#[command(about = "Declarative management of cloud virtual desktops", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Region, overriding HW_REGION_NAME
    #[arg(long, global = true)]
    region: Option<String>,

    /// Project id, overriding HW_PROJECT_ID
    #[arg(long, global = true)]
    project_id: Option<String>,

    /// Provider configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file
    #[arg(long, global = true, default_value = LocalBackend::DEFAULT_STATE_FILE)]
    state: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "deskform.json")]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        /// Path to the configuration file
        #[arg(default_value = "deskform.json")]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to the configuration file
        #[arg(default_value = "deskform.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy all resources defined in the configuration file
    Destroy {
        /// Path to the configuration file
        #[arg(default_value = "deskform.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Adopt an existing remote object into the state
    Import {
        /// Resource type, e.g. workspace_desktop
        resource_type: String,
        /// Resource name
        name: String,
        /// Remote id (or name, where the type supports lookup by name)
        id: String,
    },
    /// Run the data sources of the configuration file
    Query {
        /// Path to the configuration file
        #[arg(default_value = "deskform.json")]
        file: PathBuf,
    },
    /// Job commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// State management commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Wait until a job reaches a terminal status
    Wait {
        kind: JobKind,
        /// Job id (pool name for pool-status)
        job_id: String,

        #[arg(long, default_value_t = 30)]
        timeout_minutes: u64,

        /// Desktop pool the job belongs to (workspace jobs)
        #[arg(long)]
        pool_id: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum JobKind {
    /// Generic Workspace job
    Job,
    /// Desktop job, tracked through its sub-jobs
    Workspace,
    AppServer,
    ImageServer,
    /// Desktop pool reaching STEADY
    PoolStatus,
}

#[derive(Subcommand)]
enum StateCommands {
    /// List managed resources
    List,
    /// Show the recorded attributes of a resource
    Show { resource_type: String, name: String },
    /// Remove a lock left behind by another run
    ForceUnlock { lock_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.global.verbose);

    let global = &cli.global;
    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(global, &file).await,
        Commands::Apply { file, auto_approve } => run_apply(global, &file, auto_approve).await,
        Commands::Destroy { file, auto_approve } => run_destroy(global, &file, auto_approve).await,
        Commands::Import {
            resource_type,
            name,
            id,
        } => run_import(global, &resource_type, &name, &id).await,
        Commands::Query { file } => run_query(global, &file).await,
        Commands::Job { command } => run_job_command(global, command).await,
        Commands::State { command } => run_state_command(global, command).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "deskform", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Schemas of every known type, and which of them are data sources
struct Catalog {
    schemas: HashMap<String, ResourceSchema>,
    data_sources: HashSet<String>,
}

impl Catalog {
    fn load() -> Self {
        let mut schemas = HashMap::new();
        let mut data_sources = HashSet::new();
        for resource_type in deskform_provider_workspace::resource_types() {
            if resource_type.is_data_source() {
                data_sources.insert(resource_type.name().to_string());
            }
            schemas.insert(resource_type.name().to_string(), resource_type.schema());
        }
        Self {
            schemas,
            data_sources,
        }
    }

    fn is_sensitive(&self, resource_type: &str, key: &str) -> bool {
        self.schemas
            .get(resource_type)
            .is_some_and(|s| s.is_sensitive(key))
    }

    fn is_force_new(&self, resource_type: &str, key: &str) -> bool {
        self.schemas
            .get(resource_type)
            .is_some_and(|s| s.force_new_attributes().contains(&key))
    }
}

/// Fill schema defaults and check every resource against its schema
fn validate_resources(resources: &mut [Resource], catalog: &Catalog) -> Result<(), String> {
    let mut all_errors = Vec::new();

    for resource in resources.iter_mut() {
        let resource_type = &resource.id.resource_type;
        let Some(schema) = catalog.schemas.get(resource_type) else {
            all_errors.push(format!("{}: unknown resource type", resource.id));
            continue;
        };
        let is_data_source = catalog.data_sources.contains(resource_type);
        if is_data_source != resource.is_data_source() {
            let section = if is_data_source {
                "data_sources"
            } else {
                "resources"
            };
            all_errors.push(format!("{}: must be declared under {}", resource.id, section));
            continue;
        }

        schema.apply_defaults(&mut resource.attributes);
        if let Err(errors) = schema.validate(&resource.attributes) {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

fn load_resources(file: &Path, catalog: &Catalog) -> Result<Vec<Resource>, String> {
    let mut resources = ConfigFile::load(file)?.into_resources()?;
    validate_resources(&mut resources, catalog)?;
    Ok(resources)
}

fn build_provider(global: &GlobalArgs) -> Result<WorkspaceProvider, String> {
    let config = config::load_provider_config(
        global.config.as_deref(),
        global.region.as_deref(),
        global.project_id.as_deref(),
    )?;
    WorkspaceProvider::new(&config).map_err(|e| e.to_string())
}

async fn read_state_file(backend: &LocalBackend) -> Result<StateFile, String> {
    Ok(backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default())
}

/// Release the lock taken for an operation, keeping the operation's error
/// when both fail
async fn release_lock<T>(
    backend: &LocalBackend,
    lock: &LockInfo,
    result: Result<T, String>,
) -> Result<T, String> {
    if let Err(e) = backend.release_lock(lock).await {
        if result.is_ok() {
            return Err(format!("Failed to release state lock: {}", e));
        }
        warn!("failed to release state lock {}: {}", lock.id, e);
    }
    result
}

async fn acquire_lock(backend: &LocalBackend, operation: &str) -> Result<LockInfo, String> {
    backend
        .acquire_lock(operation)
        .await
        .map_err(|e| e.to_string())
}

fn confirm(question: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!("  {}", "Only 'yes' will be accepted to approve.".yellow());
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();
    Ok(input.trim() == "yes")
}

fn run_validate(file: &Path) -> Result<(), String> {
    let catalog = Catalog::load();

    println!("{}", "Validating...".cyan());
    let resources = load_resources(file, &catalog)?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", resources.len())
            .green()
            .bold()
    );
    for resource in &resources {
        println!("  • {}", resource.id);
    }
    Ok(())
}

/// Read the remote state of every declared resource and of every recorded
/// resource no longer declared
async fn refresh_states(
    provider: &WorkspaceProvider,
    resources: &[Resource],
    state_file: &StateFile,
) -> Result<HashMap<ResourceId, State>, String> {
    let mut current = HashMap::new();

    for resource in resources.iter().filter(|r| !r.is_data_source()) {
        let identifier = state_file.identifier(&resource.id);
        let state = provider
            .read(&resource.id, identifier)
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        current.insert(resource.id.clone(), provider.align_state(state, resource));
    }

    for recorded in &state_file.resources {
        let id = recorded.id();
        if current.contains_key(&id) {
            continue;
        }
        let state = provider
            .read(&id, recorded.identifier.as_deref())
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        current.insert(id, state);
    }

    Ok(current)
}

async fn run_plan(global: &GlobalArgs, file: &Path) -> Result<(), String> {
    let catalog = Catalog::load();
    let resources = load_resources(file, &catalog)?;
    let provider = build_provider(global)?;
    let backend = LocalBackend::with_path(global.state.clone());

    let state_file = read_state_file(&backend).await?;
    let current = refresh_states(&provider, &resources, &state_file).await?;
    let plan = create_plan(&resources, &current, &catalog.schemas);
    print_plan(&plan, &catalog);
    Ok(())
}

async fn run_apply(global: &GlobalArgs, file: &Path, auto_approve: bool) -> Result<(), String> {
    let catalog = Catalog::load();
    let resources = load_resources(file, &catalog)?;
    let provider = build_provider(global)?;
    let backend = LocalBackend::with_path(global.state.clone());

    let lock = acquire_lock(&backend, "apply").await?;
    let result = apply_locked(provider, &backend, &resources, &catalog, auto_approve).await;
    release_lock(&backend, &lock, result).await
}

async fn apply_locked(
    provider: WorkspaceProvider,
    backend: &LocalBackend,
    resources: &[Resource],
    catalog: &Catalog,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;
    let current = refresh_states(&provider, resources, &state_file).await?;
    for state in current.values() {
        state_file.record(state);
    }

    let plan = create_plan(resources, &current, &catalog.schemas);
    if plan.mutation_count() == 0 {
        println!("{}", "No changes needed.".green());
        return save_state(backend, &mut state_file).await;
    }

    print_plan(&plan, catalog);
    println!();
    if !auto_approve && !confirm("Do you want to perform these actions?")? {
        println!("{}", "Apply cancelled.".yellow());
        return save_state(backend, &mut state_file).await;
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();
    let (success_count, failure_count) = execute_plan(provider, &plan, &mut state_file).await;
    save_state(backend, &mut state_file).await?;

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

async fn run_destroy(global: &GlobalArgs, file: &Path, auto_approve: bool) -> Result<(), String> {
    let catalog = Catalog::load();
    let resources = load_resources(file, &catalog)?;
    let provider = build_provider(global)?;
    let backend = LocalBackend::with_path(global.state.clone());

    let lock = acquire_lock(&backend, "destroy").await?;
    let result = destroy_locked(provider, &backend, &resources, auto_approve).await;
    release_lock(&backend, &lock, result).await
}

async fn destroy_locked(
    provider: WorkspaceProvider,
    backend: &LocalBackend,
    resources: &[Resource],
    auto_approve: bool,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;

    // Declaration order; the destroy plan reverses it
    let mut states = Vec::new();
    for resource in resources.iter().filter(|r| !r.is_data_source()) {
        let Some(identifier) = state_file.identifier(&resource.id) else {
            continue;
        };
        let state = provider
            .read(&resource.id, Some(identifier))
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        states.push(state);
    }
    for state in &states {
        state_file.record(state);
    }

    let plan = destroy_plan(&states);
    if plan.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return save_state(backend, &mut state_file).await;
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for effect in plan.effects() {
        println!("  {} {}", "-".red().bold(), effect.resource_id());
    }
    println!();
    println!(
        "Plan: {} to destroy.",
        plan.effects().len().to_string().red()
    );
    println!();

    if !auto_approve
        && !confirm("Do you really want to destroy all resources? This cannot be undone.")?
    {
        println!("{}", "Destroy cancelled.".yellow());
        return save_state(backend, &mut state_file).await;
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();
    let (success_count, failure_count) = execute_plan(provider, &plan, &mut state_file).await;
    save_state(backend, &mut state_file).await?;

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

/// Run a plan, recording every outcome in the state file as it arrives
async fn execute_plan(
    provider: WorkspaceProvider,
    plan: &Plan,
    state_file: &mut StateFile,
) -> (usize, usize) {
    let interpreter = Interpreter::new(provider);
    let result = interpreter
        .apply(plan, |effect, outcome| match outcome {
            Ok(outcome) => {
                match outcome {
                    EffectOutcome::Deleted { id } => {
                        state_file.remove(id);
                    }
                    EffectOutcome::Read { .. } => {}
                    other => {
                        if let Some(state) = other.state() {
                            state_file.record(state);
                        }
                    }
                }
                println!("  {} {}", "✓".green(), format_effect(effect));
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
            }
        })
        .await;
    (result.success_count, result.failure_count)
}

async fn save_state(backend: &LocalBackend, state_file: &mut StateFile) -> Result<(), String> {
    state_file.increment_serial();
    backend
        .write_state(state_file)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))
}

async fn run_import(
    global: &GlobalArgs,
    resource_type: &str,
    name: &str,
    import_id: &str,
) -> Result<(), String> {
    let catalog = Catalog::load();
    if !catalog.schemas.contains_key(resource_type) {
        return Err(format!("unknown resource type: {}", resource_type));
    }
    if catalog.data_sources.contains(resource_type) {
        return Err(format!("{} is a data source and cannot be imported", resource_type));
    }

    let id = ResourceId::new(resource_type, name);
    let provider = build_provider(global)?;
    let backend = LocalBackend::with_path(global.state.clone());

    let lock = acquire_lock(&backend, "import").await?;
    let result = import_locked(&provider, &backend, &id, import_id).await;
    release_lock(&backend, &lock, result).await
}

async fn import_locked(
    provider: &WorkspaceProvider,
    backend: &LocalBackend,
    id: &ResourceId,
    import_id: &str,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;
    if let Some(existing) = state_file.find(id) {
        return Err(format!(
            "{} is already managed (identifier: {})",
            id,
            existing.identifier.as_deref().unwrap_or("-")
        ));
    }

    let state = provider
        .import(id, import_id)
        .await
        .map_err(|e| e.to_string())?;
    if !state.exists {
        return Err(format!("{} not found", import_id));
    }
    state_file.record(&state);
    save_state(backend, &mut state_file).await?;

    println!(
        "{} {} (identifier: {})",
        "✓ Imported".green().bold(),
        id,
        state.identifier.as_deref().unwrap_or(import_id)
    );
    Ok(())
}

async fn run_query(global: &GlobalArgs, file: &Path) -> Result<(), String> {
    let catalog = Catalog::load();
    let queries: Vec<Resource> = load_resources(file, &catalog)?
        .into_iter()
        .filter(|r| r.is_data_source())
        .collect();
    if queries.is_empty() {
        println!("{}", "No data sources defined in configuration.".yellow());
        return Ok(());
    }

    let provider = build_provider(global)?;
    for query in &queries {
        let state = provider
            .read_data_source(query)
            .await
            .map_err(|e| e.to_string())?;
        println!("{}", query.id.to_string().cyan().bold());
        let json = attributes_to_json(&state, &catalog);
        let rendered = serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?;
        println!("{}", rendered);
        println!();
    }
    Ok(())
}

async fn run_job_command(global: &GlobalArgs, command: JobCommands) -> Result<(), String> {
    match command {
        JobCommands::Wait {
            kind,
            job_id,
            timeout_minutes,
            pool_id,
        } => run_job_wait(global, kind, &job_id, timeout_minutes, pool_id.as_deref()).await,
    }
}

async fn run_job_wait(
    global: &GlobalArgs,
    kind: JobKind,
    job_id: &str,
    timeout_minutes: u64,
    pool_id: Option<&str>,
) -> Result<(), String> {
    let provider = build_provider(global)?;
    let timeout = Duration::from_secs(timeout_minutes * 60);
    let workspace = provider.client(Service::Workspace);
    let appstream = provider.client(Service::AppStream);

    println!("{}", format!("Waiting for {}...", job_id).cyan());
    let outcome = match kind {
        JobKind::PoolStatus => {
            let pool_id = jobs::wait_for_workspace_pool_status_completed(workspace, job_id, timeout)
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "{} desktop pool {} is STEADY (id: {})",
                "✓".green(),
                job_id,
                pool_id
            );
            return Ok(());
        }
        JobKind::Job => jobs::wait_for_job_completed(workspace, job_id, timeout).await,
        JobKind::Workspace => {
            jobs::wait_for_workspace_job_completed(workspace, job_id, pool_id, timeout).await
        }
        JobKind::AppServer => {
            jobs::wait_for_app_server_job_completed(appstream, job_id, timeout).await
        }
        JobKind::ImageServer => {
            jobs::wait_for_image_server_job_completed(appstream, job_id, timeout).await
        }
    }
    .map_err(|e| e.to_string())?;

    let resource_id = outcome
        .resource_id()
        .or_else(|| outcome.body.str_at("/entities/desktop_id"))
        .map(str::to_string);
    let status = outcome.status.clone();
    outcome.into_result(job_id).map_err(|e| e.to_string())?;

    println!("{} job {} finished with status {}", "✓".green(), job_id, status);
    if let Some(resource_id) = resource_id {
        println!("  resource: {}", resource_id);
    }
    Ok(())
}

async fn run_state_command(global: &GlobalArgs, command: StateCommands) -> Result<(), String> {
    let backend = LocalBackend::with_path(global.state.clone());
    match command {
        StateCommands::List => {
            let Some(state_file) = backend.read_state().await.map_err(|e| e.to_string())? else {
                println!("{}", "No state file.".yellow());
                return Ok(());
            };
            let mut entries: Vec<_> = state_file.resources.iter().collect();
            entries.sort_by_key(|r| r.id().to_string());
            for entry in entries {
                println!(
                    "{}  {}",
                    entry.id(),
                    entry.identifier.as_deref().unwrap_or("-").dimmed()
                );
            }
            Ok(())
        }
        StateCommands::Show {
            resource_type,
            name,
        } => {
            let id = ResourceId::new(resource_type, name);
            let state_file = read_state_file(&backend).await?;
            let entry = state_file
                .find(&id)
                .ok_or_else(|| format!("{} is not in the state", id))?;
            let catalog = Catalog::load();
            println!("{}", id.to_string().cyan().bold());
            println!(
                "  identifier: {}",
                entry.identifier.as_deref().unwrap_or("-")
            );
            let json = attributes_to_json(&entry.to_state(), &catalog);
            let rendered = serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?;
            println!("{}", rendered);
            Ok(())
        }
        StateCommands::ForceUnlock { lock_id } => {
            backend
                .force_unlock(&lock_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", format!("✓ Lock {} removed.", lock_id).green().bold());
            Ok(())
        }
    }
}

/// Attributes as sorted JSON, sensitive values masked
fn attributes_to_json(state: &State, catalog: &Catalog) -> serde_json::Value {
    let object = state
        .attributes
        .iter()
        .map(|(key, value)| {
            let json = if catalog.is_sensitive(&state.id.resource_type, key) {
                serde_json::Value::String("(sensitive)".to_string())
            } else {
                value.to_json()
            };
            (key.clone(), json)
        })
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(object)
}

fn print_plan(plan: &Plan, catalog: &Catalog) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        match effect {
            Effect::Read(resource) => {
                println!("  {} {}", "<=".cyan().bold(), resource.id);
            }
            Effect::Create(resource) => {
                println!("  {} {}", "+".green().bold(), resource.id);
                let mut keys: Vec<&String> = resource
                    .attributes
                    .keys()
                    .filter(|k| !k.starts_with('_'))
                    .collect();
                keys.sort();
                for key in keys {
                    let value = format_attribute(catalog, &resource.id, key, &resource.attributes[key]);
                    println!("      {}: {}", key, value.green());
                }
            }
            Effect::Update {
                id,
                from,
                to,
                changed_attributes,
            } => {
                println!("  {} {}", "~".yellow().bold(), id);
                print_changes(catalog, id, from, to, changed_attributes, false);
            }
            Effect::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => {
                println!("  {} {}", "-/+".magenta().bold(), id);
                print_changes(catalog, id, from, to, changed_attributes, true);
            }
            Effect::Delete { id, identifier, .. } => {
                println!("  {} {} ({})", "-".red().bold(), id, identifier.dimmed());
            }
        }
    }

    println!();
    let summary = plan.summary();
    if summary.read > 0 {
        println!("{} ({} to read)", summary, summary.read);
    } else {
        println!("{}", summary);
    }
}

fn print_changes(
    catalog: &Catalog,
    id: &ResourceId,
    from: &State,
    to: &Resource,
    changed_attributes: &[String],
    replace: bool,
) {
    for key in changed_attributes {
        let old = from
            .attributes
            .get(key)
            .map(|v| format_attribute(catalog, id, key, v))
            .unwrap_or_else(|| "(none)".to_string());
        let new = to
            .attributes
            .get(key)
            .map(|v| format_attribute(catalog, id, key, v))
            .unwrap_or_else(|| "(none)".to_string());
        let marker = if replace && catalog.is_force_new(&id.resource_type, key) {
            format!(" {}", "# forces replacement".red())
        } else {
            String::new()
        };
        println!("      {}: {} => {}{}", key, old.red(), new.green(), marker);
    }
}

fn format_effect(effect: &Effect) -> String {
    match effect {
        Effect::Read(r) => format!("Read {}", r.id),
        Effect::Create(r) => format!("Create {}", r.id),
        Effect::Update { id, .. } => format!("Update {}", id),
        Effect::Replace { id, .. } => format!("Replace {}", id),
        Effect::Delete { id, .. } => format!("Delete {}", id),
    }
}

fn format_attribute(catalog: &Catalog, id: &ResourceId, key: &str, value: &Value) -> String {
    if catalog.is_sensitive(&id.resource_type, key) {
        "(sensitive)".to_string()
    } else {
        format_value(value)
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut strs: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            strs.sort();
            format!("{{{}}}", strs.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn job_wait_arguments() {
        let cli = Cli::parse_from([
            "deskform",
            "job",
            "wait",
            "app-server",
            "job-1",
            "--timeout-minutes",
            "5",
        ]);
        match cli.command {
            Commands::Job {
                command:
                    JobCommands::Wait {
                        kind,
                        job_id,
                        timeout_minutes,
                        pool_id,
                    },
            } => {
                assert!(matches!(kind, JobKind::AppServer));
                assert_eq!(job_id, "job-1");
                assert_eq!(timeout_minutes, 5);
                assert!(pool_id.is_none());
            }
            _ => panic!("expected job wait"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::parse_from(["deskform", "plan", "desktops.json", "-vv", "--region", "cn-north-4"]);
        assert_eq!(cli.global.verbose, 2);
        assert_eq!(cli.global.region.as_deref(), Some("cn-north-4"));
        assert_eq!(cli.global.state, PathBuf::from("deskform.state.json"));
    }

    #[test]
    fn catalog_knows_resources_and_data_sources() {
        let catalog = Catalog::load();
        assert!(catalog.schemas.contains_key("workspace_desktop"));
        assert!(!catalog.data_sources.contains("workspace_desktop"));
        assert!(catalog.data_sources.contains("workspace_app_servers"));
    }

    #[test]
    fn validation_reports_unknown_and_misplaced_types() {
        let catalog = Catalog::load();
        let mut resources = vec![
            Resource::new("workspace_nothing", "a"),
            Resource::new("workspace_app_servers", "b"),
        ];
        let err = validate_resources(&mut resources, &catalog).unwrap_err();
        assert!(err.contains("workspace_nothing.a: unknown resource type"));
        assert!(err.contains("workspace_app_servers.b: must be declared under data_sources"));
    }

    #[test]
    fn validation_fills_defaults() {
        let catalog = Catalog::load();
        let mut resources = vec![Resource::new("workspace_service", "main").with_attribute(
            "vpc_id",
            Value::from("vpc-1"),
        )];
        let _ = validate_resources(&mut resources, &catalog);
        assert_eq!(
            resources[0].attributes.get("auth_type"),
            Some(&Value::from("LITE_AS"))
        );
    }

    #[test]
    fn values_render_like_json() {
        let map = Value::Map(HashMap::from([
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Bool(true)),
        ]));
        assert_eq!(format_value(&map), "{a: true, b: 2}");
        assert_eq!(
            format_value(&Value::List(vec![Value::from("x"), Value::Int(1)])),
            "[\"x\", 1]"
        );
    }
}
