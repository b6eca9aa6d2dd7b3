//! Thin repository-lifecycle driver.
//!
//! Subcommands: `create | get | push | show | check | rename | delete |
//! reset | recalc <serverId>`. These exercise the
//! [`planpulse::repository::Repository`] trait and the host-configuration
//! layer against a real [`planpulse::repository::FsRepository`], walking
//! `pgpi_repository/<serverId>/` on disk.

use std::error::Error as StdError;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use planpulse::config::{check_server_id, default_hosts_conf, RepositoryConfig};
use planpulse::logging;
use planpulse::repository::{FsRepository, Repository, Tier};

/// Manage a planpulse progress-estimation repository.
#[derive(Parser, Debug)]
#[command(name = "repo-mgr")]
#[command(version, about = "Create and inspect a planpulse query-progress repository")]
struct Args {
    /// Base directory containing `pgpi_repository/` (defaults to the user's
    /// home directory).
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new server section in hosts.conf and create its directory tree.
    Create { server_id: String },
    /// Print the resolved host entry for a server.
    Get { server_id: String },
    /// Push learned regression parameters to the target database's `query_plan.reg` table.
    Push { server_id: String },
    /// Show repository watermarks for a server.
    Show { server_id: String },
    /// Verify hosts.conf and plan-directory permission ceilings.
    Check { server_id: String },
    /// Rename a server section.
    Rename { server_id: String, new_id: String },
    /// Delete a server's repository subtree.
    Delete { server_id: String },
    /// Reset all sequence-id watermarks for a server to 0.
    Reset { server_id: String },
    /// Re-run grouping and regression from the beginning (rewinds watermarks).
    Recalc { server_id: String },
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> Result<(), Box<dyn StdError>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let base_dir = args.base_dir.clone().unwrap_or_else(default_base_dir);
    let config = RepositoryConfig::new(base_dir);

    match args.command {
        Command::Create { server_id } => cmd_create(&config, &server_id),
        Command::Get { server_id } => cmd_get(&config, &server_id),
        Command::Push { server_id } => cmd_push(&config, &server_id),
        Command::Show { server_id } => cmd_show(&config, &server_id),
        Command::Check { server_id } => cmd_check(&config, &server_id),
        Command::Rename { server_id, new_id } => cmd_rename(&config, &server_id, &new_id),
        Command::Delete { server_id } => cmd_delete(&config, &server_id),
        Command::Reset { server_id } => cmd_reset(&config, &server_id),
        Command::Recalc { server_id } => cmd_recalc(&config, &server_id),
    }
}

fn cmd_create(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    std::fs::create_dir_all(config.repository_dir())?;
    let hosts_path = config.hosts_conf_path();
    if !hosts_path.exists() {
        std::fs::write(&hosts_path, default_hosts_conf())?;
        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&hosts_path, std::fs::Permissions::from_mode(0o640))?;
        }
    }

    let use_prompt = inquire_bool(&format!("Prompt for {server_id}'s password interactively?"));
    let password = if use_prompt {
        None
    } else {
        Some(rpassword::prompt_password(format!("Password for {server_id} (leave empty to skip): "))?)
    };

    let server_dir = config.server_dir(server_id);
    std::fs::create_dir_all(server_dir.join("tables").join("plan_json"))?;
    std::fs::create_dir_all(server_dir.join("grouping"))?;
    std::fs::create_dir_all(server_dir.join("regression"))?;
    std::fs::create_dir_all(server_dir.join("reg_params"))?;
    #[cfg(target_family = "unix")]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            server_dir.join("tables").join("plan_json"),
            std::fs::Permissions::from_mode(0o770),
        )?;
    }

    println!("created repository for '{server_id}' under {}", config.repository_dir().display());
    if let Some(p) = password {
        if !p.is_empty() {
            println!("(password captured; store it in hosts.conf's [{server_id}] section yourself)");
        }
    }
    Ok(())
}

fn inquire_bool(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    use std::io::Write;
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_ok() {
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

fn cmd_get(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let hosts = config.load_hosts()?;
    check_server_id(&hosts, server_id)?;
    let entry = &hosts.servers[server_id];
    println!("[{server_id}]");
    println!("host = {}", entry.host.as_deref().unwrap_or(""));
    println!("port = {}", entry.port.as_deref().unwrap_or(""));
    println!("username = {}", entry.username.as_deref().unwrap_or(""));
    println!("input_password = {}", entry.input_password);
    Ok(())
}

fn cmd_push(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let hosts = config.load_hosts()?;
    check_server_id(&hosts, server_id)?;
    let repo = FsRepository::new(config.base_dir.clone());
    repo.check_permissions(server_id)?;
    println!(
        "pushing regression parameters for '{server_id}' is out of scope for this crate \
         (see planpulse::regression::push_format::format_params for the wire format)"
    );
    Ok(())
}

fn cmd_show(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let hosts = config.load_hosts()?;
    check_server_id(&hosts, server_id)?;
    let repo = FsRepository::new(config.base_dir.clone());
    for tier in [Tier::Tables, Tier::Grouping, Tier::Regression] {
        let seqid = repo.stat_seqid(server_id, tier)?;
        println!("{:?} watermark = {seqid}", tier);
    }
    Ok(())
}

fn cmd_check(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let repo = FsRepository::new(config.base_dir.clone());
    repo.check_permissions(server_id)?;
    println!("permissions OK for '{server_id}'");
    Ok(())
}

fn cmd_rename(config: &RepositoryConfig, server_id: &str, new_id: &str) -> Result<(), Box<dyn StdError>> {
    let hosts = config.load_hosts()?;
    check_server_id(&hosts, server_id)?;
    let from = config.server_dir(server_id);
    let to = config.server_dir(new_id);
    if from.exists() {
        std::fs::rename(&from, &to)?;
    }
    println!("renamed '{server_id}' to '{new_id}' (update hosts.conf's section header yourself)");
    Ok(())
}

fn cmd_delete(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let dir = config.server_dir(server_id);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    println!("deleted repository subtree for '{server_id}'");
    Ok(())
}

fn cmd_reset(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let repo = FsRepository::new(config.base_dir.clone());
    for tier in [Tier::Tables, Tier::Grouping, Tier::Regression] {
        repo.set_stat_seqid(server_id, tier, 0)?;
    }
    println!("reset watermarks for '{server_id}'");
    Ok(())
}

fn cmd_recalc(config: &RepositoryConfig, server_id: &str) -> Result<(), Box<dyn StdError>> {
    let repo = FsRepository::new(config.base_dir.clone());
    repo.set_stat_seqid(server_id, Tier::Grouping, 0)?;
    repo.set_stat_seqid(server_id, Tier::Regression, 0)?;
    println!("rewound grouping/regression watermarks for '{server_id}'; tables watermark left untouched");
    Ok(())
}
