//! Offline console browser.
//!
//! # Responsibility
//! - Load a directory snapshot into SQLite and drive the browser engine
//!   against it from the command line.
//! - Print the scope tree and results listings as plain text.

use adconsole_core::directory::SqliteDirectory;
use adconsole_core::model::dn::{dn_equals, is_descendant_of};
use adconsole_core::{
    db, default_log_level, init_logging, log_session_settings, BrowserController,
    BrowserSettings, ConsoleError, NodeId,
};
use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "adconsole")]
#[command(about = "Browse a directory snapshot the way the management console does", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database holding the directory (in memory when omitted)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON array of entries to import before running the command
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Browser settings JSON; `--domain` alone is enough otherwise
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// DN of the domain head
    #[arg(long, global = true)]
    domain: Option<String>,

    /// Show objects hidden outside advanced view
    #[arg(long, global = true)]
    advanced: bool,

    /// Absolute directory for rolling log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print both scope trees down to `depth`
    Tree {
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// Print the results listing of one container
    List {
        /// DN of the container; the domain head when omitted
        dn: Option<String>,
    },
    /// Paged subtree search
    Find {
        filter: String,
        /// Search base; the domain head when omitted
        #[arg(long)]
        base: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &log_dir.to_string_lossy())?;
    }

    let mut settings = match &cli.settings {
        Some(path) => BrowserSettings::load(path)?,
        None => BrowserSettings::default(),
    };
    if let Some(domain) = &cli.domain {
        settings.domain_head = domain.clone();
    }
    settings.advanced_features |= cli.advanced;
    log_session_settings(&settings);

    let conn = match &cli.db {
        Some(path) => db::open_db(path)?,
        None => db::open_db_in_memory()?,
    };
    let directory = SqliteDirectory::try_new(&conn)?
        .with_schema(settings.schema.clone())
        .with_page_size(usize::try_from(settings.page_size)?);
    if let Some(snapshot) = &cli.snapshot {
        let imported = directory.import_json(&std::fs::read_to_string(snapshot)?)?;
        info!("event=cli_import module=cli status=ok entries={imported}");
    }

    let mut controller = BrowserController::new(directory, settings)?;
    let domain_root = controller.go_online()?;

    match cli.command {
        Commands::Tree { depth } => {
            let roots = controller.store().roots().to_vec();
            for root in roots {
                print_tree(&mut controller, root, 0, depth)?;
            }
        }
        Commands::List { dn } => {
            let node = match dn {
                Some(dn) => navigate(&mut controller, domain_root, &dn)?,
                None => domain_root,
            };
            controller.select_scope(node)?;
            print_listing(&controller, node);
        }
        Commands::Find { filter, base } => {
            let base = base.unwrap_or_else(|| controller.settings().domain_head.clone());
            for entry in controller.find_objects(&base, &filter)? {
                println!("{}\t{}", entry.display_name(), entry.dn);
            }
        }
    }
    Ok(())
}

fn print_tree(
    controller: &mut BrowserController<SqliteDirectory<'_>>,
    node: NodeId,
    level: usize,
    depth: usize,
) -> CliResult<()> {
    let Some(name) = controller.store().display_name(node.into()).map(str::to_string) else {
        return Ok(());
    };
    println!("{}{}", "  ".repeat(level), name);
    if level >= depth {
        return Ok(());
    }
    controller.expand(node)?;
    let children = controller.store().children(node).to_vec();
    for child in children {
        print_tree(controller, child, level + 1, depth)?;
    }
    Ok(())
}

fn print_listing(controller: &BrowserController<SqliteDirectory<'_>>, node: NodeId) {
    let store = controller.store();
    let labels = store
        .node_type(node.into())
        .and_then(|node_type| controller.results_view_for(node_type))
        .map(|view| view.header_labels.join("\t"))
        .unwrap_or_default();
    println!("{labels}");
    for row in store.rows_of(node) {
        if let Some(row) = store.row(*row) {
            println!("{}", row.columns.join("\t"));
        }
    }
}

/// Expands the domain tree along the ancestors of `dn` and returns its node.
fn navigate(
    controller: &mut BrowserController<SqliteDirectory<'_>>,
    root: NodeId,
    dn: &str,
) -> CliResult<NodeId> {
    let mut current = root;
    loop {
        let key = controller
            .store()
            .source_key(current.into())
            .unwrap_or_default()
            .to_string();
        if dn_equals(&key, dn) {
            return Ok(current);
        }
        controller.expand(current)?;
        let next = controller.store().children(current).iter().copied().find(|child| {
            controller
                .store()
                .source_key((*child).into())
                .is_some_and(|child_key| dn_equals(child_key, dn) || is_descendant_of(dn, child_key))
        });
        match next {
            Some(next) => current = next,
            None => return Err(Box::new(ConsoleError::NotFound(dn.to_string()))),
        }
    }
}
