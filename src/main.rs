use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use verimport::alias::Alias;
use verimport::config::Config;
use verimport::dist::{self, DistManifest};
use verimport::http::HttpClient;
use verimport::index::{IndexClient, PackageIndex};
use verimport::loader::VersionedLoader;
use verimport::package::PackageSpec;
use verimport::runtime::RealRuntime;
use verimport::tool::{ToolStrategy, serve_worker};
use verimport::unit::UnitCache;

/// verimport - versioned package installer and loader
///
/// Installs each version of a package into its own directory and loads it
/// under a version-qualified alias, so several versions of one package can
/// be used side by side.
///
/// Examples:
///   verimport import ./custom.unit --version 1.0.0 --call run_custom
///   verimport install ./custom-1.0.0.zip
///   verimport list
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    globals: GlobalArgs,
}

#[derive(clap::Args, Debug)]
struct GlobalArgs {
    /// Install root directory (also via VERIMPORT_INSTALL_DIR)
    #[arg(long = "install-dir", value_name = "PATH", global = true)]
    install_dir: Option<PathBuf>,

    /// Directory searched for artifacts imported by name (also via VERIMPORT_IMPORT_DIR)
    #[arg(long = "import-dir", value_name = "PATH", global = true)]
    import_dir: Option<PathBuf>,

    /// JSON configuration file (also via VERIMPORT_CONFIG)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// How packed distributions are installed: in_process, spawned_process or located_binary
    #[arg(long = "tool-strategy", value_name = "STRATEGY", global = true)]
    tool_strategy: Option<ToolStrategy>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install an artifact without loading it
    Install(InstallArgs),

    /// Install if needed, then load a package under its versioned alias
    Import(ImportArgs),

    /// List completed installs
    List(ListArgs),

    /// Delete an installed alias
    Remove(RemoveArgs),

    /// List the versions the remote index offers for a package
    Versions(VersionsArgs),

    /// Download an artifact from the remote index
    Download(DownloadArgs),

    /// Build a packed distribution from a directory
    Pack(PackArgs),

    /// Run the packed-distribution installer tool
    Tool(ToolArgs),

    /// Serve one tool request on stdin/stdout
    #[command(name = "tool-worker", hide = true)]
    ToolWorker,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Artifact file or unit package directory
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Package name (parsed from SOURCE when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Package version (parsed from SOURCE when omitted)
    #[arg(long)]
    version: Option<String>,

    /// Let the installer tool install declared dependencies too
    #[arg(long)]
    deps: bool,
}

#[derive(clap::Args, Debug)]
struct ImportArgs {
    /// Artifact path, or a package name looked up in the import directory
    #[arg(value_name = "SOURCE_OR_NAME")]
    source: String,

    #[arg(long)]
    version: Option<String>,

    /// File inside the installed root to load instead of the entry
    #[arg(long = "sub-path", value_name = "PATH")]
    sub_path: Option<PathBuf>,

    /// Export to call after loading; its value is printed
    #[arg(long, value_name = "EXPORT")]
    call: Option<String>,

    /// Drop the bare-name entries the load added
    #[arg(long = "reset-modules")]
    reset_modules: bool,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    /// List importable artifacts in the import directory instead
    #[arg(long)]
    available: bool,
}

#[derive(clap::Args, Debug)]
struct RemoveArgs {
    /// Alias to delete, e.g. custom_1_0_0
    #[arg(value_name = "ALIAS")]
    alias: Alias,
}

#[derive(clap::Args, Debug)]
struct IndexArgs {
    /// Base URL of the simple package index
    #[arg(long = "index-url", env = "VERIMPORT_INDEX_URL", value_name = "URL")]
    index_url: String,
}

#[derive(clap::Args, Debug)]
struct VersionsArgs {
    name: String,

    #[command(flatten)]
    index: IndexArgs,
}

#[derive(clap::Args, Debug)]
struct DownloadArgs {
    name: String,

    /// Version to fetch (newest when omitted)
    #[arg(long)]
    version: Option<String>,

    /// Directory the artifact is saved to
    #[arg(long, value_name = "DIR", default_value = ".")]
    dest: PathBuf,

    #[command(flatten)]
    index: IndexArgs,
}

#[derive(clap::Args, Debug)]
struct PackArgs {
    /// Directory whose contents become the payload
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    #[arg(long)]
    name: String,

    #[arg(long)]
    version: String,

    /// Names the distribution depends on
    #[arg(long = "requires", value_name = "NAME")]
    requires: Vec<String>,

    /// Output file (defaults to <name>-<version>.dist)
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ToolArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

impl GlobalArgs {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(&RealRuntime, self.config.as_deref())?;
        if let Some(dir) = &self.install_dir {
            config.install_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.import_dir {
            config.import_dir = Some(dir.clone());
        }
        if let Some(strategy) = self.tool_strategy {
            config.tool.strategy = strategy;
        }
        Ok(config)
    }
}

fn loader(config: &Config) -> Result<VersionedLoader<RealRuntime>> {
    Ok(VersionedLoader::from_config(
        Arc::new(RealRuntime),
        config,
        UnitCache::new(),
    )?)
}

fn index_client(args: &IndexArgs) -> Result<Box<dyn PackageIndex>> {
    let client = Client::builder()
        .user_agent(concat!("verimport/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    Ok(Box::new(IndexClient::new(
        Arc::new(RealRuntime),
        HttpClient::new(client),
        args.index_url.clone(),
    )))
}

fn install(mut config: Config, args: InstallArgs) -> Result<()> {
    config.install_dependencies |= args.deps;
    let loader = loader(&config)?;
    let spec = match &args.name {
        Some(name) => PackageSpec::new(name.clone(), args.version.as_deref()),
        None => PackageSpec::from_path(&args.source, args.version.as_deref()),
    };
    let artifact = loader.installer().install(&args.source, &spec)?;
    println!(
        "Installed {} at {}",
        artifact.alias,
        artifact.root_path.display()
    );
    Ok(())
}

fn import(mut config: Config, args: ImportArgs) -> Result<()> {
    config.reset_modules |= args.reset_modules;
    let mut loader = loader(&config)?;
    let unit = loader.import(&args.source, args.version.as_deref(), args.sub_path.as_deref())?;
    let key = loader
        .registry()
        .record_of(&unit)
        .map(|r| r.key.clone())
        .unwrap_or_default();
    println!("Loaded {} as {}", unit.name(), key);
    if let Some(export) = &args.call {
        println!("{}", unit.call(export)?);
    }
    Ok(())
}

fn list(config: Config, args: ListArgs) -> Result<()> {
    let loader = loader(&config)?;
    if args.available {
        for module in loader.available()? {
            println!(
                "{}\t{}\t{}\t{}",
                module.alias,
                module.name,
                module.version,
                module.path.display()
            );
        }
        return Ok(());
    }
    let receipts = loader.installer().list_installed()?;
    if receipts.is_empty() {
        println!("No packages installed.");
    }
    for receipt in receipts {
        println!(
            "{}\t{}\t{}\t{}",
            receipt.alias, receipt.name, receipt.version, receipt.kind
        );
    }
    Ok(())
}

fn remove(config: Config, args: RemoveArgs) -> Result<()> {
    let mut loader = loader(&config)?;
    loader.delete_installed(&args.alias)?;
    println!("Removed {}", args.alias);
    Ok(())
}

fn pack(args: PackArgs) -> Result<()> {
    let manifest = DistManifest {
        name: args.name,
        version: args.version,
        requires: args.requires,
    };
    let out = args.out.unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}-{}{}",
            manifest.name,
            manifest.version,
            dist::DIST_SUFFIX
        ))
    });
    dist::pack(&RealRuntime, &args.dir, &manifest, &out)?;
    println!("Packed {}", out.display());
    Ok(())
}

fn run_tool(args: &[String]) -> i32 {
    let output = dist::tool_main(args);
    if output.success() {
        print!("{}", output.output);
    } else {
        eprint!("{}", output.output);
    }
    output.status
}

fn print_path(path: &Path) {
    println!("{}", path.display());
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Install(args) => install(cli.globals.config()?, args)?,
        Commands::Import(args) => import(cli.globals.config()?, args)?,
        Commands::List(args) => list(cli.globals.config()?, args)?,
        Commands::Remove(args) => remove(cli.globals.config()?, args)?,
        Commands::Versions(args) => {
            let client = index_client(&args.index)?;
            for entry in client.list_versions(&args.name).await? {
                println!("{}\t{}", entry.version, entry.url);
            }
        }
        Commands::Download(args) => {
            let client = index_client(&args.index)?;
            let path = client
                .download(&args.name, args.version.as_deref(), &args.dest)
                .await?;
            print_path(&path);
        }
        Commands::Pack(args) => pack(args)?,
        Commands::Tool(args) => std::process::exit(run_tool(&args.args)),
        Commands::ToolWorker => serve_worker(
            Arc::new(dist::tool_main),
            std::io::stdin().lock(),
            std::io::stdout().lock(),
        )?,
    }
    Ok(())
}
