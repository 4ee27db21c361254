use clap::{Parser, Subcommand};
use quire::logging::{self, LogFormat};
use quire::publish::{HostingRoot, PublishError};
use quire::redirect::{OutputDir, RedirectTable, Router};
use quire::{config, generate, output, render, scan, serve};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;

fn version_string() -> &'static str {
    let release = env!("QUIRE_RELEASE_BUILD");
    if release == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let revision = env!("QUIRE_GIT_REVISION");
        if revision.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{revision}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Static publishing pipeline for a developer blog")]
#[command(long_about = "\
Static publishing pipeline for a developer blog

Markdown/MDX posts with front-matter go in; a static site with paginated
previews, tag pages, a feed and a redirect table comes out, and is published
to a staged hosting target with a manually confirmed cutover.

Content structure:

  content/
  ├── config.toml                        # Site config (optional)
  ├── _redirects                         # Legacy URL table (optional)
  ├── static/                            # Copied to the site root
  │   └── img/logo.png                   #   → /img/logo.png
  ├── 2021-03-14-moving-house.md         # Post; date prefix sets the date
  ├── 2022-07-01-default-timeouts/       # Post with colocated files
  │   ├── index.md
  │   └── chart.png                      #   → /assets/2022-07-01-default-timeouts/chart.png
  └── drafts/idea.md                     # `draft: true` posts are never published

Front-matter (YAML between --- or TOML between +++):
  title, description, tags      required for published posts
  slug, date, category, draft   optional

Previews stop at the first <!-- truncate --> or {/* truncate */} marker.

Publishing:
  quire publish stage --target green     copy dist/ into a hosting target
  quire publish verify --target green    run health checks
  quire publish cutover --target green --yes
  quire publish status

Run 'quire gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Directory for intermediate files (scan manifest)
    #[arg(long, default_value = ".quire-temp", global = true)]
    temp_dir: PathBuf,

    /// Log format for diagnostics on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

/// Shared flags for commands that render.
#[derive(clap::Args, Clone)]
struct RenderArgs {
    /// Treat long posts without a truncation marker as errors
    #[arg(long)]
    strict: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Scan content directory into a manifest
    Scan,
    /// Run the full pipeline: scan → render → generate
    Build(RenderArgs),
    /// Validate content, references and previews without writing a site
    Check(RenderArgs),
    /// Show how the built site answers a request path
    Route {
        /// Request path, e.g. /assets/img/logo.png
        path: String,
    },
    /// Preview the built site locally
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
    /// Stage, verify and cut over hosting targets
    #[command(subcommand)]
    Publish(PublishCommand),
}

#[derive(Subcommand)]
enum PublishCommand {
    /// Copy the built site into a hosting target
    Stage {
        #[arg(long)]
        target: String,
    },
    /// Run health checks against a staged target
    Verify {
        #[arg(long)]
        target: String,
    },
    /// Point the canonical pointer at a verified target
    Cutover {
        #[arg(long)]
        target: String,
        /// Confirm the cutover
        #[arg(long)]
        yes: bool,
    },
    /// Show the canonical pointer and staged targets
    Status,
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = logging::init(cli.log_format) {
        eprintln!("warning: {error}");
    }
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Scan => {
            let manifest = scan::scan(&cli.source)?;
            write_manifest(&manifest, &cli.temp_dir)?;
            output::print_scan_output(&manifest, &cli.source);
        }
        Command::Build(args) => {
            println!("==> Stage 1: Scanning {}", cli.source.display());
            let manifest = scan::scan(&cli.source)?;
            write_manifest(&manifest, &cli.temp_dir)?;
            output::print_scan_output(&manifest, &cli.source);

            println!("==> Stage 2: Rendering → {}", cli.output.display());
            let report = generate::generate(&manifest, &cli.source, &cli.output, args.strict)?;
            output::print_build_report(&report);

            println!("==> Build complete: {}", cli.output.display());
        }
        Command::Check(args) => {
            println!("==> Checking {}", cli.source.display());
            let manifest = scan::scan(&cli.source)?;
            output::print_scan_output(&manifest, &cli.source);
            let rendered = render::render_all(&manifest, args.strict)?;
            println!(
                "==> Content is valid ({} posts rendered, {} preview warnings)",
                rendered.documents.len(),
                rendered.warnings.len()
            );
        }
        Command::Route { path } => {
            let table = RedirectTable::load(&cli.output.join("_redirects"))?;
            let router = Router::new(&table, OutputDir::new(&cli.output));
            output::print_route(&path, &router.resolve(&path), &cli.output);
        }
        Command::Serve { port, bind } => {
            serve::serve(&cli.output, SocketAddr::new(bind, port))?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Publish(command) => {
            let site_config = config::load_config(&cli.source)?;
            init_thread_pool(&site_config.publish);
            let hosting = HostingRoot::new(&site_config.publish.root, &site_config.publish);
            run_publish(command, &hosting, &cli.output)?;
        }
    }

    Ok(())
}

fn run_publish(
    command: PublishCommand,
    hosting: &HostingRoot,
    site_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        PublishCommand::Stage { target } => {
            let manifest = hosting.stage(site_dir, &target)?;
            output::print_stage(&manifest);
        }
        PublishCommand::Verify { target } => {
            let report = hosting.verify(&target)?;
            output::print_health_report(&report);
            if !report.passed() {
                return Err(format!("{target} is not ready for cutover").into());
            }
        }
        PublishCommand::Cutover { target, yes } => match hosting.cutover(&target, yes) {
            Ok(pointer) => {
                let targets = hosting.list_targets()?;
                output::print_status(Some(&pointer), &targets);
            }
            Err(PublishError::HealthCheckFailed { target, failures }) => {
                for failure in &failures {
                    eprintln!("    {failure}");
                }
                return Err(PublishError::HealthCheckFailed { target, failures }.into());
            }
            Err(e) => return Err(e.into()),
        },
        PublishCommand::Status => {
            let pointer = hosting.status()?;
            let targets = hosting.list_targets()?;
            output::print_status(pointer.as_ref(), &targets);
        }
    }
    Ok(())
}

/// Write the scan manifest as pretty JSON into the temp dir.
fn write_manifest(manifest: &scan::Manifest, temp_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(temp_dir)?;
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(temp_dir.join("manifest.json"), json)
}

/// Initialize the rayon thread pool based on publish config.
///
/// Caps at the number of available CPU cores: user can constrain down, not up.
fn init_thread_pool(publish: &config::PublishConfig) {
    let threads = config::effective_threads(publish);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
