use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use patchkit_core::builder::ManifestBuilder;
use patchkit_core::config::{
    BuilderConfig, FailurePolicy, PatcherConfig, SyncConfig, PATCHER_CONFIG_NAME,
};
use patchkit_core::executor::{ExecutionReport, PlanExecutor, PolicyObserver};
use patchkit_core::localize::{FluentValue, Localizer};
use patchkit_core::manifest::{Manifest, MANIFEST_VERSION};
use patchkit_core::progress::Progress;
use patchkit_core::reconcile::{ReconciliationPlan, Reconciler};
use patchkit_core::transport::{self, Transport};

#[derive(Parser)]
#[command(name = "patchkit", version, about = "Build patch manifests and bring game clients up to date")]
struct Cli {
    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Scan a patch directory and write its manifest.json
    Build {
        root: PathBuf,
        /// Extra glob patterns to leave out (relative to ROOT)
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long, default_value = MANIFEST_VERSION)]
        label: String,
        #[arg(long, default_value_t = false)]
        no_timestamp: bool,
    },
    /// Print a summary of a manifest file
    Summary { manifest: PathBuf },
    /// Compare local files against the server manifest without changing anything
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Download changed files and remove obsolete ones
    Apply {
        #[command(flatten)]
        target: TargetArgs,
        /// Keep downloading after a failed file instead of stopping
        #[arg(long, default_value_t = false)]
        keep_going: bool,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    #[arg(long, default_value = PATCHER_CONFIG_NAME)]
    config: PathBuf,
    /// Game directory to bring up to date
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Patch source (URL or directory); overrides server_url from the config
    #[arg(long)]
    source: Option<String>,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let loc = Localizer::builtin("en-GB");
    match cli.cmd {
        Cmd::Build { root, exclude, label, no_timestamp } => {
            build(&loc, &root, exclude, label, no_timestamp)?
        }
        Cmd::Summary { manifest } => summary(&manifest)?,
        Cmd::Check { target } => check(&loc, &target)?,
        Cmd::Apply { target, keep_going, progress } => {
            return apply(&loc, &target, keep_going, progress);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn,patchkit_cli=info,patchkit_core=info",
        1 => "info,patchkit_cli=debug,patchkit_core=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build(
    loc: &Localizer,
    root: &Path,
    exclude: Vec<String>,
    label: String,
    no_timestamp: bool,
) -> Result<()> {
    let cfg =
        BuilderConfig { version: label, stamp_time: !no_timestamp, exclude, ..Default::default() };
    let builder = ManifestBuilder::new(cfg)?;
    let report =
        builder.build(root).with_context(|| format!("build manifest for {}", root.display()))?;
    for w in &report.warnings {
        eprintln!("Warning: could not hash {}: {}", w.path, w.message);
    }
    println!(
        "{}",
        loc.msg(
            "build-done",
            &[
                ("path", text(report.manifest_path.display().to_string())),
                ("count", num(report.manifest.len())),
            ],
        )
    );
    Ok(())
}

fn summary(path: &Path) -> Result<()> {
    let mani = Manifest::load(path).with_context(|| format!("read {}", path.display()))?;
    print!("{}", mani.summary());
    Ok(())
}

struct Session {
    sync: SyncConfig,
    transport: Box<dyn Transport>,
    server: String,
}

fn open_session(t: &TargetArgs) -> Result<Session> {
    let server = match &t.source {
        Some(s) => s.clone(),
        None => {
            PatcherConfig::load_or_create(&t.config)
                .with_context(|| format!("load {}", t.config.display()))?
                .server_url
        }
    };
    debug!(%server, root = %t.root.display(), "opening session");
    let md = std::fs::metadata(&t.root).with_context(|| format!("stat {}", t.root.display()))?;
    anyhow::ensure!(md.is_dir(), "not a directory: {}", t.root.display());
    let transport = transport::open(&server, Duration::from_secs(t.timeout_secs));
    Ok(Session { sync: SyncConfig::new(&t.root), transport, server })
}

fn plan_for(loc: &Localizer, s: &Session) -> Result<ReconciliationPlan> {
    let target = s
        .transport
        .fetch_manifest()
        .with_context(|| format!("fetch manifest from {}", s.transport.describe()))?;
    eprintln!("Manifest loaded ({} files)", target.len());
    let plan = Reconciler::new(s.sync.clone())
        .plan_local(&target)
        .with_context(|| format!("check {}", s.sync.root.display()))?;
    if !plan.launcher_updates().is_empty() {
        eprintln!(
            "{}",
            loc.msg(
                "launcher-update",
                &[
                    ("files", text(plan.launcher_updates().join(", "))),
                    ("server", text(s.server.clone())),
                ],
            )
        );
    }
    Ok(plan)
}

fn plan_line(loc: &Localizer, plan: &ReconciliationPlan) -> String {
    if plan.is_empty() {
        return loc.msg("plan-up-to-date", &[]);
    }
    let mut parts = vec![];
    if !plan.to_fetch.is_empty() {
        parts.push(loc.count("plan-fetch", plan.to_fetch.len()));
    }
    if !plan.to_delete.is_empty() {
        parts.push(loc.count("plan-delete", plan.to_delete.len()));
    }
    parts.join(", ")
}

fn check(loc: &Localizer, t: &TargetArgs) -> Result<()> {
    let session = open_session(t)?;
    let plan = plan_for(loc, &session)?;
    for item in &plan.to_fetch {
        println!("  [{}] {}", item.reason.label(), item.entry.path);
    }
    for e in &plan.unchanged {
        println!("  [OK] {}", e.path);
    }
    for p in &plan.to_delete {
        println!("  [DELETE] {}", p);
    }
    println!("{}", plan_line(loc, &plan));
    Ok(())
}

fn apply(
    loc: &Localizer,
    t: &TargetArgs,
    keep_going: bool,
    show_progress: bool,
) -> Result<ExitCode> {
    let mut session = open_session(t)?;
    session.sync.on_fetch_error =
        if keep_going { FailurePolicy::Continue } else { FailurePolicy::Abort };
    let plan = plan_for(loc, &session)?;
    println!("{}", plan_line(loc, &plan));

    let executor = PlanExecutor::new(session.sync.clone(), session.transport.as_ref());
    let result = if show_progress {
        executor.apply(&plan, &mut Progress::new(true))
    } else {
        executor.apply(&plan, &mut PolicyObserver)
    };
    let report =
        result.with_context(|| format!("apply updates under {}", session.sync.root.display()))?;

    print_report(loc, &report);
    if report.failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn print_report(loc: &Localizer, r: &ExecutionReport) {
    for f in &r.failed {
        eprintln!("FAILED {}: {}", f.path, f.message);
    }
    for w in &r.delete_warnings {
        eprintln!("Warning: could not delete {}: {}", w.path, w.message);
    }
    println!(
        "{}",
        loc.msg(
            "apply-counts",
            &[
                ("fetched", num(r.fetched.len())),
                ("unchanged", num(r.unchanged)),
                ("deleted", num(r.deleted.len())),
                ("failed", num(r.failed.len())),
                ("skipped", num(r.skipped.len())),
            ],
        )
    );
    if r.is_complete() {
        println!("{}", loc.msg("apply-complete", &[]));
    } else {
        println!("{}", loc.count("apply-incomplete", r.failed.len() + r.skipped.len()));
    }
}

fn num(n: usize) -> FluentValue<'static> {
    FluentValue::from(n)
}

fn text(s: String) -> FluentValue<'static> {
    FluentValue::from(s)
}
