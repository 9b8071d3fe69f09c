//! CLI binary for printmeter.
//!
//! A thin shim over the library crate: maps flags onto `PrintConfig`, opens
//! the store and calls one `PrintService` operation per subcommand.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use printmeter::{
    FileKind, Identity, JobFilter, JobStatus, LpBackend, NewAccount, PrintConfig, PrintRequest,
    PrintService, Pricing, RefundOutcome, Role, Store, SubmissionObserver, Upload,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

fn money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}{}.{:02}", cents.abs() / 100, cents.abs() % 100)
}

// ── Spinner observer using indicatif ─────────────────────────────────────────

/// Terminal feedback for one submission: a spinner whose message follows the
/// submission through prepare → charge → dispatch.
struct SpinnerObserver {
    bar: ProgressBar,
}

impl SpinnerObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Converting upload…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl SubmissionObserver for SpinnerObserver {
    fn on_prepared(&self, kind: FileKind, pages: u32, estimated: bool) {
        let approx = if estimated { "~" } else { "" };
        self.bar
            .println(format!("  {} {kind}, {approx}{pages} pages", green("✓")));
        self.bar.set_prefix("Charging");
        self.bar.set_message("");
    }

    fn on_charged(&self, job_id: i64, cost_cents: i64, balance_after: i64) {
        self.bar.println(format!(
            "  {} job {job_id} charged {}  {}",
            green("✓"),
            money(cost_cents),
            dim(&format!("balance {}", money(balance_after)))
        ));
        self.bar.set_prefix("Printing");
    }

    fn on_dispatched(&self, _job_id: i64, backend_job_id: &str) {
        self.bar
            .println(format!("  {} accepted as {}", green("✓"), bold(backend_job_id)));
    }

    fn on_refunded(&self, job_id: i64, amount_cents: i64) {
        self.bar.println(format!(
            "  {} job {job_id} refunded {}",
            red("✗"),
            money(amount_cents)
        ));
    }

    fn on_compensation_failed(&self, job_id: i64, error: &str) {
        self.bar
            .println(format!("  {} refund for job {job_id} failed: {}", red("✗"), red(error)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Create an account with 5.00 credit and a 20.00 monthly cap
  printmeter account add dana --balance 500 --monthly-limit 2000

  # Price a document without printing it
  printmeter estimate --user dana thesis.docx

  # Print two duplex colour copies of pages 1-4
  printmeter print --user dana --printer office --duplex --color --copies 2 \
      --page-range 1-4 slides.pdf

  # Recent jobs as JSON
  printmeter --json jobs --user admin --limit 20

  # Settle a job left queued by a failed refund
  printmeter refund 42

ENVIRONMENT VARIABLES:
  PRINTMETER_DB          Database file (default data/printmeter.db)
  PRINTMETER_UPLOAD_DIR  Upload root (default data/uploads)
  PRINTMETER_WORK_DIR    Parent for conversion scratch directories
  PRINTMETER_SOFFICE     LibreOffice binary, skips discovery
  PRINTMETER_LP          lp binary (default lp)
  PRINTMETER_CUPS_SERVER CUPS server passed to lp -h
  RUST_LOG               Overrides --verbose / --quiet
"#;

/// Metered printing: page counting, prepaid billing and CUPS dispatch.
#[derive(Parser, Debug)]
#[command(
    name = "printmeter",
    version,
    about = "Metered printing: page counting, prepaid billing and CUPS dispatch",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, env = "PRINTMETER_DB", default_value = "data/printmeter.db")]
    db: PathBuf,

    /// Root directory for stored uploads.
    #[arg(long, global = true, env = "PRINTMETER_UPLOAD_DIR", default_value = "data/uploads")]
    upload_dir: PathBuf,

    /// Parent directory for conversion scratch space.
    #[arg(long, global = true, env = "PRINTMETER_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// LibreOffice binary for office documents.
    #[arg(long, global = true, env = "PRINTMETER_SOFFICE")]
    soffice: Option<PathBuf>,

    /// Office conversion timeout in seconds.
    #[arg(long, global = true, env = "PRINTMETER_CONVERT_TIMEOUT", default_value_t = 60)]
    convert_timeout: u64,

    /// Backend hand-off timeout in seconds.
    #[arg(long, global = true, env = "PRINTMETER_DISPATCH_TIMEOUT", default_value_t = 120)]
    dispatch_timeout: u64,

    /// Seconds past the dispatch timeout before a queued job may be refunded.
    #[arg(long, global = true, env = "PRINTMETER_SETTLE_GRACE", default_value_t = 30)]
    settle_grace: u64,

    /// Output JSON instead of text.
    #[arg(long, global = true, env = "PRINTMETER_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PRINTMETER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PRINTMETER_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage accounts.
    #[command(subcommand)]
    Account(AccountCommand),

    /// Add credit to an account.
    Topup {
        username: String,
        /// Amount in cents.
        amount: i64,
        /// Name recorded on the ledger row.
        #[arg(long, env = "USER", default_value = "admin")]
        operator: String,
    },

    /// Price a document without printing it.
    Estimate {
        file: PathBuf,
        #[command(flatten)]
        user: UserArg,
        /// Price at the colour rate.
        #[arg(long)]
        color: bool,
    },

    /// Convert, charge and print a document.
    Print(PrintArgs),

    /// List print jobs.
    Jobs {
        #[command(flatten)]
        user: UserArg,
        /// queued, printed or failed.
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Refund a job that is still queued.
    Refund { job_id: i64 },

    /// Show or change per-page prices.
    Pricing {
        /// Monochrome price per page in cents.
        #[arg(long)]
        per_page: Option<i64>,
        /// Colour price per page in cents.
        #[arg(long)]
        color_page: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Create an account.
    Add {
        username: String,
        #[arg(long)]
        admin: bool,
        /// Opening balance in cents.
        #[arg(long, default_value_t = 0)]
        balance: i64,
        /// Monthly spend cap in cents, 0 for none.
        #[arg(long, default_value_t = 0)]
        monthly_limit: i64,
        /// Yearly spend cap in cents, 0 for none.
        #[arg(long, default_value_t = 0)]
        yearly_limit: i64,
    },
    /// Show an account and its top-up history.
    Show { username: String },
}

#[derive(Args, Debug)]
struct UserArg {
    /// Act as this account.
    #[arg(long, short = 'u', env = "PRINTMETER_USER")]
    user: String,
}

#[derive(Args, Debug)]
struct PrintArgs {
    file: PathBuf,
    #[command(flatten)]
    user: UserArg,
    /// Destination printer.
    #[arg(long, short = 'p', env = "PRINTMETER_PRINTER")]
    printer: String,
    /// IPP sides keyword, e.g. two-sided-short-edge.
    #[arg(long)]
    sides: Option<String>,
    /// Shorthand for two-sided-long-edge.
    #[arg(long)]
    duplex: bool,
    #[arg(long)]
    color: bool,
    #[arg(long, default_value = "1")]
    copies: String,
    /// Passed to the backend as-is.
    #[arg(long)]
    page_range: Option<String>,
    /// Declared content type of the file.
    #[arg(long)]
    content_type: Option<String>,
    #[arg(long, env = "PRINTMETER_LP", default_value = "lp")]
    lp: PathBuf,
    #[arg(long, env = "PRINTMETER_CUPS_SERVER")]
    cups_server: Option<String>,
}

impl PrintArgs {
    /// Same field names as the web form, so both go through one parser.
    fn form(&self) -> HashMap<String, String> {
        let mut form = HashMap::new();
        form.insert("printer".to_string(), self.printer.clone());
        form.insert("copies".to_string(), self.copies.clone());
        form.insert("duplex".to_string(), self.duplex.to_string());
        form.insert("color".to_string(), self.color.to_string());
        if let Some(sides) = &self.sides {
            form.insert("sides".to_string(), sides.clone());
        }
        if let Some(range) = &self.page_range {
            form.insert("pageRange".to_string(), range.clone());
        }
        form
    }

    fn backend(&self) -> LpBackend {
        let backend = LpBackend::new().program(&self.lp);
        match &self.cups_server {
            Some(server) => backend.server(server),
            None => backend,
        }
    }
}

fn parse_status(s: &str) -> std::result::Result<JobStatus, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback during a print; keep INFO logs out of
    // its way unless asked for.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || matches!(cli.command, Command::Print(_)) {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = Store::open(&cli.db)
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;

    match &cli.command {
        Command::Account(AccountCommand::Add {
            username,
            admin,
            balance,
            monthly_limit,
            yearly_limit,
        }) => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            let account = service
                .create_account(NewAccount {
                    username: username.clone(),
                    role: if *admin { Role::Admin } else { Role::User },
                    balance_cents: *balance,
                    monthly_limit_cents: *monthly_limit,
                    yearly_limit_cents: *yearly_limit,
                })
                .await
                .context("Failed to create account")?;
            emit(&cli, &account, || {
                format!(
                    "{} created {} ({}) with balance {}",
                    green("✔"),
                    bold(&account.username),
                    account.role,
                    money(account.balance_cents)
                )
            })
        }

        Command::Account(AccountCommand::Show { username }) => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            let identity = identity(&service, username).await?;
            let account = service.account(identity.user_id).await?;
            let topups = service.topups(identity.user_id).await?;
            if cli.json {
                let out = serde_json::json!({ "account": account, "topups": topups });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            println!("Account:        {} ({})", bold(&account.username), account.role);
            println!("Balance:        {}", money(account.balance_cents));
            println!(
                "Month {}:  {} of {}",
                account.month_period,
                money(account.month_spent_cents),
                limit(account.monthly_limit_cents)
            );
            println!(
                "Year {}:      {} of {}",
                account.year_period,
                money(account.year_spent_cents),
                limit(account.yearly_limit_cents)
            );
            for t in topups {
                println!(
                    "  {}  {:<6}  {:>10}  {}",
                    dim(&t.created_at.format("%Y-%m-%d %H:%M").to_string()),
                    t.kind,
                    money(t.amount_cents),
                    dim(&t.operator_name)
                );
            }
            Ok(())
        }

        Command::Topup {
            username,
            amount,
            operator,
        } => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            let identity = identity(&service, username).await?;
            let record = service
                .topup(identity.user_id, *amount, operator)
                .await
                .context("Top-up failed")?;
            emit(&cli, &record, || {
                format!(
                    "{} {} +{}  →  {}",
                    green("✔"),
                    bold(username),
                    money(record.amount_cents),
                    money(record.balance_after_cents)
                )
            })
        }

        Command::Estimate { file, user, color } => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            let identity = identity(&service, &user.user).await?;
            let upload = Upload::from_path(file).await?;
            let est = service
                .estimate(&identity, &upload, *color)
                .await
                .context("Estimate failed")?;
            emit(&cli, &est, || {
                let mut lines = vec![format!(
                    "{}{} pages  →  {}  {}",
                    if est.estimated { "~" } else { "" },
                    est.pages,
                    bold(&money(est.cost_cents)),
                    dim(&format!("balance {}", money(est.balance_cents)))
                )];
                if est.insufficient_balance {
                    lines.push(red("  insufficient balance"));
                }
                if est.would_exceed_monthly {
                    lines.push(red("  would exceed monthly limit"));
                }
                if est.would_exceed_yearly {
                    lines.push(red("  would exceed yearly limit"));
                }
                lines.join("\n")
            })
        }

        Command::Print(args) => {
            let request = PrintRequest::from_form(&args.form())?;
            let spinner = (!cli.quiet && !cli.json).then(SpinnerObserver::new);
            let observer = spinner
                .clone()
                .map(|s| s as Arc<dyn SubmissionObserver>);
            let service = service(&cli, store, args.backend(), observer)?;
            let identity = identity(&service, &args.user.user).await?;

            let mut upload = Upload::from_path(&args.file).await?;
            if let Some(ct) = &args.content_type {
                upload = upload.with_content_type(ct);
            }
            let result = service.submit(&identity, &upload, &request).await;
            if let Some(s) = &spinner {
                s.finish();
            }
            let printed = result.context("Print failed")?;
            emit(&cli, &printed, || {
                format!(
                    "{} {} pages, {}  →  balance {}",
                    green("✔"),
                    printed.pages,
                    money(printed.cost_cents),
                    bold(&money(printed.balance_cents))
                )
            })
        }

        Command::Jobs {
            user,
            status,
            limit,
        } => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            let identity = identity(&service, &user.user).await?;
            let filter = JobFilter {
                status: *status,
                limit: *limit,
                ..JobFilter::default()
            };
            let jobs = service.list_jobs(&identity, filter).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
                return Ok(());
            }
            for j in jobs {
                println!(
                    "{:>6}  {}  {:<8}  {:<10}  {:>3}p  {:>9}  {}",
                    j.id,
                    dim(&j.created_at.format("%Y-%m-%d %H:%M").to_string()),
                    j.status,
                    j.username,
                    j.pages,
                    money(j.cost_cents),
                    j.filename
                );
            }
            Ok(())
        }

        Command::Refund { job_id } => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            match service.refund_job(*job_id).await? {
                RefundOutcome::Refunded {
                    amount_cents,
                    balance_after_cents,
                } => {
                    if !cli.quiet {
                        eprintln!(
                            "{} job {job_id} refunded {}  →  balance {}",
                            green("✔"),
                            money(amount_cents),
                            money(balance_after_cents)
                        );
                    }
                }
                RefundOutcome::AlreadySettled(status) => {
                    bail!("job {job_id} is already {status}");
                }
            }
            Ok(())
        }

        Command::Pricing {
            per_page,
            color_page,
        } => {
            let service = service(&cli, store, LpBackend::new(), None)?;
            let mut pricing: Pricing = service.pricing().await?;
            if per_page.is_some() || color_page.is_some() {
                pricing.per_page_cents = per_page.unwrap_or(pricing.per_page_cents);
                pricing.color_page_cents = color_page.unwrap_or(pricing.color_page_cents);
                service
                    .set_pricing(pricing)
                    .await
                    .context("Failed to update pricing")?;
            }
            emit(&cli, &pricing, || {
                format!(
                    "per page {}  colour page {}",
                    money(pricing.per_page_cents),
                    money(pricing.color_page_cents)
                )
            })
        }
    }
}

/// Map global flags to `PrintConfig` and build the service.
fn service(
    cli: &Cli,
    store: Store,
    backend: LpBackend,
    observer: Option<Arc<dyn SubmissionObserver>>,
) -> Result<PrintService> {
    let mut builder = PrintConfig::builder()
        .upload_dir(&cli.upload_dir)
        .convert_timeout_secs(cli.convert_timeout)
        .dispatch_timeout_secs(cli.dispatch_timeout)
        .settle_grace_secs(cli.settle_grace);
    if let Some(dir) = &cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(soffice) = &cli.soffice {
        builder = builder.soffice_path(soffice);
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs);
    }
    let config = builder.build().context("Invalid configuration")?;
    Ok(PrintService::new(store, Arc::new(backend), config))
}

async fn identity(service: &PrintService, username: &str) -> Result<Identity> {
    service
        .identity(username)
        .await?
        .with_context(|| format!("No account named '{username}'"))
}

/// Print `value` as JSON on stdout, or the text rendering on stderr.
fn emit<T: Serialize>(cli: &Cli, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        eprintln!("{}", text());
    }
    Ok(())
}

fn limit(cents: i64) -> String {
    if cents > 0 {
        money(cents)
    } else {
        "unlimited".to_string()
    }
}
