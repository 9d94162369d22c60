// Command line surface: argument definitions and one handler per command.
// Handlers only parse, call into the service and print; the work happens in
// the library modules.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

use crate::admin::{self, StatusSnapshot};
use crate::config::Config;
use crate::listing::{parse_local_time, sort_logs, uniq, LogQuery, LogRange, LogSortKey, DEFAULT_QUEUE};
use crate::resolve::{resolve_versions, VersionTag};
use crate::review::{Channel, VersionRecord};
use crate::service::AddonsService;
use crate::ui::{self, DialoguerPrompter, SpinnerSleeper};
use crate::upload::{MessageLevel, Platform, UploadRequest, ValidationOutcome};

/// Review actions and the message the editor starts from.
pub const DEFAULT_MESSAGES: &[(&str, &str)] = &[
    ("confirm_auto_approved", ""),
    ("public", "Your add-on submission has been approved."),
    ("reject", "Your version was rejected because of the following problems:"),
    (
        "reject_multiple_versions",
        "Your versions were rejected because of the following problems:",
    ),
    ("reply", "Please provide us with detailed information on how to test your add-on."),
    ("super", "halp!"),
    ("comment", "FYI: bananas!"),
];

const DECIDE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "amo", version, about = "Reviewer tools for addons.mozilla.org")]
pub struct Cli {
    /// File to keep the session cookies in
    #[arg(short = 'c', long = "cookies", global = true, value_name = "PATH")]
    pub cookies: Option<PathBuf>,

    /// Timeout for HTTP requests, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Show debug output
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Configuration file (default ~/.amo.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List add-ons in the given queue
    #[command(args_override_self = true)]
    List(ListArgs),
    /// Show the review logs
    #[command(args_override_self = true)]
    Logs(LogsArgs),
    /// Show basic information about an add-on
    #[command(args_override_self = true)]
    Info(InfoArgs),
    /// Download one or more versions of an add-on, including sources
    #[command(args_override_self = true)]
    Get(GetArgs),
    /// Make a review decision for one or more add-ons
    #[command(args_override_self = true)]
    Decide(DecideArgs),
    /// Upload a new version of an add-on
    #[command(args_override_self = true)]
    Upload(UploadArgs),
    /// Admin disable one or more add-ons, optionally with a rejection message
    #[command(name = "admindisable", args_override_self = true)]
    AdminDisable(AdminDisableArgs),
    /// Show admin manage information about an add-on
    #[command(name = "adminget", args_override_self = true)]
    AdminGet(AdminGetArgs),
    /// Change the status of an add-on and its files on the admin manage page
    #[command(name = "adminchange", args_override_self = true)]
    AdminChange(AdminChangeArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::List(_) => "list",
            Command::Logs(_) => "logs",
            Command::Info(_) => "info",
            Command::Get(_) => "get",
            Command::Decide(_) => "decide",
            Command::Upload(_) => "upload",
            Command::AdminDisable(_) => "admindisable",
            Command::AdminGet(_) => "adminget",
            Command::AdminChange(_) => "adminchange",
        }
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Output add-on urls only
    #[arg(short = 'u', long, conflicts_with_all = ["ids", "numericid"])]
    pub url: bool,
    /// Output numeric add-on ids only
    #[arg(short = 'n', long, conflicts_with = "ids")]
    pub numericid: bool,
    /// Output add-on ids only
    #[arg(short = 'i', long)]
    pub ids: bool,
    /// The queue to list: new, updates, unlisted/nominated, unlisted/pending
    #[arg(default_value = DEFAULT_QUEUE)]
    pub queue: String,
}

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Maximum number of entries to retrieve
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,
    /// Start of the time range, in local time
    #[arg(short = 's', long)]
    pub start: Option<String>,
    /// End of the time range, in local time, inclusive
    #[arg(short = 'e', long)]
    pub end: Option<String>,
    /// Filter by add-on, reviewer or comment
    #[arg(short = 'q', long)]
    pub query: Option<String>,
    /// Sort by date, addonname, version, reviewer or action
    #[arg(short = 'k', long)]
    pub key: Option<String>,
    /// Output add-on urls only
    #[arg(short = 'u', long, conflicts_with = "ids")]
    pub url: bool,
    /// Output add-on ids only
    #[arg(short = 'i', long)]
    pub ids: bool,
    /// The log to read
    #[arg(default_value = "reviewlog", value_parser = ["reviewlog"])]
    pub logs: String,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// The add-on id or url
    pub addon: String,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Output directory for add-ons
    #[arg(short = 'o', long, default_value = ".")]
    pub outdir: PathBuf,
    /// Number of versions to download
    #[arg(short = 'l', long, default_value_t = 1)]
    pub limit: usize,
    /// Shortcut for -v previous -v latest
    #[arg(long)]
    pub diff: bool,
    /// Use the unlisted review page
    #[arg(short = 'u', long)]
    pub unlisted: bool,
    /// Version to pull: a number, latest, previous or latestwx
    #[arg(short = 'v', long = "version", action = ArgAction::Append)]
    pub versions: Vec<String>,
    /// The add-on id or url
    pub addon: String,
}

#[derive(Debug, Args)]
pub struct DecideArgs {
    /// Review comments; opens $EDITOR when missing
    #[arg(short = 'm', long)]
    pub message: Option<String>,
    /// Apply to all versions, e.g. for rejections
    #[arg(short = 'A', long)]
    pub all: bool,
    /// The action to take
    #[arg(
        short = 'a',
        long,
        value_parser = ["confirm_auto_approved", "public", "reject", "reject_multiple_versions", "reply", "super", "comment"]
    )]
    pub action: String,
    /// Do not wait before acting
    #[arg(short = 'f', long)]
    pub force: bool,
    /// Add-on ids or urls; "-" reads them from stdin
    #[arg(required = true)]
    pub addons: Vec<String>,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Show all validation messages, not only errors
    #[arg(short = 'v', long)]
    pub verbose: bool,
    /// An xpi for a platform (all, linux, mac, win, android); repeatable
    #[arg(
        short = 'x',
        long = "xpi",
        num_args = 2,
        value_names = ["PLATFORM", "XPI"],
        action = ArgAction::Append,
        required = true
    )]
    pub xpi: Vec<String>,
    /// Upload to the beta channel
    #[arg(short = 'b', long)]
    pub beta: bool,
    /// Source archive for this submission
    #[arg(short = 's', long)]
    pub source: Option<PathBuf>,
    /// The add-on id
    pub addon: String,
}

#[derive(Debug, Args)]
pub struct AdminDisableArgs {
    /// Also reject all enabled versions with this message
    #[arg(short = 'm', long)]
    pub message: Option<String>,
    /// Add-on ids to disable
    #[arg(required = true)]
    pub addons: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AdminGetArgs {
    /// Include beta files
    #[arg(short = 'b', long)]
    pub beta: bool,
    /// Print the states as JSON, for use with adminchange -f
    #[arg(short = 'f', long)]
    pub file: bool,
    /// The add-on id or url
    pub addon: String,
}

#[derive(Debug, Args)]
pub struct AdminChangeArgs {
    /// Set the add-on status, by name or number
    #[arg(short = 's', long)]
    pub status: Option<String>,
    /// Set these versions to approved
    #[arg(short = 'a', long, value_delimiter = ',')]
    pub approve: Vec<String>,
    /// Set these versions to disabled
    #[arg(short = 'D', long, value_delimiter = ',')]
    pub disable: Vec<String>,
    /// Disable all versions
    #[arg(short = 'X', long)]
    pub disable_all: bool,
    /// Approve all versions
    #[arg(short = 'O', long)]
    pub approve_all: bool,
    /// Load the states from a file written by adminget -f
    #[arg(
        short = 'f',
        long,
        conflicts_with_all = ["status", "approve", "disable", "disable_all", "approve_all"]
    )]
    pub file: Option<PathBuf>,
    /// The add-on id or url
    pub addon: String,
}

/// Value of `--config` in raw arguments, read before the real parse so the
/// configured defaults can be spliced in.
pub fn config_path_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Insert the configured default arguments of the command right after its
/// name, so anything given on the command line overrides them.
pub fn splice_defaults(args: &[String], config: &Config) -> Vec<String> {
    let command = Cli::command();
    let names: Vec<&str> = command.get_subcommands().map(|c| c.get_name()).collect();
    let mut out = args.to_vec();
    if let Some(index) = args.iter().skip(1).position(|arg| names.contains(&arg.as_str())) {
        let index = index + 1;
        let defaults = config.command_defaults(&args[index]);
        out.splice(index + 1..index + 1, defaults);
    }
    out
}

/// Run the parsed command. The session cookies are saved afterwards, also
/// when the command failed.
pub fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(cookies) = &cli.cookies {
        config.session.cookie_file = Some(cookies.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.set_timeout(timeout)?;
    }

    let name = cli.command.name();
    let mut amo = AddonsService::connect(config, Box::new(DialoguerPrompter)).context("setting up the session")?;
    let result = dispatch(&mut amo, cli.command).with_context(|| format!("{name} failed"));
    if let Err(e) = amo.persist() {
        ui::warn(format!("could not save session cookies: {e}"));
    }
    result
}

fn dispatch(amo: &mut AddonsService, command: Command) -> Result<()> {
    match command {
        Command::List(args) => cmd_list(amo, args),
        Command::Logs(args) => cmd_logs(amo, args),
        Command::Info(args) => cmd_info(amo, args),
        Command::Get(args) => cmd_get(amo, args),
        Command::Decide(args) => cmd_decide(amo, args),
        Command::Upload(args) => cmd_upload(amo, args),
        Command::AdminDisable(args) => cmd_admin_disable(amo, args),
        Command::AdminGet(args) => cmd_admin_get(amo, args),
        Command::AdminChange(args) => cmd_admin_change(amo, args),
    }
}

fn cmd_list(amo: &mut AddonsService, args: ListArgs) -> Result<()> {
    let queue = amo.queue(&args.queue)?;
    for entry in queue {
        if args.ids {
            println!("{}", entry.addon_id);
        } else if args.url {
            println!("{}", entry.url);
        } else if args.numericid {
            println!("{}", entry.addon_num);
        } else {
            println!("{entry}");
        }
    }
    Ok(())
}

fn cmd_logs(amo: &mut AddonsService, args: LogsArgs) -> Result<()> {
    let start = args.start.as_deref().map(parse_local_time).transpose()?;
    let end = args.end.as_deref().map(parse_local_time).transpose()?;
    let key = args.key.as_deref().map(str::parse::<LogSortKey>).transpose()?;
    let query = LogQuery {
        list: args.logs,
        search: args.query,
        range: LogRange::from_local(start, end, &Local)?,
        limit: args.limit,
    };

    let mut logs = amo.logs(&query)?;
    if let Some(key) = key {
        sort_logs(&mut logs, key);
    }

    if args.ids {
        uniq(logs.iter().map(|e| e.addon_id.as_str()))
            .into_iter()
            .for_each(|id| println!("{id}"));
    } else if args.url {
        uniq(logs.iter().map(|e| e.url.as_str()))
            .into_iter()
            .for_each(|url| println!("{url}"));
    } else {
        logs.iter().for_each(|entry| println!("{entry}"));
    }
    Ok(())
}

fn cmd_info(amo: &mut AddonsService, args: InfoArgs) -> Result<()> {
    let review = amo.review(&args.addon, Channel::Listed)?;
    let aggregate = &review.aggregate;
    println!(
        "{} ({})",
        aggregate.name.as_deref().unwrap_or(&aggregate.addon_id),
        review.url()
    );
    for version in review.versions() {
        println!("\tVersion {} @ {}", version.version, version.date);
        for file in &version.files {
            println!("\t\tFile #{} ({}): {}", file.file_id, file.status, file.url);
        }
        if let Some(sources) = &version.sources {
            println!("\t\tSources: {sources}");
        }
    }
    Ok(())
}

fn cmd_get(amo: &mut AddonsService, mut args: GetArgs) -> Result<()> {
    if args.diff {
        args.versions.extend(["previous".to_string(), "latest".to_string()]);
    }
    let channel = if args.unlisted { Channel::Unlisted } else { Channel::Listed };
    let mut review = amo.review(&args.addon, channel)?;

    let slug = review
        .aggregate
        .slug
        .clone()
        .unwrap_or_else(|| review.aggregate.addon_id.clone());
    let addon_dir = args.outdir.join(&slug);
    if addon_dir.exists() {
        ui::warn("add-on directory already exists and may contain stale files");
    } else {
        fs::create_dir_all(&addon_dir).with_context(|| format!("creating {}", addon_dir.display()))?;
    }

    let mut versions: Vec<VersionRecord> = if args.versions.is_empty() {
        let limit = args.limit.max(1);
        review.fetch_until(false, |versions, _| (versions.len() >= limit).then_some(true))?;
        let loaded = review.versions();
        loaded[loaded.len().saturating_sub(limit)..].to_vec()
    } else {
        let tags = args
            .versions
            .iter()
            .map(|v| v.parse::<VersionTag>())
            .collect::<crate::Result<Vec<_>>>()?;
        resolve_versions(&mut review, &tags)?.versions
    };
    if versions.is_empty() {
        bail!("no versions found for {}", args.addon);
    }

    let session = review.session();
    for version in &mut versions {
        println!("Getting version {} {} [{}]", slug, version.version, version.apps.join(", "));
        for file in &version.files {
            println!("\tGetting file {} [{}]", file.file_name, file.platforms.join(", "));
        }
        version.save_files(session, &addon_dir)?;

        if version.sources.is_some() {
            version.save_sources(session, &addon_dir)?;
            println!("\tGot sources {}", version.source_file_name.as_deref().unwrap_or_default());
            version.extract_sources(&addon_dir)?;
        }
    }
    Ok(())
}

fn default_message(action: &str) -> &'static str {
    DEFAULT_MESSAGES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, message)| *message)
        .unwrap_or_default()
}

fn cmd_decide(amo: &mut AddonsService, args: DecideArgs) -> Result<()> {
    let message = match args.message {
        Some(message) => message,
        None => ui::edit_message(default_message(&args.action))?,
    };
    let addons = if args.addons == ["-"] {
        ui::read_stdin_lines()?
    } else {
        args.addons
    };
    if addons.is_empty() {
        bail!("nothing to give {} review", args.action);
    }

    if !args.force {
        match addons.as_slice() {
            [one] => println!("Will give {} review to {} in 3 seconds", args.action, one),
            many => println!("Will give {} review to {} add-ons in 3 seconds", args.action, many.len()),
        }
        thread::sleep(DECIDE_DELAY);
    }

    let mut failed = 0;
    for addon in &addons {
        let outcome = decide_one(amo, addon, &args.action, &message, args.all);
        match outcome {
            Ok(()) => {}
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                ui::error(format!("{addon}: {e:#}"));
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} decisions failed", addons.len());
    }
    println!("Done");
    Ok(())
}

fn decide_one(amo: &mut AddonsService, addon: &str, action: &str, message: &str, all: bool) -> Result<()> {
    let mut review = amo.review(addon, Channel::Listed)?;
    if !review.aggregate.actions.iter().any(|a| a == action) {
        bail!(
            "action not valid for reviewing {} ({})",
            review.aggregate.name.as_deref().unwrap_or(addon),
            review.aggregate.actions.join(",")
        );
    }
    let versions: Vec<VersionRecord> = if all {
        review.versions().to_vec()
    } else {
        review.aggregate.latest().cloned().into_iter().collect()
    };
    let refs: Vec<&VersionRecord> = versions.iter().collect();
    if !review.decide(action, message, &refs)? {
        bail!("the server did not accept the decision");
    }
    Ok(())
}

fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<crate::Error>()
        .map_or(false, crate::Error::is_fatal)
}

fn upload_request(args: &UploadArgs) -> Result<UploadRequest> {
    let files = args
        .xpi
        .chunks(2)
        .map(|pair| -> Result<(Platform, PathBuf)> {
            match pair {
                [platform, xpi] => Ok((platform.parse::<Platform>()?, PathBuf::from(xpi))),
                _ => bail!("-x takes a platform and an xpi"),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(UploadRequest {
        addon_id: args.addon.clone(),
        files,
        source: args.source.clone(),
        beta: args.beta,
    })
}

fn cmd_upload(amo: &mut AddonsService, args: UploadArgs) -> Result<()> {
    let request = upload_request(&args)?;
    for (platform, xpi) in &request.files {
        println!("Uploading {} for platform {}", xpi.display(), platform);
    }
    let results = amo.upload(&request, &mut SpinnerSleeper::default())?;

    let level = if args.verbose { MessageLevel::All } else { MessageLevel::Error };
    let mut not_added = 0;
    for result in &results {
        let job = result.outcome.job();
        println!("{job}");
        ui::print_validation_messages(job, level);
        match (&result.outcome, &result.version_url) {
            (ValidationOutcome::Succeeded(_), Some(url)) => {
                println!("Version {} added at {}{}", job.version(), url, if result.beta { " (beta)" } else { "" });
            }
            (ValidationOutcome::Succeeded(_), None) => {
                let reason = result
                    .attach_error
                    .as_ref()
                    .map_or_else(|| "no version link".to_string(), |e| e.summary());
                ui::error(format!("could not add {} to a version: {reason}", result.xpi.display()));
                not_added += 1;
            }
            (ValidationOutcome::Failed(_), _) => {
                if request.files.len() > 1 {
                    ui::warn("cancelling uploads, validation has failed");
                }
                bail!("validation failed for {}", result.xpi.display());
            }
        }
    }
    if not_added > 0 {
        bail!("{not_added} of {} files could not be added", results.len());
    }
    Ok(())
}

fn cmd_admin_disable(amo: &mut AddonsService, args: AdminDisableArgs) -> Result<()> {
    let question = format!("Will disable {} add-ons, ready to go?", args.addons.len());
    if !ui::confirm(&question)? {
        return Ok(());
    }

    let report = amo.disable_addons(&args.addons, args.message.as_deref(), |addon, ok| {
        if ok {
            print!(".");
        } else {
            print!("E({addon})");
        }
        let _ = io::stdout().flush();
    })?;
    println!("\nDone!");

    for (addon, reason) in &report.failed {
        ui::error(format!("{addon}: {reason}"));
    }
    if !report.is_success() {
        bail!("{} of {} add-ons could not be disabled", report.failed.len(), args.addons.len());
    }
    Ok(())
}

fn cmd_admin_get(amo: &mut AddonsService, args: AdminGetArgs) -> Result<()> {
    let info = amo.admin_info(&args.addon, true)?;
    if args.file {
        println!("{}", serde_json::to_string_pretty(&info.snapshot(args.beta))?);
        return Ok(());
    }

    println!("Addon {} has state \"{}\"", args.addon, admin::addon_state_name(info.status));
    for file in info.files.iter().rev() {
        if args.beta || file.status != admin::FILE_BETA {
            println!("{file}");
        }
    }
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<StatusSnapshot> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn cmd_admin_change(amo: &mut AddonsService, args: AdminChangeArgs) -> Result<()> {
    let addon = args.addon.clone();
    let mut info = amo.admin_info(&addon, true)?;
    let old_status = info.status;

    if let Some(path) = &args.file {
        let snapshot = load_snapshot(path)?;
        info.apply_snapshot(&snapshot);
        if info.status != old_status {
            println!(
                "Changing state {} -> {}",
                admin::addon_state_name(old_status),
                admin::addon_state_name(info.status)
            );
        }
        for file in info.files.iter().filter(|f| f.changed()) {
            println!(
                "Version {} File {} ({}) changing from {} to {}",
                file.version,
                file.file_id,
                file.platform,
                admin::file_state_name(file.original_status),
                admin::file_state_name(file.status)
            );
        }
    } else {
        let mut approve: BTreeSet<String> = BTreeSet::new();
        let mut disable: BTreeSet<String> = BTreeSet::new();
        if args.approve_all {
            approve.extend(info.version_names());
            if args.disable.is_empty() {
                info.status = admin::ADDON_APPROVED;
            }
        }
        if args.disable_all {
            disable.extend(info.version_names());
            if args.approve.is_empty() {
                info.status = admin::ADDON_DISABLED;
            }
        }
        for version in &args.approve {
            disable.remove(version);
            approve.insert(version.clone());
        }
        for version in &args.disable {
            approve.remove(version);
            disable.insert(version.clone());
        }

        info.versions_to_status(&approve.iter().collect::<Vec<_>>(), admin::FILE_APPROVED)?;
        info.versions_to_status(&disable.iter().collect::<Vec<_>>(), admin::FILE_DISABLED)?;
        if let Some(status) = &args.status {
            info.status = admin::parse_addon_state(status)?;
        }

        if info.status != old_status {
            println!(
                "Changing state for {}: {} -> {}",
                addon,
                admin::addon_state_name(old_status),
                admin::addon_state_name(info.status)
            );
        } else {
            println!("Keeping state for {}: {}", addon, admin::addon_state_name(info.status));
        }
        if !disable.is_empty() {
            println!("Marking these versions disabled: {}", join(&disable));
        }
        if !approve.is_empty() {
            println!("Marking these versions approved: {}", join(&approve));
        }
    }

    info.check_status()?;
    if !info.has_changes() && info.status == old_status {
        println!("Nothing changed, not sending request");
        return Ok(());
    }
    if args.file.is_some() && !ui::confirm("Last chance to bail out, save these changes?")? {
        return Ok(());
    }
    info.save(false)?;
    println!("Done");
    Ok(())
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_upload_pairs() {
        let cli = Cli::parse_from(args("amo upload -x linux a.xpi -x win b.xpi -b my-addon"));
        let Command::Upload(upload) = cli.command else {
            panic!("expected upload");
        };
        let request = upload_request(&upload).unwrap();
        assert_eq!(
            request.files,
            vec![
                (Platform::Linux, PathBuf::from("a.xpi")),
                (Platform::Windows, PathBuf::from("b.xpi"))
            ]
        );
        assert!(request.beta);
        assert_eq!(request.addon_id, "my-addon");
    }

    #[test]
    fn test_defaults_are_spliced_after_command() {
        let config = Config::from_toml("[defaults]\nget = \"-o /tmp/addons -l 2\"\n").unwrap();
        let spliced = splice_defaults(&args("amo -d get -l 5 my-addon"), &config);
        assert_eq!(spliced, args("amo -d get -o /tmp/addons -l 2 -l 5 my-addon"));

        let cli = Cli::parse_from(spliced);
        let Command::Get(get) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(get.limit, 5);
        assert_eq!(get.outdir, PathBuf::from("/tmp/addons"));
        assert!(cli.debug);
    }

    #[test]
    fn test_config_path_arg() {
        assert_eq!(config_path_arg(&args("amo --config x.toml list")), Some(PathBuf::from("x.toml")));
        assert_eq!(config_path_arg(&args("amo list --config=y.toml")), Some(PathBuf::from("y.toml")));
        assert_eq!(config_path_arg(&args("amo list")), None);
    }

    #[test]
    fn test_admin_change_splits_commas() {
        let cli = Cli::parse_from(args("amo adminchange -a 1.0,1.1 -D 0.9 foo"));
        let Command::AdminChange(change) = cli.command else {
            panic!("expected adminchange");
        };
        assert_eq!(change.approve, vec!["1.0", "1.1"]);
        assert_eq!(change.disable, vec!["0.9"]);
        assert!(change.file.is_none());
    }
}
