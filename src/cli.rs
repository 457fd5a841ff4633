use crate::{
    config::{self, Settings},
    engine::{self, RunPlan},
    error::{ErrorKind, Fatal, ModError, RunContext},
    factorio, logging,
    portal::PortalClient,
    setup,
};
use std::{io, path::Path, process::ExitCode};
use tracing::{debug, info, warn};

/// Parsed command line. Unknown or incomplete options are collected in `errors` and reported
/// once the error policy options are known.
#[derive(Debug, Default)]
pub struct CliOptions {
    pub plan: RunPlan,
    pub setup: bool,
    pub help: bool,
    pub get_mods: bool,
    pub silent: bool,
    pub crybaby: bool,
    pub ignore: Vec<IgnoreRule>,
    pub fatal: Vec<ErrorKind>,
    // Accepted for compatibility; nothing acts on these yet.
    pub force_checks: bool,
    pub no_compatibility: bool,
    pub no_dependency: bool,
    pub option_count: usize,
    pub errors: Vec<ModError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreRule {
    Kind(ErrorKind),
    Occurrence(ErrorKind, String),
}

impl CliOptions {
    pub fn run_context(&self) -> RunContext {
        let mut ctx = RunContext::new();
        ctx.crybaby = self.crybaby;
        for rule in &self.ignore {
            match rule {
                IgnoreRule::Kind(kind) => ctx.ignore(*kind),
                IgnoreRule::Occurrence(kind, subject) => ctx.ignore_occurrence(*kind, subject.clone()),
            }
        }
        for kind in &self.fatal {
            ctx.make_fatal(*kind);
        }
        ctx
    }

    fn needs_mods(&self) -> bool {
        self.get_mods
            || self.plan.disable_all
            || !self.plan.enable.is_empty()
            || !self.plan.disable.is_empty()
            || self.plan.changes_archives()
    }
}

pub fn run() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args);
    logging::init(options.silent);

    let mut ctx = options.run_context();
    match execute(&options, &mut ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(fatal) => ExitCode::from(u8::try_from(fatal.code).unwrap_or(u8::MAX)),
    }
}

fn execute(options: &CliOptions, ctx: &mut RunContext) -> Result<(), Fatal> {
    for err in &options.errors {
        ctx.report(err.clone())?;
    }
    debug!(
        force_checks = options.force_checks,
        no_compatibility = options.no_compatibility,
        no_dependency = options.no_dependency,
        "compatibility options"
    );

    if options.option_count == 0 || options.help {
        print_help();
    }

    if options.setup {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        let settings = setup::run_setup(&mut input, &mut output, ctx)?;
        save_settings(&settings, &config::settings_path(), ctx)?;
    }

    if !options.needs_mods() {
        return Ok(());
    }

    let settings = Settings::load(&config::settings_path()).map_err(|err| ctx.fatal(err))?;
    let mods_dir = settings.mods_dir().map_err(|err| ctx.fatal(err))?;
    let player_data = settings.player_data_path().map_err(|err| ctx.fatal(err))?;
    let credentials = match factorio::load_credentials(player_data) {
        Ok(credentials) => credentials,
        Err(err) => {
            warn!("could not read credentials: {err:#}");
            factorio::ServiceCredentials::default()
        }
    };

    let portal = PortalClient::from_env();
    let summary = engine::run(&options.plan, &mods_dir, credentials, &portal, ctx)?;
    if !summary.installed.is_empty() || !summary.removed.is_empty() {
        info!(
            installed = %summary.installed.join(", "),
            removed = %summary.removed.join(", "),
            "archives changed"
        );
    }

    if options.get_mods {
        println!("{}", summary.inventory.enabled_names().join(" "));
    }
    Ok(())
}

fn save_settings(settings: &Settings, path: &Path, ctx: &mut RunContext) -> Result<(), Fatal> {
    info!("Writing paths to a settings file...");
    settings.save(path).map_err(|err| {
        ctx.fatal(
            ModError::new(ErrorKind::WriteFailed, path.display().to_string())
                .with_detail(format!("{err:#}")),
        )
    })
}

pub fn parse_args(args: &[String]) -> CliOptions {
    let mut options = CliOptions::default();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        options.option_count += 1;
        let target = match arg.as_str() {
            "--setup" => {
                options.setup = true;
                continue;
            }
            "-h" | "--help" => {
                options.help = true;
                continue;
            }
            "-s" | "--silent" => {
                options.silent = true;
                continue;
            }
            "-f" | "--force-checks" => {
                options.force_checks = true;
                continue;
            }
            "-c" | "--no-compatibility" => {
                options.no_compatibility = true;
                continue;
            }
            "-D" | "--no-dependency" => {
                options.no_dependency = true;
                continue;
            }
            "--get-mods" => {
                options.get_mods = true;
                continue;
            }
            "--crybaby" => {
                options.crybaby = true;
                continue;
            }
            "--disable-all" => {
                options.plan.disable_all = true;
                continue;
            }
            "--ignore-error" => {
                match iter.next() {
                    Some(value) => match parse_ignore_rule(value) {
                        Some(rule) => options.ignore.push(rule),
                        None => options.errors.push(bad_code(arg, value)),
                    },
                    None => options
                        .errors
                        .push(ModError::new(ErrorKind::MissingArgument, arg.as_str())),
                }
                continue;
            }
            "--fatal" => {
                match iter.next() {
                    Some(value) => match parse_code(value) {
                        Some(kind) => options.fatal.push(kind),
                        None => options.errors.push(bad_code(arg, value)),
                    },
                    None => options
                        .errors
                        .push(ModError::new(ErrorKind::MissingArgument, arg.as_str())),
                }
                continue;
            }
            "-e" | "--enable" => &mut options.plan.enable,
            "-d" | "--disable" => &mut options.plan.disable,
            "-i" | "--install" | "--download" => &mut options.plan.install,
            "-r" | "--uninstall" | "--remove" => &mut options.plan.remove,
            _ => {
                options
                    .errors
                    .push(ModError::new(ErrorKind::InvalidOption, arg.as_str()));
                continue;
            }
        };

        let mut pushed = false;
        while let Some(next) = iter.peek() {
            if next.starts_with('-') {
                break;
            }
            if let Some(value) = iter.next() {
                target.push(value.to_string());
                pushed = true;
            }
        }
        if !pushed {
            options
                .errors
                .push(ModError::new(ErrorKind::MissingArgument, arg.as_str()));
        }
    }

    options
}

fn parse_code(value: &str) -> Option<ErrorKind> {
    value.trim().parse::<i32>().ok().and_then(ErrorKind::from_code)
}

/// `CODE` ignores a kind, `CODE:SUBJECT` a single occurrence.
fn parse_ignore_rule(value: &str) -> Option<IgnoreRule> {
    match value.split_once(':') {
        Some((code, subject)) if !subject.is_empty() => {
            Some(IgnoreRule::Occurrence(parse_code(code)?, subject.to_string()))
        }
        Some(_) => None,
        None => Some(IgnoreRule::Kind(parse_code(value)?)),
    }
}

fn bad_code(option: &str, value: &str) -> ModError {
    ModError::new(ErrorKind::InvalidOption, format!("{option} {value}"))
        .with_detail("expected an error code")
}

fn print_help() {
    println!("Factorio Mod Tool v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage: factoriomodtool [--setup] [-h] [-s] [-f] [-c] [-D] [--get-mods] [--crybaby]");
    println!("       [--ignore-error CODE[:MOD]] [--fatal CODE] [--disable-all]");
    println!("       [-e MOD...] [-d MOD...] [-i MOD...] [-r MOD...]");
    println!();
    println!("Options:");
    println!("  -h, --help                       Print this screen");
    println!("  --setup                          Launch setup tool");
    println!("  -s, --silent                     Only print errors");
    println!("  --get-mods                       Print all enabled mods on one line");
    println!("  --ignore-error CODE[:MOD]        Do not report error CODE (optionally only for MOD)");
    println!("                                   Fatal errors still stop the run");
    println!("  --fatal CODE                     Treat error CODE as fatal");
    println!("  --crybaby                        Every error is fatal");
    println!();
    println!("  -e, --enable MOD...              Enable mods");
    println!("  -d, --disable MOD...             Disable mods");
    println!("  --disable-all                    Disable all mods (beware: disables base mod)");
    println!("  -i, --install, --download MOD... Download mods from the Factorio mod portal");
    println!("                                   by mod name or mod portal URL, e.g.");
    println!("                                   --download Krastorio2");
    println!("                                   --download https://mods.factorio.com/mod/Krastorio2");
    println!("  -r, --uninstall, --remove MOD... Remove downloaded mods");
    println!();
    println!("  -c, --no-compatibility           Do not test compatibility of enabled mods");
    println!("  -D, --no-dependency              Do not download dependency mods");
    println!("  -f, --force-checks               Force compatibility and dependency checks");
    println!();
    println!("Error codes:");
    for kind in ErrorKind::ALL {
        println!("  {:>2}  {kind}", kind.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn mutation_options_collect_following_values() {
        let options = parse_args(&args(&[
            "-e", "foo", "bar", "-d", "baz", "--install",
            "https://mods.factorio.com/mod/Krastorio2", "-r", "old",
        ]));
        assert_eq!(options.plan.enable, args(&["foo", "bar"]));
        assert_eq!(options.plan.disable, args(&["baz"]));
        assert_eq!(
            options.plan.install,
            args(&["https://mods.factorio.com/mod/Krastorio2"])
        );
        assert_eq!(options.plan.remove, args(&["old"]));
        assert!(options.errors.is_empty());
        assert!(options.needs_mods());
    }

    #[test]
    fn repeated_options_accumulate() {
        let options = parse_args(&args(&["-e", "a", "--enable", "b"]));
        assert_eq!(options.plan.enable, args(&["a", "b"]));
    }

    #[test]
    fn unknown_option_and_missing_argument_are_collected() {
        let options = parse_args(&args(&["--frobnicate", "-e"]));
        let kinds: Vec<ErrorKind> = options.errors.iter().map(|err| err.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::InvalidOption, ErrorKind::MissingArgument]);
    }

    #[test]
    fn error_policy_options_build_run_context() {
        let options = parse_args(&args(&[
            "--ignore-error", "3", "--ignore-error", "9:foo", "--fatal", "5", "--crybaby",
        ]));
        assert!(options.errors.is_empty());
        let ctx = options.run_context();
        assert!(ctx.crybaby);
        assert!(ctx.ignored.contains(&ErrorKind::UnknownMod));
        assert!(ctx
            .ignored_occurrences
            .contains(&(ErrorKind::LocalModExists, "foo".to_string())));
        assert!(ctx.strict.contains(&ErrorKind::RegistryLookupFailed));
    }

    #[test]
    fn bad_error_code_is_invalid_option() {
        let options = parse_args(&args(&["--ignore-error", "nope", "--fatal", "77"]));
        assert_eq!(options.errors.len(), 2);
        assert!(options
            .errors
            .iter()
            .all(|err| err.kind == ErrorKind::InvalidOption));
    }

    #[test]
    fn compatibility_flags_are_accepted() {
        let options = parse_args(&args(&["-f", "-c", "-D", "-s"]));
        assert!(options.force_checks && options.no_compatibility && options.no_dependency);
        assert!(options.silent);
        assert!(options.errors.is_empty());
        assert!(!options.needs_mods());
        assert_eq!(options.option_count, 4);
    }

    #[test]
    fn get_mods_and_disable_all_need_the_mods_dir() {
        assert!(parse_args(&args(&["--get-mods"])).needs_mods());
        let options = parse_args(&args(&["--disable-all"]));
        assert!(options.plan.disable_all);
        assert!(options.needs_mods());
    }

    #[test]
    fn unwritable_settings_path_is_write_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::new("/a/factorio.exe", "/b/player-data.json");
        let mut ctx = RunContext::new();
        let fatal = save_settings(&settings, dir.path(), &mut ctx).unwrap_err();
        assert_eq!(fatal.code, ErrorKind::WriteFailed.code());
        assert_eq!(ctx.recorded[0].kind, ErrorKind::WriteFailed);
    }

    #[test]
    fn reported_parse_errors_respect_ignore_rules() {
        let options = parse_args(&args(&["--bogus", "--ignore-error", "1"]));
        let mut ctx = options.run_context();
        for err in &options.errors {
            ctx.report(err.clone()).unwrap();
        }
        assert_eq!(ctx.errors_recorded, 0);
    }
}
