use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use trialswitch_cli::{run_simulator, run_sticky, SelectionChoice, SimulatorConfig};
use trialswitch_core::{ErrorPolicy, TrialKey};
use trialswitch_dispatch::DispatchConfig;

fn cli() -> Command {
    Command::new("trialswitch")
        .version(trialswitch_dispatch::VERSION)
        .about("Runtime trial dispatch simulator")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log dispatcher activity to stderr"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive a simulated checkout experiment through the dispatcher")
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of invocations"),
                )
                .arg(
                    Arg::new("scopes")
                        .long("scopes")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Number of scopes the invocations are spread over"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a trial call fails"),
                )
                .arg(
                    Arg::new("policy")
                        .long("policy")
                        .default_value("default")
                        .value_parser(["throw", "default", "any", "ordered"])
                        .help("Error policy applied to failed trials"),
                )
                .arg(
                    Arg::new("selection")
                        .long("selection")
                        .default_value("random")
                        .value_parser(["random", "sticky"])
                        .help("How the trial is picked per scope"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(config_arg())
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("sticky")
                .about("Show how identities spread over sticky variants")
                .arg(
                    Arg::new("identities")
                        .long("identities")
                        .default_value("10000")
                        .value_parser(value_parser!(u64))
                        .help("Number of distinct identities"),
                )
                .arg(
                    Arg::new("variants")
                        .long("variants")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Number of non-default variants"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective dispatcher configuration")
                .arg(config_arg()),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Dispatcher configuration file (TOML)")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name).cloned().with_context(|| format!("missing --{name}"))
}

fn load_config(args: &ArgMatches) -> anyhow::Result<DispatchConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => DispatchConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(DispatchConfig::default()),
    }
}

fn policy(name: &str) -> ErrorPolicy {
    match name {
        "throw" => ErrorPolicy::Throw,
        "any" => ErrorPolicy::RedirectAndReplayAny,
        "ordered" => ErrorPolicy::RedirectAndReplayOrdered(vec![TrialKey::new("one_click"), TrialKey::new("control")]),
        _ => ErrorPolicy::RedirectAndReplayDefault,
    }
}

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "error" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: arg(args, "seed")?,
                requests: arg(args, "requests")?,
                scopes: arg(args, "scopes")?,
                failure_rate: arg(args, "failure-rate")?,
                policy: policy(&arg::<String>(args, "policy")?),
                selection: if arg::<String>(args, "selection")? == "sticky" {
                    SelectionChoice::Sticky
                } else {
                    SelectionChoice::Random
                },
                dispatch: load_config(args)?,
            };

            let report = run_simulator(config).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
        }
        Some(("sticky", args)) => {
            let report = run_sticky(arg(args, "identities")?, arg(args, "variants")?).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Sticky routing over {} identities", report.identities);
                for (variant, count) in &report.counts {
                    println!("  {variant:<12} {count:>8}");
                }
                println!("  max skew: {:.2}%", report.max_skew * 100.0);
                println!("  stable: {}", if report.stable { "yes" } else { "NO" });
            }
            anyhow::ensure!(report.stable, "sticky assignment changed between passes");
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn command_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn simulate_defaults() {
        let matches = cli().get_matches_from(["trialswitch", "simulate"]);
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(arg::<u64>(args, "requests").unwrap(), 1000);
        assert_eq!(policy(&arg::<String>(args, "policy").unwrap()), ErrorPolicy::RedirectAndReplayDefault);
        assert!(!args.get_flag("json"));
    }

    #[test]
    fn config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_attempt_timeout_ms = 75").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let matches = cli().get_matches_from(["trialswitch", "config", "--config", &path]);
        let (_, args) = matches.subcommand().unwrap();
        let config = load_config(args).unwrap();
        assert_eq!(config.default_attempt_timeout_ms, Some(75));
    }
}
