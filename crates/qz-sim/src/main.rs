use anyhow::{ensure, Context};
use clap::{value_parser, Arg, Command};
use qz_engagement::{decode_token, EngagementConfig};
use tracing_subscriber::{fmt, EnvFilter};

mod simulator;

use simulator::{run_burst, BurstConfig};

fn cli() -> Command {
    Command::new("qz-sim")
        .version(qz_engagement::VERSION)
        .about("Quiz feed engagement simulator")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("burst")
                .about("Run a seeded interaction burst and check engagement invariants")
                .arg(
                    Arg::new("entities")
                        .long("entities")
                        .default_value("8")
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Number of quiz items in the feed"),
                )
                .arg(
                    Arg::new("viewers")
                        .long("viewers")
                        .default_value("4")
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Number of distinct signed-in viewers"),
                )
                .arg(
                    Arg::new("actions")
                        .long("actions")
                        .default_value("500")
                        .value_parser(value_parser!(u64))
                        .help("Number of double-tapped actions to issue"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that an action's backend call fails"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_name("FILE")
                        .help("TOML file with engine settings"),
                ),
        )
        .subcommand(
            Command::new("decode-token")
                .about("Print the identity a bearer token resolves to")
                .arg(Arg::new("token").required(true).help("Bearer token")),
        )
}

fn load_engine_config(path: Option<&str>) -> anyhow::Result<EngagementConfig> {
    let Some(path) = path else {
        return Ok(EngagementConfig::default());
    };
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config {path}"))?;
    EngagementConfig::from_toml_str(&contents).with_context(|| format!("invalid config {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("burst", args)) => {
            let failure_rate = *args.get_one::<f64>("failure-rate").context("failure-rate")?;
            ensure!(
                (0.0..=1.0).contains(&failure_rate),
                "failure-rate must be between 0 and 1, got {failure_rate}"
            );
            let count = |name: &str| -> anyhow::Result<usize> {
                let value = *args.get_one::<u64>(name).context(name.to_string())?;
                usize::try_from(value).with_context(|| format!("{name} is too large"))
            };

            let config = BurstConfig {
                seed: *args.get_one::<u64>("seed").context("seed")?,
                entities: count("entities")?,
                viewers: count("viewers")?,
                actions: count("actions")?,
                failure_rate,
                engine: load_engine_config(args.get_one::<String>("config").map(String::as_str))?,
            };
            tracing::info!(
                seed = config.seed,
                entities = config.entities,
                viewers = config.viewers,
                actions = config.actions,
                "starting burst"
            );

            let report = run_burst(config).await;
            println!("{}", report.generate_text());
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Some(("decode-token", args)) => {
            let token = args.get_one::<String>("token").context("token")?;
            let identity = decode_token(token).context("token did not decode")?;
            println!("username: {}", identity.username.as_deref().unwrap_or("-"));
            println!(
                "user id:  {}",
                identity.user_id.map_or_else(|| "-".to_string(), |id| id.to_string())
            );
            match identity.key() {
                Some(key) => println!("view key: {key}"),
                None => println!("view key: - (anonymous)"),
            }
        }
        Some((other, _)) => anyhow::bail!("unknown subcommand: {other}"),
        None => anyhow::bail!("no subcommand given"),
    }
    Ok(())
}
