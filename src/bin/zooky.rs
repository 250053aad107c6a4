//! `zooky`: thin CLI wrapper exposing a single `ZkLock` as a shell utility
//! (spec §4.8, §6). Acquires the named lock, execs a subprocess while held,
//! releases on exit and mirrors the subprocess exit code.

use std::process::Command;
use std::time::Duration;

use clap::App;
use clap::Arg;
use prometheus::Registry;
use slog::error;
use slog::info;
use slog::o;
use slog::Drain;
use slog::Logger;

use zooky::BackendConfig;
use zooky::Config;
use zooky::ZookeeperConfig;

fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("app" => "zooky"))
}

fn load_config(matches: &clap::ArgMatches) -> Config {
    let mut config = match matches.value_of("config") {
        Some(path) => Config::from_file(path).unwrap_or_else(|error| {
            eprintln!("Failed to load configuration file '{}': {}", path, error);
            std::process::exit(2);
        }),
        None => Config::default(),
    };
    if let Some(connect) = matches.value_of("connect") {
        config.backend = BackendConfig::Zookeeper(ZookeeperConfig {
            ensemble: connect.to_string(),
            ..match config.backend {
                BackendConfig::Zookeeper(zk) => zk,
            }
        });
    }
    if let Some(lock_root) = matches.value_of("lock-root") {
        config.lock_root = lock_root.to_string();
    }
    config
}

fn main() {
    let matches = App::new("zooky")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Acquire a distributed lock, run a command while holding it")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to a zooky configuration file (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("connect")
                .long("connect")
                .value_name("ENSEMBLE")
                .help("Zookeeper ensemble connection string, overrides the config file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("lock-root")
                .long("lock-root")
                .value_name("PATH")
                .help("Root path under which lock parents are created, overrides the config file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("SECONDS")
                .help("Give up if the lock cannot be acquired within this many seconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("lock-name")
                .help("Name of the lock to acquire")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("command")
                .help("Command (and arguments) to run while the lock is held")
                .required(true)
                .multiple(true)
                .last(true),
        )
        .get_matches();

    let logger = logger();
    let config = load_config(&matches);
    let lock_name = matches.value_of("lock-name").expect("lock-name is required");
    let command: Vec<&str> = matches
        .values_of("command")
        .expect("command is required")
        .collect();
    let timeout = matches
        .value_of("timeout")
        .map(|value| value.parse::<u64>().unwrap_or_else(|_| {
            eprintln!("Invalid --timeout value '{}': expected an integer number of seconds", value);
            std::process::exit(2);
        }))
        .map(Duration::from_secs);

    let registry = Registry::new();
    zooky::register_metrics(&logger, &registry);

    info!(logger, "Connecting to coordination service"; "lock_name" => lock_name);
    let backend = zooky::connect(&config, logger.clone()).unwrap_or_else(|error| {
        eprintln!("Failed to connect to coordination service: {}", error);
        std::process::exit(1);
    });

    let lock = zooky::ZkLock::exclusive(backend, logger.clone(), &config.lock_root, lock_name)
        .with_node_attributes(config.node_attributes.clone());
    info!(logger, "Acquiring lock"; "lock_name" => lock_name);
    let acquired = lock.acquire(timeout).unwrap_or_else(|error| {
        eprintln!("Failed to acquire lock '{}': {}", lock_name, error);
        std::process::exit(1);
    });
    if !acquired {
        eprintln!("Timed out waiting to acquire lock '{}'", lock_name);
        std::process::exit(3);
    }

    info!(logger, "Lock acquired, running command"; "lock_name" => lock_name, "command" => ?command);
    let status = Command::new(command[0])
        .args(&command[1..])
        .status();

    if let Err(error) = lock.release() {
        error!(logger, "Failed to release lock"; "lock_name" => lock_name, "error" => %error);
    }

    match status {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(error) => {
            eprintln!("Failed to run command '{}': {}", command[0], error);
            std::process::exit(4);
        }
    }
}
