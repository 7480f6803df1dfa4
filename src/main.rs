use clap::Parser;
use std::io::Read;

use pawscript::{Engine, EngineConfig, SandboxPolicy, SubstitutionContext, Value};

const LICENSE: &str = "\
pawscript is distributed under the MIT license.

Permission is hereby granted, free of charge, to any person obtaining a
copy of this software and associated documentation files, to deal in the
software without restriction, subject to the conditions of the MIT
license; the software is provided \"as is\", without warranty of any
kind.
";

#[derive(Parser)]
#[command(name = "paw")]
#[command(about = "PawScript command interpreter")]
#[command(version)]
struct Cli {
    /// Script file to execute (.paw is appended when missing); stdin is
    /// read when no path is given
    #[arg()]
    script_path: Option<String>,

    /// Arguments passed to the script as $1.. ($*, $#)
    #[arg(last = true)]
    script_args: Vec<String>,

    /// Print license information and exit
    #[arg(long)]
    license: bool,

    /// Allow reads from paths matching this glob (repeatable)
    #[arg(long = "allow-read", value_name = "PATH")]
    allow_read: Vec<String>,

    /// Allow writes to paths matching this glob (repeatable)
    #[arg(long = "allow-write", value_name = "PATH")]
    allow_write: Vec<String>,

    /// Allow launching programs matching this glob (repeatable)
    #[arg(long = "allow-exec", value_name = "PATH")]
    allow_exec: Vec<String>,

    /// Allow everything beneath this directory
    #[arg(long = "sandbox-dir", value_name = "PATH")]
    sandbox_dir: Option<String>,

    /// Emit per-command execution traces
    #[arg(long)]
    debug: bool,
}

/// Resolve the script path, appending `.paw` when the bare path does not
/// exist.
fn resolve_script_path(path: &str) -> String {
    if std::path::Path::new(path).exists() || path.ends_with(".paw") {
        return path.to_string();
    }
    let with_ext = format!("{}.paw", path);
    if std::path::Path::new(&with_ext).exists() {
        with_ext
    } else {
        path.to_string()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.license {
        print!("{}", LICENSE);
        std::process::exit(0);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PAW_LOG").unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.debug { "debug" } else { "warn" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    // Script source: file or stdin
    let (script, filename) = if let Some(ref path) = cli.script_path {
        let resolved = resolve_script_path(path);
        match std::fs::read_to_string(&resolved) {
            Ok(content) => (content, Some(resolved)),
            Err(e) => {
                eprintln!("paw: cannot read script '{}': {}", resolved, e);
                std::process::exit(1);
            }
        }
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!("paw: no script given; provide a path or pipe a script via stdin");
            std::process::exit(1);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        (buf, None)
    };

    let sandbox = if cli.allow_read.is_empty()
        && cli.allow_write.is_empty()
        && cli.allow_exec.is_empty()
        && cli.sandbox_dir.is_none()
    {
        None
    } else {
        match SandboxPolicy::from_rules(
            &cli.allow_read,
            &cli.allow_write,
            &cli.allow_exec,
            cli.sandbox_dir.as_deref(),
        ) {
            Ok(policy) => Some(policy),
            Err(e) => {
                eprintln!("paw: invalid sandbox rule: {}", e);
                std::process::exit(1);
            }
        }
    };

    let engine = Engine::new(EngineConfig {
        debug: cli.debug,
        sandbox,
        ..Default::default()
    });

    // Script arguments become $1.. for the whole script
    let ctx = if cli.script_args.is_empty() {
        None
    } else {
        Some(SubstitutionContext {
            args: Some(
                cli.script_args
                    .iter()
                    .map(|a| Value::QuotedString(a.clone()))
                    .collect(),
            ),
            ..Default::default()
        })
    };

    let state = engine.state().clone();
    let engine2 = engine.clone();
    let filename2 = filename.clone();
    let status = tokio::task::spawn_blocking(move || {
        match engine2.execute_with_state(&script, &state, ctx, filename2.as_deref(), 0, 0) {
            Ok(pawscript::ExecStatus::Done(status)) => Ok(status),
            Ok(pawscript::ExecStatus::Suspended(id)) => Ok(engine2.wait_for_token(&id)),
            Err(e) => Err(e),
        }
    })
    .await
    .unwrap_or(Ok(false));

    match status {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("paw: {}", e);
            std::process::exit(1);
        }
    }
}
