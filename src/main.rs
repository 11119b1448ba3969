use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, bail, eyre};
use log::{debug, info};

mod cli;

use cli::{Cli, Command, OutputFormat};
use ytenhance::config::{Config, config_path};
use ytenhance::enhance::{EnhancementMode, EnhancementSettings};
use ytenhance::providers::{LlmProvider, ProviderManager, validate_config};
use ytenhance::service::TranscriptService;

fn setup_logging() -> Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("ytenhance.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytenhance")
        .join("logs")
}

fn build_after_help(config: &Config) -> String {
    let provider_lines: Vec<String> = config
        .provider_configs()
        .iter()
        .map(|p| {
            let check = validate_config(p);
            if check.valid {
                format!("  \x1b[32m✅\x1b[0m {:<10} {}", p.name, p.default_model)
            } else {
                format!("  \x1b[31m❌\x1b[0m {:<10} ({})", p.name, check.errors.join("; "))
            }
        })
        .collect();

    format!(
        "\nPROVIDERS (default: {}):\n{}\n\nConfig is read from: {}\nLogs are written to: {}",
        config.default_provider(),
        provider_lines.join("\n"),
        config_path().display(),
        log_dir().join("ytenhance.log").display()
    )
}

/// URL from the argument, otherwise one per stdin line
fn collect_inputs(url: Option<String>) -> Result<Vec<String>> {
    let inputs = match url {
        Some(url) => vec![url],
        None => io::stdin().lock().lines().collect::<Result<Vec<_>, _>>()?,
    };
    let inputs: Vec<String> = inputs
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if inputs.is_empty() {
        bail!("no URL or video ID provided\n\nUsage: ytenhance transcript <URL>\n       echo <URL> | ytenhance transcript");
    }
    Ok(inputs)
}

/// Print, or write to `output`; later inputs of a multi-URL run are appended to the same file
fn emit(rendered: &str, output: Option<&Path>, append: bool, verbose: bool) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(path)?;
            if append {
                file.write_all(b"\n")?;
            }
            file.write_all(rendered.as_bytes())?;
            if verbose {
                eprintln!("Output written to: {}", path.display());
            }
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn select_provider(manager: &ProviderManager, config: &Config, name: Option<&str>) -> Result<Box<dyn LlmProvider>> {
    let name = name.unwrap_or_else(|| config.default_provider());
    manager.provider(name).map_err(|e| eyre!(e.user_message()))
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    // Config file is non-fatal if missing/invalid
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring config at {}: {e}", config_path().display());
        Config::default()
    });

    let cmd = <Cli as clap::CommandFactory>::command().after_help(build_after_help(&config));
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    let manager = ProviderManager::new(reqwest::Client::new(), config.provider_configs());
    let api_key = config.youtube_api_key();

    let service_with = |settings: EnhancementSettings| {
        let service = TranscriptService::new(config.request_timeout(), settings);
        match &config.language_hints {
            Some(hints) => service.with_language_hints(hints.clone()),
            None => service,
        }
    };

    match cli.command {
        Command::Transcript { url, format, output } => {
            let service = service_with(config.enhancement.clone());
            for (i, input) in collect_inputs(url)?.iter().enumerate() {
                let transcript = service.acquire(input).await.map_err(|e| eyre!(e.user_message()))?;
                if cli.verbose {
                    eprintln!(
                        "Video: {}\nSource: {}\nLanguage: {}\nSegments: {}",
                        transcript.video_id,
                        transcript.source,
                        transcript.language.as_deref().unwrap_or("default"),
                        transcript.segments.len(),
                    );
                }
                let rendered = match format {
                    OutputFormat::Text => ytenhance::output::render_text(&transcript),
                    OutputFormat::Json => ytenhance::output::render_json(&transcript)?,
                    OutputFormat::Srt => ytenhance::output::render_srt(&transcript),
                    OutputFormat::Timestamped => ytenhance::output::render_timestamped(&transcript.segments),
                };
                emit(&rendered, output.as_deref(), i > 0, cli.verbose)?;
            }
        }

        Command::Metadata { url } => {
            let service = service_with(config.enhancement.clone());
            for input in collect_inputs(url)? {
                let meta = service.resolve_metadata(&input, api_key.as_deref()).await;
                println!("{}", serde_json::to_string_pretty(&meta)?);
            }
        }

        Command::Enhance { url, provider, model, output } => {
            let provider = select_provider(&manager, &config, provider.as_deref())?;
            let settings = EnhancementSettings { model: model.or_else(|| config.enhancement.model.clone()), ..config.enhancement.clone() };
            let service = service_with(settings);

            for (i, input) in collect_inputs(url)?.iter().enumerate() {
                let (transcript, meta) = service
                    .acquire_with_metadata(input, api_key.as_deref())
                    .await
                    .map_err(|e| eyre!(e.user_message()))?;
                if cli.verbose {
                    eprintln!(
                        "Video: {} ({})\nChannel: {}\nSource: {}\nSegments: {}\nProvider: {}",
                        meta.title,
                        transcript.video_id,
                        meta.channel,
                        transcript.source,
                        transcript.segments.len(),
                        provider.name(),
                    );
                }

                let outcome = service.enhance_with(&transcript.segments, &meta, provider.as_ref()).await;
                if cli.verbose {
                    match outcome.mode {
                        EnhancementMode::SingleShot => eprintln!("Mode: single request"),
                        EnhancementMode::Chunked { chunks } => eprintln!("Mode: {chunks} sequential chunks"),
                    }
                }
                if let Some(reason) = &outcome.fallback_reason {
                    eprintln!("{reason}");
                }
                emit(&outcome.text, output.as_deref(), i > 0, cli.verbose)?;
            }
        }

        Command::Models { provider } => {
            let provider = select_provider(&manager, &config, provider.as_deref())?;
            debug!("Listing models for {}", provider.name());
            for model in provider.get_available_models().await {
                println!("{model}");
            }
        }

        Command::TestProvider { provider } => {
            let provider = select_provider(&manager, &config, provider.as_deref())?;
            let check = provider.validate_config();
            if !check.valid {
                bail!("{} is misconfigured:\n  {}", provider.name(), check.errors.join("\n  "));
            }
            if provider.test_connection().await {
                println!("{}: connection OK", provider.name());
            } else {
                bail!("{}: connection failed (see log for details)", provider.name());
            }
        }
    }

    Ok(())
}
