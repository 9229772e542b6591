use anyhow::{Context, Result, anyhow, bail};
use autumnus::{FormatterOption, Options, highlight, themes};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{ArgValueCompleter, CompletionCandidate};
use env_logger::Env;
use futures::{StreamExt, pin_mut};
use iocraft::prelude::*;
use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use url::Url;

use crate::indexnow::IndexNowClient;
use crate::manifest::Manifest;
use crate::ui::{ConfigHeader, ErrorMessage, InputPrompt, SuccessMessage, UploadReportView};
use crate::uploader::{SftpSession, UploadEvent, upload_files};

mod config;
mod indexnow;
mod manifest;
mod ui;
mod uploader;

#[derive(Parser)]
#[command(name = "sitepush")]
#[command(version)]
#[command(about = "A tool for uploading static sites and submitting their URLs to IndexNow")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure sitepush interactively
    Config,
    /// Generate an IndexNow key and write its verification file
    GenKey {
        /// Directory to write the key file into
        #[arg(default_value = ".", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
    },
    /// Print the IndexNow payload without submitting it
    Payload,
    /// Store your IndexNow key in the OS keyring
    SetApiKey { api_key: String },
    /// Store your SFTP password in the OS keyring
    SetPassword { password: String },
    /// Submit the site's URLs to the IndexNow endpoint
    Submit {
        /// URLs to submit instead of the manifest's url list
        #[arg(value_hint = ValueHint::Url)]
        urls: Vec<Url>,
    },
    /// Upload the site's files over SFTP
    Upload {
        /// Upload only these files from the manifest's list
        #[arg(short, long, add = ArgValueCompleter::new(file_completer))]
        only: Vec<String>,
    },
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let _rt_guard = rt.enter();
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::GenKey { dir } => gen_key(&dir),
            Commands::SetApiKey { api_key } => config::set_api_key_keyring(api_key),
            Commands::SetPassword { password } => config::set_sftp_password_keyring(password),
            needs_manifest => {
                let config = config::read_config()?;
                let cwd = env::current_dir()?;
                let manifest = Manifest::load(&cwd)?
                    .ok_or_else(|| anyhow!("No sitepush.toml found in {}", cwd.display()))?;

                match needs_manifest {
                    Commands::Submit { urls } => submit(&config, &manifest, urls).await,
                    Commands::Payload => print_payload(&config, &manifest),
                    Commands::Upload { only } => upload(&config, &manifest, &cwd, only).await,
                    Commands::Config => panic!("This state should be unreachable"),
                    Commands::GenKey { dir: _ } => panic!("This state should be unreachable"),
                    Commands::SetApiKey { api_key: _ } => panic!("This state should be unreachable"),
                    Commands::SetPassword { password: _ } => {
                        panic!("This state should be unreachable")
                    }
                }
            }
        }
    })
}

async fn submit(config: &config::Config, manifest: &Manifest, urls: Vec<Url>) -> Result<()> {
    let urls = if urls.is_empty() {
        manifest.site.urls.clone()
    } else {
        urls
    };
    if urls.is_empty() {
        bail!("No URLs to submit: pass them as arguments or list them under [site] urls");
    }

    let client = IndexNowClient::new(
        config.indexnow_endpoint.clone(),
        config.indexnow_key()?,
        manifest.site.key_location.clone(),
    );

    let (status, body) = client.submit(&manifest.site.host, &urls).await?;
    println!("Status: {status}");
    println!("{body}");

    if !status.is_success() {
        bail!("IndexNow endpoint rejected the submission");
    }
    Ok(())
}

fn print_payload(config: &config::Config, manifest: &Manifest) -> Result<()> {
    if manifest.site.urls.is_empty() {
        bail!("No URLs to submit: list them under [site] urls");
    }

    let client = IndexNowClient::new(
        config.indexnow_endpoint.clone(),
        config.indexnow_key()?,
        manifest.site.key_location.clone(),
    );
    let request = client.submission(&manifest.site.host, &manifest.site.urls);

    let output = highlight(
        &serde_json::to_string_pretty(&request)?,
        Options {
            formatter: FormatterOption::Terminal {
                theme: Some(themes::get("ayu_light").expect("Syntax highlighting theme not found")),
            },
            lang_or_file: Some("json"),
        },
    );
    println!("{}", output);
    Ok(())
}

async fn upload(
    config: &config::Config,
    manifest: &Manifest,
    local_root: &Path,
    only: Vec<String>,
) -> Result<()> {
    let target = &manifest.upload;
    let files = target.selected_files(&only)?;
    if files.is_empty() {
        bail!("No files to upload: list them under [upload] files");
    }

    let password = config.sftp_password()?;

    println!(
        "Connecting to {}@{}:{} ...",
        target.user, target.host, target.port
    );
    let started = Instant::now();
    let mut session =
        SftpSession::connect(&target.host, target.port, &target.user, &password).await?;

    let stream = upload_files(&mut session, &target.remote_dir, local_root, &files);
    pin_mut!(stream);

    let mut report = None;
    while let Some(event) = stream.next().await {
        match event? {
            UploadEvent::Uploading { name } => println!("Uploading {name} ..."),
            UploadEvent::Uploaded { name, bytes } => {
                println!("Uploaded {name} ({})", ui::format_size(bytes))
            }
            UploadEvent::Skipped { name } => println!("Skipped {name}: no such local file"),
            UploadEvent::Done(r) => {
                report = Some(r);
                break;
            }
        }
    }
    let report = report.expect("Stream ended without a final report");

    println!();
    element!(UploadReportView(host: target.host.clone(), report: report)).print();

    let elapsed = started.elapsed();
    element!(SuccessMessage(
        message: format!(
            "Upload finished in {}",
            humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
        )
    ))
    .print();

    Ok(())
}

fn gen_key(dir: &Path) -> Result<()> {
    let key = indexnow::generate_key();
    let path = indexnow::write_key_file(dir, &key)
        .with_context(|| format!("Failed to write key file in {}", dir.display()))?;
    config::set_api_key_keyring(key)?;

    println!("Key file written to {}", path.display());
    println!("Publish it at the root of your site so the endpoint can verify ownership.");
    Ok(())
}

fn file_completer(current: &std::ffi::OsStr) -> Vec<CompletionCandidate> {
    let mut completions = vec![];
    let Some(current) = current.to_str() else {
        return completions;
    };

    let Ok(cwd) = env::current_dir() else {
        return completions;
    };
    let Ok(Some(manifest)) = Manifest::load(&cwd) else {
        return completions;
    };

    manifest.upload.files.into_iter().for_each(|name| {
        if name.starts_with(current) {
            completions.push(CompletionCandidate::new(name));
        }
    });

    completions
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        if let Some(def) = default {
            Ok(def.to_string())
        } else {
            Ok(input)
        }
    } else {
        Ok(input)
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let indexnow_endpoint = loop {
        let endpoint_str = read_input(
            "IndexNow endpoint",
            Some(config::DEFAULT_INDEXNOW_ENDPOINT),
            Some("The search engine endpoint submissions are POSTed to"),
        )?;

        match Url::parse(&endpoint_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    let indexnow_key = loop {
        let key = read_input(
            "IndexNow key",
            None,
            Some("Your IndexNow key (stored securely in OS keyring)"),
        )?;

        if key.is_empty() {
            element!(ErrorMessage(message: "IndexNow key cannot be empty".to_string())).print();
            println!();
        } else {
            break key;
        }
    };

    let sftp_password = read_input(
        "SFTP password",
        None,
        Some("Optional: stored in the OS keyring, never in the config file"),
    )?;

    config::set_api_key_keyring(indexnow_key)?;
    if !sftp_password.is_empty() {
        config::set_sftp_password_keyring(sftp_password)?;
    }

    let config_file = config::ConfigFile {
        indexnow_endpoint: Some(indexnow_endpoint),
    };

    config::write_config(config_file)?;

    element!(SuccessMessage(message: "Configuration complete!".to_string())).print();

    Ok(())
}
