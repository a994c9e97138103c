use crate::backup::BackupPanel;
use crate::config::{BackupAction, Command, Config, FetchArgs};
use crate::live_tail::{LiveTail, TailEvent};
use crate::log_fetcher::{LogFetcher, MAX_LINES};
use crate::log_line::{classify, filter_lines, FilterLevel};
use crate::session::Session;
use crate::view::{render_backup, render_files, styled_line, styled_row, LogConsole};
use anyhow::{Context, Result};
use console::style;
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const DISCONNECT_PROMPT: &str =
    "Disconnect Google Drive backup? Logs will no longer be backed up automatically.";

pub async fn execute_command(command: Command, config: &Config) -> Result<()> {
    let session = Session::from_config(config)?;
    info!("Using backend {}", session.base_url());

    match command {
        Command::Fetch(args) => fetch(session, config, args).await,
        Command::Tail { filter } => tail(session, config, filter).await,
        Command::Files => files(session, config).await,
        Command::Clear { file, yes } => {
            let file = file.unwrap_or_else(|| config.default_file.clone());
            clear(session, &file, yes).await
        }
        Command::Download { file, output } => {
            let file = file.unwrap_or_else(|| config.default_file.clone());
            download(session, &file, output).await
        }
        Command::Backup { action } => backup(session, action).await,
    }
}

/// Loads the console's current query into it. Failures only reach the log and
/// leave the previous state in place.
async fn refresh(fetcher: &LogFetcher, console: &mut LogConsole, lines: usize) {
    match fetcher.fetch(&console.query(lines)).await {
        Ok(outcome) => {
            if !console.apply(outcome).await {
                warn!("Ignored a superseded log response");
            }
        }
        Err(e) => error!("Failed to fetch logs: {}", e),
    }
}

async fn print_console(console: &LogConsole) {
    let rows = console.rows().await;
    println!("{} | {}", console.selected_file(), console.header(rows.len()));

    if rows.is_empty() {
        println!("{}", style(console.empty_message()).italic().dim());
        return;
    }

    for row in &rows {
        println!("{}", styled_row(row));
    }
}

async fn fetch(session: Session, config: &Config, args: FetchArgs) -> Result<()> {
    let fetcher = LogFetcher::new(session);
    let mut console = LogConsole::new(args.file.as_deref().unwrap_or(&config.default_file));
    console.search = args.search;
    console.user_id = args.user_id;
    console.ip = args.ip;
    console.filter_level = args.filter;

    refresh(&fetcher, &mut console, args.lines).await;
    print_console(&console).await;
    Ok(())
}

async fn tail(session: Session, config: &Config, filter: FilterLevel) -> Result<()> {
    let console = LogConsole::new(&config.default_file);
    let (mut live, mut events) = LiveTail::new(session, console.buffer());
    live.start().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if live.is_streaming() {
                    info!("Stopping live tail");
                }
                live.stop().await;
                break;
            }
            event = events.recv() => match event {
                Some(TailEvent::Connected) => {
                    eprintln!("{}", style("Live").green().bold());
                }
                Some(TailEvent::History(lines)) => {
                    // History arrives newest first; print it in reading order.
                    for line in filter_lines(lines.iter().rev(), filter) {
                        println!("{}", styled_line(line));
                    }
                }
                Some(TailEvent::Line(line)) => {
                    if filter.matches(classify(&line)) {
                        println!("{}", styled_line(&line));
                    }
                }
                Some(TailEvent::ServerError(message)) => {
                    eprintln!("{} {}", style("Stream error:").red(), message);
                }
                Some(TailEvent::Stopped) | None => {
                    eprintln!("{}", style("Live tail stopped").dim());
                    break;
                }
            }
        }
    }

    let buffer = console.buffer();
    let buffer = buffer.lock().await;
    if buffer.is_empty() {
        info!("No lines received");
    } else {
        info!("{} lines buffered", buffer.len());
    }
    Ok(())
}

async fn files(session: Session, config: &Config) -> Result<()> {
    let fetcher = LogFetcher::new(session);
    let mut console = LogConsole::new(&config.default_file);
    refresh(&fetcher, &mut console, 1).await;

    if console.available_files().is_empty() {
        println!("No log files found.");
    }
    for line in render_files(console.available_files(), console.selected_file()) {
        println!("{}", line);
    }

    println!();
    for line in render_backup(console.backup_status()) {
        println!("{}", line);
    }
    Ok(())
}

async fn clear(session: Session, file: &str, yes: bool) -> Result<()> {
    if !yes
        && !confirm(&format!(
            "Clear {}? This action cannot be undone.",
            file
        ))
        .await?
    {
        println!("Aborted.");
        return Ok(());
    }

    let fetcher = LogFetcher::new(session);
    fetcher
        .clear(file)
        .await
        .with_context(|| format!("Failed to clear {}", file))?;

    let mut console = LogConsole::new(file);
    refresh(&fetcher, &mut console, MAX_LINES).await;
    print_console(&console).await;
    Ok(())
}

async fn download(session: Session, file: &str, output: Option<PathBuf>) -> Result<()> {
    let fetcher = LogFetcher::new(session);
    let bytes = fetcher
        .download(file)
        .await
        .with_context(|| format!("Failed to download {}", file))?;

    let output = output.unwrap_or_else(|| PathBuf::from(file));
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;

    info!("Saved {} bytes to {:?}", bytes.len(), output);
    println!("Saved {} to {}", file, output.display());
    Ok(())
}

async fn backup(session: Session, action: BackupAction) -> Result<()> {
    let panel = BackupPanel::new(session);

    let status = match action {
        BackupAction::Status => panel.status().await?,
        BackupAction::Connect => {
            let url = panel
                .connect()
                .await
                .context("Failed to get backup authorization URL")?;
            println!("Open this URL to connect Google Drive:");
            println!("{}", url);
            return Ok(());
        }
        BackupAction::Disconnect { yes } => {
            if !yes && !confirm(DISCONNECT_PROMPT).await? {
                println!("Aborted.");
                return Ok(());
            }
            panel.disconnect().await.context("Failed to disconnect backup")?
        }
        BackupAction::Now => {
            let status = panel.backup_now().await?;
            println!("Backup completed successfully.");
            status
        }
    };

    for line in render_backup(&status) {
        println!("{}", line);
    }
    Ok(())
}

async fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .context("Failed to read confirmation")?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
