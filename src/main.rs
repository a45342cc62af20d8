use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::str::FromStr;
use std::{env, io};
use tokio::sync::mpsc;

mod credentials;
mod ui;
mod utils;

use crate::{
    credentials::{clear_credentials, load_credentials, save_credentials, Credentials},
    ui::{ChatUI, UiAction},
};
use chatbook::{
    api::ApiClient,
    config::{ClientConfig, DEFAULT_SERVER},
    models::Message,
    session::{SessionConnector, SessionEvent},
    state::{ChatState, HistoryRequest},
    ChatError,
};

/// Command line arguments for chatbook
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatbook: a terminal client for the ChatBook chat backend."
)]
struct Args {
    /// Backend URL (falls back to CHATBOOK_SERVER, then http://localhost:8000)
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Directory for stored credentials and the log file
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Create the account before logging in
    #[arg(long)]
    register: bool,

    /// Forget stored tokens and exit
    #[arg(long)]
    logout: bool,

    /// Log level written to chatbook.log (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

type HistoryResult = (HistoryRequest, std::result::Result<Vec<Message>, ChatError>);

/// Prompts for a username and password unless the environment provides them
fn prompt_login() -> Result<(String, String)> {
    let username = match env::var("CHATBOOK_USERNAME") {
        Ok(username) => username,
        Err(_) => {
            eprintln!("Username:");
            utils::read_line()?
        }
    };
    let password = match env::var("CHATBOOK_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            eprintln!("Password for {}:", username);
            utils::read_line()?
        }
    };
    if username.is_empty() || password.is_empty() {
        return Err(anyhow!("username and password are required"));
    }
    Ok((username, password))
}

/// Resolve the identity for this run: stored refresh token first, then an
/// interactive login.
async fn authenticate(api: &mut ApiClient, server: &str, register: bool) -> Result<String> {
    if !register && env::var("CHATBOOK_USERNAME").is_err() {
        if let Some(stored) = load_credentials(server)? {
            match api.refresh(&stored.tokens.refresh_token).await {
                Ok(tokens) => {
                    info!("Refreshed session for {}", stored.username);
                    api.set_access_token(Some(tokens.access_token.clone()));
                    save_credentials(&Credentials::new(server, &stored.username, tokens))?;
                    return Ok(stored.username);
                }
                Err(e) => {
                    warn!("Stored session for {} expired: {}", stored.username, e);
                    eprintln!("Session for {} expired, please log in again.", stored.username);
                }
            }
        }
    }

    let (username, password) = prompt_login()?;
    if register {
        api.register(&username, &password)
            .await
            .with_context(|| format!("registering {}", username))?;
        eprintln!("Registered {}.", username);
    }
    let tokens = api
        .login(&username, &password)
        .await
        .with_context(|| format!("logging in as {}", username))?;
    api.set_access_token(Some(tokens.access_token.clone()));
    save_credentials(&Credentials::new(server, &username, tokens))?;
    Ok(username)
}

fn spawn_history_fetch(api: &ApiClient, request: HistoryRequest, tx: &mpsc::UnboundedSender<HistoryResult>) {
    let api = api.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = api.fetch_history(&request.identity, &request.contact).await;
        if tx.send((request, result)).is_err() {
            warn!("History result arrived after shutdown");
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.config_dir {
        credentials::set_config_dir_override(dir.clone());
    }
    let config_dir = credentials::get_config_dir()?;
    let log_file_path = config_dir.join("chatbook.log");
    let level = LevelFilter::from_str(&args.log_level)
        .map_err(|_| anyhow!("unknown log level '{}'", args.log_level))?;
    utils::setup_logging(Some(log_file_path.as_path()), level)?;

    info!("chatbook starting up");
    info!("System information: {} {}", env::consts::OS, env::consts::ARCH);
    info!("Logging to file: {}", log_file_path.display());

    let server = args
        .server
        .clone()
        .or_else(|| env::var("CHATBOOK_SERVER").ok())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let config = ClientConfig::from_server_url(&server)?;
    let mut api = ApiClient::new(&config)?;

    if args.logout {
        if let Err(e) = api.logout().await {
            warn!("Logout request failed: {}", e);
        }
        clear_credentials()?;
        println!("Logged out.");
        return Ok(());
    }

    let identity = match authenticate(&mut api, &config.api_base, args.register).await {
        Ok(identity) => identity,
        Err(e) => {
            error!("Authentication failed: {:#}", e);
            eprintln!("Could not sign in to {}: {:#}", config.api_base, e);
            return Err(e);
        }
    };
    println!("Signed in as {}. Connecting...", identity);

    let mut state = ChatState::new();
    state.switch_identity(&identity);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let mut connector = SessionConnector::new(config.clone());
    connector.on_event(event_tx);

    let mut chat_ui = ChatUI::new();
    if let Err(e) = connector.open(&identity).await {
        chat_ui.set_notice(format!("Live updates unavailable: {}", e));
    }

    state.set_contacts(api.fetch_contacts(&identity).await);

    let (history_tx, mut history_rx) = mpsc::unbounded_channel::<HistoryResult>();
    let first_contact = state.contacts().first().map(|c| c.username.clone());
    if let Some(contact) = first_contact {
        if let Some(request) = state.select_contact(&contact) {
            spawn_history_fetch(&api, request, &history_tx);
        }
    }

    let mut terminal = ui::setup_terminal()?;
    let result = run_main_loop(
        &mut chat_ui,
        &mut terminal,
        &mut state,
        &connector,
        &api,
        &mut event_rx,
        (&history_tx, &mut history_rx),
    )
    .await;
    connector.close();
    ui::restore_terminal(terminal)?;

    println!("Chat session ended.");
    result
}

/// Run the main event loop
async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    state: &mut ChatState,
    connector: &SessionConnector,
    api: &ApiClient,
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    history: (
        &mpsc::UnboundedSender<HistoryResult>,
        &mut mpsc::UnboundedReceiver<HistoryResult>,
    ),
) -> Result<()> {
    let (history_tx, history_rx) = history;

    loop {
        terminal.draw(|f| chat_ui.draw(f, &*state))?;

        match chat_ui.handle_input(state)? {
            Some(UiAction::Quit) => break,
            Some(UiAction::Select(contact)) => {
                if let Some(request) = state.select_contact(&contact) {
                    spawn_history_fetch(api, request, history_tx);
                }
            }
            Some(UiAction::Send { to, content }) => {
                if let Err(e) = connector.send(&to, &content) {
                    error!("Failed to send message to {}: {}", to, e);
                    chat_ui.set_notice(format!("Send failed: {}", e));
                }
            }
            None => {}
        }

        while let Ok(event) = event_rx.try_recv() {
            state.apply_event(event);
        }

        while let Ok((request, result)) = history_rx.try_recv() {
            let failed = result.is_err();
            let current = state.apply_history(&request, result);
            if failed && current {
                chat_ui.set_notice(format!("Could not load history with {}", request.contact));
            }
        }

        // Yield so spawned fetches and the live channel make progress
        tokio::task::yield_now().await;
    }

    Ok(())
}
