mod commands;
mod config;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chat_auth::AuthClient;
use chat_session::{
    AuthStore, ChatSession, HttpHistoryLoader, ReconnectPolicy, SessionConfig, SessionUpdate,
    SubmitOutcome, WebSocketConnector,
};
use clap::Parser;
use commands::Input;
use config::{ClientConfig, FileCredentialStore};
use shared::RegisterRequest;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

#[derive(Parser, Debug)]
#[command(name = "chat-client")]
#[command(about = "Terminal client for the real-time chat backend")]
struct Args {
    /// Backend server URL (http(s):// or ws(s)://)
    #[arg(long, env = "CHAT_BACKEND_URL")]
    backend_url: Option<String>,

    /// Sign in with this username
    #[arg(long, value_name = "USERNAME")]
    login: Option<String>,

    /// Password for --login or --register
    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Create an account (named when --login is given, anonymous otherwise)
    #[arg(long)]
    register: bool,

    /// Print the Google sign-in URL and exit
    #[arg(long)]
    oauth: bool,

    /// Complete Google sign-in with the URL the browser was redirected to
    #[arg(long, value_name = "URL")]
    callback: Option<String>,

    /// Forget the stored credential and exit
    #[arg(long)]
    logout: bool,

    /// Re-dial the live channel when it drops (saved as the default)
    #[arg(long)]
    reconnect: bool,

    /// Config file location (defaults to the platform config directory)
    #[arg(long, env = "CHAT_CLIENT_CONFIG")]
    config: Option<PathBuf>,
}

/// Why a session loop ended
enum Exit {
    Quit,
    Terminated,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config_path = match args.config.clone() {
        Some(path) => path,
        None => ClientConfig::default_path()?,
    };
    let mut config = ClientConfig::load_from(&config_path).context("Failed to load config file")?;

    // Persist explicit choices so the next run picks them up.
    if args.backend_url.is_some() || args.reconnect {
        config = ClientConfig::update(&config_path, |config| {
            if let Some(url) = &args.backend_url {
                config.preferences.backend_url = Some(url.clone());
            }
            if args.reconnect {
                config.preferences.reconnect = true;
            }
        })
        .context("Failed to save preferences")?;
    }

    let backend_url = config
        .preferences
        .backend_url
        .clone()
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
    let store = AuthStore::restore(FileCredentialStore::new(&config_path));
    let auth = AuthClient::new(&backend_url);

    if args.logout {
        return commands::handle_logout(&store);
    }
    if args.oauth {
        return commands::handle_federated_start(&auth);
    }
    if let Some(callback) = &args.callback {
        commands::handle_callback(&store, callback)?;
    }

    ui::print_startup_banner();
    sign_in(&args, &store, &auth).await?;

    let Some(credential) = store.current() else {
        ui::print_not_signed_in();
        return Ok(());
    };
    ui::print_session_info(credential.identity(), &backend_url, config.preferences.reconnect);

    let session_config = SessionConfig::default().with_reconnect(if config.preferences.reconnect {
        ReconnectPolicy::enabled()
    } else {
        ReconnectPolicy::default()
    });
    run_chat(store, &backend_url, session_config).await
}

/// Handle --login / --register
async fn sign_in(args: &Args, store: &AuthStore, auth: &AuthClient) -> Result<()> {
    if args.register {
        let profile = match &args.login {
            Some(username) => RegisterRequest::named(username, password(args)?),
            None => RegisterRequest::anonymous(),
        };
        return commands::handle_register(store, auth, profile).await;
    }
    if let Some(username) = &args.login {
        return commands::handle_login(store, auth, username, &password(args)?).await;
    }
    Ok(())
}

fn password(args: &Args) -> Result<String> {
    if let Some(password) = &args.password {
        return Ok(password.clone());
    }
    ui::print_status("Password:");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Run sessions until the user quits or signs out.
///
/// Each credential gets its own session; the previous one is fully shut down
/// before the next is created.
async fn run_chat(store: AuthStore, backend_url: &str, config: SessionConfig) -> Result<()> {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if input_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        let mut session = ChatSession::new(
            config.clone(),
            store.clone(),
            Arc::new(HttpHistoryLoader::new(backend_url)),
            Arc::new(WebSocketConnector::new(backend_url)),
        );
        let exit = drive(&mut session, &mut input_rx).await;
        let previous = session.identity().unwrap_or_default().to_string();
        session.shutdown().await;

        match exit {
            Exit::Quit => {
                info!("Chat client shutting down");
                return Ok(());
            }
            Exit::Terminated => match store.current() {
                Some(next) => {
                    println!();
                    ui::print_signed_in(next.identity());
                }
                None => {
                    ui::print_logout_success(&previous);
                    return Ok(());
                }
            },
        }
    }
}

async fn drive(session: &mut ChatSession, input_rx: &mut mpsc::UnboundedReceiver<String>) -> Exit {
    let mut renderer = ui::Renderer::default();

    loop {
        tokio::select! {
            update = session.next_update() => {
                let Some(update) = update else {
                    return Exit::Terminated;
                };
                match update {
                    SessionUpdate::Phase(phase) => ui::print_phase(phase),
                    SessionUpdate::Connection { state, reason } => {
                        ui::print_connection(state, reason.as_ref())
                    }
                    SessionUpdate::TimelineReset => {
                        renderer.redraw(session.timeline());
                        continue;
                    }
                    SessionUpdate::FrameRejected(e) => {
                        warn!("Dropped a message from the server: {}", e)
                    }
                    SessionUpdate::Timeline => {}
                }
                renderer.draw_new(session.timeline());
            }
            line = input_rx.recv() => {
                let Some(line) = line else {
                    return Exit::Quit;
                };
                match Input::parse(&line) {
                    Input::Empty => {}
                    Input::Quit => return Exit::Quit,
                    Input::Logout => session.logout(),
                    Input::FreshConversation => {
                        // Drawn when the reset update comes back.
                        session.request_fresh_conversation();
                        continue;
                    }
                    Input::Message(text) => match session.submit(&text) {
                        Ok(SubmitOutcome::Sent { .. }) => {}
                        Ok(SubmitOutcome::NotSent { .. }) => {
                            ui::print_warning("Not connected; message was not sent")
                        }
                        Err(e) => ui::print_warning(&e.to_string()),
                    },
                }
                renderer.draw_new(session.timeline());
            }
        }
    }
}
