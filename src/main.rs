use std::{path::Path, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};

use ebook_reader::{
    auth::{AuthService, TokenStore},
    config::Config,
    domain::{Catalog, ProgressStore},
    gateway::{ApiResponse, GatewayOptions, ReqwestTransport, TracingHooks},
    reader::{KeyAction, LibraryView, ReaderSession},
    storage::{KeyValueStore, SqliteKvStore},
};

type ReaderResult<T> = anyhow::Result<T>;

#[derive(Debug, Parser)]
#[command(name = "ebook-reader", version, about = "Read books and keep your place")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the catalog with reading progress
    Library,
    /// Show the stored progress of one book
    Progress { book_id: String },
    /// Open a book and navigate with key names read from stdin
    /// (ArrowRight, ArrowLeft, PageUp, PageDown, space, +, -, Escape, or `goto N`)
    Read {
        book_id: String,
        /// Page count reported by the renderer
        #[arg(long)]
        total_pages: u32,
    },
    /// Log in and store the token pair
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Log out and forget the stored tokens
    Logout {
        /// End every session of this account
        #[arg(long)]
        all: bool,
    },
    /// Exchange the refresh token for a new access token
    Refresh,
}

#[tokio::main]
async fn main() -> ReaderResult<()> {
    // Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!(
        "{}=info,sea_orm=warn,sqlx=warn,reqwest=warn",
        env!("CARGO_PKG_NAME")
    );
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish()
        .with(ErrorLayer::default())
        .init();

    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Config::load()?;
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!(e));
    }
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        api_base = %config.api_base_url,
        "starting ebook reader"
    );

    let cli = Cli::parse();
    let kv: Arc<dyn KeyValueStore> =
        Arc::new(SqliteKvStore::connect(&config.db_connection_string).await?);
    let progress = ProgressStore::new(kv.clone());

    match cli.command {
        Command::Library => {
            let catalog = Catalog::load(&config.catalog_path).await?;
            let view = LibraryView::build(&catalog, &progress).await;
            print!("{}", view.render());
        }
        Command::Progress { book_id } => match progress.load(&book_id).await {
            Some(p) => println!(
                "{}: {}% ({}), last read {}",
                p.book_id,
                p.progress_percentage,
                p.page_label(),
                p.last_read_date.to_rfc3339()
            ),
            None => println!("{}: not started", book_id),
        },
        Command::Read {
            book_id,
            total_pages,
        } => read(&config, progress, &book_id, total_pages).await?,
        Command::Login { username, password } => {
            let resp = auth_service(&config, kv)?
                .login(json!({ "username": username, "password": password }))
                .await;
            report("login", &resp);
        }
        Command::Logout { all } => {
            let resp = auth_service(&config, kv)?.logout(all).await;
            report("logout", &resp);
        }
        Command::Refresh => {
            let resp = auth_service(&config, kv)?.refresh_token().await;
            report("refresh", &resp);
        }
    }
    Ok(())
}

fn auth_service(config: &Config, kv: Arc<dyn KeyValueStore>) -> ReaderResult<AuthService> {
    let options = GatewayOptions::new(&config.api_base_url).with_timeout(config.request_timeout);
    Ok(AuthService::with_transport(
        options,
        Arc::new(ReqwestTransport::new()?),
        TokenStore::new(kv),
        Arc::new(TracingHooks::new(&config.login_route)),
    ))
}

fn report(action: &str, resp: &ApiResponse) {
    if resp.success {
        println!("{action}: ok");
    } else {
        println!(
            "{action}: failed ({})",
            resp.message.as_deref().unwrap_or("no message")
        );
    }
}

async fn read(
    config: &Config,
    progress: ProgressStore,
    book_id: &str,
    total_pages: u32,
) -> ReaderResult<()> {
    let catalog = Catalog::load(&config.catalog_path).await?;
    let book = catalog
        .find(book_id)
        .with_context(|| format!("Book not found: {}", book_id))?;
    println!("{} by {}", book.title, book.author);

    let mut session = ReaderSession::open(progress, book_id).await;
    session.on_document_loaded(total_pages).await;
    print_position(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim_end_matches(['\r', '\n']);
        if let Some(page) = input.strip_prefix("goto ") {
            match page.trim().parse::<u32>() {
                Ok(page) => {
                    if let Err(e) = session.go_to_page(page).await {
                        println!("{e}");
                    }
                }
                Err(_) => println!("Invalid page number."),
            }
            print_position(&session);
            continue;
        }
        let key = if input == "space" { " " } else { input };
        match session.handle_key(key).await {
            Some(KeyAction::Back) => break,
            Some(_) => print_position(&session),
            None => println!("unbound key: {input:?}"),
        }
    }
    Ok(())
}

fn print_position(session: &ReaderSession) {
    let state = session.state();
    if let Some(error) = &state.error {
        println!("error: {error}");
        return;
    }
    println!(
        "Page {} / {}  zoom {:.0}%",
        state.current_page,
        state.total_pages,
        state.scale * 100.0
    );
}
