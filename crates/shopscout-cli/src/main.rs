mod config;
#[cfg(feature = "eval")]
mod eval;
#[cfg(feature = "eval")]
mod lenient_json;
mod session;
mod stream;

use anyhow::Result;
use clap::{Parser, Subcommand};
use session::{ChatEngine, SessionRegistry};
use shopscout_core::{ChatTransport, Error};
use shopscout_local::context::ContextResolver;
use shopscout_local::openai_compat::OpenAiCompatClient;
use shopscout_local::search::GoogleSearchProvider;
use shopscout_local::{default_client, PageFetcher};
use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "shopscout",
    version,
    about = "Product research chat grounded in scraped web context"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat over stdin/stdout.
    Chat(ChatArgs),
    /// Judge recorded transcripts with a model and write a score report.
    #[cfg(feature = "eval")]
    Eval(EvalArgs),
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Named model profile: openai-gpt4, mistral-7b-instruct, or mistral-7b.
    #[arg(long, env = "SHOPSCOUT_PROFILE", default_value = "openai-gpt4")]
    profile: String,

    /// Override the profile's model identifier.
    #[arg(long)]
    model: Option<String>,

    #[arg(long, default_value_t = 0.3)]
    temperature: f64,

    #[arg(long, default_value_t = 500)]
    max_tokens: u64,
}

impl ModelArgs {
    fn resolve(&self) -> shopscout_core::Result<config::AppConfig> {
        config::AppConfig::resolve(
            &self.profile,
            self.model.clone(),
            self.temperature,
            self.max_tokens,
        )
    }
}

#[derive(clap::Args)]
struct ChatArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Per-page cap on extracted context characters.
    #[arg(long, default_value_t = 20_000)]
    max_page_chars: usize,
}

#[cfg(feature = "eval")]
#[derive(clap::Args)]
struct EvalArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// JSONL transcripts, one {history, reply} record per line.
    #[arg(long)]
    transcripts: std::path::PathBuf,

    /// Where to write the JSON report.
    #[arg(long, default_value = "eval-report.json")]
    out: std::path::PathBuf,
}

/// SHOPSCOUT_OPENAI_COMPAT_BASE_URL takes precedence over the profile's
/// endpoint, so a local or proxy endpoint can be swapped in without touching
/// profile variables.
fn backend_from(cfg: &config::AppConfig) -> Result<OpenAiCompatClient> {
    let client = default_client()?;
    Ok(OpenAiCompatClient::from_env(client.clone()).unwrap_or_else(|_| {
        OpenAiCompatClient::new(client, cfg.base_url.clone(), cfg.api_key.clone())
    }))
}

/// Streams tokens straight to stdout as they arrive.
struct StdoutTransport;

#[async_trait::async_trait]
impl ChatTransport for StdoutTransport {
    async fn begin_message(&mut self) -> shopscout_core::Result<()> {
        Ok(())
    }

    async fn push_token(&mut self, token: &str) -> shopscout_core::Result<()> {
        let mut out = std::io::stdout();
        out.write_all(token.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn finalize_message(&mut self) -> shopscout_core::Result<()> {
        let mut out = std::io::stdout();
        out.write_all(b"\n")
            .and_then(|_| out.flush())
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

async fn run_chat(args: ChatArgs) -> Result<()> {
    let cfg = args.model.resolve()?;
    let client = default_client()?;
    let resolver = ContextResolver::new(
        PageFetcher::new(client.clone()),
        Arc::new(GoogleSearchProvider::from_env(client)),
    )
    .with_max_page_chars(args.max_page_chars);
    let backend = Arc::new(backend_from(&cfg)?);
    let engine = ChatEngine::new(
        resolver,
        backend,
        cfg.generation,
        cfg.enable_system_prompt,
        cfg.enable_product_context,
    );

    let registry = SessionRegistry::new();
    let session = registry.open("stdin").await;
    let mut transport = StdoutTransport;

    use tokio::io::AsyncBufReadExt;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "/quit" {
            break;
        }
        let mut session = session.lock().await;
        if let Err(e) = engine
            .handle_user_turn(&mut session, &mut transport, message)
            .await
        {
            // Completion failures must reach the user; the session history has
            // already been restored to its pre-turn state.
            eprintln!("error: {e}");
        }
    }
    registry.close("stdin").await;
    Ok(())
}

#[cfg(feature = "eval")]
async fn run_eval(args: EvalArgs) -> Result<()> {
    let cfg = args.model.resolve()?;
    let backend = backend_from(&cfg)?;
    let out = eval::run(
        eval::EvalSpec {
            transcripts: args.transcripts,
            out: args.out,
        },
        &backend,
        &cfg.generation,
    )
    .await?;
    println!("{}", out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => run_chat(args).await,
        #[cfg(feature = "eval")]
        Command::Eval(args) => run_eval(args).await,
    }
}
