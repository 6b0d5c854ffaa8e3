use std::io::Write;
use std::sync::Arc;

use llmbridge::config::{load_config, AppConfig};
use llmbridge::gateway::Gateway;
use llmbridge::observability::init_tracing;
use llmbridge::protocol::canonical::CanonicalRequest;
use llmbridge::provider::{Adapter, ProviderOptions, ProviderRegistry, RequestOptions};
use llmbridge::GatewayError;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "usage: llmbridge [--config PATH] [--channel NAME] [--from PROVIDER] [--stream] REQUEST.json

Sends the request through a configured channel and prints the canonical
response, or one JSON line per canonical event with --stream.
  --config PATH      config file (default: config.yaml)
  --channel NAME     channel to use (default: first configured)
  --from PROVIDER    REQUEST.json is in PROVIDER's wire format instead of canonical JSON
  --stream           stream the response";

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    channel: Option<String>,
    from: Option<String>,
    stream: bool,
    request: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = Some(args.next().ok_or("--config needs a value")?),
            "--channel" => parsed.channel = Some(args.next().ok_or("--channel needs a value")?),
            "--from" => parsed.from = Some(args.next().ok_or("--from needs a value")?),
            "--stream" => parsed.stream = true,
            "-h" | "--help" => return Err(String::new()),
            other if other.starts_with("--") => return Err(format!("unknown flag {other}")),
            other => {
                if parsed.request.replace(other.to_owned()).is_some() {
                    return Err("only one request file may be given".to_owned());
                }
            }
        }
    }
    Ok(parsed)
}

fn main() {
    let args = parse_args(std::env::args().skip(1)).unwrap_or_else(|message| {
        if !message.is_empty() {
            eprintln!("{message}");
        }
        eprintln!("{USAGE}");
        std::process::exit(2);
    });

    let registry = ProviderRegistry::with_builtins();
    let config_path = args.config.as_deref().unwrap_or("config.yaml");
    let config = load_config(config_path, &registry).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.logging.level, config.logging.json);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(async move {
        match run(&config, &registry, args).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{err}");
                for (key, value) in err.context().entries() {
                    eprintln!("  {key}: {value}");
                }
                1
            }
        }
    });
    std::process::exit(code);
}

async fn run(config: &AppConfig, registry: &ProviderRegistry, args: Args) -> Result<(), GatewayError> {
    let gateway = Gateway::from_config(config, registry)?;
    let adapter = match args.channel.as_deref() {
        Some(name) => gateway.adapter(name)?,
        None => gateway
            .default_adapter()
            .ok_or_else(|| GatewayError::adapter_not_found("<default>"))?,
    };

    let path = args
        .request
        .ok_or_else(|| GatewayError::invalid_argument("missing REQUEST.json"))?;
    let body = tokio::fs::read(&path).await.map_err(|err| {
        GatewayError::invalid_argument(format!("failed to read request file: {err}"))
            .with_context("path", path.clone())
    })?;
    let request = match args.from.as_deref() {
        Some(vendor) => registry
            .create(vendor, &ProviderOptions::default())?
            .converter()
            .request_to_contract(&body)?,
        None => serde_json::from_slice::<CanonicalRequest>(&body).map_err(|err| {
            GatewayError::invalid_argument(format!("invalid canonical request: {err}"))
                .with_payload(&body)
        })?,
    };

    if args.stream || request.stream {
        stream(&adapter, &request).await
    } else {
        let response = adapter.complete(&request, &RequestOptions::default()).await?;
        print_json(&response, true)
    }
}

async fn stream(adapter: &Arc<Adapter>, request: &CanonicalRequest) -> Result<(), GatewayError> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling stream");
            on_interrupt.cancel();
        }
    });

    let options = RequestOptions {
        cancel: Some(cancel),
        ..RequestOptions::default()
    };
    let mut events = adapter.stream(request, &options).await?;
    while let Some(event) = events.recv().await {
        print_json(&event, false)?;
    }
    let summary = events.finish().await?;
    tracing::info!(
        events = summary.events,
        chunks = summary.chunks,
        end = ?summary.end,
        "stream finished"
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), GatewayError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|err| GatewayError::internal(format!("failed to encode output: {err}")))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")
        .map_err(|err| GatewayError::internal(format!("failed to write output: {err}")))
}
