use std::process::ExitCode;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use chatstream::config::{load_config, StreamConfig};
use chatstream::observability::init_tracing;
use chatstream::protocol::mapping::{NormalizerTables, Vendor};
use chatstream::protocol::request::RequestContext;
use chatstream::protocol::stream_decoder;
use chatstream::stream::decode_byte_stream;

// Odd on purpose so lines and multi-byte characters straddle chunks.
const REPLAY_CHUNK_BYTES: usize = 61;

const USAGE: &str = "usage: chatstream-replay <openai|anthropic|gemini> <body-file> [config.yaml] \
[--usage] [--tools] [--strict-schema <name>] [--strict-tool <name>]";

#[derive(Debug)]
struct ReplayArgs {
    vendor: Vendor,
    body_path: String,
    config_path: Option<String>,
    ctx: RequestContext,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<ReplayArgs, String> {
    let mut positional = Vec::with_capacity(3);
    let mut ctx = RequestContext::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--usage" => ctx = ctx.with_usage(true),
            "--tools" => ctx = ctx.with_tools(true),
            "--strict-schema" => {
                let name = args.next().ok_or("--strict-schema needs a function name")?;
                ctx = ctx.with_strict_schema(name);
            }
            "--strict-tool" => {
                let name = args.next().ok_or("--strict-tool needs a function name")?;
                ctx = ctx.with_strict_tool(name);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let vendor_arg = positional.next().ok_or("missing vendor")?;
    let vendor = Vendor::parse(&vendor_arg).ok_or_else(|| format!("unknown vendor '{vendor_arg}'"))?;
    let body_path = positional.next().ok_or("missing body file")?;
    let config_path = positional.next();
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }
    Ok(ReplayArgs {
        vendor,
        body_path,
        config_path,
        ctx,
    })
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = match &args.config_path {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }),
        None => StreamConfig::default(),
    };
    init_tracing(&config.log_level);

    let body = match std::fs::read(&args.body_path) {
        Ok(body) => body,
        Err(e) => {
            eprintln!("Failed to read {}: {e}", args.body_path);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(replay(args, &config, Bytes::from(body)))
}

async fn replay(args: ReplayArgs, config: &StreamConfig, body: Bytes) -> ExitCode {
    let tables = Arc::new(NormalizerTables::from_config(config));
    let decoder = stream_decoder(args.vendor, args.ctx, tables, &config.limits);

    let chunks: Vec<Result<Bytes, std::io::Error>> = (0..body.len())
        .step_by(REPLAY_CHUNK_BYTES)
        .map(|start| Ok(body.slice(start..(start + REPLAY_CHUNK_BYTES).min(body.len()))))
        .collect();
    let results = decode_byte_stream(
        decoder,
        futures_util::stream::iter(chunks),
        CancellationToken::new(),
    );
    let mut results = Box::pin(results);

    while let Some(item) = results.next().await {
        match item {
            Ok(result) => match serde_json::to_string(&result) {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    eprintln!("Failed to serialize result: {e}");
                    return ExitCode::FAILURE;
                }
            },
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
