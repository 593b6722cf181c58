use std::{collections::HashMap, time::SystemTime};

use anyhow::{Context, Result, bail};
use argp::FromArgs;
use bytes::Bytes;
use promoter_engine::Processor;
use promoter_github::webhook::{
    CONTENT_TYPE_HEADER, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, compute_signature,
    format_signature_header,
};
use typed_path::Utf8NativePathBuf;

use crate::util::{native_path, read_config, read_file};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Run a saved payload through the promotion pipeline using the configured credentials.
#[argp(subcommand, name = "replay")]
pub struct Args {
    #[argp(positional, from_str_fn(native_path))]
    /// payload file, e.g. one written by the archiver
    payload: Utf8NativePathBuf,
    #[argp(option, short = 'e')]
    /// event type (X-GitHub-Event)
    event: String,
    #[argp(option, short = 'd')]
    /// delivery id (default: replay-<unix time>)
    delivery: Option<String>,
    #[argp(option, short = 'c', from_str_fn(native_path))]
    /// config file (default: config.yml)
    config: Option<Utf8NativePathBuf>,
}

pub async fn run(args: Args) -> Result<()> {
    let config_path = args.config.unwrap_or_else(|| Utf8NativePathBuf::from("config.yml"));
    let config = read_config(&config_path)?;
    let payload = read_file(&args.payload)?;
    let processor = Processor::from_config(&config)?;
    let secrets = processor.credentials().refresh().await?;
    let secret = secrets.webhook_secret().context("Credentials have no webhook_secret")?;

    let delivery = match args.delivery {
        Some(delivery) => delivery,
        None => {
            let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
            format!("replay-{}", now.as_secs())
        }
    };
    let signature = format_signature_header(&compute_signature(&payload, secret.as_bytes()));
    let headers = HashMap::from([
        (EVENT_HEADER.to_string(), args.event),
        (DELIVERY_HEADER.to_string(), delivery),
        (SIGNATURE_HEADER.to_string(), signature),
        (CONTENT_TYPE_HEADER.to_string(), "application/json".to_string()),
    ]);

    let bus = match processor.process(Bytes::from(payload), &headers).await {
        Ok(bus) => bus,
        Err(e) => bail!("Rejected with {}: {e}", e.status_code()),
    };
    let response = bus.response();
    println!("{} ({})", response.status_code, bus.status);
    if !response.body.is_empty() {
        println!("{}", response.body);
    }
    if let Some(pull_request) = bus.context.pull_request() {
        println!(
            "{}",
            serde_json::to_string_pretty(pull_request).context("Failed to serialize pull request")?
        );
    }
    Ok(())
}
