use anyhow::{Result, bail};
use argp::FromArgs;
use promoter_github::webhook::{compute_signature, format_signature_header, verify_signature};
use typed_path::Utf8NativePathBuf;

use crate::util::{native_path, read_file};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Print the X-Hub-Signature-256 header for a payload.
#[argp(subcommand, name = "sign")]
pub struct Args {
    #[argp(positional, from_str_fn(native_path))]
    /// payload file
    payload: Utf8NativePathBuf,
    #[argp(option, short = 's')]
    /// webhook secret
    secret: String,
    #[argp(option, short = 'v')]
    /// check this header against the payload instead of printing one
    verify: Option<String>,
}

pub fn run(args: Args) -> Result<()> {
    let payload = read_file(&args.payload)?;
    match &args.verify {
        Some(header) => {
            if !verify_signature(&payload, header, args.secret.as_bytes()) {
                bail!("Signature does not match {}", args.payload);
            }
            println!("Signature OK");
        }
        None => {
            let signature = compute_signature(&payload, args.secret.as_bytes());
            println!("{}", format_signature_header(&signature));
        }
    }
    Ok(())
}
