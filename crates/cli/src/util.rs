use std::{fs::File, io::BufReader};

use anyhow::{Context, Result};
use promoter_core::config::Config;
use typed_path::{Utf8NativePath, Utf8NativePathBuf};

// For argp::FromArgs
pub fn native_path(value: &str) -> Result<Utf8NativePathBuf, String> {
    Ok(Utf8NativePathBuf::from(value))
}

pub fn read_file(path: &Utf8NativePath) -> Result<Vec<u8>> {
    std::fs::read(path.with_platform_encoding())
        .with_context(|| format!("Failed to read {}", path))
}

pub fn read_config(path: &Utf8NativePath) -> Result<Config> {
    let file = File::open(path.with_platform_encoding())
        .with_context(|| format!("Failed to open config file {}", path))?;
    serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse config file {}", path))
}
