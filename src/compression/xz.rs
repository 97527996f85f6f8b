// src/compression/xz.rs

//! xz codecs: the host `xz` binary and an in-process xz2 stream

use super::{compressed_path, decompressed_path, Codec, CompressionSettings};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use xz2::read::XzDecoder;
use xz2::stream::{Check, MtStreamBuilder};
use xz2::write::XzEncoder;

/// Runs the host `xz`/`unxz` tools as blocking subprocesses
///
/// There is no timeout: a hung `xz` blocks the caller.
#[derive(Debug, Clone, Default)]
pub struct XzCommand {
    settings: CompressionSettings,
}

impl XzCommand {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        debug!("Running {} {}", program, args.join(" "));

        let status = Command::new(program).args(args).status()?;
        if !status.success() {
            return Err(Error::Io(io::Error::other(format!(
                "{} exited with {}",
                program, status
            ))));
        }
        Ok(())
    }
}

impl Codec for XzCommand {
    fn compress(&self, input: &Path, keep_original: bool) -> Result<PathBuf> {
        let mut args = vec![
            format!("-{}", self.settings.level),
            "-T".to_string(),
            self.settings.threads.to_string(),
            input.to_string_lossy().into_owned(),
        ];
        if keep_original {
            args.push("-k".to_string());
        }
        self.run("xz", &args)?;
        Ok(compressed_path(input))
    }

    fn decompress(&self, input: &Path, keep_original: bool) -> Result<PathBuf> {
        let output = decompressed_path(input)?;
        let mut args = vec![
            "-T".to_string(),
            self.settings.threads.to_string(),
            input.to_string_lossy().into_owned(),
        ];
        if keep_original {
            args.push("-k".to_string());
        }
        self.run("unxz", &args)?;
        Ok(output)
    }
}

/// In-process xz codec built on liblzma via xz2
#[derive(Debug, Clone, Default)]
pub struct XzStream {
    settings: CompressionSettings,
}

impl XzStream {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    fn encode(&self, input: &Path, output: &Path) -> Result<()> {
        let stream = MtStreamBuilder::new()
            .threads(self.settings.threads.max(1))
            .preset(self.settings.level)
            .check(Check::Crc64)
            .encoder()
            .map_err(|e| Error::Io(io::Error::other(e)))?;

        let mut reader = BufReader::new(File::open(input)?);
        let mut encoder = XzEncoder::new_stream(BufWriter::new(File::create(output)?), stream);
        io::copy(&mut reader, &mut encoder)?;

        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn decode(&self, input: &Path, output: &Path) -> Result<()> {
        let mut decoder = XzDecoder::new_multi_decoder(BufReader::new(File::open(input)?));
        let mut writer = BufWriter::new(File::create(output)?);
        io::copy(&mut decoder, &mut writer)?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Mirror the CLI tools: never leave a half-written output behind
fn finish(result: Result<()>, input: &Path, output: PathBuf, keep_original: bool) -> Result<PathBuf> {
    if let Err(e) = result {
        let _ = fs::remove_file(&output);
        return Err(e);
    }
    if !keep_original {
        fs::remove_file(input)?;
    }
    Ok(output)
}

impl Codec for XzStream {
    fn compress(&self, input: &Path, keep_original: bool) -> Result<PathBuf> {
        let output = compressed_path(input);
        debug!("Compressing {} -> {}", input.display(), output.display());
        let result = self.encode(input, &output);
        finish(result, input, output, keep_original)
    }

    fn decompress(&self, input: &Path, keep_original: bool) -> Result<PathBuf> {
        let output = decompressed_path(input)?;
        debug!("Decompressing {} -> {}", input.display(), output.display());
        let result = self.decode(input, &output);
        finish(result, input, output, keep_original)
    }
}
