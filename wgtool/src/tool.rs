use crate::{Configuration, InterfaceName};
use std::{
    io::{self, Write},
    process::{Command, Stdio},
};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors from driving the external `wg` binary.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("the wireguard (wg) command is not available in your PATH")]
    Unavailable,

    #[error("wg {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn wg(stdin: Option<&[u8]>, args: &[&str]) -> Result<Vec<u8>, ToolError> {
    let mut command = Command::new("wg");
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ToolError::Unavailable,
        _ => ToolError::Io(e),
    })?;

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(input)?;
        }
    }

    let output = child.wait_with_output()?;
    log::debug!("wg {}: exit {:?}", args.join(" "), output.status.code());

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(ToolError::Failed {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Generate a new private key, equivalent to `wg genkey`.
///
/// The returned bytes are the tool's raw output, trailing newline included.
pub fn generate_private_key() -> Result<Vec<u8>, ToolError> {
    wg(None, &["genkey"])
}

/// Derive the public key for `private_key`, equivalent to `wg pubkey`.
pub fn derive_public_key(private_key: &[u8]) -> Result<Vec<u8>, ToolError> {
    wg(Some(private_key), &["pubkey"])
}

/// Render `config` and install it on `iface` via `wg setconf`.
///
/// The rendered text goes through a scratch file created with owner-only
/// permissions and removed on every exit path.
pub fn set_config(iface: &InterfaceName, config: &Configuration) -> Result<(), ToolError> {
    let mut scratch = NamedTempFile::new()?;
    scratch.write_all(config.render().as_bytes())?;
    scratch.flush()?;

    let name = iface.to_string();
    let path = scratch.path().to_string_lossy().into_owned();
    wg(None, &["setconf", name.as_str(), path.as_str()])?;

    Ok(())
}
