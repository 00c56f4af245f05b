//! Idempotent add/remove of the GSP kernel parameter.
//!
//! Work is split into three separately callable steps: [`read_lines`],
//! [`transform`] (pure, no I/O) and [`write_lines`]. [`modify`] runs all three
//! and skips the write when nothing changed.
//!
//! Callers must not run two modifications of the same file concurrently; the
//! unit of work is read whole file, compute, write whole file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::GSP_PARAM;

pub const GRUB_KEY: &str = "GRUB_CMDLINE_LINUX_DEFAULT";
const OPTIONS_DIRECTIVE: &str = "options";

/// Which lines of a file carry kernel arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLines {
    /// Single-line cmdline file: every non-blank line is arguments.
    WholeFile,
    /// systemd-boot entry: lines whose directive is `options`.
    OptionsDirective,
    /// `/etc/default/grub`: the quoted `GRUB_CMDLINE_LINUX_DEFAULT` value.
    GrubCmdlineDefault,
}

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not find GRUB_CMDLINE_LINUX_DEFAULT to edit")]
    MissingTargetLine,
    #[error("cannot parse kernel argument line: {0}")]
    UnparseableLine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Changed,
    Unchanged,
}

// --- Phase 1: read ---

/// Reads a file as lines, each keeping its original line ending.
pub fn read_lines(path: &Path) -> Result<Vec<String>, ToggleError> {
    let content = fs::read_to_string(path).map_err(|source| ToggleError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.split_inclusive('\n').map(String::from).collect())
}

// --- Phase 2: transform ---

fn split_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn is_target(body: &str, target: TargetLines) -> bool {
    match target {
        TargetLines::WholeFile => !body.trim().is_empty(),
        TargetLines::OptionsDirective => body.split_whitespace().next() == Some(OPTIONS_DIRECTIVE),
        TargetLines::GrubCmdlineDefault => body
            .trim_start()
            .strip_prefix(GRUB_KEY)
            .is_some_and(|rest| rest.starts_with('=') || rest.starts_with(char::is_whitespace)),
    }
}

fn has_token(args: &str) -> bool {
    args.split_whitespace().any(|t| t == GSP_PARAM)
}

/// Splits `KEY="content"suffix` at the first `="` and the last `"`.
fn split_grub(body: &str) -> Option<(&str, &str, &str)> {
    let (key, rest) = body.split_once("=\"")?;
    let (content, suffix) = rest.rsplit_once('"')?;
    Some((key, content, suffix))
}

/// Space-token model. Adding appends one token, removing rejoins with single spaces.
fn toggle_token_line(body: &str, disable: bool) -> Option<String> {
    let present = has_token(body);
    match (disable, present) {
        (true, false) => {
            let kept = body.trim_end();
            Some(if kept.is_empty() { GSP_PARAM.to_string() } else { format!("{kept} {GSP_PARAM}") })
        }
        (false, true) => Some(
            body.split_whitespace()
                .filter(|t| *t != GSP_PARAM)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}

fn toggle_grub_line(body: &str, disable: bool) -> Result<Option<String>, ToggleError> {
    let Some((key, content, suffix)) = split_grub(body) else {
        if disable || body.contains(GSP_PARAM) {
            return Err(ToggleError::UnparseableLine(body.to_string()));
        }
        return Ok(None);
    };

    let mut args: Vec<&str> = content.split_whitespace().collect();
    match (disable, args.contains(&GSP_PARAM)) {
        (true, false) => args.push(GSP_PARAM),
        (false, true) => args.retain(|a| *a != GSP_PARAM),
        _ => return Ok(None),
    }
    Ok(Some(format!("{key}=\"{}\"{suffix}", args.join(" "))))
}

/// Computes the new file content. Lines that are not targets come back untouched.
pub fn transform(lines: &[String], disable: bool, target: TargetLines) -> Result<Vec<String>, ToggleError> {
    let mut out = Vec::with_capacity(lines.len() + 1);
    let mut saw_target = false;

    for line in lines {
        let (body, ending) = split_ending(line);
        if !is_target(body, target) {
            out.push(line.clone());
            continue;
        }
        saw_target = true;

        let replaced = match target {
            TargetLines::GrubCmdlineDefault => toggle_grub_line(body, disable)?,
            TargetLines::WholeFile | TargetLines::OptionsDirective => toggle_token_line(body, disable),
        };
        match replaced {
            Some(new_body) => out.push(format!("{new_body}{ending}")),
            None => out.push(line.clone()),
        }
    }

    if disable && !saw_target {
        match target {
            TargetLines::GrubCmdlineDefault => return Err(ToggleError::MissingTargetLine),
            TargetLines::WholeFile => out.push(format!("{GSP_PARAM}\n")),
            TargetLines::OptionsDirective => {
                tracing::warn!("entry has no options line; leaving it unchanged");
            }
        }
    }
    Ok(out)
}

/// Read-side mirror of [`transform`]'s target selection.
pub fn contains_param(lines: &[String], target: TargetLines) -> bool {
    lines.iter().any(|line| {
        let (body, _) = split_ending(line);
        if !is_target(body, target) {
            return false;
        }
        match target {
            TargetLines::GrubCmdlineDefault => match split_grub(body) {
                Some((_, content, _)) => has_token(content),
                None => body.contains(GSP_PARAM),
            },
            TargetLines::WholeFile | TargetLines::OptionsDirective => has_token(body),
        }
    })
}

// --- Phase 3: write ---

pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), ToggleError> {
    fs::write(path, lines.concat()).map_err(|source| ToggleError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Read, transform, and write back `path` if anything changed.
pub fn modify(path: &Path, disable: bool, target: TargetLines) -> Result<Outcome, ToggleError> {
    let lines = read_lines(path)?;
    let updated = transform(&lines, disable, target)?;
    if updated == lines {
        tracing::debug!(path = %path.display(), "already in requested state");
        return Ok(Outcome::Unchanged);
    }
    write_lines(path, &updated)?;
    tracing::info!(path = %path.display(), disable, "kernel parameter updated");
    Ok(Outcome::Changed)
}

pub fn is_present_in(path: &Path, target: TargetLines) -> Result<bool, ToggleError> {
    Ok(contains_param(&read_lines(path)?, target))
}
