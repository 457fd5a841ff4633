use crate::{
    config::Settings,
    error::{ErrorKind, Fatal, ModError, RunContext},
    factorio::{self, EXE_FILE_NAME, PLAYER_DATA_FILE_NAME},
};
use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

/// Interactive first-run setup. Re-prompts until each path is valid.
pub fn run_setup<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    ctx: &mut RunContext,
) -> Result<Settings, Fatal> {
    let _ = writeln!(output, "Factorio Mod Tool - Setup Tool\n");

    let exe_prompt = format!(
        "Please, specify Factorio executable path (path to {EXE_FILE_NAME}, ends with Factorio/bin/x64/{EXE_FILE_NAME})"
    );
    let exe_path = prompt_path(
        input,
        output,
        ctx,
        &exe_prompt,
        EXE_FILE_NAME,
        factorio::looks_like_executable,
    )?;

    let mut rw_prompt =
        format!("Please, specify Factorio read write path (path to {PLAYER_DATA_FILE_NAME})");
    if let Some(dir) = factorio::default_read_write_dir() {
        rw_prompt.push_str(&format!(
            "\nDetected: {}",
            dir.join(PLAYER_DATA_FILE_NAME).display()
        ));
    }
    let read_write_path = prompt_path(
        input,
        output,
        ctx,
        &rw_prompt,
        PLAYER_DATA_FILE_NAME,
        factorio::looks_like_player_data,
    )?;

    Ok(Settings::new(exe_path, read_write_path))
}

fn prompt_path<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    ctx: &mut RunContext,
    prompt: &str,
    expected: &str,
    is_valid: fn(&Path) -> bool,
) -> Result<PathBuf, Fatal> {
    loop {
        let _ = writeln!(output, "{prompt}");
        let _ = output.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => {
                return Err(ctx.fatal(
                    ModError::new(ErrorKind::MissingRequiredPath, expected)
                        .with_detail("setup input ended"),
                ))
            }
            Ok(_) => {}
            Err(err) => {
                return Err(
                    ctx.fatal(ModError::new(ErrorKind::MissingRequiredPath, expected).with_detail(err))
                )
            }
        }

        match validate_path(line.trim(), expected, is_valid) {
            Ok(path) => return Ok(path),
            Err(err) => ctx.report(err)?,
        }
    }
}

pub fn validate_path(
    raw: &str,
    expected: &str,
    is_valid: fn(&Path) -> bool,
) -> Result<PathBuf, ModError> {
    let path = PathBuf::from(raw);
    if raw.is_empty() || !is_valid(&path) {
        return Err(ModError::new(ErrorKind::InvalidPath, raw)
            .with_detail(format!("expected an existing {expected}")));
    }
    Ok(path)
}
