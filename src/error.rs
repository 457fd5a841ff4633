//! Error taxonomy and the run-scoped error policy.
//!
//! Every per-item failure is a [`ModError`]. Whether it skips the item or ends the run is
//! decided by the [`RunContext`] the caller threads through each operation.

use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidOption,
    MissingArgument,
    UnknownMod,
    MissingCredentials,
    RegistryLookupFailed,
    CorruptArchive,
    MissingPersistedState,
    MissingRequiredPath,
    LocalModExists,
    DownloadFailed,
    RemoveFailed,
    MissingSettings,
    InvalidPath,
    WriteFailed,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 14] = [
        ErrorKind::InvalidOption,
        ErrorKind::MissingArgument,
        ErrorKind::UnknownMod,
        ErrorKind::MissingCredentials,
        ErrorKind::RegistryLookupFailed,
        ErrorKind::CorruptArchive,
        ErrorKind::MissingPersistedState,
        ErrorKind::MissingRequiredPath,
        ErrorKind::LocalModExists,
        ErrorKind::DownloadFailed,
        ErrorKind::RemoveFailed,
        ErrorKind::MissingSettings,
        ErrorKind::InvalidPath,
        ErrorKind::WriteFailed,
    ];

    /// Stable numeric code, also used as the process exit status of a fatal run.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidOption => 1,
            ErrorKind::MissingArgument => 2,
            ErrorKind::UnknownMod => 3,
            ErrorKind::MissingCredentials => 4,
            ErrorKind::RegistryLookupFailed => 5,
            ErrorKind::CorruptArchive => 6,
            ErrorKind::MissingPersistedState => 7,
            ErrorKind::MissingRequiredPath => 8,
            ErrorKind::LocalModExists => 9,
            ErrorKind::DownloadFailed => 10,
            ErrorKind::RemoveFailed => 11,
            ErrorKind::MissingSettings => 12,
            ErrorKind::InvalidPath => 13,
            ErrorKind::WriteFailed => 14,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Kinds that describe a broken precondition and can never be skipped.
    pub fn always_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::MissingPersistedState
                | ErrorKind::MissingRequiredPath
                | ErrorKind::MissingSettings
                | ErrorKind::WriteFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidOption => "InvalidOption",
            ErrorKind::MissingArgument => "MissingArgument",
            ErrorKind::UnknownMod => "UnknownMod",
            ErrorKind::MissingCredentials => "MissingCredentials",
            ErrorKind::RegistryLookupFailed => "RegistryLookupFailed",
            ErrorKind::CorruptArchive => "CorruptArchive",
            ErrorKind::MissingPersistedState => "MissingPersistedState",
            ErrorKind::MissingRequiredPath => "MissingRequiredPath",
            ErrorKind::LocalModExists => "LocalModExists",
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::RemoveFailed => "RemoveFailed",
            ErrorKind::MissingSettings => "MissingSettings",
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::WriteFailed => "WriteFailed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure attached to one requested item (a mod name, an archive, an option).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe(.kind, .subject, .detail))]
pub struct ModError {
    pub kind: ErrorKind,
    pub subject: String,
    pub detail: Option<String>,
}

impl ModError {
    pub fn new(kind: ErrorKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl std::fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

fn describe(kind: &ErrorKind, subject: &str, detail: &Option<String>) -> String {
    let message = match *kind {
        ErrorKind::InvalidOption => format!("There is no such option as {subject}."),
        ErrorKind::MissingArgument => {
            format!("Argument expected for option {subject}, got none at the end of option list.")
        }
        ErrorKind::UnknownMod => format!("There is no such mod as {subject}."),
        ErrorKind::MissingCredentials => "Service username and token are absent. \
             Open Factorio and log in to your Factorio account."
            .to_string(),
        ErrorKind::RegistryLookupFailed => {
            format!("Mod portal lookup failed for {subject}.")
        }
        ErrorKind::CorruptArchive => format!("Bad/corrupted mod {subject} detected."),
        ErrorKind::MissingPersistedState => {
            format!("Required file {subject} is missing. Cannot fetch mods.")
        }
        ErrorKind::MissingRequiredPath => format!(
            "Required path {subject} is not specified. Please, launch setup tool: factoriomodtool --setup"
        ),
        ErrorKind::LocalModExists => format!(
            "Download request was called for mod {subject}, but it was already fetched."
        ),
        ErrorKind::DownloadFailed => format!("Download of {subject} failed."),
        ErrorKind::RemoveFailed => format!("Could not remove mod {subject}."),
        ErrorKind::MissingSettings => {
            "Settings file is missing. Please, launch setup tool: factoriomodtool --setup"
                .to_string()
        }
        ErrorKind::InvalidPath => format!("Specified path {subject} is not valid."),
        ErrorKind::WriteFailed => format!("Could not write {subject}."),
    };
    match detail {
        Some(detail) => format!("{message} ({detail})"),
        None => message,
    }
}

/// Run termination requested by a fatal error. Carries the exit status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal error {code}: {error}")]
pub struct Fatal {
    pub code: i32,
    pub error: ModError,
}

impl From<ModError> for Fatal {
    fn from(error: ModError) -> Self {
        Self {
            code: error.kind.code(),
            error,
        }
    }
}

/// Error policy and counters for a single invocation.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub ignored: HashSet<ErrorKind>,
    pub ignored_occurrences: HashSet<(ErrorKind, String)>,
    pub strict: HashSet<ErrorKind>,
    pub crybaby: bool,
    pub errors_recorded: usize,
    pub recorded: Vec<ModError>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore(&mut self, kind: ErrorKind) {
        self.ignored.insert(kind);
    }

    pub fn ignore_occurrence(&mut self, kind: ErrorKind, subject: impl Into<String>) {
        self.ignored_occurrences.insert((kind, subject.into()));
    }

    pub fn make_fatal(&mut self, kind: ErrorKind) {
        self.strict.insert(kind);
    }

    pub fn is_fatal(&self, kind: ErrorKind) -> bool {
        self.crybaby || kind.always_fatal() || self.strict.contains(&kind)
    }

    pub fn is_suppressed(&self, error: &ModError) -> bool {
        self.ignored.contains(&error.kind)
            || self
                .ignored_occurrences
                .contains(&(error.kind, error.subject.clone()))
    }

    /// Records an item failure. The caller skips the item on `Ok` and aborts on `Err`.
    ///
    /// Suppression hides the report but never a fatal outcome.
    pub fn report(&mut self, err: ModError) -> Result<(), Fatal> {
        let fatal = self.is_fatal(err.kind);
        if !self.is_suppressed(&err) {
            self.errors_recorded += 1;
            error!(code = err.kind.code(), kind = %err.kind, "{err}");
            if !fatal {
                warn!("Skipping.");
            }
            self.recorded.push(err.clone());
        }
        if fatal {
            error!(
                "Fatal error {}. Exiting. {} errors recorded.",
                err.kind.code(),
                self.errors_recorded
            );
            return Err(Fatal::from(err));
        }
        Ok(())
    }

    /// Reports an error that must end the run regardless of policy.
    pub fn fatal(&mut self, err: ModError) -> Fatal {
        match self.report(err.clone()) {
            Err(fatal) => fatal,
            Ok(()) => Fatal::from(err),
        }
    }
}
