//! legacy exit status codes for system programs.
//! reference: [SYSEXITS](https://man.freebsd.org/cgi/man.cgi?query=sysexits&apropos=0&sektion=0&manpath=FreeBSD+11.2-stable&arch=default&format=html)

use crate::error::BackupError;

/// value: 2 <br>
/// Misuse of shell builtins (according to Bash documentation)
pub const EX_KEYWORD: i32 = 2;

/// value: 64 <br>
/// The command was used incorrectly, e.g., with the wrong number of arguments, a bad flag, a bad syntax in a parameter, etc.
pub const EX_USAGE: i32 = 64;

/// value: 66 <br>
/// An input file (not a system file) did not exist or was not readable.
pub const EX_NOINPUT: i32 = 66;

/// value: 69 <br>
/// A service is unavailable.
pub const EX_UNAVAILABLE: i32 = 69;

/// value: 73 <br>
/// A (user specified) output file cannot be created.
pub const EX_CANTCREAT: i32 = 73;

/// value: 74 <br>
/// An error occurred while doing I/O on some file.
pub const EX_IOERR: i32 = 74;

/// value: 78 <br>
/// Something was found in an unconfigured or misconfigured state.
pub const EX_CONFIG: i32 = 78;

/// Exit status reported when a direct run fails with `err`.
pub fn exit_code(err: &BackupError) -> i32 {
    match err {
        BackupError::SourceNotFound(_) | BackupError::TargetNotFound(_) => EX_NOINPUT,
        BackupError::DestinationCreateFailed { .. } => EX_CANTCREAT,
        BackupError::CopyFailed { .. } | BackupError::ArchiveFailed { .. } | BackupError::Io { .. } => {
            EX_IOERR
        }
        BackupError::UploadFailed { .. } => EX_UNAVAILABLE,
        BackupError::InvalidRequest(_) | BackupError::UnknownCloudTarget(_) => EX_USAGE,
        BackupError::Config(_) => EX_CONFIG,
    }
}
