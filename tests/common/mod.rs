//! Scratch player programs and judges for the integration tests.
#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tempfile::TempDir;

/// Writes an executable shell script into `dir` and returns its path.
pub fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{body}").unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A player that answers `response` (a JSON string literal) and persists
/// its stdin line to `input.txt` in its working directory.
pub fn echo_player(dir: &TempDir, name: &str, response: &str) -> PathBuf {
    script(
        dir,
        name,
        &format!(
            "cat > input.txt\n\
             echo '{{\"response\":\"{response}\",\"debug\":\"\",\"data\":null,\"globaldata\":null}}'"
        ),
    )
}
