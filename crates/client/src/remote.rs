//! Collaborator for stat/copy/touch operations against a peer node,
//! mirroring `original_source/trunk/filesystem.py`'s `RemoteFileSystem`
//! and its `ssh`/`scp`-backed subclass.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Stat, copy and touch operations against a file on another node.
pub trait RemoteFileSystem {
    fn is_host_alive(&self, host: &str) -> bool;
    fn get_file_stat(&self, host: &str, path: &str) -> Option<(u64, u64)>;
    /// `(ok, message)`.
    fn copy_file(&self, host: &str, source: &str, destination: &Path) -> (bool, String);
    fn copy_using_cp(&self, source: &str, destination: &Path) -> (bool, String);
    fn brand_file(&self, host: &str, path: &str);
}

/// Shells out to `ssh`, `scp` and `cp`, the same external-tool approach
/// the original uses rather than an in-process NFS/SFTP client.
pub struct ProcessRemoteFileSystem {
    stat_timeout: Duration,
}

impl ProcessRemoteFileSystem {
    #[must_use]
    pub fn new(stat_timeout: Duration) -> Self {
        Self { stat_timeout }
    }

    fn ssh(&self, host: &str, remote_command: &str) -> Option<String> {
        let output = Command::new("ssh")
            .args(["-x", "-o", "BatchMode=yes", "-o", "ConnectTimeout=5", host, remote_command])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }
}

impl RemoteFileSystem for ProcessRemoteFileSystem {
    fn is_host_alive(&self, host: &str) -> bool {
        Command::new("ping")
            .args(["-c", "1", "-w", "1", host])
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn get_file_stat(&self, host: &str, path: &str) -> Option<(u64, u64)> {
        if !self.is_host_alive(host) {
            return None;
        }
        let _ = self.stat_timeout;
        let stdout = self.ssh(host, &format!("stat --format=\"%s %Y\" {path} 2>/dev/null"))?;
        let mut parts = stdout.split_whitespace();
        let size: u64 = parts.next()?.parse().ok()?;
        let mtime: u64 = parts.next()?.parse().ok()?;
        Some((size, mtime))
    }

    fn copy_file(&self, host: &str, source: &str, destination: &Path) -> (bool, String) {
        let remote = format!("{host}:{source}");
        run(Command::new("scp").args(["-p", "-q", &remote]).arg(destination))
    }

    fn copy_using_cp(&self, source: &str, destination: &Path) -> (bool, String) {
        let (ok, msg) = run(Command::new("cp").args(["--preserve=ownership,timestamps", source]).arg(destination));
        if ok {
            let _ = Command::new("chmod").arg("--reference").arg(source).arg(destination).status();
        }
        (ok, msg)
    }

    fn brand_file(&self, host: &str, path: &str) {
        let _ = self.ssh(host, &format!("touch -a {path} 2>/dev/null"));
    }
}

fn run(cmd: &mut Command) -> (bool, String) {
    match cmd.output() {
        Ok(output) if output.status.success() => (true, String::new()),
        Ok(output) => (false, String::from_utf8_lossy(&output.stderr).into_owned()),
        Err(err) => (false, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_using_cp_reports_success_for_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        std::fs::write(&src, b"hello").unwrap();
        let remote = ProcessRemoteFileSystem::new(Duration::from_secs(1));
        let (ok, msg) = remote.copy_using_cp(src.to_str().unwrap(), &dst);
        assert!(ok, "cp failed: {msg}");
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn copy_using_cp_reports_failure_for_a_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let remote = ProcessRemoteFileSystem::new(Duration::from_secs(1));
        let (ok, _) = remote.copy_using_cp("/nonexistent/source", &dir.path().join("out.bin"));
        assert!(!ok);
    }
}
