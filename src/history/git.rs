//! Git-backed history log
//!
//! Shells out to `git` with `-C <repo>`; the repository is never modified.

use crate::history::{Commit, HistoryLog};
use crate::stats::{StatsError, StatsResult};
use async_trait::async_trait;
use chrono::DateTime;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// History of a git repository holding committed output
#[derive(Debug, Clone)]
pub struct GitHistoryLog {
    repo: PathBuf,
}

impl GitHistoryLog {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Run git and return stdout, failing on a non-zero exit
    async fn git(&self, args: &[&str]) -> StatsResult<Vec<u8>> {
        let output = self.git_raw(args).await?;
        if !output.status.success() {
            return Err(StatsError::History(format!(
                "git {} failed in {:?}: {}",
                args.join(" "),
                self.repo,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn git_raw(&self, args: &[&str]) -> StatsResult<std::process::Output> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .await
            .map_err(|e| StatsError::History(format!("Failed to spawn git: {}", e)))
    }
}

#[async_trait]
impl HistoryLog for GitHistoryLog {
    async fn commits(&self) -> StatsResult<Vec<Commit>> {
        let head = self
            .git_raw(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?;
        if !head.status.success() {
            // Unborn branch of a fresh repository; anything else is an error
            self.git(&["rev-parse", "--git-dir"]).await?;
            return Ok(Vec::new());
        }

        let stdout = self
            .git(&["log", "--first-parent", "--reverse", "--format=%H %cI"])
            .await?;
        parse_log(&String::from_utf8_lossy(&stdout))
    }

    async fn read_file(&self, commit: &str, path: &str) -> StatsResult<Option<Vec<u8>>> {
        let object = format!("{}:{}", commit, path);

        // cat-file -e exits non-zero when the object is missing
        let exists = self.git_raw(&["cat-file", "-e", &object]).await?;
        if !exists.status.success() {
            return Ok(None);
        }

        self.git(&["show", &object]).await.map(Some)
    }

    async fn list_dir(&self, commit: &str, path: &str) -> StatsResult<Vec<String>> {
        let tree = format!("{}:{}", commit, path.trim_end_matches('/'));
        let exists = self.git_raw(&["cat-file", "-e", &tree]).await?;
        if !exists.status.success() {
            return Ok(Vec::new());
        }

        let stdout = self.git(&["ls-tree", "--name-only", &tree]).await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Parse `git log --format="%H %cI"` output
fn parse_log(stdout: &str) -> StatsResult<Vec<Commit>> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (id, timestamp) = line
                .split_once(' ')
                .ok_or_else(|| StatsError::History(format!("Unexpected git log line: {:?}", line)))?;
            let timestamp = DateTime::parse_from_rfc3339(timestamp.trim()).map_err(|e| {
                StatsError::History(format!("Bad commit date {:?}: {}", timestamp, e))
            })?;
            Ok(Commit::new(id, timestamp.date_naive()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_log() {
        let commits = parse_log(
            "aaa111 2024-01-01T09:00:00+00:00\n\
             bbb222 2024-01-01T23:30:00-05:00\n\
             \n",
        )
        .unwrap();

        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].id, "aaa111");
        assert_eq!(commits[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        // The committer's own calendar date, not UTC
        assert_eq!(commits[1].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_parse_log_rejects_garbage() {
        assert!(parse_log("not-a-log-line").is_err());
        assert!(parse_log("abc 2024-13-45").is_err());
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(repo: &Path, args: &[&str], date: Option<&str>) {
        let mut command = std::process::Command::new("git");
        command.arg("-C").arg(repo).args(args);
        if let Some(date) = date {
            command
                .env("GIT_AUTHOR_DATE", date)
                .env("GIT_COMMITTER_DATE", date);
        }
        let output = command.output().unwrap();
        assert!(
            output.status.success(),
            "git {:?}: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo(repo: &Path) {
        git(repo, &["init", "-q"], None);
        git(repo, &["config", "user.name", "Stats Bot"], None);
        git(repo, &["config", "user.email", "stats@example.org"], None);
        git(repo, &["config", "commit.gpgsign", "false"], None);
    }

    fn commit_file(repo: &Path, path: &str, content: &str, date: &str) {
        let file = repo.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, content).unwrap();
        git(repo, &["add", "-A"], None);
        git(repo, &["commit", "-q", "-m", path], Some(date));
    }

    #[tokio::test]
    async fn test_reads_committed_tree() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        init_repo(repo);
        commit_file(repo, "aggregated/global.json", "{\"activities\": 1}\n", "2024-03-01T10:00:00+00:00");
        commit_file(repo, "aggregated-publisher/a.json", "{}\n", "2024-03-02T10:00:00+00:00");
        commit_file(repo, "aggregated/global.json", "{\"activities\": 2}\n", "2024-03-02T18:00:00+00:00");

        let log = GitHistoryLog::new(repo);
        let commits = log.commits().await.unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(commits[2].date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());

        let first = log
            .read_file(&commits[0].id, "aggregated/global.json")
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some(&b"{\"activities\": 1}\n"[..]));
        let last = log
            .read_file(&commits[2].id, "aggregated/global.json")
            .await
            .unwrap();
        assert_eq!(last.as_deref(), Some(&b"{\"activities\": 2}\n"[..]));
        assert!(log
            .read_file(&commits[0].id, "aggregated-publisher/a.json")
            .await
            .unwrap()
            .is_none());

        assert!(log
            .list_dir(&commits[0].id, "aggregated-publisher")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            log.list_dir(&commits[1].id, "aggregated-publisher/")
                .await
                .unwrap(),
            vec!["a.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_repository_has_no_commits() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let log = GitHistoryLog::new(dir.path());
        assert!(log.commits().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_repository_is_history_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = GitHistoryLog::new(dir.path().join("nope"));
        match log.commits().await {
            Err(StatsError::History(_)) => {}
            other => panic!("expected history error, got {:?}", other),
        }
    }
}
