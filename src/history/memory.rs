//! In-memory history log

use crate::history::{Commit, HistoryLog};
use crate::stats::{StatsError, StatsResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// A history log held in memory, each commit carrying its full file tree
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryLog {
    commits: Vec<(Commit, BTreeMap<String, Vec<u8>>)>,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit with the given file tree
    pub fn commit<P, C>(&mut self, id: &str, date: NaiveDate, files: impl IntoIterator<Item = (P, C)>)
    where
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let tree = files
            .into_iter()
            .map(|(path, content)| (path.into(), content.into()))
            .collect();
        self.commits.push((Commit::new(id, date), tree));
    }

    /// Builder method: append a commit
    pub fn with_commit<P, C>(
        mut self,
        id: &str,
        date: NaiveDate,
        files: impl IntoIterator<Item = (P, C)>,
    ) -> Self
    where
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        self.commit(id, date, files);
        self
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    fn tree(&self, commit: &str) -> StatsResult<&BTreeMap<String, Vec<u8>>> {
        self.commits
            .iter()
            .find(|(c, _)| c.id == commit)
            .map(|(_, tree)| tree)
            .ok_or_else(|| StatsError::History(format!("unknown commit {}", commit)))
    }
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn commits(&self) -> StatsResult<Vec<Commit>> {
        Ok(self.commits.iter().map(|(c, _)| c.clone()).collect())
    }

    async fn read_file(&self, commit: &str, path: &str) -> StatsResult<Option<Vec<u8>>> {
        Ok(self.tree(commit)?.get(path).cloned())
    }

    async fn list_dir(&self, commit: &str, path: &str) -> StatsResult<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .tree(commit)?
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}
