#![allow(dead_code)]
//! A partition stand-in that records every completion it is handed.

use std::sync::Mutex;

use quorumlog::{ClientCookie, CompletionError, DocKey, Partition, SeqNo};

pub type Completion = (DocKey, SeqNo, Option<ClientCookie>);

#[derive(Debug, Default)]
pub struct RecordingPartition {
    persisted: Mutex<SeqNo>,
    commits: Mutex<Vec<Completion>>,
    aborts: Mutex<Vec<Completion>>,
    fail_commits: Mutex<Option<String>>,
}

impl RecordingPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_persisted(&self, seqno: SeqNo) {
        *self.persisted.lock().unwrap() = seqno;
    }

    /// Make every subsequent commit hook call fail with `status`.
    pub fn fail_commits_with(&self, status: &str) {
        *self.fail_commits.lock().unwrap() = Some(status.to_string());
    }

    pub fn commits(&self) -> Vec<Completion> {
        self.commits.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> Vec<Completion> {
        self.aborts.lock().unwrap().clone()
    }

    pub fn committed_seqnos(&self) -> Vec<SeqNo> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .map(|(_, seqno, _)| *seqno)
            .collect()
    }

    pub fn aborted_seqnos(&self) -> Vec<SeqNo> {
        self.aborts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, seqno, _)| *seqno)
            .collect()
    }
}

impl Partition for RecordingPartition {
    fn commit(
        &self,
        key: &DocKey,
        prepare_seqno: SeqNo,
        cookie: Option<ClientCookie>,
    ) -> Result<(), CompletionError> {
        if let Some(status) = self.fail_commits.lock().unwrap().clone() {
            return Err(CompletionError::new(status));
        }
        self.commits
            .lock()
            .unwrap()
            .push((key.clone(), prepare_seqno, cookie));
        Ok(())
    }

    fn abort(
        &self,
        key: &DocKey,
        prepare_seqno: SeqNo,
        cookie: Option<ClientCookie>,
    ) -> Result<(), CompletionError> {
        self.aborts
            .lock()
            .unwrap()
            .push((key.clone(), prepare_seqno, cookie));
        Ok(())
    }

    fn persisted_seqno(&self) -> SeqNo {
        *self.persisted.lock().unwrap()
    }
}
