//! Round history stored inside each generated repository.
//!
//! The history is a small JSON document at [`HISTORY_PATH`] holding one
//! [`RoundRecord`] per completed round, ordered by round number. Keeping it
//! in the repository lets any process serve later rounds.

use serde::{Deserialize, Serialize};

use crate::error::{PagewrightError, Result};
use crate::task::RoundRecord;

/// Directory reserved for service metadata.
pub const HISTORY_DIR: &str = ".pagewright";

/// Location of the round history document.
pub const HISTORY_PATH: &str = ".pagewright/rounds.json";

/// Current document format.
pub const HISTORY_FORMAT_VERSION: u32 = 1;

/// Whether `path` belongs to the reserved metadata directory.
pub fn is_history_path(path: &str) -> bool {
    path == HISTORY_DIR
        || path
            .strip_prefix(HISTORY_DIR)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// The persisted list of completed rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundHistory {
    /// Document format version.
    pub version: u32,
    /// Completed rounds in ascending order.
    #[serde(default)]
    pub rounds: Vec<RoundRecord>,
}

impl Default for RoundHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_FORMAT_VERSION,
            rounds: Vec::new(),
        }
    }
}

impl RoundHistory {
    /// Parses a stored document.
    ///
    /// # Errors
    ///
    /// Returns `RoundHistoryCorrupted` for unparseable JSON or a format
    /// version newer than this build understands.
    pub fn parse(repo: &str, text: &str) -> Result<Self> {
        let mut history: Self = serde_json::from_str(text)
            .map_err(|e| PagewrightError::history_corrupted(repo, e.to_string()))?;
        if history.version > HISTORY_FORMAT_VERSION {
            return Err(PagewrightError::history_corrupted(
                repo,
                format!(
                    "format version {} is newer than supported version {HISTORY_FORMAT_VERSION}",
                    history.version
                ),
            ));
        }
        history.rounds.sort_by_key(|r| r.round);
        Ok(history)
    }

    /// Serializes the document as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Adds a record, replacing any earlier record for the same round.
    pub fn record(&mut self, record: RoundRecord) {
        match self.rounds.binary_search_by_key(&record.round, |r| r.round) {
            Ok(index) => self.rounds[index] = record,
            Err(index) => self.rounds.insert(index, record),
        }
        self.version = HISTORY_FORMAT_VERSION;
    }

    /// Records with `round <= upto_round`, oldest first.
    pub fn upto(&self, upto_round: u32) -> Vec<RoundRecord> {
        self.rounds
            .iter()
            .take_while(|r| r.round <= upto_round)
            .cloned()
            .collect()
    }
}
