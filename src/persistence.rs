//! Persistence: save and load exchange state to a file.
//! Enables recovery after restart: accounts, resting orders per instrument,
//! and id counters are restored. Reservations are not persisted; they are
//! rebuilt from the resting orders on restore.

use crate::engine::EngineSnapshot;
use crate::error::ExchangeError;
use crate::ledger::AccountSnapshot;
use std::path::Path;

/// Full persisted exchange state.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PersistedState {
    pub accounts: Vec<AccountSnapshot>,
    pub engines: Vec<EngineSnapshot>,
    pub next_order_id: u64,
    pub next_sequence: u64,
}

/// File-based persistence: one JSON file. Save after state changes; load on
/// startup.
#[derive(Clone, Debug)]
pub struct FilePersistence {
    path: std::path::PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Save state to file. Overwrites any existing file.
    pub fn save(&self, state: &PersistedState) -> Result<(), String> {
        let json = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, json).map_err(|e| e.to_string())
    }

    /// Load state from file. Returns None if the file does not exist.
    pub fn load(&self) -> Result<Option<PersistedState>, String> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let state: PersistedState = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        Ok(Some(state))
    }
}

/// Sanity check on a loaded snapshot before restoring from it: every resting
/// order must belong to a known account.
pub fn validate_state(state: &PersistedState) -> Result<(), ExchangeError> {
    let members: std::collections::HashSet<_> =
        state.accounts.iter().map(|a| a.member_id).collect();
    for engine in &state.engines {
        for resting in &engine.resting_orders {
            if !members.contains(&resting.member_id) {
                return Err(ExchangeError::UnknownMember(resting.member_id));
            }
        }
    }
    Ok(())
}
