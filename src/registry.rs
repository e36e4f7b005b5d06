//! Session-scoped catalog of protocols and well bindings.
//!
//! The registry owns the session's ordered protocol list, the set of
//! protocols carried over from the persisted store, and the assignment map
//! keyed by protocol index. Indices are dense and follow creation order
//! (0, 1, 2, ...); assignments for an index only ever accumulate.
//!
//! Every mutating operation validates and checks for duplicates *before*
//! dispatching anything to the device, so a rejected call leaves neither
//! registry state nor device state changed.

use log::info;
use std::collections::{BTreeMap, HashSet};

use crate::codec;
use crate::error::{AppResult, PlateError};
use crate::link::LinkHandle;
use crate::protocol::{Protocol, WellAssignment};
use crate::store::LoadResult;

/// One row of [`AssignmentRegistry::list_protocols`] output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEntry {
    /// Dense creation-order index
    pub index: usize,
    /// The protocol definition
    pub protocol: Protocol,
    /// All assignments accumulated for this index, in insertion order
    pub assignments: Vec<WellAssignment>,
    /// Whether any of the assignments came from a previously persisted
    /// store, so a caller can offer to replay them onto the device
    pub previously_assigned: bool,
}

/// In-memory model of protocols-in-session plus well assignments.
pub struct AssignmentRegistry {
    link: LinkHandle,
    session: Vec<Protocol>,
    loaded: Vec<Protocol>,
    assignments: BTreeMap<usize, Vec<WellAssignment>>,
    persisted_indices: HashSet<usize>,
}

impl AssignmentRegistry {
    /// Creates an empty registry dispatching through the given link.
    pub fn new(link: LinkHandle) -> Self {
        Self {
            link,
            session: Vec::new(),
            loaded: Vec::new(),
            assignments: BTreeMap::new(),
            persisted_indices: HashSet::new(),
        }
    }

    /// Registers a new protocol and dispatches its definition frame.
    ///
    /// The name must be unique across the session and every previously
    /// loaded protocol; collisions are rejected before any device write.
    /// Returns the new dense index.
    pub async fn create_protocol(&mut self, mut protocol: Protocol) -> AppResult<usize> {
        // Normalize before the collision check so " P1" and "P1" are the
        // same name in the registry, on the wire and in the store.
        protocol.name = protocol.name.trim().to_string();

        // Validation first, so a malformed protocol has no side effects.
        let frame = codec::encode_create_protocol(&protocol)?;

        let collides = self
            .session
            .iter()
            .chain(self.loaded.iter())
            .any(|p| p.name == protocol.name);
        if collides {
            return Err(PlateError::DuplicateName(protocol.name));
        }

        self.link.send(&frame).await;

        let index = self.session.len();
        info!("Created protocol '{}' at index {}", protocol.name, index);
        self.session.push(protocol);
        self.assignments.entry(index).or_default();
        Ok(index)
    }

    /// Assigns a single well to an existing protocol index.
    ///
    /// Dispatches the assignment frame, then appends to the index's list;
    /// prior assignments are never replaced.
    pub async fn assign_well(&mut self, row: &str, col: &str, index: usize) -> AppResult<()> {
        let row = row.trim().to_ascii_uppercase();
        let col = col.trim().to_string();
        let frame = codec::encode_assign_well(&row, &col, index)?;
        let list = self
            .assignments
            .get_mut(&index)
            .ok_or(PlateError::InvalidIndex(index))?;

        self.link.send(&frame).await;
        list.push(WellAssignment::Single { row, col });
        Ok(())
    }

    /// Assigns a rectangular range of wells to an existing protocol index.
    ///
    /// No ordering between start and end is required; the device owns
    /// range semantics.
    pub async fn assign_range(
        &mut self,
        start_row: &str,
        start_col: &str,
        end_row: &str,
        end_col: &str,
        index: usize,
    ) -> AppResult<()> {
        let start_row = start_row.trim().to_ascii_uppercase();
        let start_col = start_col.trim().to_string();
        let end_row = end_row.trim().to_ascii_uppercase();
        let end_col = end_col.trim().to_string();
        let frame = codec::encode_assign_range(&start_row, &start_col, &end_row, &end_col, index)?;
        let list = self
            .assignments
            .get_mut(&index)
            .ok_or(PlateError::InvalidIndex(index))?;

        self.link.send(&frame).await;
        list.push(WellAssignment::range(&start_row, &start_col, &end_row, &end_col));
        Ok(())
    }

    /// Lists every protocol in creation order with its assignments.
    pub fn list_protocols(&self) -> Vec<ProtocolEntry> {
        self.session
            .iter()
            .enumerate()
            .map(|(index, protocol)| {
                let assignments = self.assignments.get(&index).cloned().unwrap_or_default();
                let previously_assigned =
                    self.persisted_indices.contains(&index) && !assignments.is_empty();
                ProtocolEntry {
                    index,
                    protocol: protocol.clone(),
                    assignments,
                    previously_assigned,
                }
            })
            .collect()
    }

    /// Re-issues the wire command for every stored assignment, in index
    /// order then insertion order, paced by `replay_delay`.
    ///
    /// This re-establishes well bindings on a device that was power-cycled
    /// or reconnected. Registry state is not mutated. Range tokens that do
    /// not parse are skipped with a warning rather than aborting the
    /// replay.
    pub async fn reassign_all(&self, replay_delay: std::time::Duration) -> AppResult<()> {
        for (&index, entries) in &self.assignments {
            for entry in entries {
                let frame = match entry {
                    WellAssignment::Single { row, col } => {
                        codec::encode_assign_well(row, col, index)?
                    }
                    WellAssignment::Range(token) => match entry.split_range() {
                        Some((sr, sc, er, ec)) => {
                            codec::encode_assign_range(&sr, &sc, &er, &ec, index)?
                        }
                        None => {
                            log::warn!("Skipping malformed range token '{}'", token);
                            continue;
                        }
                    },
                };
                self.link.send(&frame).await;
                tokio::time::sleep(replay_delay).await;
            }
        }
        info!("Reassigned all protocols to their stored wells");
        Ok(())
    }

    /// Installs a loaded store into the session verbatim.
    ///
    /// The loaded protocols become the session list (so dense indices keep
    /// matching stored positions) and are also remembered separately for
    /// duplicate-name checks that must survive a later save.
    pub fn adopt(&mut self, loaded: LoadResult) {
        self.session = loaded.protocols.clone();
        self.loaded = loaded.protocols;
        self.assignments = loaded.assignments;
        // Every session protocol needs an assignment slot, present or not.
        for index in 0..self.session.len() {
            self.assignments.entry(index).or_default();
        }
        self.persisted_indices = self
            .assignments
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(&k, _)| k)
            .collect();
    }

    /// Clears the session's protocols and assignments after a successful
    /// save. Previously loaded names stay on record so duplicate checks
    /// keep rejecting them.
    pub fn clear_session(&mut self) {
        for p in &self.session {
            if !self.loaded.iter().any(|l| l.name == p.name) {
                self.loaded.push(p.clone());
            }
        }
        self.session.clear();
        self.assignments.clear();
        self.persisted_indices.clear();
    }

    /// Session protocol list, in creation order.
    pub fn session_protocols(&self) -> &[Protocol] {
        &self.session
    }

    /// Assignment map keyed by dense protocol index.
    pub fn session_assignments(&self) -> &BTreeMap<usize, Vec<WellAssignment>> {
        &self.assignments
    }
}
