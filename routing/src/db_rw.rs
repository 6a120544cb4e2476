// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Left-right integration for [`OperDb`]. A single writer applies changes;
//! flow partitions read consistent snapshots without locking.

use crate::db::{OperDb, OperDbChange};
use crate::errors::OperError;
use left_right::{Absorb, ReadGuard, ReadHandle, ReadHandleFactory, WriteHandle, new_from_empty};

#[allow(unused)]
use tracing::{debug, error};

impl Absorb<OperDbChange> for OperDb {
    fn absorb_first(&mut self, change: &mut OperDbChange, _: &Self) {
        // the writer validated the change against its own copy
        if let Err(e) = self.apply(change.clone()) {
            error!("Failed to absorb oper db change: {e}");
        }
    }
    fn drop_first(self: Box<Self>) {}
    fn sync_with(&mut self, first: &Self) {
        *self = first.clone();
    }
}

#[derive(Debug)]
pub struct OperDbReader(ReadHandle<OperDb>);

impl OperDbReader {
    /// Enter the current snapshot. `None` once the writer is gone.
    #[must_use]
    pub fn enter(&self) -> Option<ReadGuard<'_, OperDb>> {
        self.0.enter()
    }

    #[must_use]
    pub fn factory(&self) -> OperDbReaderFactory {
        OperDbReaderFactory(self.0.factory())
    }
}

#[derive(Debug, Clone)]
pub struct OperDbReaderFactory(ReadHandleFactory<OperDb>);

impl OperDbReaderFactory {
    #[must_use]
    pub fn handle(&self) -> OperDbReader {
        OperDbReader(self.0.handle())
    }
}

pub struct OperDbWriter {
    handle: WriteHandle<OperDb, OperDbChange>,
    shadow: OperDb,
}

impl OperDbWriter {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> OperDbWriter {
        let (w, _r) = new_from_empty::<OperDb, OperDbChange>(OperDb::new());
        OperDbWriter {
            handle: w,
            shadow: OperDb::new(),
        }
    }

    #[must_use]
    pub fn get_reader(&self) -> OperDbReader {
        OperDbReader(self.handle.clone())
    }

    #[must_use]
    pub fn get_reader_factory(&self) -> OperDbReaderFactory {
        self.get_reader().factory()
    }

    /// Apply and publish a batch of changes. The batch is validated first and
    /// nothing is published if any change fails.
    pub fn apply(&mut self, changes: Vec<OperDbChange>) -> Result<(), OperError> {
        let mut candidate = self.shadow.clone();
        for change in &changes {
            candidate.apply(change.clone())?;
        }
        self.shadow = candidate;
        for change in changes {
            self.handle.append(change);
        }
        self.handle.publish();
        debug!("Published oper db generation {}", self.shadow.generation());
        Ok(())
    }

    pub fn apply_one(&mut self, change: OperDbChange) -> Result<(), OperError> {
        self.apply(vec![change])
    }
}
