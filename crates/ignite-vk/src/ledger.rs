// SPDX-License-Identifier: CEPL-1.0
use tracing::{debug, warn};

type Release<D> = Box<dyn FnOnce(&mut D)>;

/// A stack of release actions for resources acquired so far.
///
/// On failure the pipeline calls [`AcquisitionLedger::unwind`], which releases
/// everything in reverse acquisition order; on success
/// [`AcquisitionLedger::commit`] hands ownership to the caller and forgets the
/// actions.
pub struct AcquisitionLedger<D> {
    entries: Vec<(&'static str, Release<D>)>,
}

impl<D> Default for AcquisitionLedger<D> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<D> AcquisitionLedger<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: &'static str, release: impl FnOnce(&mut D) + 'static) {
        debug!("acquired {label}");
        self.entries.push((label, Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in acquisition order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(label, _)| *label).collect()
    }

    /// Releases everything, most recent first.
    pub fn unwind(mut self, driver: &mut D) {
        while let Some((label, release)) = self.entries.pop() {
            debug!("releasing {label}");
            release(driver);
        }
    }

    pub fn commit(mut self) {
        self.entries.clear();
    }
}

impl<D> Drop for AcquisitionLedger<D> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                "acquisition ledger dropped with {} unreleased entries: {:?}",
                self.entries.len(),
                self.labels()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_is_lifo() {
        let mut ledger = AcquisitionLedger::<Vec<&'static str>>::new();
        ledger.push("instance", |log| log.push("instance"));
        ledger.push("messenger", |log| log.push("messenger"));
        ledger.push("device", |log| log.push("device"));
        assert_eq!(ledger.labels(), vec!["instance", "messenger", "device"]);

        let mut log = Vec::new();
        ledger.unwind(&mut log);
        assert_eq!(log, vec!["device", "messenger", "instance"]);
    }

    #[test]
    fn commit_releases_nothing() {
        let mut ledger = AcquisitionLedger::<Vec<&'static str>>::new();
        ledger.push("instance", |log| log.push("instance"));
        assert_eq!(ledger.len(), 1);
        ledger.commit();
    }
}
