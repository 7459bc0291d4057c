#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicI64, Ordering};

/// Parent id recorded on the successor edge of a version that has no parent.
pub const ROOT_VERSION_ID: i64 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdGeneratorError {
    ZeroMachines,
    MachineOutOfRange { machine_id: u16, num_machines: u16 },
}

impl IdGeneratorError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::ZeroMachines => "num_machines must be positive",
            Self::MachineOutOfRange { .. } => "machine_id must be below num_machines",
        }
    }
}

/// Issues item and version ids.
///
/// Ids are `counter * num_machines + machine_id`, so generators configured with
/// distinct machine ids never collide, and every id is strictly positive.
/// Items, versions and successor edges draw from one sequence, so no two of
/// them share an id.
#[derive(Debug)]
pub struct IdGenerator {
    machine_id: i64,
    num_machines: i64,
    counter: AtomicI64,
}

impl IdGenerator {
    pub fn new(machine_id: u16, num_machines: u16) -> Result<Self, IdGeneratorError> {
        if num_machines == 0 {
            return Err(IdGeneratorError::ZeroMachines);
        }
        if machine_id >= num_machines {
            return Err(IdGeneratorError::MachineOutOfRange {
                machine_id,
                num_machines,
            });
        }
        Ok(Self {
            machine_id: i64::from(machine_id),
            num_machines: i64::from(num_machines),
            counter: AtomicI64::new(0),
        })
    }

    /// A generator for a single-process deployment.
    pub fn single() -> Self {
        Self {
            machine_id: 0,
            num_machines: 1,
            counter: AtomicI64::new(0),
        }
    }

    pub fn new_item_id(&self) -> i64 {
        self.issue()
    }

    pub fn new_version_id(&self) -> i64 {
        self.issue()
    }

    /// Advances the sequence so that every later id is greater than `max_id`.
    pub fn resume_after(&self, max_id: i64) {
        if max_id <= 0 {
            return;
        }
        self.counter
            .fetch_max(max_id / self.num_machines, Ordering::SeqCst);
    }

    fn issue(&self) -> i64 {
        let next = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        match next
            .checked_mul(self.num_machines)
            .and_then(|value| value.checked_add(self.machine_id))
        {
            Some(id) => id,
            // Wrapping would hand out an id that is already a primary key somewhere.
            None => panic!("id space exhausted for machine {}", self.machine_id),
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_positive_and_unique_across_sequences() {
        let ids = IdGenerator::single();
        let mut seen = BTreeSet::new();
        for _ in 0..100 {
            assert!(seen.insert(ids.new_item_id()));
            assert!(seen.insert(ids.new_version_id()));
        }
        assert!(seen.iter().all(|id| *id > ROOT_VERSION_ID));
    }

    #[test]
    fn item_and_version_ids_never_coincide() {
        for (machine_id, num_machines) in [(0, 1), (2, 3)] {
            let ids = IdGenerator::new(machine_id, num_machines).unwrap();
            let mut seen = BTreeSet::new();
            for _ in 0..50 {
                let item = ids.new_item_id();
                let version = ids.new_version_id();
                assert_ne!(item, version);
                assert!(seen.insert(item), "item id {item} reused");
                assert!(seen.insert(version), "version id {version} reused");
            }
            assert!(
                seen.iter()
                    .all(|id| id % i64::from(num_machines) == i64::from(machine_id))
            );
        }
    }

    #[test]
    fn machines_partition_the_id_space() {
        let a = IdGenerator::new(0, 2).unwrap();
        let b = IdGenerator::new(1, 2).unwrap();
        let from_a: BTreeSet<i64> = (0..50).map(|_| a.new_version_id()).collect();
        let from_b: BTreeSet<i64> = (0..50).map(|_| b.new_version_id()).collect();
        assert!(from_a.is_disjoint(&from_b));
        assert!(from_a.iter().all(|id| id % 2 == 0));
        assert!(from_b.iter().all(|id| id % 2 == 1));
    }

    #[test]
    fn invalid_machine_layout_is_rejected() {
        assert_eq!(
            IdGenerator::new(0, 0).unwrap_err(),
            IdGeneratorError::ZeroMachines
        );
        assert!(matches!(
            IdGenerator::new(3, 3).unwrap_err(),
            IdGeneratorError::MachineOutOfRange { .. }
        ));
    }

    #[test]
    fn resume_after_skips_persisted_ids() {
        let ids = IdGenerator::new(1, 4).unwrap();
        ids.resume_after(41);
        assert!(ids.new_item_id() > 41);
        assert!(ids.new_version_id() > 41);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let ids = Arc::new(IdGenerator::single());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..500).map(|_| ids.new_version_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = BTreeSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }
}
