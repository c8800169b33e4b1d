//! A partition listener that appends every committed change to an LDIF sink, so the
//! contents of a partition can be replayed after a restart.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::be::locks::mutex_lock;
use crate::be::{PartitionChange, PartitionListener};
use crate::ldif::LdifRecord;
use crate::prelude::*;

pub struct LdifMirror<W> {
    sink: Mutex<W>,
    written: AtomicU64,
}

impl<W: Write + Send> LdifMirror<W> {
    pub fn new(sink: W) -> Self {
        LdifMirror {
            sink: Mutex::new(sink),
            written: AtomicU64::new(0),
        }
    }

    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Run `f` with the sink held.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut mutex_lock(&self.sink))
    }
}

pub(crate) fn change_record(change: &PartitionChange<'_>) -> LdifRecord {
    match change {
        PartitionChange::Add { entry } => LdifRecord::Add(entry.to_entry_init()),
        PartitionChange::Delete { entry } => LdifRecord::Delete {
            dn: entry.dn().to_string(),
        },
        PartitionChange::Modify { before, mods, .. } => LdifRecord::Modify {
            dn: before.dn().to_string(),
            mods: mods.to_raw(),
        },
        PartitionChange::Relocate {
            before,
            after,
            delete_old_rdn,
            new_superior,
        } => LdifRecord::ModDn {
            dn: before.dn().to_string(),
            new_rdn: after
                .dn()
                .rdn()
                .map(|r| r.to_string())
                .unwrap_or_default(),
            delete_old_rdn: *delete_old_rdn,
            new_superior: new_superior.map(|d| d.to_string()),
        },
    }
}

impl<W: Write + Send> PartitionListener for LdifMirror<W> {
    fn committed(&self, partition: &str, change: &PartitionChange<'_>) {
        let record = change_record(change);
        let mut sink = mutex_lock(&self.sink);
        let res = writeln!(sink, "{}", record).and_then(|_| sink.flush());
        match res {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::AcqRel);
                admin_debug!(partition, dn = %record.dn(), changetype = record.changetype(), "mirrored change");
            }
            Err(e) => {
                admin_error!(partition, dn = %record.dn(), ?e, "unable to mirror change");
            }
        }
    }
}
