//! Change sequence numbers, stamped into `entryCSN` on every change.
//!
//! A [`Csn`] is `timestamp#count#replica#op`, rendered in the form other directory
//! servers use so the values sort lexically in change order.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy, Eq, PartialOrd, Ord, Hash)]
pub struct Csn {
    // Mental note: Derive ord always checks in order of struct fields.
    pub ts: Duration,
    pub count: u32,
    pub replica_id: u16,
    pub op: u32,
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = i64::try_from(self.ts.as_secs()).unwrap_or(i64::MAX);
        let odt = OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        write!(
            f,
            "{:04}{:02}{:02}{:02}{:02}{:02}.{:06}Z#{:06x}#{:03x}#{:06x}",
            odt.year(),
            u8::from(odt.month()),
            odt.day(),
            odt.hour(),
            odt.minute(),
            odt.second(),
            self.ts.subsec_micros(),
            self.count,
            self.replica_id,
            self.op
        )
    }
}

impl Csn {
    pub fn new(ts: Duration, count: u32, replica_id: u16) -> Self {
        Csn {
            ts,
            count,
            replica_id,
            op: 0,
        }
    }
}

pub(crate) fn duration_from_epoch_now() -> Duration {
    let now = OffsetDateTime::now_utc();
    let nanos = now.unix_timestamp_nanos();
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
}

/// Render a time as GeneralizedTime, `YYYYMMDDhhmmssZ`.
pub(crate) fn generalized_time(ts: Duration) -> String {
    let secs = i64::try_from(ts.as_secs()).unwrap_or(i64::MAX);
    let odt = OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        odt.year(),
        u8::from(odt.month()),
        odt.day(),
        odt.hour(),
        odt.minute(),
        odt.second()
    )
}

/// Issues strictly increasing CSNs. Two changes in the same microsecond are told
/// apart by the change count.
#[derive(Debug)]
pub struct CsnFactory {
    replica_id: u16,
    last: Mutex<(Duration, u32)>,
}

impl CsnFactory {
    pub fn new(replica_id: u16) -> Self {
        CsnFactory {
            replica_id,
            last: Mutex::new((Duration::ZERO, 0)),
        }
    }

    pub fn next(&self) -> Csn {
        self.next_at(duration_from_epoch_now())
    }

    pub(crate) fn next_at(&self, now: Duration) -> Csn {
        // Truncate to what the rendered form can carry.
        let now = Duration::from_micros(u64::try_from(now.as_micros()).unwrap_or(u64::MAX));
        let mut guard = match self.last.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (last_ts, last_count) = *guard;
        let (ts, count) = if now > last_ts {
            (now, 0)
        } else {
            (last_ts, last_count.saturating_add(1))
        };
        *guard = (ts, count);
        Csn::new(ts, count, self.replica_id)
    }
}

impl Default for CsnFactory {
    fn default() -> Self {
        CsnFactory::new(DEFAULT_REPLICA_ID)
    }
}
