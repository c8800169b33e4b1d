//! The change log keeps, for every first mutation, the change as it was applied and
//! the records that undo it. Reverting to a revision replays the undo records of
//! every later event, newest first.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::be::locks::{read_lock, write_lock};
use crate::ldif::LdifRecord;
use crate::modify::RawModify;
use crate::prelude::*;
use crate::schema::SchemaAttribute;

/// One logged change. Never altered once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEvent {
    pub revision: u64,
    pub principal: String,
    pub forward: LdifRecord,
    /// Applied in order, these undo the change.
    pub reverse: Vec<LdifRecord>,
}

/// A named point in the revision history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub revision: u64,
    pub description: Option<String>,
}

/// Decides which attributes of a deleted entry are left out of the add that restores
/// it.
pub trait ReverseAddPolicy: Send + Sync {
    fn exclude(&self, attr: &SchemaAttribute) -> bool;
}

/// Collective attributes belong to subentries and can not be added to an entry.
#[derive(Debug, Default)]
pub struct ExcludeCollective;

impl ReverseAddPolicy for ExcludeCollective {
    fn exclude(&self, attr: &SchemaAttribute) -> bool {
        attr.collective
    }
}

pub struct ChangeLog {
    enabled: bool,
    revision: AtomicU64,
    events: RwLock<Vec<ChangeLogEvent>>,
    tags: RwLock<Vec<Tag>>,
    policy: Box<dyn ReverseAddPolicy>,
}

impl ChangeLog {
    pub fn new(enabled: bool) -> Self {
        Self::with_policy(enabled, Box::new(ExcludeCollective))
    }

    pub fn with_policy(enabled: bool, policy: Box<dyn ReverseAddPolicy>) -> Self {
        ChangeLog {
            enabled,
            revision: AtomicU64::new(0),
            events: RwLock::new(Vec::new()),
            tags: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &dyn ReverseAddPolicy {
        self.policy.as_ref()
    }

    /// Record a change under the next revision.
    pub fn log(&self, principal: String, forward: LdifRecord, reverse: Vec<LdifRecord>) -> ChangeLogEvent {
        // Revisions are issued under the write lock so the list stays ordered.
        let mut events = write_lock(&self.events);
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        let event = ChangeLogEvent {
            revision,
            principal,
            forward,
            reverse,
        };
        events.push(event.clone());
        event
    }

    pub fn tag(&self, description: Option<&str>) -> Tag {
        let tag = Tag {
            revision: self.current_revision(),
            description: description.map(str::to_string),
        };
        write_lock(&self.tags).push(tag.clone());
        admin_info!(revision = tag.revision, "changelog tagged");
        tag
    }

    pub fn latest_tag(&self) -> Option<Tag> {
        read_lock(&self.tags).last().cloned()
    }

    pub fn event(&self, revision: u64) -> Option<ChangeLogEvent> {
        read_lock(&self.events)
            .iter()
            .find(|e| e.revision == revision)
            .cloned()
    }

    /// Events after `revision`, oldest first.
    pub fn events_since(&self, revision: u64) -> Vec<ChangeLogEvent> {
        read_lock(&self.events)
            .iter()
            .filter(|e| e.revision > revision)
            .cloned()
            .collect()
    }

    /// Forget events after `revision` once they have been reverted. Revisions are not
    /// reissued.
    pub(crate) fn truncate_after(&self, revision: u64) {
        write_lock(&self.events).retain(|e| e.revision <= revision);
        write_lock(&self.tags).retain(|t| t.revision <= revision);
    }
}

/// The record that undoes an add.
pub fn reverse_add(dn: &Dn) -> Vec<LdifRecord> {
    vec![LdifRecord::Delete { dn: dn.to_string() }]
}

/// The record that restores a deleted entry.
pub fn reverse_delete(original: &EntrySealedCommitted, policy: &dyn ReverseAddPolicy) -> Vec<LdifRecord> {
    let mut restore = original.clone_new();
    let excluded: Vec<AttrString> = restore
        .attrs()
        .filter(|a| policy.exclude(a.schema()))
        .map(|a| a.schema().oid.clone())
        .collect();
    for oid in excluded.iter() {
        restore.purge_ava(oid);
    }
    vec![LdifRecord::Add(restore.to_entry_init())]
}

/// Every attribute the modifications touched is put back to its prior values. Types
/// users can not modify are restamped by the service and left out.
pub fn reverse_modify(original: &EntrySealedCommitted, mods: &ModifyList<ModifyValid>) -> Vec<LdifRecord> {
    let mut seen = BTreeSet::new();
    let mut restore = Vec::new();
    for m in mods.iter() {
        if m.attr.no_user_modification || !seen.insert(m.attr.oid.clone()) {
            continue;
        }
        let values = original
            .get_ava(&m.attr.oid)
            .map(|a| a.values().iter().map(|v| v.to_raw()).collect())
            .unwrap_or_default();
        restore.push(RawModify {
            op: ModifyOp::Replace,
            attr: m.attr.name().into(),
            values,
        });
    }
    if restore.is_empty() {
        return Vec::new();
    }
    vec![LdifRecord::Modify {
        dn: original.dn().to_string(),
        mods: restore,
    }]
}

/// The record that moves and renames an entry back to where it was. The new RDN
/// values are only deleted on the way back if the entry did not hold them before.
pub fn reverse_relocate(original: &EntrySealedCommitted, new_dn: &Dn) -> Vec<LdifRecord> {
    let Some(old_rdn) = original.dn().rdn() else {
        return Vec::new();
    };
    let old_parent = original.dn().parent();
    let moved = new_dn.parent() != old_parent;
    let introduced = new_dn
        .rdn()
        .map(|rdn| {
            rdn.avas()
                .iter()
                .any(|ava| !original.attribute_equality_str(ava.oid(), ava.value()))
        })
        .unwrap_or(false);
    vec![LdifRecord::ModDn {
        dn: new_dn.to_string(),
        new_rdn: old_rdn.to_string(),
        delete_old_rdn: introduced,
        new_superior: if moved {
            old_parent.map(|p| p.to_string())
        } else {
            None
        },
    }]
}

/// The change as the client asked for it. Stamps the service adds are left out, they
/// are added again when the record is replayed.
pub fn forward_modify(dn: &Dn, mods: &ModifyList<ModifyValid>) -> LdifRecord {
    LdifRecord::Modify {
        dn: dn.to_string(),
        mods: mods.user_mods().map(|m| m.to_raw()).collect(),
    }
}

pub fn forward_relocate(
    dn: &Dn,
    new_rdn: Option<&Rdn>,
    delete_old_rdn: bool,
    new_superior: Option<&Dn>,
) -> LdifRecord {
    let new_rdn = new_rdn
        .or_else(|| dn.rdn())
        .map(|r| r.to_string())
        .unwrap_or_default();
    LdifRecord::ModDn {
        dn: dn.to_string(),
        new_rdn,
        delete_old_rdn,
        new_superior: new_superior.map(|s| s.to_string()),
    }
}

/// True for changes that only flip the tombstone marker, which are not logged.
pub fn is_tombstone_only(mods: &ModifyList<ModifyValid>) -> bool {
    let mut user = mods.user_mods().peekable();
    user.peek().is_some() && user.all(|m| m.attr.has_name(ATTR_ENTRY_DELETED))
}

#[cfg(test)]
mod tests {
    use super::{reverse_delete, reverse_modify, reverse_relocate, ChangeLog, ExcludeCollective};
    use crate::ldif::LdifRecord;
    use crate::prelude::*;

    fn committed(schema: &Schema, ei: EntryInit) -> EntrySealedCommitted {
        ei.into_entry(&schema.read()).unwrap().into_committed(1)
    }

    #[test]
    fn test_changelog_revisions_and_tags() {
        let cl = ChangeLog::new(true);
        assert!(cl.latest_tag().is_none());
        let a = cl.log(
            "admin".to_string(),
            LdifRecord::Delete { dn: "cn=a".to_string() },
            Vec::new(),
        );
        let t = cl.tag(Some("before b"));
        let b = cl.log(
            "admin".to_string(),
            LdifRecord::Delete { dn: "cn=b".to_string() },
            Vec::new(),
        );
        assert_eq!(a.revision, 1);
        assert_eq!(b.revision, 2);
        assert_eq!(t.revision, 1);
        assert_eq!(cl.events_since(t.revision), vec![b]);
        cl.truncate_after(1);
        assert_eq!(cl.events_since(0).len(), 1);
        assert_eq!(cl.current_revision(), 2);
    }

    #[test]
    fn test_reverse_delete_drops_collective() {
        let schema = Schema::new().unwrap();
        let e = committed(
            &schema,
            entry_init!(
                "cn=sub,ou=system",
                (ATTR_OBJECTCLASS, CLASS_SUBENTRY),
                (ATTR_OBJECTCLASS, CLASS_COLLECTIVE_ATTRIBUTE_SUBENTRY),
                (ATTR_CN, "sub"),
                (ATTR_C_OU, "engineering")
            ),
        );
        let rev = reverse_delete(&e, &ExcludeCollective);
        let LdifRecord::Add(ei) = &rev[0] else {
            panic!("expected an add");
        };
        assert!(ei.attrs().iter().any(|(a, _)| a.eq_ignore_ascii_case(ATTR_CN)));
        assert!(!ei.attrs().iter().any(|(a, _)| a.eq_ignore_ascii_case(ATTR_C_OU)));
    }

    #[test]
    fn test_reverse_modify_restores_touched_attributes() {
        let schema = Schema::new().unwrap();
        let e = committed(
            &schema,
            entry_init!(
                "cn=test,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "test"),
                (ATTR_SN, "TEST")
            ),
        );
        let mods = ModifyList::new_list(vec![
            m_add(ATTR_DESCRIPTION, &["one"]),
            m_replace(ATTR_SN, &["OTHER"]),
            m_add(ATTR_DESCRIPTION, &["two"]),
        ])
        .validate(&schema.read())
        .unwrap();
        let rev = reverse_modify(&e, &mods);
        let LdifRecord::Modify { mods, .. } = &rev[0] else {
            panic!("expected a modify");
        };
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].op, ModifyOp::Replace);
        assert!(mods[0].values.is_empty());
        assert_eq!(mods[1].values, vec![RawValue::from("TEST")]);
    }

    #[test]
    fn test_reverse_relocate() {
        let schema = Schema::new().unwrap();
        let e = committed(
            &schema,
            entry_init!(
                "cn=test,ou=users,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "test"),
                (ATTR_SN, "TEST")
            ),
        );
        let renamed = Dn::parse("cn=other,ou=users,ou=system")
            .unwrap()
            .normalized(&schema.read())
            .unwrap();
        let rev = reverse_relocate(&e, &renamed);
        assert_eq!(
            rev,
            vec![LdifRecord::ModDn {
                dn: "cn=other,ou=users,ou=system".to_string(),
                new_rdn: "cn=test".to_string(),
                delete_old_rdn: true,
                new_superior: None,
            }]
        );
        let moved = Dn::parse("cn=test,ou=groups,ou=system")
            .unwrap()
            .normalized(&schema.read())
            .unwrap();
        let rev = reverse_relocate(&e, &moved);
        assert_eq!(
            rev,
            vec![LdifRecord::ModDn {
                dn: "cn=test,ou=groups,ou=system".to_string(),
                new_rdn: "cn=test".to_string(),
                delete_old_rdn: false,
                new_superior: Some("ou=users,ou=system".to_string()),
            }]
        );
    }
}
