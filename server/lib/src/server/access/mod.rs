//! Access control. This module gathers the ACI tuples that apply to an entry and
//! evaluates requests against them with the decision function in [`filters`].
//!
//! Tuples come from three places:
//! * `entryACI` on the entry itself.
//! * `prescriptiveACI` of every access control subentry whose subtree holds the entry.
//! * `subentryACI` of the administrative point, for subentries below it.
//!
//! Parsed tuples are cached by the stored JSON, and group memberships are kept by a
//! partition listener so neither needs a lookup while a decision is made.

use std::collections::BTreeSet;

use concread::arcache::{ARCache, ARCacheBuilder};
use concread::cowcell::CowCell;
use hashbrown::HashMap;

use crate::be::{PartitionChange, PartitionListener};
use crate::interceptors::subentry::SubentryCache;
use crate::prelude::*;

pub mod aci;
pub mod filters;
pub mod tuple;

use self::filters::{decide, AccessRequest, UserContext};
use self::tuple::{AciTuple, MicroOperation};

const TUPLE_CACHE_MAX: usize = 1024;
const TUPLE_CACHE_LOCAL: usize = 16;

type ParsedAci = Arc<Vec<AciTuple>>;

/// Which groups each user belongs to, kept current from committed changes.
pub struct GroupCache {
    // group -> members, both normalised.
    members: CowCell<HashMap<String, BTreeSet<String>>>,
}

fn is_group<STATE>(e: &Entry<STATE>) -> bool {
    e.has_class(CLASS_GROUP_OF_NAMES) || e.has_class(CLASS_GROUP_OF_UNIQUE_NAMES)
}

fn group_members<STATE>(e: &Entry<STATE>) -> BTreeSet<String> {
    [ATTR_MEMBER, ATTR_UNIQUE_MEMBER]
        .iter()
        .filter_map(|a| e.get_ava_set(a))
        .flat_map(|vs| vs.iter())
        .filter_map(|v| v.norm_str().map(str::to_string))
        .collect()
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupCache {
    pub fn new() -> Self {
        GroupCache {
            members: CowCell::new(HashMap::new()),
        }
    }

    pub fn groups_of(&self, user: &Dn) -> BTreeSet<String> {
        let user = user.to_norm_string();
        self.members
            .read()
            .iter()
            .filter(|(_, m)| m.contains(&user))
            .map(|(g, _)| g.clone())
            .collect()
    }

    pub fn is_member(&self, group: &Dn, user: &Dn) -> bool {
        self.members
            .read()
            .get(&group.to_norm_string())
            .map(|m| m.contains(&user.to_norm_string()))
            .unwrap_or(false)
    }
}

fn refresh(members: &mut HashMap<String, BTreeSet<String>>, entry: &EntrySealedCommitted) {
    let key = entry.dn().to_norm_string();
    if is_group(entry) {
        members.insert(key, group_members(entry));
    } else {
        members.remove(&key);
    }
}

impl PartitionListener for GroupCache {
    fn committed(&self, _partition: &str, change: &PartitionChange<'_>) {
        let mut members_wr = self.members.write();
        let members = members_wr.get_mut();
        match change {
            PartitionChange::Add { entry } => refresh(members, entry),
            PartitionChange::Delete { entry } => {
                members.remove(&entry.dn().to_norm_string());
            }
            PartitionChange::Modify { after, .. } => refresh(members, after),
            PartitionChange::Relocate { before, after, .. } => {
                // Groups below a moved entry move with it.
                let moved: Vec<String> = members
                    .keys()
                    .filter(|k| {
                        Dn::parse(k)
                            .map(|dn| dn.is_descendant_of(before.dn()))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                for old in moved {
                    if let Some(m) = members.remove(&old) {
                        let rebased = Dn::parse(&old)
                            .ok()
                            .and_then(|dn| dn.rebase(before.dn(), after.dn()));
                        if let Some(dn) = rebased {
                            members.insert(dn.to_norm_string(), m);
                        }
                    }
                }
                members.remove(&before.dn().to_norm_string());
                if is_group(after) {
                    members.insert(after.dn().to_norm_string(), group_members(after));
                }
            }
        }
        members_wr.commit();
    }
}

pub struct AccessControl {
    enabled: bool,
    schema: Schema,
    groups: Arc<GroupCache>,
    // Keyed by the stored JSON.
    tuples: ARCache<String, ParsedAci>,
}

impl AccessControl {
    pub fn new(enabled: bool, schema: Schema) -> Result<Self, OperationError> {
        let tuples = ARCacheBuilder::new()
            .set_size(TUPLE_CACHE_MAX, TUPLE_CACHE_LOCAL)
            .set_reader_quiesce(true)
            .build()
            .ok_or_else(|| {
                admin_error!("failed to build the aci tuple cache");
                OperationError::InvalidConfiguration("aci tuple cache".to_string())
            })?;
        Ok(AccessControl {
            enabled,
            schema,
            groups: Arc::new(GroupCache::new()),
            tuples,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn groups(&self) -> &Arc<GroupCache> {
        &self.groups
    }

    pub fn user_context(&self, ident: &Identity) -> UserContext {
        match ident.dn() {
            Some(dn) => UserContext {
                groups: self.groups.groups_of(dn),
                dn: Some(dn.clone()),
                auth_level: ident.auth_level,
            },
            None => UserContext {
                dn: None,
                groups: BTreeSet::new(),
                auth_level: ident.auth_level,
            },
        }
    }

    /// Parse a stored ACI value, reusing the tuples of an earlier parse.
    pub fn parse_cached(&self, raw: &str) -> Result<ParsedAci, OperationError> {
        let key = raw.to_string();
        let mut tuples_rd = self.tuples.read();
        if let Some(t) = tuples_rd.get(&key) {
            return Ok(t.clone());
        }
        drop(tuples_rd);
        let parsed = Arc::new(aci::parse_aci(raw, &self.schema.read())?);
        let mut tuples_wr = self.tuples.write();
        tuples_wr.insert(key, parsed.clone());
        tuples_wr.commit();
        Ok(parsed)
    }

    /// Every ACI value on the entry must parse.
    pub fn validate_aci_values<STATE>(&self, entry: &Entry<STATE>) -> Result<(), OperationError> {
        for attr in [ATTR_ENTRY_ACI, ATTR_PRESCRIPTIVE_ACI, ATTR_SUBENTRY_ACI] {
            for raw in entry.get_ava_iter_str(attr) {
                self.parse_cached(raw)?;
            }
        }
        Ok(())
    }

    fn stored_tuples<STATE>(&self, entry: &Entry<STATE>, attr: &str, out: &mut Vec<AciTuple>) {
        for raw in entry.get_ava_iter_str(attr) {
            match self.parse_cached(raw) {
                Ok(t) => out.extend(t.iter().cloned()),
                Err(e) => {
                    security_error!(dn = %entry.dn(), ?e, "ignoring unparsable aci value");
                }
            }
        }
    }

    /// The tuples that apply to `entry`. `admin_point` is the parent entry, only
    /// consulted when `entry` is a subentry.
    pub fn entry_tuples<STATE>(
        &self,
        entry: &Entry<STATE>,
        admin_point: Option<&EntrySealedCommitted>,
        subentries: &SubentryCache,
    ) -> Vec<AciTuple> {
        let mut out = Vec::new();
        self.stored_tuples(entry, ATTR_ENTRY_ACI, &mut out);
        if entry.is_subentry() {
            if let Some(ap) = admin_point {
                self.stored_tuples(ap, ATTR_SUBENTRY_ACI, &mut out);
            }
        } else {
            for record in subentries.covering(entry) {
                if record.access_control {
                    out.extend(record.tuples.iter().cloned());
                }
            }
        }
        out
    }

    pub fn has_permission<STATE>(&self, tuples: &[AciTuple], req: &AccessRequest<'_, STATE>) -> bool {
        decide(tuples, req)
    }

    /// Remove what the user may not read from `entry`. Returns false if the entry
    /// itself is not readable.
    pub fn filter_readable(
        &self,
        user: &UserContext,
        tuples: &[AciTuple],
        entry: &mut EntrySealedCommitted,
    ) -> bool {
        const READ: &[MicroOperation] = &[MicroOperation::Read];
        if !decide(tuples, &AccessRequest::entry(user, entry, READ)) {
            return false;
        }
        let mut hidden_attrs = Vec::new();
        let mut hidden_values = Vec::new();
        for attr in entry.attrs() {
            let sa = attr.schema();
            if !decide(tuples, &AccessRequest::attribute(user, entry, sa, None, READ)) {
                hidden_attrs.push(sa.oid.clone());
                continue;
            }
            for v in attr.values().iter() {
                if !decide(tuples, &AccessRequest::attribute(user, entry, sa, Some(v), READ)) {
                    hidden_values.push((sa.oid.clone(), v.clone()));
                }
            }
        }
        for oid in hidden_attrs.iter() {
            entry.purge_ava(oid);
        }
        for (oid, v) in hidden_values.iter() {
            entry.remove_ava(oid, v);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessControl, GroupCache};
    use crate::be::{PartitionChange, PartitionListener};
    use crate::prelude::*;

    #[test]
    fn test_group_cache_tracks_membership() {
        let schema = Schema::new().unwrap();
        let group = entry_init!(
            "cn=devs,ou=groups,ou=system",
            (ATTR_OBJECTCLASS, CLASS_GROUP_OF_NAMES),
            (ATTR_CN, "devs"),
            (ATTR_MEMBER, "uid=alice,ou=users,ou=system")
        )
        .into_entry(&schema.read())
        .unwrap()
        .into_committed(7);
        let alice = Dn::parse("uid=alice,ou=users,ou=system")
            .unwrap()
            .normalized(&schema.read())
            .unwrap();

        let cache = GroupCache::new();
        cache.committed("system", &PartitionChange::Add { entry: &group });
        assert!(cache.is_member(group.dn(), &alice));
        assert_eq!(cache.groups_of(&alice).len(), 1);

        cache.committed("system", &PartitionChange::Delete { entry: &group });
        assert!(cache.groups_of(&alice).is_empty());
    }

    #[test]
    fn test_parsed_aci_is_shared() {
        let schema = Schema::new().unwrap();
        let access = AccessControl::new(true, schema).unwrap();
        let raw = r#"{"identificationTag": "t", "precedence": 1,
            "userFirst": {"userClasses": {"allUsers": true}, "userPermissions": [
                {"protectedItems": {"entry": true}, "grantsAndDenials": ["grantRead"]}]}}"#;
        let first = access.parse_cached(raw).unwrap();
        let second = access.parse_cached(raw).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(access.parse_cached("{").is_err());
    }
}
