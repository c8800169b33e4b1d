//! The partition nexus sits at the end of the interceptor chain. It routes every
//! operation to the partition holding the target name and answers for the root DSE,
//! which no partition holds.

use crate::be::cursor::{Cursor, ListCursor};
use crate::be::search::{ChainCursor, EntryCursor, EntryFilteringCursor};
use crate::be::Partition;
use crate::event::{DerefAliases, SearchScope};
use crate::prelude::*;
use crate::server::rootdse::build_root_dse;

pub struct PartitionNexus {
    schema: Schema,
    partitions: Vec<Arc<dyn Partition>>,
    root_dse: Arc<EntrySealedCommitted>,
}

impl PartitionNexus {
    pub fn new(schema: Schema, partitions: Vec<Arc<dyn Partition>>) -> Result<Self, OperationError> {
        for (i, p) in partitions.iter().enumerate() {
            if partitions[..i].iter().any(|o| o.suffix() == p.suffix() || o.id() == p.id()) {
                admin_error!(id = %p.id(), suffix = %p.suffix(), "duplicate partition");
                return Err(OperationError::InvalidConfiguration(format!(
                    "partition {} ({}) is configured twice",
                    p.id(),
                    p.suffix()
                )));
            }
        }
        let root_dse = build_root_dse(&schema.read(), partitions.iter().map(|p| p.suffix()))?;
        Ok(PartitionNexus {
            schema,
            partitions,
            root_dse: Arc::new(root_dse),
        })
    }

    pub fn partitions(&self) -> &[Arc<dyn Partition>] {
        &self.partitions
    }

    pub fn root_dse(&self) -> Arc<EntrySealedCommitted> {
        self.root_dse.clone()
    }

    pub fn is_suffix(&self, dn: &Dn) -> bool {
        self.partitions.iter().any(|p| p.suffix() == dn)
    }

    /// The partition with the longest suffix containing `dn`.
    pub fn partition_for(&self, dn: &Dn) -> Result<&Arc<dyn Partition>, OperationError> {
        self.partitions
            .iter()
            .filter(|p| dn.is_descendant_or_self(p.suffix()))
            .max_by_key(|p| p.suffix().rdns().len())
            .ok_or_else(|| {
                request_info!(%dn, "no partition holds this name");
                OperationError::no_such_object(None)
            })
    }

    pub fn lookup_dn(&self, dn: &Dn) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        if dn.is_root() {
            return Ok(self.root_dse());
        }
        self.partition_for(dn)?.lookup_dn(dn)
    }

    pub fn has_children(&self, dn: &Dn) -> Result<bool, OperationError> {
        if dn.is_root() {
            return Ok(!self.partitions.is_empty());
        }
        self.partition_for(dn)?.has_children(dn)
    }

    pub fn count_children(&self, dn: &Dn) -> Result<usize, OperationError> {
        if dn.is_root() {
            return Ok(self.partitions.len());
        }
        self.partition_for(dn)?.count_children(dn)
    }

    /// The suffix entries that exist. A partition may be configured before its
    /// context entry has been added.
    fn context_entries(&self) -> Vec<Arc<EntrySealedCommitted>> {
        self.partitions
            .iter()
            .filter_map(|p| p.lookup_dn(p.suffix()).ok())
            .collect()
    }

    fn cursor(
        &self,
        base: &Dn,
        scope: SearchScope,
        deref: DerefAliases,
        filter: &Filter<FilterValid>,
    ) -> Result<EntryCursor, OperationError> {
        if !base.is_root() {
            let found = self.partition_for(base)?.search(base, scope, deref, filter)?;
            filter_trace!(plan = ?found.plan, %base, "partition search planned");
            return Ok(found.cursor);
        }
        match scope {
            SearchScope::Base => {
                let items = if filter.matches(&self.root_dse) {
                    vec![self.root_dse()]
                } else {
                    Vec::new()
                };
                Ok(Box::new(ListCursor::new(items)))
            }
            SearchScope::OneLevel => {
                let items = self
                    .context_entries()
                    .into_iter()
                    .filter(|e| filter.matches(e.as_ref()))
                    .collect();
                Ok(Box::new(ListCursor::new(items)))
            }
            SearchScope::Subtree => {
                let mut children: Vec<EntryCursor> = Vec::with_capacity(self.partitions.len());
                for p in self.partitions.iter() {
                    if p.lookup_dn(p.suffix()).is_err() {
                        continue;
                    }
                    let found = p.search(p.suffix(), SearchScope::Subtree, deref, filter)?;
                    filter_trace!(plan = ?found.plan, partition = %p.id(), "partition search planned");
                    children.push(found.cursor);
                }
                Ok(Box::new(ChainCursor::new(children)))
            }
        }
    }

    /// Every stored entry matching `filter` in the region, for internal maintenance.
    pub fn scan(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter<FilterValid>,
    ) -> Result<Vec<Arc<EntrySealedCommitted>>, OperationError> {
        self.cursor(base, scope, DerefAliases::Never, filter)?.collect_all()
    }

    pub fn verify(&self) -> Vec<ConsistencyError> {
        self.partitions
            .iter()
            .flat_map(|p| p.verify())
            .filter_map(|r| r.err())
            .collect()
    }

    fn relocating(&self, dn: &Dn, new_superior: &Dn) -> Result<&Arc<dyn Partition>, OperationError> {
        let p = self.partition_for(dn)?;
        let target = self.partition_for(new_superior)?;
        if p.id() != target.id() {
            request_warn!(%dn, %new_superior, "refusing to move an entry between partitions");
            return Err(OperationError::UnwillingToPerform(
                "entries cannot be moved between partitions".to_string(),
            ));
        }
        Ok(p)
    }

    #[instrument(level = "debug", name = "nexus::add", skip_all)]
    pub fn add(&self, ctx: &mut AddContext) -> Result<(), OperationError> {
        let p = self.partition_for(&ctx.dn)?;
        ctx.added = Some(p.add(ctx.entry.clone())?);
        Ok(())
    }

    #[instrument(level = "debug", name = "nexus::delete", skip_all)]
    pub fn delete(&self, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let removed = self.partition_for(&ctx.dn)?.delete(&ctx.dn)?;
        if ctx.original.is_none() {
            ctx.original = Some(removed);
        }
        Ok(())
    }

    #[instrument(level = "debug", name = "nexus::modify", skip_all)]
    pub fn modify(&self, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        ctx.altered = Some(self.partition_for(&ctx.dn)?.modify(&ctx.dn, &ctx.mods)?);
        Ok(())
    }

    #[instrument(level = "debug", name = "nexus::rename", skip_all)]
    pub fn rename(&self, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let p = self.partition_for(&ctx.dn)?;
        if p.suffix() == &ctx.dn {
            return Err(OperationError::UnwillingToPerform(
                "a partition suffix cannot be renamed".to_string(),
            ));
        }
        ctx.altered = Some(p.rename(&ctx.dn, &ctx.new_rdn, ctx.delete_old_rdn, &ctx.mods)?);
        Ok(())
    }

    #[instrument(level = "debug", name = "nexus::move", skip_all)]
    pub fn move_entry(&self, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let p = self.relocating(&ctx.dn, &ctx.new_superior)?;
        ctx.altered = Some(p.move_entry(&ctx.dn, &ctx.new_superior, &ctx.mods)?);
        Ok(())
    }

    #[instrument(level = "debug", name = "nexus::move_and_rename", skip_all)]
    pub fn move_and_rename(&self, ctx: &mut MoveAndRenameContext) -> Result<(), OperationError> {
        let p = self.relocating(&ctx.dn, &ctx.new_superior)?;
        ctx.altered = Some(p.move_and_rename(
            &ctx.dn,
            &ctx.new_superior,
            &ctx.new_rdn,
            ctx.delete_old_rdn,
            &ctx.mods,
        )?);
        Ok(())
    }

    /// The full stored entry. The service reduces it to the requested attributes once
    /// the chain has returned it.
    #[instrument(level = "debug", name = "nexus::lookup", skip_all)]
    pub fn lookup(&self, ctx: &mut LookupContext) -> Result<EntrySealedCommitted, OperationError> {
        self.lookup_dn(&ctx.dn).map(|e| e.as_ref().clone())
    }

    #[instrument(level = "debug", name = "nexus::list", skip_all)]
    pub fn list(&self, ctx: &mut ListContext) -> Result<EntryFilteringCursor, OperationError> {
        let everything = Filter::parse("(objectClass=*)")?.validate(&self.schema.read())?;
        let cursor = self.cursor(&ctx.dn, SearchScope::OneLevel, DerefAliases::Never, &everything)?;
        Ok(EntryFilteringCursor::new(cursor, ctx.attrs.clone(), false))
    }

    #[instrument(level = "debug", name = "nexus::search", skip_all)]
    pub fn search(&self, ctx: &mut SearchContext) -> Result<EntryFilteringCursor, OperationError> {
        let filter = ctx.filter.valid()?;
        let cursor = self.cursor(&ctx.base, ctx.scope, ctx.deref, filter)?;
        Ok(EntryFilteringCursor::new(cursor, ctx.attrs.clone(), ctx.types_only))
    }

    #[instrument(level = "debug", name = "nexus::compare", skip_all)]
    pub fn compare(&self, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        let entry = self.lookup_dn(&ctx.dn)?;
        let schema = self.schema.read();
        let sa = schema
            .resolve_attribute(ctx.attr.as_str())
            .ok_or_else(|| OperationError::NoSuchAttribute(ctx.attr.to_string()))?;
        let value = schema.normalize_value(sa, &ctx.value)?;
        match entry.get_ava(sa.oid.as_str()) {
            Some(attr) => Ok(attr.contains(&value)),
            None => Err(OperationError::NoSuchAttribute(ctx.attr.to_string())),
        }
    }

    /// Credentials are checked by the chain, the nexus has nothing further to do.
    pub fn bind(&self, _ctx: &mut BindContext) -> Result<(), OperationError> {
        Ok(())
    }

    pub fn unbind(&self, _ctx: &mut UnbindContext) -> Result<(), OperationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PartitionNexus;
    use crate::be::{BTreePartition, Partition};
    use crate::config::PartitionConfig;
    use crate::event::SearchScope;
    use crate::prelude::*;

    fn partition(schema: &Schema, id: &str, suffix: &str) -> Arc<dyn Partition> {
        Arc::new(BTreePartition::new(&PartitionConfig::new(id, suffix), schema.clone()).unwrap())
    }

    fn dn(schema: &Schema, s: &str) -> Dn {
        Dn::parse(s).unwrap().normalized(&schema.read()).unwrap()
    }

    #[test]
    fn test_nexus_routes_by_longest_suffix() {
        let schema = Schema::new().unwrap();
        let nexus = PartitionNexus::new(
            schema.clone(),
            vec![
                partition(&schema, "example", "dc=example,dc=com"),
                partition(&schema, "people", "ou=people,dc=example,dc=com"),
            ],
        )
        .unwrap();
        let p = nexus
            .partition_for(&dn(&schema, "cn=a,ou=people,dc=example,dc=com"))
            .unwrap();
        assert_eq!(p.id(), "people");
        let p = nexus.partition_for(&dn(&schema, "ou=groups,dc=example,dc=com")).unwrap();
        assert_eq!(p.id(), "example");
        assert!(matches!(
            nexus.partition_for(&dn(&schema, "dc=other")),
            Err(OperationError::NoSuchObject { .. })
        ));
        assert!(nexus.is_suffix(&dn(&schema, "DC=Example,DC=Com")));
        assert_eq!(nexus.count_children(&Dn::root()).unwrap(), 2);
    }

    #[test]
    fn test_nexus_refuses_duplicate_suffix() {
        let schema = Schema::new().unwrap();
        let r = PartitionNexus::new(
            schema.clone(),
            vec![
                partition(&schema, "a", "dc=example,dc=com"),
                partition(&schema, "b", "dc=example,dc=com"),
            ],
        );
        assert!(matches!(r, Err(OperationError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_nexus_root_scans() {
        let schema = Schema::new().unwrap();
        let p = partition(&schema, "example", "dc=example,dc=com");
        let nexus = PartitionNexus::new(
            schema.clone(),
            vec![p.clone(), partition(&schema, "empty", "dc=empty")],
        )
        .unwrap();
        let s = schema.read();
        for ei in [
            entry_init!(
                "dc=example,dc=com",
                (ATTR_OBJECTCLASS, CLASS_DOMAIN),
                (ATTR_DC, "example")
            ),
            entry_init!(
                "ou=people,dc=example,dc=com",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "people")
            ),
        ] {
            p.add(ei.into_entry(&s).unwrap()).unwrap();
        }

        let all = filter_valid!(&s, "(objectClass=*)");
        // The root DSE is only returned for a base search.
        let base = nexus.scan(&Dn::root(), SearchScope::Base, &all).unwrap();
        assert_eq!(base.len(), 1);
        assert!(base[0].dn().is_root());
        // The empty partition has no context entry yet.
        let one = nexus.scan(&Dn::root(), SearchScope::OneLevel, &all).unwrap();
        assert_eq!(one.len(), 1);
        let sub = nexus.scan(&Dn::root(), SearchScope::Subtree, &all).unwrap();
        assert_eq!(sub.len(), 2);
        assert!(sub.iter().all(|e| !e.dn().is_root()));
        assert!(nexus.verify().is_empty());
    }
}
