//! `server` contains the directory service, which is the main high level construction
//! to coordinate operations. A [`DirectoryService`] owns the schema, the partitions
//! behind the [`PartitionNexus`], the interceptor chain and the recorders. Callers
//! act on it through a [`Session`] carrying the identity operations run as.

use crate::be::cursor::Cursor;
use crate::be::search::EntryFilteringCursor;
use crate::be::{BTreePartition, Partition, PartitionListener};
use crate::config::{Configuration, PartitionConfig};
use crate::csn::CsnFactory;
use crate::event::{OperationKind, SearchFilter, SearchRequest, SearchScope};
use crate::interceptors::subentry::SubentryCache;
use crate::interceptors::{default_chain, Interceptor, NextInterceptor};
use crate::ldif::LdifRecord;
use crate::modify::RawModify;
use crate::prelude::*;

use self::access::AccessControl;
use self::changelog::ChangeLog;
use self::events::{DirectoryListener, EventMask, EventService, ListenerId, NotificationCriteria};
use self::journal::{FileJournalStore, Journal, JournalStore, MemoryJournalStore};
use self::nexus::PartitionNexus;
use self::triggers::TriggerRegistry;

pub mod access;
pub mod changelog;
pub mod events;
pub mod identity;
pub mod journal;
pub mod nexus;
pub(crate) mod rootdse;
pub mod triggers;

/// The names of the system entries the stages refer to, normalised.
#[derive(Debug, Clone)]
pub struct WellKnownDns {
    pub admin: Dn,
    pub users: Dn,
    pub groups: Dn,
    pub configuration: Dn,
    pub administrators: Dn,
}

impl WellKnownDns {
    fn new<S: SchemaTransaction + ?Sized>(schema: &S) -> Result<Self, OperationError> {
        let n = |s: &str| Dn::parse(s).and_then(|dn| dn.normalized(schema));
        Ok(WellKnownDns {
            admin: n(DN_ADMIN)?,
            users: n(DN_USERS)?,
            groups: n(DN_GROUPS)?,
            configuration: n(DN_CONFIGURATION)?,
            administrators: n(DN_ADMINISTRATORS)?,
        })
    }
}

/// Everything the interceptors and the nexus share. Operations enter the chain
/// through the methods here.
pub struct ServiceCore {
    pub config: Configuration,
    pub schema: Schema,
    pub nexus: Arc<PartitionNexus>,
    pub chain: Vec<Box<dyn Interceptor>>,
    pub csn: CsnFactory,
    pub changelog: ChangeLog,
    pub journal: Journal,
    pub subentries: Arc<SubentryCache>,
    pub access: Arc<AccessControl>,
    pub events: EventService,
    pub triggers: TriggerRegistry,
    pub dns: WellKnownDns,
}

/// The stages skipped while the system partition is loaded.
fn bootstrap_bypass() -> Bypass {
    Bypass::RECORDERS | Bypass::EVENT | Bypass::TRIGGER | Bypass::AUTHZ | Bypass::AUTHENTICATION
}

impl ServiceCore {
    pub fn add(&self, ctx: &mut AddContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).add(ctx)
    }

    pub fn delete(&self, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).delete(ctx)
    }

    pub fn modify(&self, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).modify(ctx)
    }

    pub fn rename(&self, ctx: &mut RenameContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).rename(ctx)
    }

    pub fn move_entry(&self, ctx: &mut MoveContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).move_entry(ctx)
    }

    pub fn move_and_rename(&self, ctx: &mut MoveAndRenameContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).move_and_rename(ctx)
    }

    /// The entry reduced to the attributes the context asks for.
    pub fn lookup(&self, ctx: &mut LookupContext) -> Result<EntrySealedCommitted, OperationError> {
        let mut entry = NextInterceptor::head(self).lookup(ctx)?;
        entry.reduce_attributes(&ctx.attrs, false);
        Ok(entry)
    }

    pub fn list(&self, ctx: &mut ListContext) -> Result<EntryFilteringCursor, OperationError> {
        NextInterceptor::head(self).list(ctx)
    }

    /// Run a search with its limits capped by the configured maximums. Administrators
    /// and internal callers are held only to what they asked for.
    pub fn search(&self, ctx: &mut SearchContext) -> Result<EntryFilteringCursor, OperationError> {
        let privileged = ctx.common.ident.is_internal() || ctx.common.ident.is_admin();
        let max_size = self.config.limits.max_size_limit;
        let max_time = self.config.max_time_limit();
        let size_limit = match ctx.size_limit {
            0 => max_size,
            n if privileged => n,
            n => n.min(max_size),
        };
        let time_limit = if ctx.time_limit.is_zero() {
            max_time
        } else if privileged {
            ctx.time_limit
        } else {
            ctx.time_limit.min(max_time)
        };
        let mut cursor = NextInterceptor::head(self).search(ctx)?;
        cursor.set_size_limit(size_limit);
        cursor.set_time_limit(time_limit);
        Ok(cursor)
    }

    pub fn compare(&self, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        NextInterceptor::head(self).compare(ctx)
    }

    pub fn bind(&self, ctx: &mut BindContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).bind(ctx)
    }

    pub fn unbind(&self, ctx: &mut UnbindContext) -> Result<(), OperationError> {
        NextInterceptor::head(self).unbind(ctx)
    }

    pub(crate) fn add_init(&self, common: OperationCommon, entry: EntryInit) -> Result<(), OperationError> {
        let entry = entry.into_entry(&self.schema.read())?;
        let mut ctx = AddContext::new(common, entry);
        self.add(&mut ctx)
    }

    pub(crate) fn delete_str(&self, common: OperationCommon, dn: &str) -> Result<(), OperationError> {
        let mut ctx = DeleteContext::new(common, Dn::parse(dn)?);
        self.delete(&mut ctx)
    }

    pub(crate) fn modify_raw(
        &self,
        common: OperationCommon,
        dn: &str,
        mods: Vec<RawModify>,
    ) -> Result<(), OperationError> {
        let mods = ModifyList::new_list(mods).validate(&self.schema.read())?;
        let mut ctx = ModifyContext::new(common, Dn::parse(dn)?, mods);
        self.modify(&mut ctx)
    }

    pub(crate) fn relocate(
        &self,
        common: OperationCommon,
        dn: &str,
        new_rdn: Option<&str>,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> Result<(), OperationError> {
        let dn = Dn::parse(dn)?;
        let new_rdn = new_rdn.map(Rdn::parse).transpose()?;
        let new_superior = new_superior.map(Dn::parse).transpose()?;
        match (new_rdn, new_superior) {
            (Some(new_rdn), None) => {
                let mut ctx = RenameContext::new(common, dn, new_rdn, delete_old_rdn);
                self.rename(&mut ctx)
            }
            (None, Some(new_superior)) => {
                let mut ctx = MoveContext::new(common, dn, new_superior);
                self.move_entry(&mut ctx)
            }
            (Some(new_rdn), Some(new_superior)) => {
                let mut ctx = MoveAndRenameContext::new(common, dn, new_superior, new_rdn, delete_old_rdn);
                self.move_and_rename(&mut ctx)
            }
            (None, None) => Err(OperationError::UnwillingToPerform(
                "neither a new name nor a new superior was given".to_string(),
            )),
        }
    }

    /// Apply a change record through the chain.
    pub(crate) fn apply_record(&self, common: OperationCommon, record: LdifRecord) -> Result<(), OperationError> {
        match record {
            LdifRecord::Content(e) | LdifRecord::Add(e) => self.add_init(common, e),
            LdifRecord::Delete { dn } => self.delete_str(common, &dn),
            LdifRecord::Modify { dn, mods } => self.modify_raw(common, &dn, mods),
            LdifRecord::ModDn {
                dn,
                new_rdn,
                delete_old_rdn,
                new_superior,
            } => {
                // A move keeping its RDN is a plain move.
                let same_rdn = Dn::parse(&dn)?.rdn() == Some(&Rdn::parse(&new_rdn)?);
                let rdn = if same_rdn && new_superior.is_some() {
                    None
                } else {
                    Some(new_rdn.as_str())
                };
                self.relocate(common, &dn, rdn, delete_old_rdn, new_superior.as_deref())
            }
        }
    }
}

pub struct DirectoryService {
    core: Arc<ServiceCore>,
}

impl DirectoryService {
    /// Build and start a service: create the partitions, initialise every stage in
    /// chain order and load the system entries.
    pub fn new(config: Configuration) -> Result<Self, OperationError> {
        admin_info!(%config, "starting directory service");
        let schema = Schema::new()?;

        let system = PartitionConfig {
            indexed_attributes: SYSTEM_PARTITION_INDEXED_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..PartitionConfig::new(SYSTEM_PARTITION_ID, DN_SYSTEM)
        };
        let subentries = Arc::new(SubentryCache::new(schema.clone()));
        let access = Arc::new(AccessControl::new(config.access_control_enabled, schema.clone())?);
        let mut partitions: Vec<Arc<dyn Partition>> = Vec::with_capacity(config.partitions.len() + 1);
        for pc in std::iter::once(&system).chain(config.partitions.iter()) {
            let p = BTreePartition::new(pc, schema.clone())?;
            p.register_listener(subentries.clone());
            p.register_listener(access.groups().clone());
            partitions.push(Arc::new(p));
        }
        let nexus = Arc::new(PartitionNexus::new(schema.clone(), partitions)?);

        let journal = if config.journal.enabled {
            let store: Arc<dyn JournalStore> = match &config.journal.path {
                Some(path) => Arc::new(FileJournalStore::open(path, config.journal.rotation)?),
                None => Arc::new(MemoryJournalStore::new()),
            };
            Journal::new(true, store)
        } else {
            Journal::disabled()
        };

        let dns = WellKnownDns::new(&schema.read())?;
        let core = Arc::new(ServiceCore {
            chain: default_chain(),
            changelog: ChangeLog::new(config.changelog.enabled),
            csn: CsnFactory::new(DEFAULT_REPLICA_ID),
            config,
            schema,
            nexus,
            journal,
            subentries,
            access,
            events: EventService::new(),
            triggers: TriggerRegistry::new(),
            dns,
        });

        for (n, interceptor) in core.chain.iter().enumerate() {
            if let Err(e) = interceptor.init(&core) {
                admin_error!(stage = %interceptor.id(), ?e, "interceptor failed to start");
                core.chain[..n].iter().rev().for_each(|i| i.destroy());
                return Err(e);
            }
        }

        let service = DirectoryService { core };
        service.bootstrap()?;
        admin_info!("directory service started");
        Ok(service)
    }

    fn bootstrap(&self) -> Result<(), OperationError> {
        let entries = system_entries(&self.core.config.admin_password)?;
        for ei in entries {
            let dn = ei.dn().to_string();
            self.core
                .add_init(OperationCommon::internal().with_bypass(bootstrap_bypass()), ei)
                .map_err(|e| {
                    admin_error!(%dn, ?e, "unable to load system entry");
                    e
                })?;
        }
        Ok(())
    }

    pub fn config(&self) -> &Configuration {
        &self.core.config
    }

    pub fn schema(&self) -> &Schema {
        &self.core.schema
    }

    /// Parse and normalise a name against the service schema.
    pub fn parse_dn(&self, dn: &str) -> Result<Dn, OperationError> {
        Dn::parse(dn)?.normalized(&self.core.schema.read())
    }

    pub fn session(&self, ident: Identity) -> Session {
        Session {
            core: self.core.clone(),
            ident,
            manage_dsa_it: false,
        }
    }

    pub fn anonymous_session(&self) -> Session {
        self.session(Identity::anonymous())
    }

    /// A session acting as `uid=admin,ou=system` without a bind.
    pub fn admin_session(&self) -> Session {
        self.session(Identity::user(
            self.core.dns.admin.clone(),
            true,
            AuthenticationLevel::Strong,
        ))
    }

    /// A simple bind. An empty name with no password gives an anonymous session.
    pub fn bind(&self, dn: &str, password: &[u8]) -> Result<Session, OperationError> {
        let mut ctx = BindContext::new(
            OperationCommon::new(Identity::anonymous()),
            Dn::parse(dn)?,
            password,
        );
        self.core.bind(&mut ctx)?;
        let ident = ctx.authenticated.take().unwrap_or_else(Identity::anonymous);
        Ok(self.session(ident))
    }

    pub fn changelog(&self) -> &ChangeLog {
        &self.core.changelog
    }

    pub fn journal(&self) -> &Journal {
        &self.core.journal
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.core.triggers
    }

    pub fn events(&self) -> &EventService {
        &self.core.events
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn DirectoryListener>,
        base: &str,
        scope: SearchScope,
        filter: &str,
        mask: EventMask,
    ) -> Result<ListenerId, OperationError> {
        let schema = self.core.schema.read();
        let criteria = NotificationCriteria {
            base: Dn::parse(base)?.normalized(&schema)?,
            scope,
            filter: Filter::parse(filter)?.validate(&schema)?,
            mask,
        };
        Ok(self.core.events.add_listener(listener, criteria))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.events.remove_listener(id)
    }

    /// Subscribe to the committed changes of one partition, for example to mirror
    /// them to an LDIF file.
    pub fn add_partition_listener(
        &self,
        partition: &str,
        listener: Arc<dyn PartitionListener>,
    ) -> Result<(), OperationError> {
        let p = self
            .core
            .nexus
            .partitions()
            .iter()
            .find(|p| p.id() == partition)
            .ok_or_else(|| OperationError::InvalidConfiguration(format!("no partition {}", partition)))?;
        p.register_listener(listener);
        Ok(())
    }

    /// Undo every change recorded after `revision`, newest first. The reverting
    /// changes are not themselves recorded.
    pub fn revert(&self, revision: u64) -> Result<(), OperationError> {
        let changelog = &self.core.changelog;
        if !changelog.is_enabled() {
            admin_warn!("revert requested with the change log disabled");
            return Err(OperationError::UnwillingToPerform(
                "the change log is disabled".to_string(),
            ));
        }
        if revision > changelog.current_revision() {
            return Err(OperationError::UnwillingToPerform(format!(
                "revision {} has not been reached",
                revision
            )));
        }
        let events = changelog.events_since(revision);
        admin_info!(revision, count = events.len(), "reverting changes");
        for event in events.into_iter().rev() {
            for record in event.reverse {
                let common = OperationCommon::internal().with_bypass(Bypass::RECORDERS | Bypass::TRIGGER);
                self.core.apply_record(common, record).map_err(|e| {
                    admin_error!(revision = event.revision, ?e, "unable to revert change");
                    e
                })?;
            }
        }
        changelog.truncate_after(revision);
        Ok(())
    }

    /// Check every partition's indexes against its entries.
    pub fn verify(&self) -> Vec<ConsistencyError> {
        self.core.nexus.verify()
    }

    /// Stop every stage, in reverse chain order.
    pub fn shutdown(&self) {
        for interceptor in self.core.chain.iter().rev() {
            interceptor.destroy();
        }
        if let Err(e) = self.core.journal.store().sync() {
            journal_error!(?e, "unable to sync the journal on shutdown");
        }
        admin_info!("directory service stopped");
    }
}

/// An identity acting on the service. Names and filters are given in their string
/// forms and resolved by the chain.
pub struct Session {
    core: Arc<ServiceCore>,
    ident: Identity,
    manage_dsa_it: bool,
}

impl Session {
    pub fn identity(&self) -> &Identity {
        &self.ident
    }

    /// Treat referral entries as ordinary entries.
    pub fn with_manage_dsa_it(mut self) -> Self {
        self.manage_dsa_it = true;
        self
    }

    fn common(&self) -> OperationCommon {
        let mut common = OperationCommon::new(self.ident.clone());
        common.manage_dsa_it = self.manage_dsa_it;
        common
    }

    fn trace(&self, kind: OperationKind, dn: &str) {
        request_trace!(op = %kind, %dn, ident = %self.ident, "operation");
    }

    pub fn add(&self, entry: EntryInit) -> Result<(), OperationError> {
        self.trace(OperationKind::Add, entry.dn());
        self.core.add_init(self.common(), entry)
    }

    pub fn delete(&self, dn: &str) -> Result<(), OperationError> {
        self.trace(OperationKind::Delete, dn);
        self.core.delete_str(self.common(), dn)
    }

    pub fn modify(&self, dn: &str, mods: Vec<RawModify>) -> Result<(), OperationError> {
        self.trace(OperationKind::Modify, dn);
        self.core.modify_raw(self.common(), dn, mods)
    }

    pub fn rename(&self, dn: &str, new_rdn: &str, delete_old_rdn: bool) -> Result<(), OperationError> {
        self.trace(OperationKind::Rename, dn);
        self.core
            .relocate(self.common(), dn, Some(new_rdn), delete_old_rdn, None)
    }

    pub fn move_entry(&self, dn: &str, new_superior: &str) -> Result<(), OperationError> {
        self.trace(OperationKind::Move, dn);
        self.core
            .relocate(self.common(), dn, None, false, Some(new_superior))
    }

    pub fn move_and_rename(
        &self,
        dn: &str,
        new_superior: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<(), OperationError> {
        self.trace(OperationKind::MoveAndRename, dn);
        self.core.relocate(
            self.common(),
            dn,
            Some(new_rdn),
            delete_old_rdn,
            Some(new_superior),
        )
    }

    pub fn lookup(&self, dn: &str, attrs: &[&str]) -> Result<EntrySealedCommitted, OperationError> {
        self.trace(OperationKind::Lookup, dn);
        let mut ctx = LookupContext::new(
            self.common(),
            Dn::parse(dn)?,
            AttributeSelection::from_requested(attrs),
        );
        self.core.lookup(&mut ctx)
    }

    /// The immediate subordinates of `dn`.
    pub fn list(&self, dn: &str) -> Result<Vec<EntrySealedCommitted>, OperationError> {
        self.trace(OperationKind::List, dn);
        let mut ctx = ListContext::new(self.common(), Dn::parse(dn)?);
        self.core.list(&mut ctx)?.collect_all()
    }

    pub fn search_cursor(&self, req: SearchRequest) -> Result<EntryFilteringCursor, OperationError> {
        self.trace(OperationKind::Search, &req.base);
        let mut ctx = SearchContext::new(
            self.common(),
            Dn::parse(&req.base)?,
            req.scope,
            SearchFilter::Raw(Filter::parse(&req.filter)?),
        );
        ctx.deref = req.deref;
        ctx.attrs = AttributeSelection::from_requested(&req.attrs);
        ctx.types_only = req.types_only;
        ctx.size_limit = req.size_limit;
        ctx.time_limit = req.time_limit;
        self.core.search(&mut ctx)
    }

    pub fn search(&self, req: SearchRequest) -> Result<Vec<EntrySealedCommitted>, OperationError> {
        self.search_cursor(req)?.collect_all()
    }

    pub fn compare<V: Into<RawValue>>(&self, dn: &str, attr: &str, value: V) -> Result<bool, OperationError> {
        self.trace(OperationKind::Compare, dn);
        let mut ctx = CompareContext::new(self.common(), Dn::parse(dn)?, attr, value.into());
        self.core.compare(&mut ctx)
    }

    pub fn unbind(self) -> Result<(), OperationError> {
        let mut ctx = UnbindContext::new(self.common());
        self.core.unbind(&mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::be::mirror::LdifMirror;
    use crate::event::{SearchRequest, SearchScope};
    use crate::prelude::*;

    fn person(dn: &str, cn: &str) -> EntryInit {
        entry_init!(
            dn,
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, cn),
            (ATTR_SN, "TEST")
        )
    }

    #[ds_test]
    fn test_add_lookup_delete_cycle(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin.add(person("cn=test,ou=system", "test")).unwrap();

        let e = admin
            .lookup("cn=test,ou=system", &[SELECT_ALL_USER, SELECT_ALL_OPERATIONAL])
            .unwrap();
        assert_eq!(e.get_ava_single_str(ATTR_SN), Some("TEST"));
        assert!(e.attribute_pres(ATTR_ENTRY_UUID));
        assert!(e.attribute_pres(ATTR_CREATE_TIMESTAMP));

        // Operational attributes are only returned on request.
        let e = admin.lookup("cn=test,ou=system", &[SELECT_ALL_USER]).unwrap();
        assert!(!e.attribute_pres(ATTR_ENTRY_UUID));

        assert!(matches!(
            admin.add(person("cn=test,ou=system", "test")),
            Err(OperationError::EntryAlreadyExists(_))
        ));
        let one_level = || {
            admin
                .search(SearchRequest::new("ou=system", SearchScope::OneLevel, "(cn=test)"))
                .unwrap()
                .len()
        };
        let children = admin.list("ou=system").unwrap().len();
        assert_eq!(one_level(), 1);

        admin.delete("cn=test,ou=system").unwrap();
        assert!(matches!(
            admin.lookup("cn=test,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));
        assert_eq!(one_level(), 0);
        assert_eq!(admin.list("ou=system").unwrap().len(), children - 1);
        assert!(matches!(
            admin.delete("cn=test,ou=system"),
            Err(OperationError::NoSuchObject { .. })
        ));
    }

    #[ds_test]
    fn test_system_entries_bootstrapped(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let children: Vec<String> = admin
            .list(DN_SYSTEM)
            .unwrap()
            .iter()
            .map(|e| e.dn().to_string().to_lowercase())
            .collect();
        for dn in [DN_ADMIN, DN_USERS, DN_GROUPS, DN_CONFIGURATION] {
            assert!(children.contains(&dn.to_lowercase()), "{} missing", dn);
        }
        // Nothing is recorded while the system entries are loaded.
        assert_eq!(ds.changelog().current_revision(), 0);
        assert_eq!(ds.journal().current_revision(), 0);
    }

    #[ds_test]
    fn test_bind_and_unbind(ds: &DirectoryService) {
        let admin = ds.bind(DN_ADMIN, b"secret").unwrap();
        assert!(admin.identity().is_admin());
        assert!(matches!(
            ds.bind(DN_ADMIN, b"wrong"),
            Err(OperationError::InvalidCredentials)
        ));
        assert!(matches!(
            ds.bind("uid=nobody,ou=system", b"secret"),
            Err(OperationError::InvalidCredentials)
        ));
        let anon = ds.bind("", b"").unwrap();
        assert!(anon.identity().is_anonymous());
        admin.unbind().unwrap();
    }

    #[ds_test]
    fn test_user_bind_is_not_admin(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let mut ei = person("cn=user,ou=users,ou=system", "user");
        ei.add_ava(ATTR_USER_PASSWORD, "pw");
        admin.add(ei).unwrap();
        let user = ds.bind("cn=user,ou=users,ou=system", b"pw").unwrap();
        assert!(!user.identity().is_admin());
        // Only administrators may change the admin entry.
        assert!(matches!(
            user.modify(DN_ADMIN, vec![m_replace(ATTR_SN, &["X"])]),
            Err(OperationError::InsufficientAccessRights)
        ));
    }

    #[ds_test]
    fn test_compare(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin.add(person("cn=test,ou=system", "test")).unwrap();
        assert!(admin.compare("cn=test,ou=system", ATTR_SN, "test").unwrap());
        assert!(!admin.compare("cn=test,ou=system", ATTR_SN, "other").unwrap());
        assert!(matches!(
            admin.compare("cn=test,ou=system", ATTR_DESCRIPTION, "x"),
            Err(OperationError::NoSuchAttribute(_))
        ));
    }

    #[ds_test]
    fn test_rename_and_move(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "ou=a,ou=system",
                (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
                (ATTR_OU, "a")
            ))
            .unwrap();
        admin.add(person("cn=test,ou=system", "test")).unwrap();
        admin.rename("cn=test,ou=system", "cn=renamed", false).unwrap();
        let e = admin.lookup("cn=renamed,ou=system", &[SELECT_ALL_USER]).unwrap();
        // The old RDN value was kept.
        let mut cns: Vec<&str> = e.get_ava_iter_str(ATTR_CN).collect();
        cns.sort_unstable();
        assert_eq!(cns, vec!["renamed", "test"]);

        admin.move_entry("cn=renamed,ou=system", "ou=a,ou=system").unwrap();
        assert!(admin.lookup("cn=renamed,ou=a,ou=system", &[SELECT_ALL_USER]).is_ok());
        admin
            .move_and_rename("cn=renamed,ou=a,ou=system", "ou=system", "cn=back", true)
            .unwrap();
        let e = admin.lookup("cn=back,ou=system", &[SELECT_ALL_USER]).unwrap();
        assert!(!e.attribute_equality_str(ATTR_CN, "renamed"));

        // Entries stay within their partition.
        admin
            .add(entry_init!(
                "dc=example,dc=com",
                (ATTR_OBJECTCLASS, CLASS_DOMAIN),
                (ATTR_DC, "example")
            ))
            .unwrap();
        assert!(matches!(
            admin.move_entry("cn=back,ou=system", "dc=example,dc=com"),
            Err(OperationError::UnwillingToPerform(_))
        ));
    }

    #[ds_test(max_size_limit = 2)]
    fn test_search_size_limit(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let bound = ds.bind(DN_ADMIN, b"secret").unwrap();
        for cn in ["a", "b", "c"] {
            admin.add(person(&format!("cn={},ou=system", cn), cn)).unwrap();
        }
        // The administrator asked for no limit, so the configured one applies.
        let r = bound.search(SearchRequest::new(DN_SYSTEM, SearchScope::OneLevel, "(sn=test)"));
        assert!(matches!(r, Err(OperationError::SizeLimitExceeded)));
        let found = admin
            .search(SearchRequest::new(DN_SYSTEM, SearchScope::OneLevel, "(sn=test)").size_limit(10))
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[ds_test]
    fn test_partition_listener_mirror(ds: &DirectoryService) {
        let mirror = Arc::new(LdifMirror::new(Vec::<u8>::new()));
        ds.add_partition_listener(SYSTEM_PARTITION_ID, mirror.clone()).unwrap();
        assert!(ds.add_partition_listener("missing", mirror.clone()).is_err());
        ds.admin_session().add(person("cn=test,ou=system", "test")).unwrap();
        assert_eq!(mirror.records_written(), 1);
        let text = mirror.with_sink(|s| String::from_utf8(s.clone()).unwrap());
        assert!(text.contains("changetype: add"));
    }
}
