//! Operation contexts are the per call state passed down the interceptor chain. A
//! context is built at the session boundary, may be rewritten by interceptors on its
//! way to the nexus, and is dropped when the call returns.
//!
//! Every context embeds an [`OperationCommon`] carrying who is asking, how deeply the
//! call is nested inside other operations, and which interceptors it bypasses.

use std::fmt;

use crate::filter::FilterInvalid;
use crate::prelude::*;
use crate::server::changelog::ChangeLogEvent;
use crate::value::RawValue;

bitflags::bitflags! {
    /// The interceptors an operation skips. Each interceptor owns one flag.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Bypass: u32 {
        const NORMALIZATION =  0b0000_0000_0000_0001;
        const AUTHENTICATION = 0b0000_0000_0000_0010;
        const ACI =            0b0000_0000_0000_0100;
        const DEFAULT_AUTHZ =  0b0000_0000_0000_1000;
        const EXCEPTION =      0b0000_0000_0001_0000;
        const OPERATIONAL =    0b0000_0000_0010_0000;
        const SCHEMA =         0b0000_0000_0100_0000;
        const SUBENTRY =       0b0000_0000_1000_0000;
        const COLLECTIVE =     0b0000_0001_0000_0000;
        const EVENT =          0b0000_0010_0000_0000;
        const TRIGGER =        0b0000_0100_0000_0000;
        const CHANGELOG =      0b0000_1000_0000_0000;
        const JOURNAL =        0b0001_0000_0000_0000;

        const AUTHZ = Self::ACI.bits() | Self::DEFAULT_AUTHZ.bits();
        const RECORDERS = Self::CHANGELOG.bits() | Self::JOURNAL.bits();
        /// What a lookup made on behalf of access control skips.
        const ACCESS_LOOKUP = Self::AUTHENTICATION.bits()
            | Self::AUTHZ.bits()
            | Self::SCHEMA.bits()
            | Self::SUBENTRY.bits()
            | Self::COLLECTIVE.bits()
            | Self::EVENT.bits()
            | Self::TRIGGER.bits();
    }
}

/// The kinds of operation the chain dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Delete,
    Modify,
    Rename,
    Move,
    MoveAndRename,
    Lookup,
    List,
    Search,
    Compare,
    Bind,
    Unbind,
}

impl OperationKind {
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            OperationKind::Add
                | OperationKind::Delete
                | OperationKind::Modify
                | OperationKind::Rename
                | OperationKind::Move
                | OperationKind::MoveAndRename
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Delete => "delete",
            OperationKind::Modify => "modify",
            OperationKind::Rename => "rename",
            OperationKind::Move => "move",
            OperationKind::MoveAndRename => "moveAndRename",
            OperationKind::Lookup => "lookup",
            OperationKind::List => "list",
            OperationKind::Search => "search",
            OperationKind::Compare => "compare",
            OperationKind::Bind => "bind",
            OperationKind::Unbind => "unbind",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State every context carries.
#[derive(Debug, Clone)]
pub struct OperationCommon {
    pub ident: Identity,
    /// Zero for a call made by a session, one more than the caller for nested calls.
    pub depth: u32,
    pub bypass: Bypass,
    pub manage_dsa_it: bool,
    /// Filled in by the change recorder once the operation is logged.
    pub changelog_event: Option<ChangeLogEvent>,
}

impl OperationCommon {
    pub fn new(ident: Identity) -> Self {
        OperationCommon {
            ident,
            depth: 0,
            bypass: Bypass::empty(),
            manage_dsa_it: false,
            changelog_event: None,
        }
    }

    pub fn internal() -> Self {
        Self::new(Identity::internal())
    }

    /// True only for the outermost call of an operation.
    pub fn is_first(&self) -> bool {
        self.depth == 0
    }

    /// A context for a call made from inside this operation. It runs as the internal
    /// identity so that the nested call is not refused for the original caller.
    pub fn nested(&self, bypass: Bypass) -> Self {
        OperationCommon {
            ident: Identity::internal(),
            depth: self.depth + 1,
            bypass: self.bypass | bypass,
            manage_dsa_it: true,
            changelog_event: None,
        }
    }

    /// As `nested`, but the caller identity is kept.
    pub fn nested_as_caller(&self, bypass: Bypass) -> Self {
        OperationCommon {
            ident: self.ident.clone(),
            ..self.nested(bypass)
        }
    }

    pub fn with_bypass(mut self, bypass: Bypass) -> Self {
        self.bypass |= bypass;
        self
    }

    pub fn bypasses(&self, flag: Bypass) -> bool {
        self.bypass.intersects(flag)
    }
}

#[derive(Debug, Clone)]
pub struct AddContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub entry: Entry<EntryNew>,
    /// The stored entry, once the nexus has added it.
    pub added: Option<Arc<EntrySealedCommitted>>,
}

impl AddContext {
    pub fn new(common: OperationCommon, entry: Entry<EntryNew>) -> Self {
        AddContext {
            common,
            dn: entry.dn().clone(),
            entry,
            added: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteContext {
    pub common: OperationCommon,
    pub dn: Dn,
    /// The entry as it was before the delete, once an interceptor has fetched it.
    pub original: Option<Arc<EntrySealedCommitted>>,
}

impl DeleteContext {
    pub fn new(common: OperationCommon, dn: Dn) -> Self {
        DeleteContext {
            common,
            dn,
            original: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModifyContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub mods: ModifyList<ModifyValid>,
    pub original: Option<Arc<EntrySealedCommitted>>,
    /// The stored entry after the change.
    pub altered: Option<Arc<EntrySealedCommitted>>,
}

impl ModifyContext {
    pub fn new(common: OperationCommon, dn: Dn, mods: ModifyList<ModifyValid>) -> Self {
        ModifyContext {
            common,
            dn,
            mods,
            original: None,
            altered: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenameContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub new_rdn: Rdn,
    pub delete_old_rdn: bool,
    /// System modifications stored along with the rename.
    pub mods: ModifyList<ModifyValid>,
    pub original: Option<Arc<EntrySealedCommitted>>,
    pub altered: Option<Arc<EntrySealedCommitted>>,
}

impl RenameContext {
    pub fn new(common: OperationCommon, dn: Dn, new_rdn: Rdn, delete_old_rdn: bool) -> Self {
        RenameContext {
            common,
            dn,
            new_rdn,
            delete_old_rdn,
            mods: ModifyList::new_valid(Vec::new()),
            original: None,
            altered: None,
        }
    }

    pub fn new_dn(&self) -> Dn {
        self.dn
            .parent()
            .unwrap_or_else(Dn::root)
            .child(self.new_rdn.clone())
    }
}

#[derive(Debug, Clone)]
pub struct MoveContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub new_superior: Dn,
    pub mods: ModifyList<ModifyValid>,
    pub original: Option<Arc<EntrySealedCommitted>>,
    pub altered: Option<Arc<EntrySealedCommitted>>,
}

impl MoveContext {
    pub fn new(common: OperationCommon, dn: Dn, new_superior: Dn) -> Self {
        MoveContext {
            common,
            dn,
            new_superior,
            mods: ModifyList::new_valid(Vec::new()),
            original: None,
            altered: None,
        }
    }

    pub fn new_dn(&self) -> Dn {
        match self.dn.rdn() {
            Some(rdn) => self.new_superior.child(rdn.clone()),
            None => self.new_superior.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoveAndRenameContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub new_superior: Dn,
    pub new_rdn: Rdn,
    pub delete_old_rdn: bool,
    pub mods: ModifyList<ModifyValid>,
    pub original: Option<Arc<EntrySealedCommitted>>,
    pub altered: Option<Arc<EntrySealedCommitted>>,
}

impl MoveAndRenameContext {
    pub fn new(
        common: OperationCommon,
        dn: Dn,
        new_superior: Dn,
        new_rdn: Rdn,
        delete_old_rdn: bool,
    ) -> Self {
        MoveAndRenameContext {
            common,
            dn,
            new_superior,
            new_rdn,
            delete_old_rdn,
            mods: ModifyList::new_valid(Vec::new()),
            original: None,
            altered: None,
        }
    }

    pub fn new_dn(&self) -> Dn {
        self.new_superior.child(self.new_rdn.clone())
    }
}

#[derive(Debug, Clone)]
pub struct LookupContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub attrs: AttributeSelection,
}

impl LookupContext {
    pub fn new(common: OperationCommon, dn: Dn, attrs: AttributeSelection) -> Self {
        LookupContext { common, dn, attrs }
    }
}

#[derive(Debug, Clone)]
pub struct ListContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub attrs: AttributeSelection,
}

impl ListContext {
    pub fn new(common: OperationCommon, dn: Dn) -> Self {
        ListContext {
            common,
            dn,
            attrs: AttributeSelection::all_user(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// When aliases are followed during a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DerefAliases {
    #[default]
    Never,
    InSearching,
    FindingBaseObj,
    Always,
}

impl DerefAliases {
    pub fn in_searching(self) -> bool {
        matches!(self, DerefAliases::InSearching | DerefAliases::Always)
    }

    pub fn finding_base(self) -> bool {
        matches!(self, DerefAliases::FindingBaseObj | DerefAliases::Always)
    }
}

/// A search filter before and after it is resolved against the schema.
#[derive(Debug, Clone)]
pub enum SearchFilter {
    Raw(Filter<FilterInvalid>),
    Valid(Filter<FilterValid>),
}

impl SearchFilter {
    /// The resolved filter. Resolution is done by normalization, so an operation
    /// bypassing it must supply a resolved filter.
    pub fn valid(&self) -> Result<&Filter<FilterValid>, OperationError> {
        match self {
            SearchFilter::Valid(f) => Ok(f),
            SearchFilter::Raw(f) => {
                admin_error!(filter = %f.as_fc(), "search filter was never resolved");
                Err(OperationError::InvalidState)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchContext {
    pub common: OperationCommon,
    pub base: Dn,
    pub scope: SearchScope,
    pub deref: DerefAliases,
    pub filter: SearchFilter,
    pub attrs: AttributeSelection,
    pub types_only: bool,
    /// Zero means the configured maximum.
    pub size_limit: usize,
    /// Zero means the configured maximum.
    pub time_limit: Duration,
}

impl SearchContext {
    pub fn new(common: OperationCommon, base: Dn, scope: SearchScope, filter: SearchFilter) -> Self {
        SearchContext {
            common,
            base,
            scope,
            deref: DerefAliases::Never,
            filter,
            attrs: AttributeSelection::all_user(),
            types_only: false,
            size_limit: 0,
            time_limit: Duration::ZERO,
        }
    }
}

/// The search parameters as a session caller gives them.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub deref: DerefAliases,
    pub filter: String,
    pub attrs: Vec<String>,
    pub types_only: bool,
    pub size_limit: usize,
    pub time_limit: Duration,
}

impl SearchRequest {
    pub fn new(base: &str, scope: SearchScope, filter: &str) -> Self {
        SearchRequest {
            base: base.to_string(),
            scope,
            deref: DerefAliases::Never,
            filter: filter.to_string(),
            attrs: Vec::new(),
            types_only: false,
            size_limit: 0,
            time_limit: Duration::ZERO,
        }
    }

    pub fn attrs(mut self, attrs: &[&str]) -> Self {
        self.attrs = attrs.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn deref(mut self, deref: DerefAliases) -> Self {
        self.deref = deref;
        self
    }

    pub fn size_limit(mut self, limit: usize) -> Self {
        self.size_limit = limit;
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn types_only(mut self) -> Self {
        self.types_only = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompareContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub attr: AttrString,
    pub value: RawValue,
}

impl CompareContext {
    pub fn new(common: OperationCommon, dn: Dn, attr: &str, value: RawValue) -> Self {
        CompareContext {
            common,
            dn,
            attr: attr.into(),
            value,
        }
    }
}

#[derive(Clone)]
pub struct BindContext {
    pub common: OperationCommon,
    pub dn: Dn,
    pub credentials: Vec<u8>,
    /// Set once the credentials are proven.
    pub authenticated: Option<Identity>,
}

// Never print the credentials.
impl fmt::Debug for BindContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindContext")
            .field("dn", &self.dn)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

impl BindContext {
    pub fn new(common: OperationCommon, dn: Dn, credentials: &[u8]) -> Self {
        BindContext {
            common,
            dn,
            credentials: credentials.to_vec(),
            authenticated: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnbindContext {
    pub common: OperationCommon,
}

impl UnbindContext {
    pub fn new(common: OperationCommon) -> Self {
        UnbindContext { common }
    }
}
