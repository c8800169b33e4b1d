//! Triggers bind a stored procedure to an operation kind in a region of the tree.
//! After an operation of that kind succeeds on an entry in the region, the procedure
//! runs with a view of the change and may make further changes of its own.

use std::collections::BTreeMap;

use concread::cowcell::CowCell;

use crate::event::{OperationKind, SearchScope};
use crate::modify::RawModify;
use crate::prelude::*;
use crate::server::ServiceCore;

/// When a trigger runs relative to its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTime {
    After,
}

#[derive(Debug, Clone)]
pub struct TriggerSpecification {
    pub name: String,
    pub action_time: ActionTime,
    pub operation: OperationKind,
    pub base: Dn,
    pub scope: SearchScope,
}

impl TriggerSpecification {
    pub fn after(name: &str, operation: OperationKind, base: Dn, scope: SearchScope) -> Self {
        TriggerSpecification {
            name: name.to_string(),
            action_time: ActionTime::After,
            operation,
            base,
            scope,
        }
    }

    fn selects(&self, kind: OperationKind, dn: &Dn) -> bool {
        self.operation == kind
            && match self.scope {
                SearchScope::Base => dn == &self.base,
                SearchScope::OneLevel => self.base.is_parent_of(dn),
                SearchScope::Subtree => dn.is_descendant_or_self(&self.base),
            }
    }
}

/// What a stored procedure is told about the operation that fired it. Changes made
/// through the invocation run as the internal identity and fire no further triggers.
pub struct TriggerInvocation<'a> {
    pub kind: OperationKind,
    pub dn: &'a Dn,
    pub new_dn: Option<Dn>,
    pub before: Option<Arc<EntrySealedCommitted>>,
    pub after: Option<Arc<EntrySealedCommitted>>,
    pub principal: String,
    core: &'a ServiceCore,
    common: OperationCommon,
}

impl<'a> TriggerInvocation<'a> {
    fn nested(&self) -> OperationCommon {
        self.common.nested(Bypass::TRIGGER)
    }

    pub fn add(&self, entry: EntryInit) -> Result<(), OperationError> {
        self.core.add_init(self.nested(), entry)
    }

    pub fn delete(&self, dn: &str) -> Result<(), OperationError> {
        self.core.delete_str(self.nested(), dn)
    }

    pub fn modify(&self, dn: &str, mods: Vec<RawModify>) -> Result<(), OperationError> {
        self.core.modify_raw(self.nested(), dn, mods)
    }

    pub fn lookup(&self, dn: &str) -> Result<Arc<EntrySealedCommitted>, OperationError> {
        let dn = Dn::parse(dn)?.normalized(&self.core.schema.read())?;
        self.core.nexus.lookup_dn(&dn)
    }
}

pub trait StoredProcedure: Send + Sync {
    fn execute(&self, invocation: &TriggerInvocation<'_>) -> Result<(), OperationError>;
}

impl<F> StoredProcedure for F
where
    F: Fn(&TriggerInvocation<'_>) -> Result<(), OperationError> + Send + Sync,
{
    fn execute(&self, invocation: &TriggerInvocation<'_>) -> Result<(), OperationError> {
        self(invocation)
    }
}

struct RegisteredTrigger {
    spec: TriggerSpecification,
    procedure: Arc<dyn StoredProcedure>,
}

pub struct TriggerRegistry {
    triggers: CowCell<BTreeMap<String, Arc<RegisteredTrigger>>>,
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The change a trigger is fired for.
pub(crate) struct FiredChange<'a> {
    pub kind: OperationKind,
    pub dn: &'a Dn,
    pub new_dn: Option<Dn>,
    pub before: Option<Arc<EntrySealedCommitted>>,
    pub after: Option<Arc<EntrySealedCommitted>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        TriggerRegistry {
            triggers: CowCell::new(BTreeMap::new()),
        }
    }

    pub fn register(
        &self,
        spec: TriggerSpecification,
        procedure: Arc<dyn StoredProcedure>,
    ) -> Result<(), OperationError> {
        let mut triggers_wr = self.triggers.write();
        let triggers = triggers_wr.get_mut();
        if triggers.contains_key(&spec.name) {
            admin_error!(name = %spec.name, "trigger already registered");
            return Err(OperationError::EntryAlreadyExists(spec.name.clone()));
        }
        admin_info!(name = %spec.name, op = %spec.operation, base = %spec.base, "trigger registered");
        triggers.insert(spec.name.clone(), Arc::new(RegisteredTrigger { spec, procedure }));
        triggers_wr.commit();
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut triggers_wr = self.triggers.write();
        let removed = triggers_wr.get_mut().remove(name).is_some();
        if removed {
            triggers_wr.commit();
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.triggers.read().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.read().is_empty()
    }

    /// Run every trigger selecting `change`, in name order. The first failure stops
    /// the remaining triggers and is returned.
    pub(crate) fn fire(
        &self,
        core: &ServiceCore,
        common: &OperationCommon,
        change: FiredChange<'_>,
    ) -> Result<(), OperationError> {
        let selected: Vec<Arc<RegisteredTrigger>> = self
            .triggers
            .read()
            .values()
            .filter(|t| t.spec.action_time == ActionTime::After)
            .filter(|t| t.spec.selects(change.kind, change.dn))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Ok(());
        }
        let invocation = TriggerInvocation {
            kind: change.kind,
            dn: change.dn,
            new_dn: change.new_dn,
            before: change.before,
            after: change.after,
            principal: common.ident.principal_name(),
            core,
            common: common.clone(),
        };
        for t in selected.iter() {
            request_info!(trigger = %t.spec.name, dn = %change.dn, "executing trigger");
            t.procedure.execute(&invocation).map_err(|e| {
                request_error!(trigger = %t.spec.name, ?e, "trigger failed");
                e
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{TriggerRegistry, TriggerSpecification};
    use crate::event::{OperationKind, SearchScope};
    use crate::prelude::*;

    fn noop() -> Arc<dyn super::StoredProcedure> {
        Arc::new(|_: &super::TriggerInvocation<'_>| -> Result<(), OperationError> { Ok(()) })
    }

    #[test]
    fn test_trigger_registry_names_and_scope() {
        let people = Dn::parse("ou=people,ou=system").unwrap();
        let registry = TriggerRegistry::new();
        assert!(registry.is_empty());
        registry
            .register(
                TriggerSpecification::after("z-audit", OperationKind::Delete, people.clone(), SearchScope::Subtree),
                noop(),
            )
            .unwrap();
        registry
            .register(
                TriggerSpecification::after("a-backup", OperationKind::Add, people.clone(), SearchScope::OneLevel),
                noop(),
            )
            .unwrap();
        assert!(matches!(
            registry.register(
                TriggerSpecification::after("a-backup", OperationKind::Modify, people.clone(), SearchScope::Base),
                noop(),
            ),
            Err(OperationError::EntryAlreadyExists(_))
        ));
        assert_eq!(registry.names(), vec!["a-backup".to_string(), "z-audit".to_string()]);

        let spec = TriggerSpecification::after("scope", OperationKind::Add, people.clone(), SearchScope::OneLevel);
        let child = Dn::parse("cn=test,ou=people,ou=system").unwrap();
        let grandchild = Dn::parse("cn=x,cn=test,ou=people,ou=system").unwrap();
        assert!(spec.selects(OperationKind::Add, &child));
        assert!(!spec.selects(OperationKind::Add, &grandchild));
        assert!(!spec.selects(OperationKind::Add, &people));
        assert!(!spec.selects(OperationKind::Delete, &child));

        assert!(!registry.unregister("missing"));
        assert!(registry.unregister("z-audit"));
        assert_eq!(registry.names(), vec!["a-backup".to_string()]);
    }
}
