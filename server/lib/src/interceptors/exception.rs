//! Existence checks. Operations on missing entries, adds over existing ones and
//! relocations onto taken names fail here with the right result code and matched
//! name, before any later stage does work for them. Referral entries raise a
//! referral unless the caller manages the DSA information tree itself.

use crate::be::search::EntryFilteringCursor;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::ServiceCore;

pub struct ExceptionInterceptor;

fn referrals(e: &EntrySealedCommitted) -> OperationError {
    OperationError::Referral(e.get_ava_iter_str(ATTR_REF).map(str::to_string).collect())
}

fn check_referral(common: &OperationCommon, e: &EntrySealedCommitted) -> Result<(), OperationError> {
    if e.is_referral() && !common.manage_dsa_it {
        request_info!(dn = %e.dn(), "referral entry");
        return Err(referrals(e));
    }
    Ok(())
}

/// A name below a referral resolves as far as the referral, which then answers for it.
fn referral_above(core: &ServiceCore, common: &OperationCommon, err: OperationError) -> OperationError {
    if common.manage_dsa_it {
        return err;
    }
    let matched = err
        .matched_dn()
        .and_then(|m| Dn::parse(m).and_then(|dn| dn.normalized(&core.schema.read())).ok())
        .and_then(|dn| core.nexus.lookup_dn(&dn).ok());
    match matched {
        Some(e) if e.is_referral() => referrals(&e),
        _ => err,
    }
}

fn fetch(
    core: &ServiceCore,
    common: &OperationCommon,
    dn: &Dn,
) -> Result<Arc<EntrySealedCommitted>, OperationError> {
    let e = core
        .nexus
        .lookup_dn(dn)
        .map_err(|err| referral_above(core, common, err))?;
    check_referral(common, &e)?;
    Ok(e)
}

fn check_free(core: &ServiceCore, dn: &Dn) -> Result<(), OperationError> {
    if core.nexus.lookup_dn(dn).is_ok() {
        request_info!(dn = %dn, "name already taken");
        return Err(OperationError::EntryAlreadyExists(dn.to_string()));
    }
    Ok(())
}

/// The new parent of an added or moved entry must exist and may not be an alias.
fn check_superior(core: &ServiceCore, common: &OperationCommon, dn: &Dn) -> Result<(), OperationError> {
    let superior = fetch(core, common, dn)?;
    if superior.is_alias() {
        request_info!(dn = %dn, "entries can not be placed below an alias");
        return Err(OperationError::AliasProblem(format!(
            "{} is an alias and can not have subordinates",
            dn
        )));
    }
    Ok(())
}

fn fill(
    core: &ServiceCore,
    common: &OperationCommon,
    dn: &Dn,
    original: &mut Option<Arc<EntrySealedCommitted>>,
) -> Result<Arc<EntrySealedCommitted>, OperationError> {
    if dn.is_root() {
        return Err(OperationError::UnwillingToPerform(
            "the root DSE can not be changed".to_string(),
        ));
    }
    let e = fetch(core, common, dn)?;
    *original = Some(e.clone());
    Ok(e)
}

fn check_relocation(
    core: &ServiceCore,
    common: &OperationCommon,
    dn: &Dn,
    new_dn: &Dn,
    new_superior: Option<&Dn>,
) -> Result<(), OperationError> {
    if let Some(sup) = new_superior {
        if sup.is_descendant_or_self(dn) {
            return Err(OperationError::UnwillingToPerform(
                "an entry can not be moved below itself".to_string(),
            ));
        }
        check_superior(core, common, sup)?;
    }
    if new_dn != dn {
        check_free(core, new_dn)?;
    }
    Ok(())
}

impl Interceptor for ExceptionInterceptor {
    fn id(&self) -> &'static str {
        "exception"
    }

    fn flag(&self) -> Bypass {
        Bypass::EXCEPTION
    }

    #[instrument(level = "debug", name = "exception::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let core = next.core();
        check_free(core, &ctx.dn)?;
        if !core.nexus.is_suffix(&ctx.dn) {
            match ctx.dn.parent() {
                Some(parent) if !parent.is_root() => check_superior(core, &ctx.common, &parent)?,
                _ => {
                    return Err(OperationError::no_such_object(None));
                }
            }
        }
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "exception::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        let core = next.core();
        fill(core, &ctx.common, &ctx.dn, &mut ctx.original)?;
        if core.nexus.has_children(&ctx.dn)? {
            request_info!(dn = %ctx.dn, "entry has subordinates");
            return Err(OperationError::NotAllowedOnNonLeaf);
        }
        next.delete(ctx)
    }

    #[instrument(level = "debug", name = "exception::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        fill(next.core(), &ctx.common, &ctx.dn, &mut ctx.original)?;
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "exception::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        let core = next.core();
        fill(core, &ctx.common, &ctx.dn, &mut ctx.original)?;
        check_relocation(core, &ctx.common, &ctx.dn, &ctx.new_dn(), None)?;
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "exception::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        let core = next.core();
        fill(core, &ctx.common, &ctx.dn, &mut ctx.original)?;
        check_relocation(
            core,
            &ctx.common,
            &ctx.dn,
            &ctx.new_dn(),
            Some(&ctx.new_superior),
        )?;
        next.move_entry(ctx)
    }

    #[instrument(level = "debug", name = "exception::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        let core = next.core();
        fill(core, &ctx.common, &ctx.dn, &mut ctx.original)?;
        check_relocation(
            core,
            &ctx.common,
            &ctx.dn,
            &ctx.new_dn(),
            Some(&ctx.new_superior),
        )?;
        next.move_and_rename(ctx)
    }

    #[instrument(level = "debug", name = "exception::lookup", skip_all)]
    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        let core = next.core();
        let e = next
            .lookup(ctx)
            .map_err(|err| referral_above(core, &ctx.common, err))?;
        check_referral(&ctx.common, &e)?;
        Ok(e)
    }

    #[instrument(level = "debug", name = "exception::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        if !ctx.dn.is_root() {
            fetch(next.core(), &ctx.common, &ctx.dn)?;
        }
        next.list(ctx)
    }

    #[instrument(level = "debug", name = "exception::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        if !ctx.base.is_root() {
            fetch(next.core(), &ctx.common, &ctx.base)?;
        }
        next.search(ctx)
    }

    #[instrument(level = "debug", name = "exception::compare", skip_all)]
    fn compare(&self, next: &NextInterceptor<'_>, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        if !ctx.dn.is_root() {
            fetch(next.core(), &ctx.common, &ctx.dn)?;
        }
        next.compare(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    fn ou(dn: &str, name: &str) -> EntryInit {
        entry_init!(
            dn,
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OU, name)
        )
    }

    #[ds_test]
    fn test_missing_superior_reports_matched_name(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let err = admin
            .add(entry_init!(
                "cn=a,ou=missing,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "a"),
                (ATTR_SN, "A")
            ))
            .unwrap_err();
        assert_eq!(err.result_code(), LdapResultCode::NoSuchObject);
        assert_eq!(
            err.matched_dn().map(str::to_lowercase),
            Some("ou=system".to_string())
        );
    }

    #[ds_test]
    fn test_structural_refusals(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin.add(ou("ou=a,ou=system", "a")).unwrap();
        admin.add(ou("ou=b,ou=a,ou=system", "b")).unwrap();
        admin.add(ou("ou=c,ou=system", "c")).unwrap();

        assert_eq!(
            admin.delete("ou=a,ou=system"),
            Err(OperationError::NotAllowedOnNonLeaf)
        );
        assert!(matches!(
            admin.rename("ou=c,ou=system", "ou=a", false),
            Err(OperationError::EntryAlreadyExists(_))
        ));
        assert!(matches!(
            admin.move_entry("ou=a,ou=system", "ou=b,ou=a,ou=system"),
            Err(OperationError::UnwillingToPerform(_))
        ));
        assert!(matches!(
            admin.modify("", vec![m_replace(ATTR_DESCRIPTION, &["x"])]),
            Err(OperationError::UnwillingToPerform(_))
        ));
        // Nothing above was applied.
        assert_eq!(admin.list("ou=a,ou=system").unwrap().len(), 1);
        assert!(admin.lookup("ou=c,ou=system", &[SELECT_ALL_USER]).is_ok());
    }

    #[ds_test]
    fn test_referral_entries(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "ou=remote,ou=system",
                (ATTR_OBJECTCLASS, CLASS_REFERRAL),
                (ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT),
                (ATTR_OU, "remote"),
                (ATTR_REF, "ldap://other.example.com/ou=remote")
            ))
            .unwrap();

        let expected = vec!["ldap://other.example.com/ou=remote".to_string()];
        let err = admin
            .lookup("ou=remote,ou=system", &[SELECT_ALL_USER])
            .unwrap_err();
        assert!(matches!(err, OperationError::Referral(ref refs) if *refs == expected));
        // Names below the referral are answered by it.
        let err = admin
            .lookup("cn=x,ou=remote,ou=system", &[SELECT_ALL_USER])
            .unwrap_err();
        assert!(matches!(err, OperationError::Referral(ref refs) if *refs == expected));

        let manager = ds.admin_session().with_manage_dsa_it();
        let e = manager
            .lookup("ou=remote,ou=system", &[SELECT_ALL_USER])
            .unwrap();
        assert!(e.has_class(CLASS_REFERRAL));
        assert!(matches!(
            manager.lookup("cn=x,ou=remote,ou=system", &[SELECT_ALL_USER]),
            Err(OperationError::NoSuchObject { .. })
        ));
        manager.delete("ou=remote,ou=system").unwrap();
    }
}
