//! Checks entries against the object class rules before they are stored, and keeps
//! names built from attributes the server owns out of the tree.

use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;
use crate::server::ServiceCore;

pub struct SchemaInterceptor;

fn check_naming(rdn: &Rdn, core: &ServiceCore) -> Result<(), OperationError> {
    let schema = core.schema.read();
    for ava in rdn.avas() {
        let operational = schema
            .resolve_attribute(ava.oid())
            .map(|sa| sa.is_operational())
            .unwrap_or(false);
        if operational {
            request_info!(attr = %ava.attr(), "operational attribute used for naming");
            return Err(OperationError::NamingViolation(format!(
                "{} can not be used in an RDN",
                ava.attr()
            )));
        }
    }
    Ok(())
}

fn schema_err(dn: &Dn, e: SchemaError) -> OperationError {
    request_error!(dn = %dn, ?e, "schema violation");
    e.into()
}

impl Interceptor for SchemaInterceptor {
    fn id(&self) -> &'static str {
        "schema"
    }

    fn flag(&self) -> Bypass {
        Bypass::SCHEMA
    }

    #[instrument(level = "debug", name = "schema::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        let core = next.core();
        if let Some(rdn) = ctx.dn.rdn() {
            check_naming(rdn, core)?;
        }
        {
            let schema = core.schema.read();
            ctx.entry.ensure_rdn_values(&schema)?;
            ctx.entry
                .schema_check(&schema)
                .map_err(|e| schema_err(&ctx.dn, e))?;
        }
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "schema::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        let core = next.core();
        let original = match &ctx.original {
            Some(e) => e.clone(),
            None => core.nexus.lookup_dn(&ctx.dn)?,
        };
        let mut after = original.clone_new();
        after.apply_modlist(&ctx.mods)?;
        if !after.rdn_values_present() {
            request_info!(dn = %ctx.dn, "modification removes a naming value");
            return Err(OperationError::NotAllowedOnRdn);
        }
        after
            .schema_check(&core.schema.read())
            .map_err(|e| schema_err(&ctx.dn, e))?;
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "schema::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        check_naming(&ctx.new_rdn, next.core())?;
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "schema::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        check_naming(&ctx.new_rdn, next.core())?;
        next.move_and_rename(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[ds_test]
    fn test_schema_refuses_entry_without_must(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let r = admin.add(entry_init!(
            "cn=nosn,ou=system",
            (ATTR_OBJECTCLASS, CLASS_PERSON),
            (ATTR_CN, "nosn")
        ));
        assert!(matches!(
            r,
            Err(OperationError::SchemaViolation(SchemaError::MissingMustAttribute(_)))
        ));
    }

    #[ds_test]
    fn test_schema_refuses_removing_naming_value(ds: &DirectoryService) {
        let admin = ds.admin_session();
        admin
            .add(entry_init!(
                "cn=test,ou=system",
                (ATTR_OBJECTCLASS, CLASS_PERSON),
                (ATTR_CN, "test"),
                (ATTR_SN, "TEST")
            ))
            .unwrap();
        let r = admin.modify("cn=test,ou=system", vec![m_purge(ATTR_CN)]);
        assert_eq!(r, Err(OperationError::NotAllowedOnRdn));
        let r = admin.modify("cn=test,ou=system", vec![m_add(ATTR_CN, &["other"])]);
        assert!(r.is_ok());
    }

    #[ds_test]
    fn test_schema_refuses_operational_naming(ds: &DirectoryService) {
        let admin = ds.admin_session();
        let r = admin.add(entry_init!(
            "createTimestamp=20240101000000Z,ou=system",
            (ATTR_OBJECTCLASS, CLASS_EXTENSIBLE_OBJECT),
            (ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_UNIT),
            (ATTR_OU, "x")
        ));
        assert!(matches!(r, Err(OperationError::NamingViolation(_))));
    }
}
