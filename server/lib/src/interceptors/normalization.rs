//! Resolves the names and filters an operation carries against the schema, so every
//! later stage compares normalised forms only.

use crate::be::search::EntryFilteringCursor;
use crate::event::SearchFilter;
use crate::interceptors::{Interceptor, NextInterceptor};
use crate::prelude::*;

pub struct NormalizationInterceptor;

fn normalize<S: SchemaTransaction + ?Sized>(schema: &S, dn: &Dn) -> Result<Dn, OperationError> {
    dn.clone().normalized(schema).map_err(|e| {
        request_error!(dn = %dn, ?e, "unable to normalise name");
        e
    })
}

impl Interceptor for NormalizationInterceptor {
    fn id(&self) -> &'static str {
        "normalization"
    }

    fn flag(&self) -> Bypass {
        Bypass::NORMALIZATION
    }

    #[instrument(level = "debug", name = "normalization::add", skip_all)]
    fn add(&self, next: &NextInterceptor<'_>, ctx: &mut AddContext) -> Result<(), OperationError> {
        ctx.dn = normalize(&next.core().schema.read(), &ctx.dn)?;
        ctx.entry.set_dn(ctx.dn.clone());
        next.add(ctx)
    }

    #[instrument(level = "debug", name = "normalization::delete", skip_all)]
    fn delete(&self, next: &NextInterceptor<'_>, ctx: &mut DeleteContext) -> Result<(), OperationError> {
        ctx.dn = normalize(&next.core().schema.read(), &ctx.dn)?;
        next.delete(ctx)
    }

    #[instrument(level = "debug", name = "normalization::modify", skip_all)]
    fn modify(&self, next: &NextInterceptor<'_>, ctx: &mut ModifyContext) -> Result<(), OperationError> {
        ctx.dn = normalize(&next.core().schema.read(), &ctx.dn)?;
        next.modify(ctx)
    }

    #[instrument(level = "debug", name = "normalization::rename", skip_all)]
    fn rename(&self, next: &NextInterceptor<'_>, ctx: &mut RenameContext) -> Result<(), OperationError> {
        {
            let schema = next.core().schema.read();
            ctx.dn = normalize(&schema, &ctx.dn)?;
            ctx.new_rdn.normalize(&schema)?;
        }
        next.rename(ctx)
    }

    #[instrument(level = "debug", name = "normalization::move", skip_all)]
    fn move_entry(&self, next: &NextInterceptor<'_>, ctx: &mut MoveContext) -> Result<(), OperationError> {
        {
            let schema = next.core().schema.read();
            ctx.dn = normalize(&schema, &ctx.dn)?;
            ctx.new_superior = normalize(&schema, &ctx.new_superior)?;
        }
        next.move_entry(ctx)
    }

    #[instrument(level = "debug", name = "normalization::move_and_rename", skip_all)]
    fn move_and_rename(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut MoveAndRenameContext,
    ) -> Result<(), OperationError> {
        {
            let schema = next.core().schema.read();
            ctx.dn = normalize(&schema, &ctx.dn)?;
            ctx.new_superior = normalize(&schema, &ctx.new_superior)?;
            ctx.new_rdn.normalize(&schema)?;
        }
        next.move_and_rename(ctx)
    }

    #[instrument(level = "debug", name = "normalization::lookup", skip_all)]
    fn lookup(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut LookupContext,
    ) -> Result<EntrySealedCommitted, OperationError> {
        ctx.dn = normalize(&next.core().schema.read(), &ctx.dn)?;
        next.lookup(ctx)
    }

    #[instrument(level = "debug", name = "normalization::list", skip_all)]
    fn list(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut ListContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        ctx.dn = normalize(&next.core().schema.read(), &ctx.dn)?;
        next.list(ctx)
    }

    #[instrument(level = "debug", name = "normalization::search", skip_all)]
    fn search(
        &self,
        next: &NextInterceptor<'_>,
        ctx: &mut SearchContext,
    ) -> Result<EntryFilteringCursor, OperationError> {
        {
            let schema = next.core().schema.read();
            ctx.base = normalize(&schema, &ctx.base)?;
            if let SearchFilter::Raw(f) = &ctx.filter {
                let valid = f.validate(&schema).map_err(|e| {
                    request_error!(filter = %f.as_fc(), ?e, "invalid search filter");
                    e
                })?;
                ctx.filter = SearchFilter::Valid(valid);
            }
        }
        next.search(ctx)
    }

    #[instrument(level = "debug", name = "normalization::compare", skip_all)]
    fn compare(&self, next: &NextInterceptor<'_>, ctx: &mut CompareContext) -> Result<bool, OperationError> {
        {
            let schema = next.core().schema.read();
            ctx.dn = normalize(&schema, &ctx.dn)?;
            if schema.resolve_attribute(ctx.attr.as_str()).is_none() {
                request_warn!(attr = %ctx.attr, "compare of an undefined attribute type");
                return Err(SchemaError::InvalidAttribute(ctx.attr.to_string()).into());
            }
        }
        next.compare(ctx)
    }

    #[instrument(level = "debug", name = "normalization::bind", skip_all)]
    fn bind(&self, next: &NextInterceptor<'_>, ctx: &mut BindContext) -> Result<(), OperationError> {
        ctx.dn = normalize(&next.core().schema.read(), &ctx.dn)?;
        next.bind(ctx)
    }
}
