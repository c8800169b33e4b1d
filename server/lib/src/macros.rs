/// Build an [`EntryInit`](crate::entry::EntryInit) from a DN and a list of
/// `(attribute, value)` pairs.
#[macro_export]
macro_rules! entry_init {
    ($dn:expr) => {{
        $crate::entry::EntryInit::new($dn)
    }};
    ($dn:expr, $($ava:expr),+ $(,)?) => {{
        let mut ei = $crate::entry::EntryInit::new($dn);
        $(
            ei.add_ava($ava.0, $ava.1);
        )*
        ei
    }};
}

/// Parse an RFC 4515 filter string and resolve it against a schema transaction.
#[allow(unused_macros)]
#[cfg(test)]
macro_rules! filter_valid {
    ($schema:expr, $s:expr) => {{
        $crate::filter::Filter::parse($s)
            .and_then(|f| f.validate($schema))
            .expect("invalid filter")
    }};
}

/// Run an operation as the administrator and unwrap its result, for test setup.
#[allow(unused_macros)]
#[cfg(test)]
macro_rules! admin_add {
    ($server:expr, $($ei:expr),+ $(,)?) => {{
        let session = $server.admin_session();
        $(
            session.add($ei).expect("failed to add test entry");
        )*
    }};
}
