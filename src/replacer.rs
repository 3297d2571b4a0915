//! The host framework's request-scoped variable replacer.
//!
//! The real replacer lives in the host framework and resolves all manner of
//! `{placeholder}` syntax against request state. The failover core only ever
//! needs the subset used at provisioning time: expanding `{env.NAME}` inside
//! upstream URLs and header values before they're stored on a
//! [`crate::instance::FailoverInstance`]. We model that narrow need as a
//! trait so the engine never hard-codes `std::env` access, and tests can
//! substitute a fake replacer with deterministic output.

/// Expands `{env.NAME}`-style placeholders in configuration strings.
///
/// Resolution happens once, at provisioning time; post-resolution values
/// are stored and logged when they differ from the input.
pub trait VariableReplacer: Send + Sync {
    fn replace(&self, input: &str) -> String;
}

/// Default replacer: resolves `{env.NAME}` against the process environment.
/// Unknown or malformed placeholders are left verbatim rather than erroring —
/// provisioning should not fail because of one unresolved placeholder; it's
/// surfaced at the call site via logging instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvReplacer;

impl VariableReplacer for EnvReplacer {
    fn replace(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("{env.") {
            let Some(end) = rest[start..].find('}') else {
                out.push_str(rest);
                return out;
            };
            let end = start + end;
            out.push_str(&rest[..start]);
            let name = &rest[start + "{env.".len()..end];
            match std::env::var(name) {
                Ok(value) => out.push_str(&value),
                Err(_) => {
                    tracing::warn!("replacer: unresolved placeholder, name={}", name);
                    out.push_str(&rest[start..=end]);
                }
            }
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// A replacer that performs no substitution — useful in tests and as the
/// default when the host framework gives us already-resolved strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplacer;

impl VariableReplacer for NoopReplacer {
    fn replace(&self, input: &str) -> String {
        input.to_string()
    }
}
