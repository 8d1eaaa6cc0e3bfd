#[cfg(test)]
use mockall::automock;

/// The platform's answer to "may this process capture audio right now".
///
/// Implementations only report the grant; they must never prompt.
#[cfg_attr(test, automock)]
pub trait PermissionOracle: Send + Sync {
    fn microphone_granted(&self) -> bool;
}

/// A fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(bool);

impl StaticPermission {
    pub fn granted() -> Self {
        Self(true)
    }

    pub fn denied() -> Self {
        Self(false)
    }
}

impl PermissionOracle for StaticPermission {
    fn microphone_granted(&self) -> bool {
        self.0
    }
}

/// Reads the grant from an environment variable on every call, so a
/// supervisor that revokes it between restarts is honoured.
///
/// Only `granted` (any case) counts as a grant; absent or other values deny.
#[derive(Debug, Clone)]
pub struct EnvPermission {
    var: String,
}

impl EnvPermission {
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

impl PermissionOracle for EnvPermission {
    fn microphone_granted(&self) -> bool {
        std::env::var(&self.var)
            .map(|value| parse_grant(&value))
            .unwrap_or(false)
    }
}

pub(crate) fn parse_grant(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("granted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_an_explicit_grant_counts() {
        assert!(parse_grant("granted"));
        assert!(parse_grant(" GRANTED\n"));
        assert!(!parse_grant("denied"));
        assert!(!parse_grant(""));
        assert!(!parse_grant("yes"));
    }

    #[test]
    fn unset_variable_denies() {
        let oracle = EnvPermission::new("MURMUR_TEST_PERMISSION_THAT_IS_NEVER_SET");
        assert!(!oracle.microphone_granted());
    }
}
