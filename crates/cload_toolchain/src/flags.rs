//! Role flags and the macro environment exposed to unit sources.
//!
//! The active role reaches a unit only through compile-time defines: one
//! switch per role (`CLOAD_ROLE_TEST=1`, every other switch `0`), the role
//! name, and one bit define per declared role option. Module identity is
//! exposed the same way so the bundled header can name the init symbol.

use std::collections::BTreeMap;

use cload_common::{Role, UnitIdentity};

/// Flags passed to every compile regardless of role.
pub const BASE_CFLAGS: &[&str] = &["-fPIC"];

/// Optimization and debug flags for a role.
pub fn role_cflags(role: Role) -> &'static [&'static str] {
    match role {
        Role::Test | Role::Debug => &["-O0", "-g"],
        Role::Optimized => &["-O3", "-g"],
        Role::Inspect => &["-O0", "-g", "-fno-omit-frame-pointer", "-fno-inline"],
        Role::Bootstrap => &["-O2"],
    }
}

/// A preprocessor define: name and optional value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Define {
    /// Macro name.
    pub name: String,
    /// Macro value; `None` defines the name without a value.
    pub value: Option<String>,
}

impl Define {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// The `-D` argument for this define.
    pub fn to_arg(&self) -> String {
        match &self.value {
            Some(value) => format!("-D{}={value}", self.name),
            None => format!("-D{}", self.name),
        }
    }
}

/// Define name of a role option, e.g. `CLOAD_TEST_LEAKS`.
pub fn option_define(role: Role, option: &str) -> String {
    format!(
        "CLOAD_{}_{}",
        role.as_str().to_ascii_uppercase(),
        option.to_ascii_uppercase()
    )
}

/// Builds the defines for one unit compiled under `role`.
pub fn macro_environment(
    identity: &UnitIdentity,
    role: Role,
    role_options: &BTreeMap<Role, Vec<String>>,
) -> Vec<Define> {
    let mut defines = vec![
        Define::new("MODULE_QNAME", quoted(&identity.module_path)),
        Define::new("MODULE_BASENAME", identity.basename()),
        Define::new("INIT_FUNCTION", identity.init_symbol()),
    ];
    if let Some(package) = identity.package() {
        defines.push(Define::new("MODULE_PACKAGE", quoted(package)));
    }

    defines.push(Define::new("CLOAD_ROLE", quoted(role.as_str())));
    for candidate in Role::ALL {
        let on = if candidate == role { "1" } else { "0" };
        defines.push(Define::new(candidate.switch(), on));
    }

    let mut mask: u32 = 0;
    for (option_role, options) in role_options {
        for (bit, option) in options.iter().enumerate() {
            let value = 1u32 << bit;
            defines.push(Define::new(
                option_define(*option_role, option),
                value.to_string(),
            ));
            if *option_role == role {
                mask |= value;
            }
        }
    }
    defines.push(Define::new("CLOAD_ROLE_MASK", mask.to_string()));
    defines
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
