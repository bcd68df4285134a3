//! Plugin role discriminator.

use regex::Regex;

/// The package's position in the host framework's component model.
///
/// Libraries carry no role at all; unknown roles are preserved verbatim so the
/// pipeline can still reject them with a useful message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginRole {
    BackendPlugin,
    BackendPluginModule,
    FrontendPlugin,
    FrontendPluginModule,
    NodeLibrary,
    WebLibrary,
    Other(String),
}

impl PluginRole {
    /// Parse a role string from a descriptor.
    pub fn from_str(raw: &str) -> Self {
        match raw {
            "backend-plugin" => PluginRole::BackendPlugin,
            "backend-plugin-module" => PluginRole::BackendPluginModule,
            "frontend-plugin" => PluginRole::FrontendPlugin,
            "frontend-plugin-module" => PluginRole::FrontendPluginModule,
            "node-library" => PluginRole::NodeLibrary,
            "web-library" => PluginRole::WebLibrary,
            other => PluginRole::Other(other.to_string()),
        }
    }

    /// The role string as it appears in descriptors.
    pub fn as_str(&self) -> &str {
        match self {
            PluginRole::BackendPlugin => "backend-plugin",
            PluginRole::BackendPluginModule => "backend-plugin-module",
            PluginRole::FrontendPlugin => "frontend-plugin",
            PluginRole::FrontendPluginModule => "frontend-plugin-module",
            PluginRole::NodeLibrary => "node-library",
            PluginRole::WebLibrary => "web-library",
            PluginRole::Other(s) => s,
        }
    }

    /// Whether the backend export pipeline handles this role.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            PluginRole::BackendPlugin | PluginRole::BackendPluginModule
        )
    }

    /// Whether the frontend export pipeline handles this role.
    pub fn is_frontend(&self) -> bool {
        matches!(
            self,
            PluginRole::FrontendPlugin | PluginRole::FrontendPluginModule
        )
    }

    /// The name-suffix pattern used to guess sibling packages of this role.
    ///
    /// Backend plugins conventionally ship alongside `-common` and `-node`
    /// siblings whose names derive from the plugin name by suffix
    /// substitution.
    pub fn sibling_suffix_pattern(&self) -> Option<Regex> {
        let pattern = match self {
            PluginRole::BackendPlugin => "-backend$",
            PluginRole::BackendPluginModule => "-backend-module-.+$",
            PluginRole::NodeLibrary => "-node$",
            _ => return None,
        };
        Some(Regex::new(pattern).expect("role suffix pattern is valid"))
    }

    /// Synthesize candidate sibling package names for this role.
    ///
    /// Returns an empty list when the role has no suffix convention or the
    /// name does not match it.
    pub fn sibling_names(&self, name: &str) -> Vec<String> {
        let Some(re) = self.sibling_suffix_pattern() else {
            return Vec::new();
        };
        if !re.is_match(name) {
            return Vec::new();
        }
        ["-common", "-node"]
            .iter()
            .map(|suffix| re.replace(name, *suffix).into_owned())
            .filter(|candidate| candidate != name)
            .collect()
    }
}

impl std::fmt::Display for PluginRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
