use serde::{Deserialize, Serialize};

/// Apps and accessibility roles the gate treats as canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonConfig {
    #[serde(default = "default_allowed_apps")]
    pub allowed_apps: Vec<String>,
    #[serde(default = "default_interactive_roles")]
    pub interactive_roles: Vec<String>,
    /// Roles that take free-form text input. UI commands aimed at them deny.
    #[serde(default = "default_blocked_roles")]
    pub blocked_roles: Vec<String>,
}

fn default_allowed_apps() -> Vec<String> {
    ["Finder", "Safari", "System Settings", "Notes", "Terminal"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_interactive_roles() -> Vec<String> {
    [
        "AXButton",
        "AXRadioButton",
        "AXCheckBox",
        "AXTextField",
        "AXSearchField",
        "AXComboBox",
        "AXList",
        "AXRow",
        "AXTab",
        "AXToolbar",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_blocked_roles() -> Vec<String> {
    vec!["AXTextArea".into(), "AXWebArea".into()]
}

impl Default for CanonConfig {
    fn default() -> Self {
        Self {
            allowed_apps: default_allowed_apps(),
            interactive_roles: default_interactive_roles(),
            blocked_roles: default_blocked_roles(),
        }
    }
}
