//! Shell command classifier for the `cli` surface.
//!
//! Commands are split on whitespace and never handed to a shell, so quoting
//! and every other shell metacharacter is refused outright.

pub(super) const CONFIRM_REQUIRED: &str = "confirm_required";

const METACHARS: &[char] = &[';', '|', '&', '$', '>', '<', '`', '\'', '"'];

/// Read-only commands and the flags each may carry.
const LEVEL0: &[(&str, &[&str])] = &[
    ("pwd", &[]),
    ("ls", &["-l", "-a", "-la", "-al"]),
    ("whoami", &[]),
    ("cat", &[]),
    ("head", &["-n"]),
    ("tail", &["-n"]),
];

/// Local writes. Allowed only with confirmation.
const LEVEL1: &[&str] = &["mkdir", "touch", "echo"];

const LEVEL2: &[&str] = &["rm", "sudo", "chmod", "kill", "curl", "wget"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellClass {
    /// Auto-allowed.
    ReadOnly,
    /// Needs `confirmed = true`.
    NeedsConfirm,
    Denied(String),
}

pub fn classify(command: &str) -> ShellClass {
    if command.contains(METACHARS) {
        return ShellClass::Denied("metachar_deny".into());
    }
    let words: Vec<&str> = command.split_whitespace().collect();
    let Some((&name, args)) = words.split_first() else {
        return ShellClass::Denied("empty_command".into());
    };

    if LEVEL2.contains(&name) {
        return ShellClass::Denied(format!("shell_deny_lv2:{name}"));
    }

    if name == "git" {
        return match args.split_first() {
            Some((&"status", rest)) if flags_ok(rest, &[]) => ShellClass::ReadOnly,
            Some((&"status", _)) => ShellClass::Denied("flag_deny".into()),
            Some((&"commit", _)) => ShellClass::NeedsConfirm,
            _ => ShellClass::Denied("git_subcommand_deny".into()),
        };
    }

    if let Some((_, allowed)) = LEVEL0.iter().find(|(cmd, _)| *cmd == name) {
        return if flags_ok(args, allowed) {
            ShellClass::ReadOnly
        } else {
            ShellClass::Denied("flag_deny".into())
        };
    }

    if LEVEL1.contains(&name) {
        return ShellClass::NeedsConfirm;
    }

    ShellClass::Denied("not_allowlisted".into())
}

fn flags_ok(args: &[&str], allowed: &[&str]) -> bool {
    args.iter()
        .filter(|a| a.starts_with('-'))
        .all(|a| allowed.contains(a))
}

/// First argument that reaches outside the workspace: absolute, home-relative
/// or climbing with `..`.
pub fn path_escape(command: &str) -> Option<&str> {
    command.split_whitespace().skip(1).find(|arg| {
        arg.starts_with('/')
            || arg.starts_with('~')
            || arg.split('/').any(|segment| segment == "..")
    })
}
