//! Built-in rule table for the Expo / Metro dev server.
//!
//! Order matters: fatal and remediable signals come before ready signals so
//! an error line that happens to embed a URL is never reported as ready.

use crate::rules::{MatchRule, Outcome, RemediableKind, RuleError, Trigger};

/// Ready URL on a custom scheme with host and numeric port.
const READY_URL: &str = r"(exps?://[\w.\-]+:\d+)";
const DEVTOOLS_BANNER: &str = r"Expo DevTools is running at (\S+)";

fn remediable(text: &str, kind: RemediableKind) -> MatchRule {
    MatchRule::new(Trigger::substring(text), Outcome::Remediable { kind })
}

fn fatal(text: &str, kind: &str) -> MatchRule {
    MatchRule::new(
        Trigger::substring(text),
        Outcome::Fatal {
            kind: kind.to_string(),
        },
    )
}

fn info(text: &str, label: &str) -> MatchRule {
    MatchRule::new(
        Trigger::substring(text),
        Outcome::Info {
            label: label.to_string(),
        },
    )
}

/// Build the built-in rules.
pub fn builtin_rules() -> Result<Vec<MatchRule>, RuleError> {
    Ok(vec![
        fatal("JavaScript heap out of memory", "heap-exhausted"),
        fatal("ERR_OSSL_EVP_UNSUPPORTED", "unsupported-node-openssl"),
        remediable("ENOSPC", RemediableKind::FileWatcherLimitExceeded),
        remediable("EMFILE", RemediableKind::FileWatcherLimitExceeded),
        remediable("Cannot find module", RemediableKind::ModuleNotFound),
        remediable("Module not found", RemediableKind::ModuleNotFound),
        remediable(
            "store.clear is not a function",
            RemediableKind::BundlerCacheCorrupt,
        ),
        remediable(
            "Metro Bundler process exited",
            RemediableKind::BundlerProcessExitedUnexpectedly,
        ),
        MatchRule::new(Trigger::regex(READY_URL)?, Outcome::Ready),
        MatchRule::new(Trigger::regex(DEVTOOLS_BANNER)?, Outcome::Ready),
        info("Starting project", "starting"),
        info("Starting Metro Bundler", "starting"),
        info("Building bundle", "building"),
        info("Bundling", "building"),
    ])
}
