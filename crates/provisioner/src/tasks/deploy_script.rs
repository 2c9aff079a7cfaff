use std::sync::OnceLock;

use regex::Regex;

pub const INITIAL_DEPLOYMENT_BEGIN: &str = "# Begin Initial Deployment:";
pub const INITIAL_DEPLOYMENT_END: &str = "# End Initial Deployment";

fn initial_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?ms)^# Begin Initial Deployment:.*?^# End Initial Deployment[ \t]*(?:\r?\n|\z)")
            .unwrap_or_else(|error| unreachable!("invalid initial deployment pattern: {error}"))
    })
}

/// Builds the deploy script for a fresh site: the initial-only commands fenced by the markers,
/// followed by the steady-state commands.
#[must_use]
pub fn render_deployment_script(initial: &str, steady: &str) -> String {
    let mut script = String::new();
    script.push_str(INITIAL_DEPLOYMENT_BEGIN);
    script.push('\n');
    script.push_str(initial.trim_end_matches(['\r', '\n']));
    script.push('\n');
    script.push_str(INITIAL_DEPLOYMENT_END);
    script.push('\n');
    script.push_str(steady);
    script
}

/// Removes every fenced initial-deployment block, markers included. Text outside the blocks is
/// returned unchanged.
#[must_use]
pub fn strip_initial_deployment_block(script: &str) -> String {
    initial_block_pattern().replace_all(script, "").into_owned()
}
