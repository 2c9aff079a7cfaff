use std::sync::OnceLock;

use regex::{NoExpand, Regex};

struct CredentialPatterns {
    database: Regex,
    username: Regex,
    password: Regex,
}

fn credential_patterns() -> &'static CredentialPatterns {
    static PATTERNS: OnceLock<CredentialPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let line = |key: &str| {
            Regex::new(&format!(r"(?m)^{key}=[^\r\n]*"))
                .unwrap_or_else(|error| unreachable!("invalid {key} pattern: {error}"))
        };

        CredentialPatterns {
            database: line("DB_DATABASE"),
            username: line("DB_USERNAME"),
            password: line("DB_PASSWORD"),
        }
    })
}

/// Points an environment file at the branch database.
///
/// Only the values of existing `DB_DATABASE=`, `DB_USERNAME=` and `DB_PASSWORD=` lines change;
/// every other byte, line endings included, is preserved. Missing keys are not added.
#[must_use]
pub fn rewrite_database_credentials(content: &str, name: &str, password: &str) -> String {
    let patterns = credential_patterns();

    let database_line = format!("DB_DATABASE={name}");
    let username_line = format!("DB_USERNAME={name}");
    let password_line = format!("DB_PASSWORD={password}");

    let content = patterns
        .database
        .replace_all(content, NoExpand(&database_line));
    let content = patterns
        .username
        .replace_all(&content, NoExpand(&username_line));
    let content = patterns
        .password
        .replace_all(&content, NoExpand(&password_line));

    content.into_owned()
}
