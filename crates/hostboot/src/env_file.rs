//! Application environment file (`<app_dir>/.env`)

use crate::params::BootstrapParameters;

/// Keys in the order they are written
pub const ENV_KEYS: [&str; 8] = [
    "DEBUG",
    "SECRET_KEY",
    "DB_HOST",
    "DB_PORT",
    "DB_NAME",
    "DB_USER",
    "DB_PASSWORD",
    "STATIC_ROOT",
];

/// Key/value pairs for the application settings
pub fn env_entries(params: &BootstrapParameters) -> Vec<(&'static str, String)> {
    let values = [
        (if params.debug { "True" } else { "False" }).to_string(),
        params.secret_key.clone(),
        params.db_host.clone(),
        params.db_port.to_string(),
        params.db_name.clone(),
        params.db_user.clone(),
        params.db_password.clone(),
        params.static_root.display().to_string(),
    ];
    ENV_KEYS.into_iter().zip(values).collect()
}

/// Render `KEY=value` lines, readable by both dotenv loaders and systemd
pub fn render_env_file(params: &BootstrapParameters) -> String {
    env_entries(params)
        .into_iter()
        .map(|(key, value)| format!("{key}={}\n", quote(&value)))
        .collect()
}

fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/:@+,".contains(c));
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' | '$' | '`' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::sample;

    #[test]
    fn test_env_file_has_all_keys_in_order() {
        let text = render_env_file(&sample());
        let keys: Vec<&str> = text
            .lines()
            .map(|l| l.split('=').next().unwrap())
            .collect();
        assert_eq!(keys, ENV_KEYS);
    }

    #[test]
    fn test_values_quoted_when_needed() {
        let text = render_env_file(&sample());
        assert!(text.contains("DEBUG=False\n"));
        assert!(text.contains("DB_PORT=5432\n"));
        assert!(text.contains("DB_PASSWORD=\"s3cret pass\"\n"));
        assert!(text.contains("STATIC_ROOT=/var/www/notes/static\n"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"a"b$c"#), r#""a\"b\$c""#);
        assert_eq!(quote(""), "\"\"");
    }
}
