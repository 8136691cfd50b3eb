//! First-boot payload rendering
//!
//! [`BootstrapInjector`] turns validated [`BootstrapParameters`] into the shell
//! script a compute instance receives at creation. The script only persists
//! the parameters and hands over to `boot`; all real work happens in the
//! state machine. Rendering is pure: identical parameters give identical bytes.

use crate::error::{Error, Result};
use crate::params::BootstrapParameters;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Heredoc delimiter; no line of the parameters TOML may equal it
const HEREDOC_END: &str = "TIERFORM_PARAMS";

const TEMPLATE: &str = r#"#!/bin/sh
# tierform first-boot payload
set -eu

if [ -f '{{marker}}' ]; then
    echo "bootstrap already completed"
    exit 0
fi

umask 077
mkdir -p '{{params_dir}}'
cat > '{{params_path}}' <<'{{heredoc_end}}'
{{params}}
{{heredoc_end}}
chmod 600 '{{params_path}}'

if [ ! -x '{{agent}}' ]; then
    echo "bootstrap agent {{agent}} is not installed" >&2
    exit 1
fi

exec '{{agent}}' boot --params '{{params_path}}'
"#;

/// A rendered payload and its content digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub rendered: String,
    /// blake3 hex digest of `rendered`
    pub digest: String,
}

/// Renders the first-boot payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapInjector {
    agent_path: PathBuf,
    params_path: PathBuf,
    marker_path: PathBuf,
}

impl Default for BootstrapInjector {
    fn default() -> Self {
        Self {
            agent_path: PathBuf::from("/usr/local/bin/tierform"),
            params_path: PathBuf::from("/etc/tierform/bootstrap.toml"),
            marker_path: PathBuf::from(crate::machine::DEFAULT_MARKER),
        }
    }
}

impl BootstrapInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the agent binary on the image
    pub fn with_agent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_path = path.into();
        self
    }

    pub fn params_path(&self) -> &Path {
        &self.params_path
    }

    /// Render the payload for `params`
    pub fn render(&self, params: &BootstrapParameters) -> Result<Payload> {
        params.validate()?;

        let params_dir = self
            .params_path
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        let params_toml = params.to_toml()?;
        if params_toml.lines().any(|line| line.trim() == HEREDOC_END) {
            return Err(Error::invalid(
                "parameters",
                format!("a value renders as the payload delimiter {HEREDOC_END}"),
            ));
        }

        let values = BTreeMap::from([
            ("agent", self.agent_path.display().to_string()),
            ("heredoc_end", HEREDOC_END.to_string()),
            ("marker", self.marker_path.display().to_string()),
            ("params", params_toml.trim_end().to_string()),
            ("params_dir", params_dir.display().to_string()),
            ("params_path", self.params_path.display().to_string()),
        ]);

        let rendered = render_template(TEMPLATE, &values)?;
        let digest = blake3::hash(rendered.as_bytes()).to_hex().to_string();
        log::debug!("Rendered bootstrap payload ({} bytes, {})", rendered.len(), digest);

        Ok(Payload { rendered, digest })
    }
}

/// Render a `{{ name }}` template; a placeholder without a value is an error
pub fn render_template(template: &str, values: &BTreeMap<&str, String>) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template("payload.sh", template)
        .map_err(|e| Error::Serialize(format!("template parse error: {e}")))?;
    let tmpl = env
        .get_template("payload.sh")
        .map_err(|e| Error::Serialize(e.to_string()))?;

    let mut undeclared: Vec<String> = tmpl
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !values.contains_key(name.as_str()))
        .collect();
    undeclared.sort();
    if let Some(name) = undeclared.into_iter().next() {
        return Err(Error::MissingParameter { name });
    }

    tmpl.render(values).map_err(|e| match e.kind() {
        ErrorKind::UndefinedError => Error::MissingParameter {
            name: e.detail().unwrap_or("template value").to_string(),
        },
        _ => Error::Serialize(format!("template render error: {e}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::sample;

    #[test]
    fn test_render_is_deterministic() {
        let injector = BootstrapInjector::new();
        let first = injector.render(&sample()).unwrap();
        let second = injector.render(&sample()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.digest.len(), 64);
    }

    #[test]
    fn test_payload_carries_parameters() {
        let payload = BootstrapInjector::new().render(&sample()).unwrap();
        assert!(payload.rendered.starts_with("#!/bin/sh\n"));
        assert!(payload.rendered.contains("db_host = \"db.internal\""));
        assert!(payload.rendered.contains("service_port = 8000"));
        assert!(
            payload
                .rendered
                .contains("exec '/usr/local/bin/tierform' boot --params '/etc/tierform/bootstrap.toml'")
        );
        assert!(!payload.rendered.contains("{{"));
    }

    #[test]
    fn test_parameter_change_changes_digest() {
        let injector = BootstrapInjector::new();
        let mut changed = sample();
        changed.service_port = 9000;
        assert_ne!(
            injector.render(&sample()).unwrap().digest,
            injector.render(&changed).unwrap().digest
        );
    }

    #[test]
    fn test_missing_parameter_fails_render() {
        let mut params = sample();
        params.db_password = String::new();
        assert!(matches!(
            BootstrapInjector::new().render(&params),
            Err(Error::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_multiline_secret_cannot_end_heredoc() {
        let mut params = sample();
        params.secret_key = format!("abc\n{HEREDOC_END}\ntouch /tmp/pwned\n");
        assert!(matches!(
            BootstrapInjector::new().render(&params),
            Err(Error::InvalidParameter { ref name, .. }) if name == "secret_key"
        ));

        let payload = BootstrapInjector::new().render(&sample()).unwrap();
        let terminators = payload
            .rendered
            .lines()
            .filter(|line| *line == HEREDOC_END)
            .count();
        assert_eq!(terminators, 1);
    }

    #[test]
    fn test_rendered_payload_keeps_final_newline() {
        let payload = BootstrapInjector::new().render(&sample()).unwrap();
        assert!(payload.rendered.ends_with("--params '/etc/tierform/bootstrap.toml'\n"));
    }

    #[test]
    fn test_template_placeholder_without_value() {
        let values = BTreeMap::from([("a", "1".to_string())]);
        assert_eq!(render_template("x={{a}}", &values).unwrap(), "x=1");
        assert!(matches!(
            render_template("{{a}} {{ b }}", &values),
            Err(Error::MissingParameter { ref name }) if name == "b"
        ));
    }
}
