//! Loader for proving-session configuration with YAML + environment overlays.
//!
//! A `webproof.yaml` names the notary, the WebDriver endpoint, where captured
//! exchanges are spooled, and the step sequence of the proof request. Any key
//! can be overridden from the environment as `WEBPROOF_<SECTION>__<KEY>`
//! (e.g. `WEBPROOF_NOTARY__URL`), and string values may reference other
//! variables as `${VAR}`; references are expanded after all sources merge.
use config::{Config, ConfigError, Environment, File, FileFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use webproof_transcript::DisclosurePolicy;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct WebProofConfig {
    pub version: Option<String>,
    pub notary: NotaryConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub request: WebProofRequestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotaryConfig {
    pub url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl NotaryConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_navigation_poll_ms")]
    pub navigation_poll_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: false,
            navigation_poll_ms: default_navigation_poll_ms(),
        }
    }
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".into()
}
fn default_navigation_poll_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// How often the spool directory is rescanned while waiting for a pair.
    #[serde(default = "default_capture_poll_ms")]
    pub poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            spool_dir: default_spool_dir(),
            poll_ms: default_capture_poll_ms(),
        }
    }
}

impl CaptureConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./captures")
}
fn default_capture_poll_ms() -> u64 {
    200
}

/// Caller-owned waiting policy. Without a timeout, `expectUrl` waits forever.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub expect_url_timeout_secs: Option<u64>,
}

impl SessionConfig {
    pub fn expect_url_timeout(&self) -> Option<Duration> {
        self.expect_url_timeout_secs.map(Duration::from_secs)
    }
}

/// The proof request: immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebProofRequestConfig {
    pub notary_public_key: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    pub steps: Vec<StepConfig>,
}

/// Shared fields + the per-kind details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub label: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The tag is `kind`; each variant carries what its handler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StepKind {
    StartPage {
        link: String,
    },
    ExpectUrl {
        link: UrlPattern,
    },
    Notarize {
        link: UrlPattern,
        #[serde(default)]
        button_text: Option<String>,
        #[serde(default)]
        disclosure: DisclosureConfig,
    },
    NotarizeGql {
        link: UrlPattern,
        #[serde(default)]
        button_text: Option<String>,
        /// Expected `operationName` of the captured GraphQL request.
        operation: String,
        #[serde(default)]
        disclosure: DisclosureConfig,
    },
    ExtractVariables {
        link: UrlPattern,
        /// JSON paths to read; empty means every string leaf.
        #[serde(default)]
        variables: Vec<String>,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::StartPage { .. } => "startPage",
            StepKind::ExpectUrl { .. } => "expectUrl",
            StepKind::Notarize { .. } => "notarize",
            StepKind::NotarizeGql { .. } => "notarizeGql",
            StepKind::ExtractVariables { .. } => "extractVariables",
        }
    }

    pub fn button_text(&self) -> Option<&str> {
        match self {
            StepKind::Notarize { button_text, .. } | StepKind::NotarizeGql { button_text, .. } => {
                button_text.as_deref()
            }
            _ => None,
        }
    }

    fn url_pattern(&self) -> Option<&UrlPattern> {
        match self {
            StepKind::StartPage { .. } => None,
            StepKind::ExpectUrl { link }
            | StepKind::Notarize { link, .. }
            | StepKind::NotarizeGql { link, .. }
            | StepKind::ExtractVariables { link, .. } => Some(link),
        }
    }
}

/// Disclosure policies for the two halves of a notarized exchange. A missing
/// half is disclosed in full.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisclosureConfig {
    #[serde(default)]
    pub request: Option<DisclosurePolicy>,
    #[serde(default)]
    pub response: Option<DisclosurePolicy>,
}

/// URL matching for navigation and capture steps.
///
/// A plain string must equal the URL exactly; `{ pattern: ... }` is a glob
/// where `*` matches any run of characters and everything else is literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlPattern {
    Exact(String),
    Glob { pattern: String },
}

impl UrlPattern {
    /// Compile into a matcher.
    ///
    /// ```
    /// use webproof_config::UrlPattern;
    ///
    /// let glob = UrlPattern::Glob { pattern: "https://x.com/*/status/*".into() };
    /// let m = glob.matcher().unwrap();
    /// assert!(m.is_match("https://x.com/ana/status/42"));
    /// assert!(!m.is_match("https://x.com.evil.test/ana/status/42"));
    ///
    /// let exact = UrlPattern::Exact("https://x.com/home".into()).matcher().unwrap();
    /// assert!(!exact.is_match("https://x.com/home?tab=1"));
    /// ```
    pub fn matcher(&self) -> Result<UrlMatcher, regex::Error> {
        match self {
            UrlPattern::Exact(url) => Ok(UrlMatcher::Exact(url.clone())),
            UrlPattern::Glob { pattern } => {
                let body = pattern
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                Ok(UrlMatcher::Glob(Regex::new(&format!("^{body}$"))?))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UrlPattern::Exact(url) => url,
            UrlPattern::Glob { pattern } => pattern,
        }
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum UrlMatcher {
    Exact(String),
    Glob(Regex),
}

impl UrlMatcher {
    pub fn is_match(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Exact(expected) => expected.as_bytes() == url.as_bytes(),
            UrlMatcher::Glob(re) => re.is_match(url),
        }
    }
}

/// `$XDG_CONFIG_HOME/webproof/webproof.yaml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("webproof").join("webproof.yaml"))
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

fn validate(cfg: &WebProofConfig) -> Result<(), ConfigError> {
    let request = &cfg.request;
    if request.steps.is_empty() {
        return Err(ConfigError::Message("request.steps must not be empty".into()));
    }
    if request.notary_public_key.trim().is_empty() {
        return Err(ConfigError::Message(
            "request.notary_public_key must not be empty".into(),
        ));
    }
    for (idx, step) in request.steps.iter().enumerate() {
        if let Some(pattern) = step.kind.url_pattern() {
            pattern.matcher().map_err(|e| {
                ConfigError::Message(format!(
                    "request.steps[{idx}] ({}): invalid link pattern `{pattern}`: {e}",
                    step.label
                ))
            })?;
        }
    }
    Ok(())
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct WebProofConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for WebProofConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl WebProofConfigLoader {
    /// Empty loader; `WEBPROOF_` env overrides are layered over every file
    /// and snippet at [`load`](Self::load) time.
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped so
    /// deployments can rely purely on the environment.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline YAML snippet.
    ///
    /// ```
    /// use webproof_config::{StepKind, WebProofConfigLoader};
    ///
    /// let cfg = WebProofConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// notary:
    ///   url: "http://notary.test"
    /// request:
    ///   notary_public_key: "pk"
    ///   steps:
    ///     - kind: startPage
    ///       label: "Open"
    ///       link: "https://x.com/login"
    ///     - kind: expectUrl
    ///       label: "Wait"
    ///       link: { pattern: "https://x.com/home*" }
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(cfg.request.steps.len(), 2);
    /// assert!(matches!(cfg.request.steps[1].kind, StepKind::ExpectUrl { .. }));
    /// assert_eq!(cfg.browser.webdriver_url, "http://localhost:9515");
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, FileFormat::Yaml));
        self
    }

    /// Merge the sources, expand `${VAR}` references and validate the result.
    pub fn load(self) -> Result<WebProofConfig, ConfigError> {
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix("WEBPROOF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: WebProofConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;
        validate(&typed)?;
        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webproof_transcript::Token;

    const MINIMAL: &str = r#"
notary:
  url: "http://notary.test"
request:
  notary_public_key: "pk"
  steps:
    - kind: startPage
      label: "Open"
      link: "https://x.com/login"
"#;

    #[test]
    fn expands_in_array_and_object() {
        temp_env::with_vars([("CITY", Some("Winston")), ("STATE", Some("NC"))], || {
            let mut v = json!(["hello-$CITY", { "loc": "${CITY}-${STATE}" }, 42, null]);
            expand_env_in_value(&mut v);
            assert_eq!(v, json!(["hello-Winston", { "loc": "Winston-NC" }, 42, null]));
        });
    }

    #[test]
    fn expands_recursively_across_env_values() {
        temp_env::with_vars(
            [
                ("BAZ", Some("qux")),
                ("BAR", Some("mid-${BAZ}")),
                ("FOO", Some("start-${BAR}-end")),
            ],
            || {
                let mut v = json!("X=${FOO}");
                expand_env_in_value(&mut v);
                assert_eq!(v, json!("X=start-mid-qux-end"));
            },
        );
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}-y");
            expand_env_in_value(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.ends_with("-y"));
            assert!(s.contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${WEBPROOF_DOES_NOT_EXIST}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("hi-${WEBPROOF_DOES_NOT_EXIST}"));
    }

    #[test]
    fn step_kinds_parse_with_their_fields() {
        let step: StepConfig = serde_json::from_value(json!({
            "kind": "notarizeGql",
            "label": "Prove",
            "link": { "pattern": "https://x.com/i/api/graphql/*" },
            "button_text": "Go",
            "operation": "UserByScreenName",
            "disclosure": {
                "response": { "mode": "reveal", "tokens": [ { "json_path": "data.user.id" } ] }
            }
        }))
        .unwrap();
        assert_eq!(step.kind.name(), "notarizeGql");
        assert_eq!(step.kind.button_text(), Some("Go"));
        let StepKind::NotarizeGql { operation, disclosure, .. } = &step.kind else {
            panic!("expected notarizeGql, got {:?}", step.kind);
        };
        assert_eq!(operation, "UserByScreenName");
        assert!(disclosure.request.is_none());
        assert_eq!(
            disclosure.response,
            Some(DisclosurePolicy::Reveal(vec![Token::JsonPath("data.user.id".into())]))
        );
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        let err = serde_json::from_value::<StepConfig>(json!({
            "kind": "clickButton", "label": "x", "link": "https://x"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let m = UrlPattern::Glob {
            pattern: "https://a.test/x?y=*".into(),
        }
        .matcher()
        .unwrap();
        assert!(m.is_match("https://a.test/x?y=1"));
        assert!(!m.is_match("https://aXtest/x?y=1"));
        assert!(!m.is_match("https://a.test/xy=1"));
    }

    #[test]
    fn empty_steps_fail_validation() {
        let err = WebProofConfigLoader::new()
            .with_yaml_str(
                "notary: { url: http://n }\nrequest: { notary_public_key: pk, steps: [] }",
            )
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("steps"));
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let cfg = WebProofConfigLoader::new()
            .with_yaml_str(MINIMAL)
            .load()
            .unwrap();
        assert_eq!(cfg.browser.navigation_poll_ms, 250);
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.capture.spool_dir, PathBuf::from("./captures"));
        assert_eq!(cfg.capture.poll_interval(), Duration::from_millis(200));
        assert!(cfg.session.expect_url_timeout().is_none());
        assert!(cfg.notary.timeout().is_none());
        assert!(cfg.request.logo_url.is_none());
    }
}
