#![allow(dead_code)]

use std::sync::OnceLock;

use webproof_common::observability::{LogConfig, LogFormat};

static INIT_PATH: OnceLock<std::path::PathBuf> = OnceLock::new();

pub fn init_test_tracing() {
    let _ = INIT_PATH.get_or_init(|| {
        let config = LogConfig {
            app_name: "webproof-tests",
            log_dir: Some(std::env::temp_dir().join("webproof-tests")),
            emit_stderr: true,
            format: LogFormat::from_name(&std::env::var("WEBPROOF_LOG_FORMAT").unwrap_or_default()),
            default_filter: "debug",
        };

        webproof_common::observability::init_logging(config).unwrap_or_default()
    });
}
