//! pip install tool: closed allow-list, authorization gate, and a hard
//! wall-clock cap on the installer subprocess.

use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

/// Packages that may be installed into the kernel environment. Closed
/// set; names are compared after base-name normalization.
const ALLOWED_PACKAGES: &[&str] = &[
    "numpy", "pandas", "scipy", "statsmodels", "matplotlib", "seaborn", "plotly", "bokeh",
    "altair", "pygal", "scikit-learn", "sklearn", "xgboost", "lightgbm", "catboost", "torch",
    "torchvision", "torchaudio", "tensorflow", "keras", "transformers", "datasets", "accelerate",
    "nltk", "spacy", "gensim", "jieba", "snownlp", "pillow", "opencv-python",
    "opencv-python-headless", "imageio", "requests", "httpx", "aiohttp", "urllib3",
    "beautifulsoup4", "bs4", "lxml", "html5lib", "cssselect", "pyquery", "parsel", "openpyxl",
    "xlrd", "xlwt", "python-docx", "pypdf2", "pdfplumber", "python-pptx", "csvkit", "sqlalchemy",
    "pymysql", "psycopg2-binary", "redis", "pymongo", "tqdm", "loguru", "rich", "typer", "click",
    "pydantic", "python-dotenv", "python-dateutil", "pytz", "sympy", "networkx", "igraph",
    "faker", "arrow", "pendulum", "humanize", "tabulate", "prettytable", "colorama",
];

/// Strip extras and version specifiers down to the base name:
/// `pandas[excel]>=2.0` → `pandas`.
fn base_name(spec: &str) -> String {
    let spec = spec.trim();
    let end = spec
        .find(|c: char| "[=<>~!;@ ".contains(c))
        .unwrap_or(spec.len());
    spec[..end].trim().to_lowercase()
}

fn is_allowed(name: &str) -> bool {
    ALLOWED_PACKAGES.contains(&name)
}

pub struct PipInstallTool {
    authorized: bool,
    python_bin: String,
    timeout: Duration,
}

impl PipInstallTool {
    pub fn new(authorized: bool, python_bin: String, timeout: Duration) -> Self {
        Self {
            authorized,
            python_bin,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Tool for PipInstallTool {
    fn name(&self) -> &str {
        "pip_install"
    }

    fn description(&self) -> &str {
        "Install Python packages into the kernel environment. Only a fixed \
         set of well-known data/ML/utility packages is allowed."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "packages": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "package names, optionally with version specifiers"
                },
            },
            "required": ["packages"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        if !self.authorized {
            return ToolResult::fail_with_data(
                "Installing packages requires user authorization. Ask the user to \
                 enable agent actions for this notebook.",
                error_kind::AUTHORIZATION_REQUIRED,
                serde_json::json!({"requires_authorization": true, "action": "pip_install"}),
            );
        }

        // Accept either an array or a single space/comma separated string.
        let specs: Vec<String> = match args.get("packages") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s
                .split([',', ' '])
                .filter(|p| !p.trim().is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if specs.is_empty() {
            return ToolResult::fail("No packages given", error_kind::INVALID_INPUT);
        }

        let blocked: Vec<String> = specs
            .iter()
            .map(|s| base_name(s))
            .filter(|name| !is_allowed(name))
            .collect();
        if !blocked.is_empty() {
            return ToolResult::fail_with_data(
                format!(
                    "These packages are not on the allow-list and were not installed: {}",
                    blocked.join(", ")
                ),
                error_kind::PACKAGES_NOT_ALLOWED,
                serde_json::json!({"blocked": blocked}),
            );
        }

        tracing::info!(packages = ?specs, "running pip install");

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--no-input")
            .args(&specs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return ToolResult::fail(
                    format!(
                        "pip install exceeded the {}s limit and was aborted",
                        self.timeout.as_secs()
                    ),
                    error_kind::TOOL_TIMEOUT,
                );
            }
            Ok(Err(e)) => {
                return ToolResult::fail(
                    format!("Could not run the installer: {e}"),
                    error_kind::TOOL_EXTERNAL,
                );
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(10)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return ToolResult::fail(
                format!("pip install failed:\n{tail}"),
                error_kind::TOOL_EXTERNAL,
            );
        }

        ToolResult::ok_with_data(
            format!(
                "Installed: {}. Import them in a new cell to use them.",
                specs.join(", ")
            ),
            serde_json::json!({"installed": specs}),
        )
    }
}
