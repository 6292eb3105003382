//! Commands the page shell sends on stdin, one per line.

use anyhow::{anyhow, bail, Context, Result};

use fraudcache_core::http::Method;
use fraudcache_core::models::ModelChoice;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Answer to the update prompt: `update` or `later`.
    Update { accepted: bool },
    /// `push [text]`
    Push { text: Option<String> },
    /// `predict <model> <v1,v2,...>`
    Predict { model: ModelChoice, features: Vec<f64> },
    /// `fetch <GET|POST> <url-or-path> [document | <json body>]`
    Fetch {
        method: Method,
        target: String,
        document: bool,
        body: Option<serde_json::Value>,
    },
}

/// Parse one line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "update" => Command::Update { accepted: true },
        "later" => Command::Update { accepted: false },
        "push" => Command::Push {
            text: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "predict" => {
            let (model, values) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: predict <model> <v1,v2,...>"))?;
            let model = ModelChoice::from_id(model).ok_or_else(|| anyhow!("unknown model: {}", model))?;
            let features = values
                .split(',')
                .map(|v| v.trim().parse::<f64>().map_err(|e| anyhow!("bad value {:?}: {}", v, e)))
                .collect::<Result<Vec<_>>>()?;
            Command::Predict { model, features }
        }
        "fetch" => parse_fetch(rest)?,
        other => bail!("unknown command: {}", other),
    };
    Ok(Some(command))
}

fn parse_fetch(rest: &str) -> Result<Command> {
    const USAGE: &str = "usage: fetch <GET|POST> <url> [document | <json body>]";

    let mut parts = rest.splitn(3, char::is_whitespace);
    let method = match parts.next().map(str::to_ascii_uppercase).as_deref() {
        Some("GET") => Method::GET,
        Some("POST") => Method::POST,
        Some("") | None => bail!(USAGE),
        Some(other) => bail!("unsupported method: {}", other),
    };
    let target = parts.next().filter(|t| !t.is_empty()).ok_or_else(|| anyhow!(USAGE))?;
    let extra = parts.next().map(str::trim).unwrap_or("");

    let (document, body) = match extra {
        "" => (false, None),
        "document" if method == Method::GET => (true, None),
        "document" => bail!("only GET requests can be navigations"),
        json if method == Method::POST => (false, Some(serde_json::from_str(json).context("bad JSON body")?)),
        other => bail!("unexpected argument: {}", other),
    };

    Ok(Command::Fetch {
        method,
        target: target.to_string(),
        document,
        body,
    })
}
