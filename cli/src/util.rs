use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    std::process::exit(4);
}

pub fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn connection_error(err: &reqwest::Error) -> i32 {
    let err = json!({
        "error": "connection_error",
        "message": format!("{err}"),
        "docs_hint": "Is the API server running? Check CALLFLOW_API_URL."
    });
    eprintln!("{}", pretty(&err));
    3
}

pub fn exit_code(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Execute a GET against the API, print the JSON response, return a structured exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_get(api_url: &str, path: &str, query: &[(String, String)]) -> i32 {
    let url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(mut u) => {
            if !query.is_empty() {
                let mut q = u.query_pairs_mut();
                for (k, v) in query {
                    q.append_pair(k, v);
                }
            }
            u
        }
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{path}: {e}")
            });
            eprintln!("{}", pretty(&err));
            return 4;
        }
    };

    let resp = match client().get(url).send().await {
        Ok(r) => r,
        Err(e) => return connection_error(&e),
    };

    let status = resp.status().as_u16();
    let code = exit_code(status);
    let body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if code == 0 {
        println!("{}", pretty(&body));
    } else {
        eprintln!("{}", pretty(&body));
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes_map_to_exit_codes() {
        assert_eq!(exit_code(200), 0);
        assert_eq!(exit_code(404), 1);
        assert_eq!(exit_code(503), 2);
    }
}
