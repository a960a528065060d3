//! Drives a call through the webhooks the way the carrier would: answer,
//! then post each utterance to whatever the last `<Gather>` asked for.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::util::{client, connection_error, exit_code, pretty};

static GATHER_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<Gather\b[^>]*\baction="([^"]*)""#).expect("valid gather regex")
});

/// Action URL of the first `<Gather>` in a reply, if any.
pub fn gather_action(twiml: &str) -> Option<String> {
    GATHER_ACTION_RE.captures(twiml).map(|caps| {
        caps[1]
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
    })
}

/// Gather actions may be relative to the API or absolute.
pub fn resolve_action(api_url: &str, action: &str) -> Result<url::Url, url::ParseError> {
    let base = url::Url::parse(&format!("{}/", api_url.trim_end_matches('/')))?;
    base.join(action)
}

pub fn default_call_id() -> String {
    format!("CA{}", uuid::Uuid::now_v7().simple())
}

async fn post_form(url: url::Url, form: &[(&str, &str)]) -> Result<String, i32> {
    let resp = client()
        .post(url)
        .form(form)
        .send()
        .await
        .map_err(|e| connection_error(&e))?;
    let status = resp.status().as_u16();
    let body = resp.text().await.map_err(|e| connection_error(&e))?;
    if exit_code(status) != 0 {
        eprintln!("{}", pretty(&json!({ "status": status, "body": body })));
        return Err(exit_code(status));
    }
    Ok(body)
}

pub async fn run(api_url: &str, from: &str, call_id: Option<String>, utterances: &[String]) -> i32 {
    let call_id = call_id.unwrap_or_else(default_call_id);
    let voice_url = match resolve_action(api_url, "/webhook/voice") {
        Ok(u) => u,
        Err(e) => crate::util::exit_error(&format!("Invalid API URL {api_url}: {e}"), None),
    };

    println!("> call {call_id} from {from}");
    let mut reply = match post_form(
        voice_url,
        &[("CallSid", call_id.as_str()), ("From", from), ("CallStatus", "ringing")],
    )
    .await
    {
        Ok(body) => body,
        Err(code) => return code,
    };
    println!("{reply}");

    for utterance in utterances {
        let Some(action) = gather_action(&reply) else {
            println!("> call ended before \"{utterance}\" was said");
            return 0;
        };
        let url = match resolve_action(api_url, &action) {
            Ok(u) => u,
            Err(e) => crate::util::exit_error(&format!("Invalid gather action {action}: {e}"), None),
        };

        println!("> {action}: \"{utterance}\"");
        reply = match post_form(
            url,
            &[("CallSid", call_id.as_str()), ("SpeechResult", utterance.as_str())],
        )
        .await
        {
            Ok(body) => body,
            Err(code) => return code,
        };
        println!("{reply}");
    }

    if gather_action(&reply).is_some() {
        println!("> call still waiting for speech");
    } else {
        println!("> call ended");
    }
    0
}
