use crate::util::api_get;

pub async fn run(api_url: &str) -> i32 {
    api_get(api_url, "/health", &[]).await
}
