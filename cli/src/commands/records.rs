use crate::util::api_get;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Customers,
    Requests,
    CallLogs,
}

impl RecordKind {
    fn path(self) -> &'static str {
        match self {
            RecordKind::Customers => "/api/customers",
            RecordKind::Requests => "/api/service-requests",
            RecordKind::CallLogs => "/api/call-logs",
        }
    }
}

pub async fn run(api_url: &str, kind: RecordKind, limit: Option<u32>) -> i32 {
    let query: Vec<(String, String)> = limit
        .map(|l| vec![("limit".to_string(), l.to_string())])
        .unwrap_or_default();
    api_get(api_url, kind.path(), &query).await
}
