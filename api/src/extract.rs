//! Form extractor for carrier webhooks.
//!
//! Use `WebhookForm<T>` instead of `axum::Form<T>` on webhook handlers. A body
//! that fails to decode still gets a well-formed markup reply (the generic
//! apology) instead of axum's plain-text 4xx, because the carrier cannot do
//! anything useful with an HTTP error mid-call.

use axum::{
    Form,
    extract::{FromRequest, Request, rejection::FormRejection},
};

use crate::routes::webhook::Twiml;

pub struct WebhookForm<T>(pub T);

impl<S, T> FromRequest<S> for WebhookForm<T>
where
    Form<T>: FromRequest<S, Rejection = FormRejection>,
    S: Send + Sync,
{
    type Rejection = Twiml;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(WebhookForm(value)),
            Err(rejection) => {
                tracing::error!(
                    status = %rejection.status(),
                    reason = %rejection.body_text(),
                    "Undecodable webhook body, answering with apology"
                );
                Err(Twiml::apology())
            }
        }
    }
}
