//! Per-route state. Built once when a router is assembled and shared read-only afterwards.

use crate::error::AppError;
use crate::response::Outcome;
use crate::service::{is_batch_body, CrudService, RawRequest, RequestDecoder};
use serde_json::Value;
use std::sync::Arc;

/// One mounted operation: its decoder plus the table's service.
pub struct Endpoint {
    pub decoder: RequestDecoder,
    pub service: Arc<CrudService>,
}

impl Endpoint {
    pub async fn handle(&self, raw: RawRequest) -> Result<Outcome, AppError> {
        let req = self.decoder.decode(raw)?;
        self.service.run(&req).await
    }
}

/// `POST /` is shared by the single-row insert (create, upsert or post-redirect-get) and the
/// batch upsert; the body shape picks one.
#[derive(Clone, Default)]
pub struct PostRoot {
    pub single: Option<Arc<Endpoint>>,
    pub batch: Option<Arc<Endpoint>>,
}

impl PostRoot {
    pub fn is_empty(&self) -> bool {
        self.single.is_none() && self.batch.is_none()
    }

    pub fn pick(&self, body: Option<&Value>) -> Option<&Arc<Endpoint>> {
        let batch = body.is_some_and(is_batch_body);
        match (batch, &self.single, &self.batch) {
            (true, _, Some(b)) => Some(b),
            (_, Some(s), _) => Some(s),
            (_, None, b) => b.as_ref(),
        }
    }
}
