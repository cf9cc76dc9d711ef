// src/maintenance.rs

//! Cluster maintenance: a straight 1:1 mapping onto the `Maintenance` service's
//! status RPC. No retry/branching logic beyond what the pool's `exec` already
//! provides.

use std::sync::Arc;

use tonic::metadata::MetadataMap;

use crate::error::{ClientError, Result};
use crate::pb::{StatusRequest, StatusResponse};
use crate::pool::{Pool, ServiceKind};

/// Entry point for maintenance calls: `client.maintenance()`.
#[derive(Clone)]
pub struct Maintenance {
    pool: Arc<Pool>,
}

impl Maintenance {
    pub fn new(pool: Arc<Pool>) -> Self {
        Maintenance { pool }
    }

    /// Reports the status of whichever peer answers the call (db size, current
    /// raft leader/term/index, server version).
    pub async fn status(&self) -> Result<StatusResponse> {
        self.pool
            .exec(ServiceKind::Maintenance, move |client, md: MetadataMap| {
                let mut client = client.into_maintenance();
                async move {
                    let mut rpc = tonic::Request::new(StatusRequest {});
                    *rpc.metadata_mut() = md;
                    client.status(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }
}
