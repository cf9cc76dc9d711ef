// src/auth_role.rs

//! Role administration: a straight 1:1 mapping onto the `Auth` service's role RPCs.
//! No retry/branching logic beyond what the pool's `exec` already provides.

use std::sync::Arc;

use bytes::Bytes;
use tonic::metadata::MetadataMap;

use crate::error::{ClientError, Result};
use crate::pb::authpb::Permission;
use crate::pb::etcdserverpb::{
    AuthRoleAddRequest, AuthRoleAddResponse, AuthRoleDeleteRequest, AuthRoleDeleteResponse,
    AuthRoleGetRequest, AuthRoleGetResponse, AuthRoleGrantPermissionRequest,
    AuthRoleGrantPermissionResponse, AuthRoleListRequest, AuthRoleListResponse,
    AuthRoleRevokePermissionRequest, AuthRoleRevokePermissionResponse,
};
use crate::pool::{Pool, ServiceKind};

/// Entry point for role administration: `client.auth_role()`.
#[derive(Clone)]
pub struct AuthRole {
    pool: Arc<Pool>,
}

impl AuthRole {
    pub fn new(pool: Arc<Pool>) -> Self {
        AuthRole { pool }
    }

    pub async fn add(&self, name: impl Into<String>) -> Result<AuthRoleAddResponse> {
        let request = AuthRoleAddRequest { name: name.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.role_add(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn get(&self, role: impl Into<String>) -> Result<AuthRoleGetResponse> {
        let request = AuthRoleGetRequest { role: role.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.role_get(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn list(&self) -> Result<AuthRoleListResponse> {
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(AuthRoleListRequest {});
                    *rpc.metadata_mut() = md;
                    client.role_list(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn delete(&self, role: impl Into<String>) -> Result<AuthRoleDeleteResponse> {
        let request = AuthRoleDeleteRequest { role: role.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.role_delete(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn grant_permission(
        &self,
        name: impl Into<String>,
        perm_type: i32,
        key: impl Into<Bytes>,
        range_end: impl Into<Bytes>,
    ) -> Result<AuthRoleGrantPermissionResponse> {
        let request = AuthRoleGrantPermissionRequest {
            name: name.into(),
            perm: Some(Permission { perm_type, key: key.into(), range_end: range_end.into() }),
        };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client
                        .role_grant_permission(rpc)
                        .await
                        .map(|r| r.into_inner())
                        .map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn revoke_permission(
        &self,
        role: impl Into<String>,
        key: impl Into<Bytes>,
        range_end: impl Into<Bytes>,
    ) -> Result<AuthRoleRevokePermissionResponse> {
        let request = AuthRoleRevokePermissionRequest {
            role: role.into(),
            key: key.into(),
            range_end: range_end.into(),
        };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client
                        .role_revoke_permission(rpc)
                        .await
                        .map(|r| r.into_inner())
                        .map_err(ClientError::classify)
                }
            })
            .await
    }
}
