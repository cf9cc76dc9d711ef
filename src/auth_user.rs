// src/auth_user.rs

//! User administration: a straight 1:1 mapping onto the `Auth` service's user RPCs.
//! No retry/branching logic beyond what the pool's `exec` already provides.

use std::sync::Arc;

use tonic::metadata::MetadataMap;

use crate::error::{ClientError, Result};
use crate::pb::etcdserverpb::{
    AuthUserAddRequest, AuthUserAddResponse, AuthUserChangePasswordRequest,
    AuthUserChangePasswordResponse, AuthUserDeleteRequest, AuthUserDeleteResponse,
    AuthUserGetRequest, AuthUserGetResponse, AuthUserGrantRoleRequest, AuthUserGrantRoleResponse,
    AuthUserListRequest, AuthUserListResponse, AuthUserRevokeRoleRequest,
    AuthUserRevokeRoleResponse,
};
use crate::pool::{Pool, ServiceKind};

/// Entry point for user administration: `client.auth_user()`.
#[derive(Clone)]
pub struct AuthUser {
    pool: Arc<Pool>,
}

impl AuthUser {
    pub fn new(pool: Arc<Pool>) -> Self {
        AuthUser { pool }
    }

    pub async fn add(
        &self,
        name: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthUserAddResponse> {
        let request = AuthUserAddRequest { name: name.into(), password: password.into(), options: None };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.user_add(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn get(&self, name: impl Into<String>) -> Result<AuthUserGetResponse> {
        let request = AuthUserGetRequest { name: name.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.user_get(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn list(&self) -> Result<AuthUserListResponse> {
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(AuthUserListRequest {});
                    *rpc.metadata_mut() = md;
                    client.user_list(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn delete(&self, name: impl Into<String>) -> Result<AuthUserDeleteResponse> {
        let request = AuthUserDeleteRequest { name: name.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client.user_delete(rpc).await.map(|r| r.into_inner()).map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn change_password(
        &self,
        name: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthUserChangePasswordResponse> {
        let request = AuthUserChangePasswordRequest { name: name.into(), password: password.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client
                        .user_change_password(rpc)
                        .await
                        .map(|r| r.into_inner())
                        .map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn grant_role(
        &self,
        user: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<AuthUserGrantRoleResponse> {
        let request = AuthUserGrantRoleRequest { user: user.into(), role: role.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client
                        .user_grant_role(rpc)
                        .await
                        .map(|r| r.into_inner())
                        .map_err(ClientError::classify)
                }
            })
            .await
    }

    pub async fn revoke_role(
        &self,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<AuthUserRevokeRoleResponse> {
        let request = AuthUserRevokeRoleRequest { name: name.into(), role: role.into() };
        self.pool
            .exec(ServiceKind::Auth, move |client, md: MetadataMap| {
                let request = request.clone();
                let mut client = client.into_auth();
                async move {
                    let mut rpc = tonic::Request::new(request);
                    *rpc.metadata_mut() = md;
                    client
                        .user_revoke_role(rpc)
                        .await
                        .map(|r| r.into_inner())
                        .map_err(ClientError::classify)
                }
            })
            .await
    }
}
