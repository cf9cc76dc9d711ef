// tests/admin_test.rs

//! Role and user administration: thin 1:1 RPC mappings, exercised end-to-end against
//! a real server (role/user management is permitted even before auth is enabled).

mod common;

use etcd_coord_client::pb::authpb::permission::Type as PermType;

#[tokio::test]
async fn role_lifecycle_add_grant_get_delete() {
    let client = common::client().await;
    let role = common::unique_key("admin/role").replace('/', "-");

    client.auth_role().add(role.clone()).await.unwrap();

    client
        .auth_role()
        .grant_permission(role.clone(), PermType::Readwrite as i32, "a", "z")
        .await
        .unwrap();

    let fetched = client.auth_role().get(role.clone()).await.unwrap();
    assert_eq!(fetched.perm.len(), 1);
    assert_eq!(fetched.perm[0].key.as_ref(), b"a");

    client.auth_role().revoke_permission(role.clone(), "a", "z").await.unwrap();
    client.auth_role().delete(role).await.unwrap();
}

#[tokio::test]
async fn user_lifecycle_add_grant_role_get_delete() {
    let client = common::client().await;
    let role = common::unique_key("admin/user-role").replace('/', "-");
    let user = common::unique_key("admin/user").replace('/', "-");

    client.auth_role().add(role.clone()).await.unwrap();
    client.auth_user().add(user.clone(), "changeme").await.unwrap();
    client.auth_user().grant_role(user.clone(), role.clone()).await.unwrap();

    let fetched = client.auth_user().get(user.clone()).await.unwrap();
    assert!(fetched.roles.contains(&role));

    client.auth_user().revoke_role(user.clone(), role.clone()).await.unwrap();
    client.auth_user().delete(user).await.unwrap();
    client.auth_role().delete(role).await.unwrap();
}
