// build.rs

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let version = env::var("ETCD_CLIENT_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rerun-if-env-changed=ETCD_CLIENT_VERSION");

    // Only for MSVC targets
    #[cfg(all(windows, target_env = "msvc"))]
    println!("cargo:rustc-link-arg=/STACK:0x1000000"); // 16MB stack size

    let proto_root = PathBuf::from("proto");
    let protos = [
        proto_root.join("mvccpb/kv.proto"),
        proto_root.join("authpb/auth.proto"),
        proto_root.join("etcdserverpb/rpc.proto"),
    ];

    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        // Use `bytes::Bytes` instead of `Vec<u8>` for every `bytes` field so the core
        // subsystems can cheaply clone/slice keys and values across retries.
        .bytes(["."])
        .compile_protos(&protos, &[proto_root])?;

    Ok(())
}
