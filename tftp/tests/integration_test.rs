/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! End-to-end exercise of the TFTP router over a real UDP socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anvil_backend::{BackendError, BackendReader, Hardware};
use anvil_boot::script::ScriptConfig;
use anvil_tftp::{serve, standard_mux, RouterConfig, TftpServerConfig};
use async_trait::async_trait;
use mac_address::MacAddress;
use tokio::net::UdpSocket;

struct Empty;

#[async_trait]
impl BackendReader for Empty {
    async fn get_by_mac(&self, mac: MacAddress) -> Result<Hardware, BackendError> {
        Err(BackendError::NotFound(mac.to_string()))
    }

    async fn get_by_ip(&self, ip: IpAddr) -> Result<Hardware, BackendError> {
        Err(BackendError::NotFound(ip.to_string()))
    }
}

async fn start_server() -> SocketAddr {
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let dir = std::env::temp_dir().join("anvil-tftp-integration");
    let mux = standard_mux(RouterConfig {
        backend: Arc::new(Empty),
        cache: anvil_hook::Cache::new(anvil_hook::CacheConfig::new(
            dir,
            anvil_hook::Source::Tarball {
                base_url: "http://192.0.2.1:1/releases".to_string(),
            },
        )),
        ipxe_patch: vec![],
        script: ScriptConfig {
            download_url: "http://192.0.2.4:7171/images".parse().unwrap(),
            extra_kernel_args: vec![],
            syslog_host: "192.0.2.4".to_string(),
            grpc_authority: "192.0.2.4:42113".to_string(),
            agent_tls: false,
            agent_insecure_tls: false,
            retries: 1,
            retry_delay: 1,
        },
        static_ipxe: true,
    })
    .unwrap();

    let config = TftpServerConfig {
        bind_addr: addr,
        ..TftpServerConfig::default()
    };
    tokio::spawn(async move {
        let _ = serve(config, Arc::new(mux), std::future::pending()).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

fn rrq(filename: &str) -> Vec<u8> {
    let mut out = vec![0, 1];
    out.extend_from_slice(filename.as_bytes());
    out.push(0);
    out.extend_from_slice(b"octet");
    out.push(0);
    out
}

fn wrq(filename: &str) -> Vec<u8> {
    let mut out = vec![0, 2];
    out.extend_from_slice(filename.as_bytes());
    out.push(0);
    out.extend_from_slice(b"octet");
    out.push(0);
    out
}

async fn transact(server: SocketAddr, packet: &[u8]) -> Vec<u8> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(packet, server).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("server should answer")
        .unwrap();
    buf.truncate(len);
    buf
}

#[tokio::test]
async fn embedded_config_is_served_as_data() {
    let server = start_server().await;
    let reply = transact(server, &rrq("bootcfg.txt")).await;

    // DATA, block 1, payload.
    assert_eq!(&reply[0..2], &[0, 3]);
    assert_eq!(&reply[2..4], &[0, 1]);
    assert_eq!(&reply[4..], b"TFTP_PREFIX=2\n");
}

#[tokio::test]
async fn pi_prefixed_requests_are_normalized() {
    let server = start_server().await;
    let reply = transact(server, &rrq("b827eb123456/bootcfg.txt")).await;

    assert_eq!(&reply[0..2], &[0, 3]);
    assert_eq!(&reply[4..], b"TFTP_PREFIX=2\n");
}

#[tokio::test]
async fn missing_files_get_a_not_found_error() {
    let server = start_server().await;
    let reply = transact(server, &rrq("vmlinuz-x86_64")).await;

    // ERROR, code 1 (file not found).
    assert_eq!(&reply[0..2], &[0, 5]);
    assert_eq!(&reply[2..4], &[0, 1]);
}

#[tokio::test]
async fn writes_are_rejected_with_access_violation() {
    let server = start_server().await;
    let reply = transact(server, &wrq("evil.bin")).await;

    // ERROR, code 2 (access violation).
    assert_eq!(&reply[0..2], &[0, 5]);
    assert_eq!(&reply[2..4], &[0, 2]);
}
