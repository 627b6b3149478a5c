/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[clap(name = "anvild", about = "netboot dispatch engine")]
pub struct Args {
    /// DHCP personality.
    #[arg(long, value_enum, default_value_t = DhcpMode::Reservation)]
    pub mode: DhcpMode,

    /// YAML hardware records file. Lookups miss when neither backend is
    /// configured, which is only useful together with auto-proxy mode.
    #[arg(long)]
    pub backend_file: Option<PathBuf>,

    /// Read hardware records from Hardware resources in this Kubernetes
    /// namespace instead of a file.
    #[arg(long, conflicts_with = "backend_file")]
    pub backend_kube_namespace: Option<String>,

    /// Public IP of this host; advertised for TFTP and HTTP unless
    /// overridden per service.
    #[arg(long)]
    pub public_ip: Ipv4Addr,

    // --- DHCP ---
    /// Disable the DHCP server.
    #[arg(long, default_value_t = false)]
    pub no_dhcp: bool,

    #[arg(long, default_value = "0.0.0.0:67")]
    pub dhcp_bind_addr: SocketAddr,

    /// Server identifier placed in option 54. Defaults to the public IP.
    #[arg(long)]
    pub ip_for_packet: Option<Ipv4Addr>,

    /// Syslog server advertised in option 7.
    #[arg(long)]
    pub syslog_ip: Option<Ipv4Addr>,

    /// Disable netboot options in DHCP replies.
    #[arg(long, default_value_t = false)]
    pub disable_netboot_options: bool,

    /// Attach a fresh trace context to replies and bootfile names.
    #[arg(long, default_value_t = false)]
    pub trace_dhcp: bool,

    /// Extra user class treated like iPXE.
    #[arg(long)]
    pub custom_user_class: Option<String>,

    /// MAC injection format for bootfile URLs: colon, dash, dot,
    /// no-delimiter, none.
    #[arg(long, default_value = "colon")]
    pub mac_format: String,

    // --- TFTP ---
    /// Disable the TFTP server.
    #[arg(long, default_value_t = false)]
    pub no_tftp: bool,

    #[arg(long, default_value = "0.0.0.0:69")]
    pub tftp_bind_addr: SocketAddr,

    #[arg(long, default_value_t = 512)]
    pub tftp_block_size: u16,

    #[arg(long, default_value_t = 10)]
    pub tftp_timeout_secs: u64,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub tftp_single_port: bool,

    // --- HTTP ---
    /// Disable the HTTP server.
    #[arg(long, default_value_t = false)]
    pub no_http: bool,

    #[arg(long, default_value = "0.0.0.0:7171")]
    pub http_bind_addr: SocketAddr,

    /// iPXE script snippet spliced into served binaries.
    #[arg(long, default_value = "")]
    pub ipxe_patch: String,

    /// Retries for kernel/initramfs fetches in generated scripts.
    #[arg(long, default_value_t = 1)]
    pub ipxe_script_retries: u32,

    /// Seconds between retries in generated scripts.
    #[arg(long, default_value_t = 1)]
    pub ipxe_script_retry_delay: u32,

    /// Extra kernel arguments appended to generated scripts.
    #[arg(long)]
    pub extra_kernel_args: Vec<String>,

    /// Base URL for kernel/initramfs downloads. Defaults to this host's
    /// /images endpoint.
    #[arg(long)]
    pub osie_url: Option<url::Url>,

    // --- workload agent handoff ---
    /// gRPC authority of the workload agent server.
    #[arg(long, default_value = "")]
    pub grpc_authority: String,

    #[arg(long, default_value_t = false)]
    pub agent_tls: bool,

    #[arg(long, default_value_t = false)]
    pub agent_insecure_tls: bool,

    // --- workload image cache ---
    #[arg(long, default_value = "/var/lib/anvil/cache")]
    pub cache_dir: PathBuf,

    /// Release archive base URL (tarball acquisition).
    #[arg(long)]
    pub hook_url: Option<String>,

    /// OCI reference (registry/repository:tag) for image acquisition.
    /// Credentials come from ANVIL_REGISTRY_USER / ANVIL_REGISTRY_PASS.
    #[arg(long)]
    pub hook_oci_ref: Option<String>,

    // --- DHCP proxy interface management ---
    #[arg(long, value_enum, default_value_t = InterfaceMode::None)]
    pub dhcp_interface: InterfaceMode,

    #[arg(long, default_value_t = false)]
    pub leader_election: bool,

    #[arg(long, default_value = "default")]
    pub leader_election_namespace: String,

    /// Log verbosity; repeat for more.
    #[arg(short = 'v', long = "debug", action = clap::ArgAction::Count)]
    pub debug: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpMode {
    Reservation,
    Proxy,
    AutoProxy,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceMode {
    None,
    Macvlan,
    Ipvlan,
    Ebpf,
}

impl Args {
    pub fn load() -> Self {
        Self::parse()
    }
}
