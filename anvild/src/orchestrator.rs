/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Subsystem assembly and lifecycle.
//!
//! Every enabled subsystem runs as its own task under one shutdown
//! signal. One ordering constraint matters: the DHCP server must not
//! bind its socket until the proxy interface has signalled readiness.
//! Without leader election the interface is created synchronously and
//! readiness follows setup; with leader election readiness is immediate
//! so the socket is accepting by the time the leader-created interface
//! appears.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use anvil_backend::{BackendReader, FileBackend, KubeBackend, NoopBackend};
use anvil_boot::script::ScriptConfig;
use anvil_boot::{MacFormat, Selector, SelectorConfig};
use anvil_dhcp_server::{DhcpHandler, HandlerConfig, ProxyHandler, ReservationHandler};
use anvil_netif::{EbpfManager, InterfaceKind, InterfaceManager, LeaderConfig, LeaderElector, NetworkManager};
use color_eyre::eyre::{eyre, WrapErr};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

use crate::command_line::{Args, DhcpMode, InterfaceMode};

pub async fn run(args: Args) -> Result<(), color_eyre::Report> {
    let backend: Arc<dyn BackendReader> = match (&args.backend_file, &args.backend_kube_namespace) {
        (Some(path), _) => Arc::new(
            FileBackend::load(path)
                .await
                .wrap_err("loading hardware records")?,
        ),
        (None, Some(namespace)) => {
            let client = kube::Client::try_default()
                .await
                .wrap_err("building kubernetes client for the hardware backend")?;
            Arc::new(KubeBackend::new(client, namespace))
        }
        (None, None) => {
            if args.mode == DhcpMode::Reservation {
                return Err(eyre!(
                    "reservation mode requires --backend-file or --backend-kube-namespace"
                ));
            }
            Arc::new(NoopBackend)
        }
    };

    let http_base = url::Url::parse(&format!(
        "http://{}:{}",
        args.public_ip,
        args.http_bind_addr.port()
    ))?;
    let selector = Selector::new(SelectorConfig {
        tftp_addr: SocketAddrV4::new(args.public_ip, args.tftp_bind_addr.port()),
        http_binary_url: http_base.join("/ipxe/binary/")?,
        ipxe_script_url: http_base.join("/ipxe/script/auto.ipxe")?,
        inject_mac: args
            .mac_format
            .parse::<MacFormat>()
            .map_err(|err| eyre!(err))?,
        custom_user_class: args.custom_user_class.clone(),
        arch_overrides: HashMap::new(),
    });

    let script = ScriptConfig {
        download_url: match &args.osie_url {
            Some(url) => url.clone(),
            None => http_base.join("/images")?,
        },
        extra_kernel_args: args.extra_kernel_args.clone(),
        syslog_host: args.syslog_ip.unwrap_or(args.public_ip).to_string(),
        grpc_authority: args.grpc_authority.clone(),
        agent_tls: args.agent_tls,
        agent_insecure_tls: args.agent_insecure_tls,
        retries: args.ipxe_script_retries,
        retry_delay: args.ipxe_script_retry_delay,
    };

    let source = match (&args.hook_oci_ref, &args.hook_url) {
        (Some(reference), _) => anvil_hook::Source::Oci {
            reference: reference.clone(),
            username: std::env::var("ANVIL_REGISTRY_USER").ok(),
            password: std::env::var("ANVIL_REGISTRY_PASS").ok(),
        },
        (None, Some(base_url)) => anvil_hook::Source::Tarball {
            base_url: base_url.clone(),
        },
        (None, None) => anvil_hook::Source::Tarball {
            base_url: "https://github.com/anvil-metal/hookos/releases/download/latest"
                .to_string(),
        },
    };
    let cache = anvil_hook::Cache::new(anvil_hook::CacheConfig::new(&args.cache_dir, source));

    let static_ipxe = args.mode == DhcpMode::AutoProxy;

    // Shutdown fans out through a watch channel; SIGINT/SIGTERM flip it.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(signal_listener(shutdown_tx.clone()));

    let mut tasks: JoinSet<Result<(), color_eyre::Report>> = JoinSet::new();

    // Workload image cache populates in the background; serves miss until
    // it is ready.
    {
        let cache = cache.clone();
        tasks.spawn(async move {
            cache.start().await;
            Ok(())
        });
    }

    // DHCP proxy interface management gates the DHCP socket bind.
    let (if_ready_tx, if_ready_rx) = oneshot::channel::<()>();
    spawn_interface_manager(&args, &mut tasks, shutdown_rx.clone(), if_ready_tx)?;

    if !args.no_tftp {
        let mux = anvil_tftp::standard_mux(anvil_tftp::RouterConfig {
            backend: backend.clone(),
            cache: cache.clone(),
            ipxe_patch: args.ipxe_patch.clone().into_bytes(),
            script: script.clone(),
            static_ipxe,
        })
        .wrap_err("building tftp routes")?;
        let config = anvil_tftp::TftpServerConfig {
            bind_addr: args.tftp_bind_addr,
            block_size: args.tftp_block_size,
            timeout: Duration::from_secs(args.tftp_timeout_secs),
            max_send_retries: 5,
            single_port: args.tftp_single_port,
        };
        let shutdown = wait_for(shutdown_rx.clone());
        tasks.spawn(async move {
            anvil_tftp::serve(config, Arc::new(mux), shutdown)
                .await
                .wrap_err("tftp server")
        });
    }

    if !args.no_http {
        let state = Arc::new(anvil_http::AppState {
            backend: backend.clone(),
            cache: cache.clone(),
            ipxe_patch: args.ipxe_patch.clone().into_bytes(),
            script: script.clone(),
            static_ipxe,
            metrics: anvil_http::HttpMetrics::new(),
        });
        let bind = args.http_bind_addr;
        let shutdown = wait_for(shutdown_rx.clone());
        tasks.spawn(async move {
            anvil_http::serve(bind, state, shutdown)
                .await
                .wrap_err("http server")
        });
    }

    if !args.no_dhcp {
        let handler_config = HandlerConfig {
            ip_for_packet: args.ip_for_packet.unwrap_or(args.public_ip),
            syslog_addr: args.syslog_ip,
            selector,
            netboot_enabled: !args.disable_netboot_options,
            trace_enabled: args.trace_dhcp,
        };
        let handlers: Vec<Arc<dyn DhcpHandler>> = match args.mode {
            DhcpMode::Reservation => vec![Arc::new(ReservationHandler::new(
                backend.clone(),
                handler_config,
            ))],
            DhcpMode::Proxy => vec![Arc::new(ProxyHandler::new(
                backend.clone(),
                handler_config,
                false,
            ))],
            DhcpMode::AutoProxy => vec![Arc::new(ProxyHandler::new(
                backend.clone(),
                handler_config,
                true,
            ))],
        };
        let config = anvil_dhcp_server::DhcpServerConfig {
            bind_addr: args.dhcp_bind_addr,
        };
        let shutdown = wait_for(shutdown_rx.clone());
        tasks.spawn(async move {
            // The socket must not bind before the proxy interface exists.
            if if_ready_rx.await.is_err() {
                return Ok(());
            }
            anvil_dhcp_server::serve(config, handlers, shutdown)
                .await
                .wrap_err("dhcp server")
        });
    }

    tracing::info!(mode = ?args.mode, "anvild started");

    // First failure wins; everything else is shut down behind it.
    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => {
                result = Err(err);
                break;
            }
            Err(err) => {
                result = Err(eyre!("task panicked: {err}"));
                break;
            }
        }
    }
    let _ = shutdown_tx.send(true);
    while tasks.join_next().await.is_some() {}

    match &result {
        Ok(()) => tracing::info!("anvild shut down"),
        Err(err) => tracing::error!(%err, "anvild exiting on failure"),
    }
    result
}

fn spawn_interface_manager(
    args: &Args,
    tasks: &mut JoinSet<Result<(), color_eyre::Report>>,
    shutdown_rx: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) -> Result<(), color_eyre::Report> {
    let manager: Option<Arc<dyn InterfaceManager>> = match args.dhcp_interface {
        InterfaceMode::None => None,
        InterfaceMode::Macvlan => Some(Arc::new(NetworkManager::new(InterfaceKind::Macvlan))),
        InterfaceMode::Ipvlan => Some(Arc::new(NetworkManager::new(InterfaceKind::Ipvlan))),
        InterfaceMode::Ebpf => Some(Arc::new(EbpfManager::new())),
    };

    let Some(manager) = manager else {
        let _ = ready.send(());
        return Ok(());
    };

    // Fail fast with an actionable message rather than deep inside netlink.
    anvil_netif::check_network_privileges()?;

    if args.leader_election {
        // The interface appears asynchronously on whichever pod wins, so
        // the DHCP socket must already be listening.
        let _ = ready.send(());
        let namespace = args.leader_election_namespace.clone();
        let shutdown = wait_for(shutdown_rx);
        tasks.spawn(async move {
            let client = kube::Client::try_default()
                .await
                .wrap_err("building kubernetes client for leader election")?;
            let elector = LeaderElector::new(
                client,
                LeaderConfig {
                    namespace,
                    ..LeaderConfig::default()
                },
            );
            elector
                .run(manager, shutdown)
                .await
                .wrap_err("leader election")
        });
    } else {
        let shutdown = wait_for(shutdown_rx);
        tasks.spawn(async move {
            manager
                .setup()
                .await
                .wrap_err("setting up DHCP proxy interface")?;
            let _ = ready.send(());
            shutdown.await;
            manager
                .cleanup()
                .await
                .wrap_err("cleaning up DHCP proxy interface")
        });
    }
    Ok(())
}

async fn signal_listener(shutdown_tx: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::error!(%err, "cannot install SIGTERM handler");
            let _ = ctrl_c.await;
            let _ = shutdown_tx.send(true);
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = term.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
    let _ = shutdown_tx.send(true);
}

/// A future resolving once the shutdown flag flips.
fn wait_for(mut rx: watch::Receiver<bool>) -> impl std::future::Future<Output = ()> + Send {
    async move {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}
