/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Per-client boot script generation.
//!
//! Two renderers over the same inputs: an iPXE script served over HTTP to
//! clients already running iPXE, and a PXELinux/extlinux config served
//! over TFTP to U-Boot PXE clients. Rendering never does I/O.

use anvil_backend::Hardware;
use mac_address::MacAddress;
use url::Url;

use crate::arch;
use crate::trace::Traceparent;

/// Deployment-wide inputs to script rendering.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Base URL kernel/initramfs are fetched from.
    pub download_url: Url,
    pub extra_kernel_args: Vec<String>,
    /// Syslog host passed on the kernel cmdline.
    pub syslog_host: String,
    /// gRPC authority of the workload agent server.
    pub grpc_authority: String,
    pub agent_tls: bool,
    pub agent_insecure_tls: bool,
    /// Fetch retry budget for kernel/initramfs downloads.
    pub retries: u32,
    /// Delay between retries, seconds.
    pub retry_delay: u32,
}

/// Per-machine inputs to script rendering, resolved from a hardware record
/// or synthesized for unknown MACs in auto-proxy mode.
#[derive(Debug, Clone)]
pub struct MachineScript {
    pub allow_netboot: bool,
    /// Canonical arch: `x86_64` or `aarch64`.
    pub arch: String,
    pub mac: MacAddress,
    pub worker_id: String,
    pub facility: String,
    pub vlan_id: Option<String>,
    /// Kernel filename, `vmlinuz-<arch>` unless overridden.
    pub kernel: String,
    /// Initramfs filename, `initramfs-<arch>` unless overridden.
    pub initrd: String,
    /// Effective download base: the record's override or the deployment URL.
    pub download_url: Url,
    /// Sampled trace context, propagated as a kernel arg.
    pub trace: Option<Traceparent>,
}

impl MachineScript {
    pub fn from_hardware(hw: &Hardware, config: &ScriptConfig) -> Self {
        let arch = hw.arch_or_default().to_string();
        let mac = hw.dhcp.mac_address;
        Self {
            allow_netboot: hw.netboot.allow_netboot,
            kernel: hw
                .netboot
                .osie
                .kernel
                .clone()
                .unwrap_or_else(|| format!("vmlinuz-{arch}")),
            initrd: hw
                .netboot
                .osie
                .initrd
                .clone()
                .unwrap_or_else(|| format!("initramfs-{arch}")),
            download_url: hw
                .netboot
                .osie
                .base_url
                .clone()
                .unwrap_or_else(|| config.download_url.clone()),
            arch,
            mac,
            worker_id: mac.to_string().to_lowercase(),
            facility: hw.netboot.facility.clone(),
            vlan_id: hw.dhcp.vlan_id.clone(),
            trace: None,
        }
    }

    /// Record for an unknown MAC when static iPXE (auto-proxy) is on:
    /// netboot allowed, empty facility, arch chosen by OUI.
    pub fn synthesized(mac: MacAddress, config: &ScriptConfig) -> Self {
        let arch = if arch::is_raspberry_pi(mac) {
            "aarch64"
        } else {
            "x86_64"
        };
        Self {
            allow_netboot: true,
            arch: arch.to_string(),
            mac,
            worker_id: mac.to_string().to_lowercase(),
            facility: String::new(),
            vlan_id: None,
            kernel: format!("vmlinuz-{arch}"),
            initrd: format!("initramfs-{arch}"),
            download_url: config.download_url.clone(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<Traceparent>) -> Self {
        // Unsampled context is never written into scripts.
        self.trace = trace.filter(Traceparent::sampled);
        self
    }

    /// Kernel arguments shared by both renderers.
    fn kernel_cmdline(&self, config: &ScriptConfig) -> String {
        let mut args = String::from(
            "console=tty1 console=ttyAMA0,115200 loglevel=7 \
             cgroup_enable=cpuset cgroup_memory=1 cgroup_enable=memory",
        );
        if let Some(vlan) = self.vlan_id.as_deref() {
            args.push_str(&format!(" vlan_id={vlan}"));
        }
        args.push_str(&format!(
            " facility={} syslog_host={} grpc_authority={} agent_tls={} agent_insecure_tls={} worker_id={} hw_addr={}",
            self.facility,
            config.syslog_host,
            config.grpc_authority,
            config.agent_tls,
            config.agent_insecure_tls,
            self.worker_id,
            self.mac.to_string().to_lowercase(),
        ));
        if let Some(tp) = &self.trace {
            args.push_str(&format!(" traceparent={tp}"));
        }
        for extra in &config.extra_kernel_args {
            args.push(' ');
            args.push_str(extra);
        }
        args.push_str(" modules=loop,squashfs,sd-mod,usb-storage intel_iommu=on iommu=pt");
        args
    }
}

/// Render the iPXE script (the auto.ipxe form) for one machine.
///
/// The script chains kernel and initramfs fetches inside bounded retry
/// loops before handing off to the workload environment.
pub fn render_ipxe(machine: &MachineScript, config: &ScriptConfig) -> String {
    let cmdline = machine.kernel_cmdline(config);
    let download = machine.download_url.as_str().trim_end_matches('/');
    format!(
        r#"#!ipxe

echo Loading the Anvil workload environment...

set arch {arch}
set download-url {download}
set kernel {kernel}
set initrd {initrd}
set retries:int32 {retries}
set retry_delay:int32 {retry_delay}

set idx:int32 0
:retry_kernel
kernel ${{download-url}}/${{kernel}} {cmdline} initrd=${{initrd}} && goto download_initrd || iseq ${{idx}} ${{retries}} && goto kernel-error || inc idx && echo retrying in ${{retry_delay}} seconds && sleep ${{retry_delay}} && goto retry_kernel

:download_initrd
set idx:int32 0
:retry_initrd
initrd ${{download-url}}/${{initrd}} && goto boot_image || iseq ${{idx}} ${{retries}} && goto initrd-error || inc idx && echo retrying in ${{retry_delay}} seconds && sleep ${{retry_delay}} && goto retry_initrd

:boot_image
boot

:kernel-error
echo failed to load the kernel
imgfree
exit 1

:initrd-error
echo failed to load the initramfs
imgfree
exit 1
"#,
        arch = machine.arch,
        download = download,
        kernel = machine.kernel,
        initrd = machine.initrd,
        retries = config.retries,
        retry_delay = config.retry_delay,
        cmdline = cmdline,
    )
}

/// Render the PXELinux/extlinux config for one machine.
///
/// U-Boot's PXE client fetches kernel and initrd with the same transport
/// the config came from, so both are relative filenames.
pub fn render_pxelinux(machine: &MachineScript, config: &ScriptConfig) -> String {
    let default_label = if machine.allow_netboot { "deploy" } else { "local" };
    let cmdline = machine.kernel_cmdline(config);
    format!(
        r#"default {default_label}

label deploy
	kernel {kernel}
	append {cmdline} initrd={initrd}
	initrd {initrd}
	ipappend 2

label local
	menu label Locally installed kernel
	append root=/dev/sda1
	localboot 1
"#,
        default_label = default_label,
        kernel = machine.kernel,
        initrd = machine.initrd,
        cmdline = cmdline,
    )
}

/// Minimal config for `pxelinux.cfg/default`: boot from local disk.
pub fn render_pxelinux_default() -> &'static str {
    r#"default local

label local
	menu label Boot from local disk
	localboot 1
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScriptConfig {
        ScriptConfig {
            download_url: "http://192.0.2.4:7171/images".parse().unwrap(),
            extra_kernel_args: vec!["agent_image=ghcr.io/anvil-metal/agent:latest".to_string()],
            syslog_host: "192.0.2.4".to_string(),
            grpc_authority: "192.0.2.4:42113".to_string(),
            agent_tls: false,
            agent_insecure_tls: false,
            retries: 3,
            retry_delay: 5,
        }
    }

    fn machine() -> MachineScript {
        MachineScript::synthesized("aa:bb:cc:00:11:22".parse().unwrap(), &config())
    }

    #[test]
    fn ipxe_script_carries_identity_args() {
        let script = render_ipxe(&machine(), &config());
        assert!(script.starts_with("#!ipxe"));
        assert!(script.contains("worker_id=aa:bb:cc:00:11:22"));
        assert!(script.contains("hw_addr=aa:bb:cc:00:11:22"));
        assert!(script.contains("grpc_authority=192.0.2.4:42113"));
        assert!(script.contains("set retries:int32 3"));
        assert!(script.contains("set retry_delay:int32 5"));
        assert!(script.contains("agent_image=ghcr.io/anvil-metal/agent:latest"));
    }

    #[test]
    fn synthesized_record_picks_arch_by_oui() {
        let pi = MachineScript::synthesized("b8:27:eb:12:34:56".parse().unwrap(), &config());
        assert_eq!(pi.arch, "aarch64");
        assert_eq!(pi.kernel, "vmlinuz-aarch64");
        assert!(pi.facility.is_empty());

        let other = machine();
        assert_eq!(other.arch, "x86_64");
    }

    #[test]
    fn pxelinux_config_uses_relative_paths() {
        let mut m = machine();
        m.arch = "aarch64".to_string();
        m.kernel = "vmlinuz-aarch64".to_string();
        m.initrd = "initramfs-aarch64".to_string();

        let cfg = render_pxelinux(&m, &config());
        assert!(cfg.contains("default deploy"));
        assert!(cfg.contains("kernel vmlinuz-aarch64"));
        assert!(cfg.contains("initrd initramfs-aarch64"));
        assert!(cfg.contains("initrd=initramfs-aarch64"));
        assert!(cfg.contains("ipappend 2"));
        assert!(cfg.contains("localboot 1"));
        assert!(!cfg.contains("http://"));
    }

    #[test]
    fn pxelinux_denied_machine_defaults_to_local() {
        let mut m = machine();
        m.allow_netboot = false;
        let cfg = render_pxelinux(&m, &config());
        assert!(cfg.contains("default local"));
    }

    #[test]
    fn vlan_id_is_optional() {
        let mut m = machine();
        let without = render_ipxe(&m, &config());
        assert!(!without.contains("vlan_id="));

        m.vlan_id = Some("42".to_string());
        let with = render_ipxe(&m, &config());
        assert!(with.contains("vlan_id=42"));
    }

    #[test]
    fn only_sampled_traces_reach_the_cmdline() {
        let sampled: Traceparent = "00-23b1e307bb35484f535a1f772c06fe64-00f067aa0ba902b7-01"
            .parse()
            .unwrap();
        let unsampled: Traceparent = "00-23b1e307bb35484f535a1f772c06fe64-00f067aa0ba902b7-00"
            .parse()
            .unwrap();

        let with = machine().with_trace(Some(sampled));
        assert!(render_ipxe(&with, &config()).contains("traceparent=00-23b1e307"));

        let without = machine().with_trace(Some(unsampled));
        assert!(!render_ipxe(&without, &config()).contains("traceparent="));
    }

    #[test]
    fn hardware_overrides_take_effect() {
        let raw = r#"
dhcp:
  mac_address: "aa:bb:cc:00:11:22"
  ip_address: 10.0.0.42
  subnet_mask: 255.255.255.0
  vlan_id: "100"
  arch: aarch64
netboot:
  allow_netboot: true
  facility: lab1
  osie:
    kernel: vmlinuz-custom
    base_url: "http://10.0.0.1/osie"
"#;
        let hw: Hardware = serde_yaml::from_str(raw).unwrap();
        let m = MachineScript::from_hardware(&hw, &config());
        assert_eq!(m.kernel, "vmlinuz-custom");
        assert_eq!(m.initrd, "initramfs-aarch64");
        assert_eq!(m.download_url.as_str(), "http://10.0.0.1/osie");
        assert_eq!(m.facility, "lab1");
        assert_eq!(m.vlan_id.as_deref(), Some("100"));
    }
}
