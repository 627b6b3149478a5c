/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Kubernetes Lease-based leader election gating interface ownership.
//!
//! Exactly one replica may hold the DHCP proxy interface. On acquiring
//! the lease the interface manager's setup runs; on losing it (or on a
//! graceful shutdown, which releases the lease immediately) cleanup
//! runs. Losing leadership is a normal transition, never an error.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::chrono::{DateTime, Utc};
use kube::api::{Api, ObjectMeta, PostParams};

use crate::{InterfaceManager, NetifError};

#[derive(Debug, Clone)]
pub struct LeaderConfig {
    pub namespace: String,
    pub lease_name: String,
    /// This candidate's identity; the pod name in practice.
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            lease_name: "anvil-dhcp-interface".to_string(),
            identity: default_identity(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

fn default_identity() -> String {
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .unwrap_or_else(|_| "anvil".to_string())
}

/// What the current lease says about our candidacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    /// No lease, no holder, or the holder's lease expired.
    Acquirable,
    HeldByUs,
    HeldByOther,
}

fn evaluate(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseState {
    let Some(spec) = lease.and_then(|l| l.spec.as_ref()) else {
        return LeaseState::Acquirable;
    };
    let holder = spec.holder_identity.as_deref().unwrap_or("");
    if holder.is_empty() {
        return LeaseState::Acquirable;
    }
    if holder == identity {
        return LeaseState::HeldByUs;
    }

    let duration = spec.lease_duration_seconds.unwrap_or(0) as i64;
    let renewed = spec
        .renew_time
        .as_ref()
        .or(spec.acquire_time.as_ref())
        .map(|t| t.0);
    match renewed {
        Some(renewed) if now.signed_duration_since(renewed).num_seconds() <= duration => {
            LeaseState::HeldByOther
        }
        // Expired or never renewed: up for grabs.
        _ => LeaseState::Acquirable,
    }
}

pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaderConfig,
}

impl LeaderElector {
    pub fn new(client: kube::Client, config: LeaderConfig) -> Self {
        let api = Api::namespaced(client, &config.namespace);
        Self { api, config }
    }

    /// Run the election loop, driving the interface manager with
    /// leadership transitions, until `shutdown` resolves.
    pub async fn run(
        &self,
        manager: Arc<dyn InterfaceManager>,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> Result<(), NetifError> {
        tracing::info!(
            identity = %self.config.identity,
            namespace = %self.config.namespace,
            lease = %self.config.lease_name,
            "starting leader election"
        );

        let mut is_leader = false;
        let mut last_renew = tokio::time::Instant::now();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    if is_leader {
                        tracing::info!("shutting down, releasing lease");
                        if let Err(err) = self.release().await {
                            tracing::warn!(%err, "lease release failed");
                        }
                        if let Err(err) = manager.cleanup().await {
                            tracing::error!(%err, "interface cleanup failed on shutdown");
                        }
                    }
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }

            if is_leader {
                match self.renew().await {
                    Ok(true) => {
                        last_renew = tokio::time::Instant::now();
                    }
                    Ok(false) => {
                        tracing::info!("lost leadership, cleaning up DHCP proxy interface");
                        is_leader = false;
                        if let Err(err) = manager.cleanup().await {
                            tracing::error!(%err, "interface cleanup failed");
                        }
                    }
                    Err(err) => {
                        if last_renew.elapsed() > self.config.renew_deadline {
                            tracing::warn!(%err, "renew deadline exceeded, stepping down");
                            is_leader = false;
                            if let Err(err) = manager.cleanup().await {
                                tracing::error!(%err, "interface cleanup failed");
                            }
                        } else {
                            tracing::debug!(%err, "lease renewal failed, retrying");
                        }
                    }
                }
            } else {
                match self.try_acquire().await {
                    Ok(true) => {
                        tracing::info!("elected as leader, setting up DHCP proxy interface");
                        is_leader = true;
                        last_renew = tokio::time::Instant::now();
                        if let Err(err) = manager.setup().await {
                            tracing::error!(%err, "interface setup failed after becoming leader");
                        }
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::debug!(%err, "lease acquisition attempt failed");
                    }
                }
            }
        }
    }

    async fn try_acquire(&self) -> Result<bool, NetifError> {
        let now = Utc::now();
        let existing = self.api.get_opt(&self.config.lease_name).await?;

        match evaluate(existing.as_ref(), &self.config.identity, now) {
            LeaseState::HeldByOther => return Ok(false),
            LeaseState::HeldByUs | LeaseState::Acquirable => {}
        }

        match existing {
            None => {
                let lease = self.fresh_lease(now, 0);
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    // Another candidate created it first.
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
            Some(mut lease) => {
                let transitions = lease
                    .spec
                    .as_ref()
                    .and_then(|s| s.lease_transitions)
                    .unwrap_or(0);
                lease.spec = Some(self.spec(now, now, transitions + 1));
                match self
                    .api
                    .replace(&self.config.lease_name, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    // Lost the race to another candidate.
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Refresh our hold. `Ok(false)` means another holder took over.
    async fn renew(&self) -> Result<bool, NetifError> {
        let now = Utc::now();
        let Some(mut lease) = self.api.get_opt(&self.config.lease_name).await? else {
            return Ok(false);
        };

        if evaluate(Some(&lease), &self.config.identity, now) != LeaseState::HeldByUs {
            return Ok(false);
        }

        if let Some(spec) = lease.spec.as_mut() {
            spec.renew_time = Some(MicroTime(now));
        }
        match self
            .api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Give the lease up immediately so the next candidate does not wait
    /// out the full duration.
    async fn release(&self) -> Result<(), NetifError> {
        let Some(mut lease) = self.api.get_opt(&self.config.lease_name).await? else {
            return Ok(());
        };
        if evaluate(Some(&lease), &self.config.identity, Utc::now()) != LeaseState::HeldByUs {
            return Ok(());
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = Some(String::new());
        }
        self.api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await?;
        Ok(())
    }

    fn fresh_lease(&self, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.config.lease_name.clone()),
                namespace: Some(self.config.namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(self.spec(now, now, transitions)),
        }
    }

    fn spec(&self, acquired: DateTime<Utc>, renewed: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.config.identity.clone()),
            lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
            acquire_time: Some(MicroTime(acquired)),
            renew_time: Some(MicroTime(renewed)),
            lease_transitions: Some(transitions),
            ..LeaseSpec::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::chrono::TimeZone;

    fn lease(holder: Option<&str>, duration: i32, renewed_secs_ago: i64, now: DateTime<Utc>) -> Lease {
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: holder.map(String::from),
                lease_duration_seconds: Some(duration),
                renew_time: Some(MicroTime(now - k8s_openapi::chrono::Duration::seconds(renewed_secs_ago))),
                ..LeaseSpec::default()
            }),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn absent_lease_is_acquirable() {
        assert_eq!(evaluate(None, "pod-a", now()), LeaseState::Acquirable);
    }

    #[test]
    fn empty_holder_is_acquirable() {
        let l = lease(Some(""), 15, 1, now());
        assert_eq!(evaluate(Some(&l), "pod-a", now()), LeaseState::Acquirable);
    }

    #[test]
    fn fresh_foreign_lease_is_held() {
        let l = lease(Some("pod-b"), 15, 5, now());
        assert_eq!(evaluate(Some(&l), "pod-a", now()), LeaseState::HeldByOther);
    }

    #[test]
    fn expired_foreign_lease_is_acquirable() {
        let l = lease(Some("pod-b"), 15, 20, now());
        assert_eq!(evaluate(Some(&l), "pod-a", now()), LeaseState::Acquirable);
    }

    #[test]
    fn own_lease_is_held_by_us_even_when_stale() {
        let l = lease(Some("pod-a"), 15, 60, now());
        assert_eq!(evaluate(Some(&l), "pod-a", now()), LeaseState::HeldByUs);
    }
}
