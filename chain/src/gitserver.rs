//! GitServer chain: a single connectivity probe.

use std::sync::Arc;

use cb_core::{GitServer, Resource};
use gitops::{OpContext, probe};
use tracing::{info, info_span, warn};

use crate::error::StepError;
use crate::handler::{HandlerChain, Outcome, Step};
use crate::services::Services;

pub fn git_server_chain(services: Arc<Services>) -> HandlerChain<GitServer> {
    HandlerChain::new(GitServer::KIND).with_step(CheckConnection { services })
}

/// Probes the server and records the result in `status.connected`.
///
/// The probe uses its own short timeout rather than the caller's deadline.
pub struct CheckConnection {
    services: Arc<Services>
}

impl Step<GitServer> for CheckConnection {
    fn name(&self) -> &'static str {
        "check_connection"
    }

    fn serve(&self, ctx: &OpContext, server: &mut GitServer) -> Outcome {
        let spec = &server.spec;
        let timeout = self.services.probe_timeout;
        let (target, result) = match spec.base_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => (url.to_string(), probe::check_url(url, timeout)),
            None => (
                format!("{}:{}", spec.host, spec.ssh_port),
                probe::check_tcp(&spec.host, spec.ssh_port, timeout)
            )
        };
        let span = info_span!(parent: ctx.span(), "probe", target = %target);
        let _enter = span.enter();

        match result {
            Ok(()) => {
                if !server.status.connected {
                    info!("git server reachable");
                }
                server.status.connected = true;
                Outcome::Success
            }
            Err(e) => {
                warn!(error = %e, "git server unreachable");
                server.status.connected = false;
                Outcome::Failure(StepError::git(format!("connect to git server {}", server.key()), e))
            }
        }
    }
}
