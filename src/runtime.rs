//! The context value threaded through the pipeline, state machine and flush
//! path instead of ambient global state (§9: "Process-wide singletons...
//! treat them as a context value passed into the pipeline").
//!
//! A [`ZoneRuntime`] bundles the external collaborators named in §6
//! ([`RecordCodec`](crate::contracts::RecordCodec), [`Signer`](crate::contracts::Signer),
//! [`TsigVerifier`](crate::contracts::TsigVerifier),
//! [`TransferSubsystem`](crate::contracts::TransferSubsystem), [`ZonefileWriter`](crate::contracts::ZonefileWriter))
//! together with the process-wide [`ZoneRegistry`](crate::registry::ZoneRegistry)
//! and [`CoreMetrics`](crate::metrics::CoreMetrics). Building one of these
//! once at startup and handing `&ZoneRuntime` to every call eliminates the
//! initialization-order hazards a set of free-standing statics would have,
//! and lets tests swap in fakes for every external boundary at once.

use std::sync::Arc;

use crate::contracts::{RecordCodec, Signer, TransferSubsystem, TsigVerifier, ZonefileWriter};
use crate::metrics::CoreMetrics;
use crate::registry::ZoneRegistry;

/// Everything the core needs to drive a zone that it does not own itself.
pub struct ZoneRuntime {
    pub registry: Arc<ZoneRegistry>,
    pub codec: Arc<dyn RecordCodec>,
    pub signer: Arc<dyn Signer>,
    pub tsig: Arc<dyn TsigVerifier>,
    pub transfer: Arc<dyn TransferSubsystem>,
    pub zonefile_writer: Arc<dyn ZonefileWriter>,
    pub metrics: Arc<CoreMetrics>,
}

impl ZoneRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ZoneRegistry>,
        codec: Arc<dyn RecordCodec>,
        signer: Arc<dyn Signer>,
        tsig: Arc<dyn TsigVerifier>,
        transfer: Arc<dyn TransferSubsystem>,
        zonefile_writer: Arc<dyn ZonefileWriter>,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        Self {
            registry,
            codec,
            signer,
            tsig,
            transfer,
            zonefile_writer,
            metrics,
        }
    }
}
