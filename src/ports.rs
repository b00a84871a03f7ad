//! Deterministic, collision-avoiding service port allocation.
//!
//! Pipelines running in parallel worktrees each need their own database,
//! cache and broker ports. The preferred port is a pure function of
//! `(project path, service)` so the same project lands on the same port run
//! after run, and neighbouring projects spread across a 256-slot range.
//!
//! Availability is checked by binding the loopback interface and releasing
//! the socket immediately. Nothing is held: another process can take the
//! port between the check and its use.

use crate::errors::PortError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

/// Slots per service range.
pub const DEFAULT_RANGE_SIZE: u16 = 256;

/// How far past the preferred port the linear scan may look.
const PROBE_LIMIT: u32 = 100;

/// Fallback range sampled when the service range is exhausted.
pub const EPHEMERAL_RANGE: RangeInclusive<u16> = 10000..=20000;

const EPHEMERAL_SAMPLES: usize = 10;

/// Conventional base ports for common services. Each range spans
/// `DEFAULT_RANGE_SIZE` ports from its base.
pub const SERVICE_BASE_PORTS: &[(&str, u16)] = &[
    ("postgres", 5400),
    ("mysql", 3400),
    ("mongodb", 27100),
    ("redis", 6400),
    ("rabbitmq", 5700),
];

/// Look up the built-in base port for a service.
pub fn default_base_port(service: &str) -> Option<u16> {
    SERVICE_BASE_PORTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(service))
        .map(|(_, port)| *port)
}

/// Which step of the allocation produced the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSource {
    /// The hash-derived port was free.
    Preferred,
    /// Found by probing upward from the preferred port.
    Probed,
    /// Sampled from the ephemeral fallback range.
    Ephemeral,
}

/// Result of a detailed allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortAssignment {
    pub service: String,
    pub port: u16,
    /// The hash-derived port, when it fits in the port space.
    pub preferred: Option<u16>,
    pub source: PortSource,
}

/// Compute `sha256(project_path + ":" + service) mod range_size` treating the
/// digest as an unsigned big-endian integer.
fn hash_offset(service: &str, project_path: &str, range_size: u16) -> u32 {
    let digest = Sha256::digest(format!("{}:{}", project_path, service).as_bytes());
    let modulus = u32::from(range_size);
    digest
        .iter()
        .fold(0u32, |acc, byte| ((acc << 8) | u32::from(*byte)) % modulus)
}

/// The hash-derived preferred port, or `None` if it falls outside the port
/// space.
pub fn preferred_port(
    service: &str,
    project_path: &str,
    base_port: u16,
    range_size: u16,
) -> Result<Option<u16>, PortError> {
    if range_size == 0 {
        return Err(PortError::InvalidRange);
    }
    let preferred = u32::from(base_port) + hash_offset(service, project_path, range_size);
    Ok(u16::try_from(preferred).ok())
}

/// Whether `port` can currently be bound on the loopback interface.
pub fn is_port_available(port: u16) -> bool {
    if port == 0 {
        return false;
    }
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Assign a port for `service` in `project_path`, returning just the number.
pub fn assign_service_port(
    service: &str,
    project_path: &str,
    base_port: u16,
    range_size: u16,
) -> Result<u16, PortError> {
    allocate(service, project_path, base_port, range_size).map(|a| a.port)
}

/// Assign a port and report how it was found.
pub fn allocate(
    service: &str,
    project_path: &str,
    base_port: u16,
    range_size: u16,
) -> Result<PortAssignment, PortError> {
    allocate_with(service, project_path, base_port, range_size, is_port_available)
}

fn allocate_with<F>(
    service: &str,
    project_path: &str,
    base_port: u16,
    range_size: u16,
    available: F,
) -> Result<PortAssignment, PortError>
where
    F: Fn(u16) -> bool,
{
    let preferred = preferred_port(service, project_path, base_port, range_size)?;
    let assignment = |port, source| PortAssignment {
        service: service.to_string(),
        port,
        preferred,
        source,
    };

    let Some(preferred_port) = preferred else {
        tracing::warn!(service, base_port, "preferred port outside port space");
        return sample_ephemeral(service, &available).map(|p| assignment(p, PortSource::Ephemeral));
    };

    tracing::debug!(service, project = project_path, port = preferred_port, "preferred port (hash-based)");
    if available(preferred_port) {
        return Ok(assignment(preferred_port, PortSource::Preferred));
    }

    let ceiling = u32::from(base_port) + u32::from(range_size) + PROBE_LIMIT;
    for offset in 1..PROBE_LIMIT {
        let candidate = u32::from(preferred_port) + offset;
        if candidate > ceiling {
            break;
        }
        let Ok(candidate) = u16::try_from(candidate) else {
            break;
        };
        if available(candidate) {
            tracing::info!(
                service,
                port = candidate,
                preferred = preferred_port,
                "preferred port taken, using next available"
            );
            return Ok(assignment(candidate, PortSource::Probed));
        }
    }

    tracing::warn!(service, "standard port range exhausted, using ephemeral port");
    sample_ephemeral(service, &available).map(|p| assignment(p, PortSource::Ephemeral))
}

fn sample_ephemeral<F>(service: &str, available: &F) -> Result<u16, PortError>
where
    F: Fn(u16) -> bool,
{
    for _ in 0..EPHEMERAL_SAMPLES {
        let candidate = fastrand::u16(EPHEMERAL_RANGE);
        if available(candidate) {
            return Ok(candidate);
        }
    }
    Err(PortError::Exhausted {
        service: service.to_string(),
    })
}
