//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;
use storsync_protocol::{DeviceId, RecordKind, StorageKey};
use uuid::Uuid;

/// Identifiers of the local account, used to recognise records describing ourselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfIdentity {
    /// Our account identity.
    pub aci: Option<Uuid>,
    /// Our phone-number identity.
    pub pni: Option<Uuid>,
    /// Our phone number.
    pub e164: Option<String>,
}

impl SelfIdentity {
    /// Creates an identity from an ACI.
    pub fn new(aci: Uuid) -> Self {
        Self {
            aci: Some(aci),
            pni: None,
            e164: None,
        }
    }

    /// Sets the PNI.
    pub fn with_pni(mut self, pni: Uuid) -> Self {
        self.pni = Some(pni);
        self
    }

    /// Sets the phone number.
    pub fn with_e164(mut self, e164: impl Into<String>) -> Self {
        self.e164 = Some(e164.into());
        self
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// This device's id, written into every manifest we produce.
    pub device_id: DeviceId,
    /// Key for remote reads and writes.
    pub storage_key: StorageKey,
    /// Whether this device is the source of truth (the primary device).
    pub is_primary_device: bool,
    /// Identity of the local account.
    pub self_identity: SelfIdentity,
    /// Kinds this build processes. Ids of any other kind are held opaquely.
    pub enabled_kinds: Vec<RecordKind>,
    /// Maximum number of ids per remote read.
    pub read_batch_size: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Consecutive retryable failures after which sync counts as delayed.
    pub delayed_after_failures: u32,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: DeviceId, storage_key: StorageKey) -> Self {
        Self {
            device_id,
            storage_key,
            is_primary_device: device_id == DeviceId::PRIMARY,
            self_identity: SelfIdentity::default(),
            enabled_kinds: RecordKind::KNOWN.to_vec(),
            read_batch_size: 1000,
            retry: RetryConfig::default(),
            delayed_after_failures: 3,
        }
    }

    /// Overrides whether this device is the source of truth.
    pub fn with_primary_device(mut self, primary: bool) -> Self {
        self.is_primary_device = primary;
        self
    }

    /// Sets the local account identity.
    pub fn with_self_identity(mut self, identity: SelfIdentity) -> Self {
        self.self_identity = identity;
        self
    }

    /// Sets the kinds this build processes.
    pub fn with_enabled_kinds(mut self, kinds: impl IntoIterator<Item = RecordKind>) -> Self {
        self.enabled_kinds = kinds.into_iter().collect();
        self
    }

    /// Sets the read batch size. Zero is treated as one.
    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the delayed-sync threshold.
    pub fn with_delayed_after_failures(mut self, failures: u32) -> Self {
        self.delayed_after_failures = failures;
        self
    }

    /// Returns true if records of this kind are processed by this build.
    pub fn is_enabled(&self, kind: RecordKind) -> bool {
        !kind.is_unknown() && self.enabled_kinds.contains(&kind)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DeviceId::PRIMARY, StorageKey::from_bytes([0u8; 32]))
    }
}

/// Backoff for retrying a pass after a conflict or a transient transport error.
///
/// Attempt 0 runs immediately; attempt `n` waits `base_delay * multiplier^(n-1)`,
/// capped at `max_delay`, plus up to `jitter` of that as random spread so linked
/// devices that conflicted with each other do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total passes attempted, including the first.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the wait before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Random spread as a fraction of the delay, in `0.0..=1.0`.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with default timings.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Sets the wait before the first retry.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Caps the wait between retries.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Makes delays deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Returns the wait before the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retry) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let grown = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = grown.min(self.max_delay.as_secs_f64()).max(0.0);

        let spread = self.jitter.clamp(0.0, 1.0);
        if spread > 0.0 && capped > 0.0 {
            let extra = capped * rand::thread_rng().gen_range(0.0..spread);
            Duration::from_secs_f64(capped + extra)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
