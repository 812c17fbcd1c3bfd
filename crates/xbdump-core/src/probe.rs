//! Optional capability probing.
//!
//! Optional features may simply not exist on a given firmware variant. Every
//! optional query goes through [`Probe`], which turns any query failure into
//! `Unsupported` instead of an error; nothing here returns `Err`.

use std::fmt;

use tracing::debug;

use crate::events::{DumpEvent, DumpObserver};
use crate::query::{DeviceQuery, QueryError, QueryKey, query_bool, query_u32};

/// Outcome of an optional query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Answered(T),
    Unsupported(QueryError),
}

impl<T> Probe<T> {
    pub fn answered(self) -> Option<T> {
        match self {
            Probe::Answered(v) => Some(v),
            Probe::Unsupported(_) => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.answered().unwrap_or(default)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Probe<U> {
        match self {
            Probe::Answered(v) => Probe::Answered(f(v)),
            Probe::Unsupported(e) => Probe::Unsupported(e),
        }
    }
}

impl<T> From<Result<T, QueryError>> for Probe<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(v) => Probe::Answered(v),
            Err(e) => {
                debug!(key = %e.key(), error = %e, "Optional query unanswered");
                Probe::Unsupported(e)
            }
        }
    }
}

/// Restricted firmware modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestrictedState {
    #[default]
    Unrestricted,
    Manufacturing,
    Recovery,
}

impl RestrictedState {
    pub fn is_restricted(&self) -> bool {
        !matches!(self, RestrictedState::Unrestricted)
    }
}

impl fmt::Display for RestrictedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestrictedState::Unrestricted => write!(f, "normal"),
            RestrictedState::Manufacturing => write!(f, "manufacturing"),
            RestrictedState::Recovery => write!(f, "recovery"),
        }
    }
}

/// Chip family, selecting which query family answers scaling questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchitectureVariant {
    #[default]
    Standard,
    Versal,
}

impl ArchitectureVariant {
    /// Scaling-control probes for this family.
    pub fn scaling<'a, D: DeviceQuery + ?Sized>(self, device: &'a D) -> ScalingControl<'a, D> {
        ScalingControl {
            device,
            variant: self,
        }
    }
}

/// Detect manufacturing or recovery images.
///
/// Unanswerable queries count as "not in that state". Manufacturing is
/// reported ahead of recovery when both are set.
pub fn probe_restricted_state<D, O>(device: &D, observer: &O) -> RestrictedState
where
    D: DeviceQuery + ?Sized,
    O: DumpObserver + ?Sized,
{
    let is_mfg = Probe::from(query_bool(device, QueryKey::IsMfg)).unwrap_or(false);
    let is_recovery = Probe::from(query_bool(device, QueryKey::IsRecovery)).unwrap_or(false);

    let state = if is_mfg {
        RestrictedState::Manufacturing
    } else if is_recovery {
        RestrictedState::Recovery
    } else {
        RestrictedState::Unrestricted
    };

    if state.is_restricted() {
        debug!(bdf = %device.bdf(), state = %state, "Device runs a restricted image");
        observer.on_event(&DumpEvent::Restricted { state });
    }
    state
}

/// Detect the architecture family, defaulting to `Standard`.
pub fn probe_architecture_variant<D: DeviceQuery + ?Sized>(device: &D) -> ArchitectureVariant {
    match Probe::from(query_bool(device, QueryKey::IsVersal)) {
        Probe::Answered(true) => ArchitectureVariant::Versal,
        Probe::Answered(false) => ArchitectureVariant::Standard,
        Probe::Unsupported(_) => ArchitectureVariant::default(),
    }
}

/// The three scaling-control probes, bound to one query family.
pub struct ScalingControl<'a, D: ?Sized> {
    device: &'a D,
    variant: ArchitectureVariant,
}

impl<D: DeviceQuery + ?Sized> ScalingControl<'_, D> {
    pub fn variant(&self) -> ArchitectureVariant {
        self.variant
    }

    pub fn enabled_key(&self) -> QueryKey {
        match self.variant {
            ArchitectureVariant::Standard => QueryKey::XmcScalingEnabled,
            ArchitectureVariant::Versal => QueryKey::XgqScalingEnabled,
        }
    }

    pub fn power_override_key(&self) -> QueryKey {
        match self.variant {
            ArchitectureVariant::Standard => QueryKey::XmcScalingPowerOverride,
            ArchitectureVariant::Versal => QueryKey::XgqScalingPowerOverride,
        }
    }

    pub fn temp_override_key(&self) -> QueryKey {
        match self.variant {
            ArchitectureVariant::Standard => QueryKey::XmcScalingTempOverride,
            ArchitectureVariant::Versal => QueryKey::XgqScalingTempOverride,
        }
    }

    pub fn enabled(&self) -> Probe<bool> {
        query_bool(self.device, self.enabled_key()).into()
    }

    /// Power threshold override in watts.
    pub fn power_override(&self) -> Probe<u32> {
        query_u32(self.device, self.power_override_key()).into()
    }

    /// Temperature threshold override in degrees Celsius.
    pub fn temp_override(&self) -> Probe<u32> {
        query_u32(self.device, self.temp_override_key()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDevice;
    use crate::events::RecordingObserver;
    use crate::query::QueryValue;

    fn device() -> MockDevice {
        MockDevice::new(0, "0000:d8:00.0")
    }

    #[test]
    fn test_unanswerable_means_unrestricted() {
        let obs = RecordingObserver::default();
        let dev = device().failing(QueryKey::IsRecovery, "timeout");

        assert_eq!(
            probe_restricted_state(&dev, &obs),
            RestrictedState::Unrestricted
        );
        assert!(obs.events().is_empty());
    }

    #[test]
    fn test_recovery_detected_and_reported() {
        let obs = RecordingObserver::default();
        let dev = device().with(QueryKey::IsRecovery, QueryValue::Bool(true));

        assert_eq!(probe_restricted_state(&dev, &obs), RestrictedState::Recovery);
        assert_eq!(
            obs.events(),
            vec![DumpEvent::Restricted {
                state: RestrictedState::Recovery
            }]
        );
    }

    #[test]
    fn test_manufacturing_wins_over_recovery() {
        let dev = device()
            .with(QueryKey::IsMfg, QueryValue::Int(1))
            .with(QueryKey::IsRecovery, QueryValue::Int(1));
        let state = probe_restricted_state(&dev, &RecordingObserver::default());
        assert_eq!(state, RestrictedState::Manufacturing);
        assert_eq!(state.to_string(), "manufacturing");
    }

    #[test]
    fn test_variant_defaults_to_standard() {
        assert_eq!(
            probe_architecture_variant(&device()),
            ArchitectureVariant::Standard
        );
        let versal = device().with(QueryKey::IsVersal, QueryValue::Bool(true));
        assert_eq!(
            probe_architecture_variant(&versal),
            ArchitectureVariant::Versal
        );
    }

    #[test]
    fn test_scaling_uses_variant_family() {
        let dev = device()
            .with(QueryKey::XgqScalingEnabled, QueryValue::Bool(true))
            .with(QueryKey::XmcScalingEnabled, QueryValue::Bool(false));

        let xgq = ArchitectureVariant::Versal.scaling(&dev);
        assert_eq!(xgq.variant(), ArchitectureVariant::Versal);
        assert_eq!(xgq.enabled(), Probe::Answered(true));

        let xmc = ArchitectureVariant::Standard.scaling(&dev);
        assert_eq!(xmc.enabled(), Probe::Answered(false));
        assert!(xmc.temp_override().answered().is_none());
    }
}
