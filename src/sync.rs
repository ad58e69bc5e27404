//! Multi-camera synchronization protocol (spec §4.5): the `SyncRole`
//! bitset, its legality table, and the start/stop sequences that gate
//! broadcast commands and external-trigger enable ordering across a set
//! of sessions.
//!
//! Grounded in `PsychVideoCaptureSupportLibDC1394.c`'s `PsychDCSyncMode`
//! flag handling and the soft-sync/bus-sync/hw-sync start/stop bracketing
//! described in spec §4.5 and tested by E5/property 9/10 (spec §8).

use bitflags::bitflags;

use crate::error::{CaptureError, Result};
use crate::iidc::{CameraId, IidcSurface, Transmission};

bitflags! {
    /// Sync-role bits (spec §3 `sync_role`, §4.4 legal-combinations table).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct SyncRole: u8 {
        const MASTER = 0b0000_0001;
        const SLAVE  = 0b0000_0010;
        const SOFT   = 0b0000_0100;
        const BUS    = 0b0000_1000;
        const HW     = 0b0001_0000;
    }
}

impl SyncRole {
    /// Free-running, no multi-camera coupling.
    pub fn free_running() -> Self {
        SyncRole::empty()
    }

    /// Validates `self` against spec §4.4's legal-combinations table:
    /// `0`, `Master|Soft`, `Slave|Soft`, `Master|Bus`, `Slave|Bus`,
    /// `Master|Hw`, `Slave|Hw`. `Master & Slave` together is illegal, and
    /// `(Master|Slave)` without exactly one of `{Soft, Bus, Hw}` is illegal.
    pub fn validate(self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if self.contains(SyncRole::MASTER) && self.contains(SyncRole::SLAVE) {
            return Err(CaptureError::Config(
                "sync role cannot be both Master and Slave".into(),
            ));
        }
        if !(self.contains(SyncRole::MASTER) || self.contains(SyncRole::SLAVE)) {
            return Err(CaptureError::Config(format!(
                "sync role {self:?} sets a coupling bit without Master or Slave"
            )));
        }
        let coupling = self & (SyncRole::SOFT | SyncRole::BUS | SyncRole::HW);
        if coupling.bits().count_ones() != 1 {
            return Err(CaptureError::Config(format!(
                "sync role {self:?} must set exactly one of Soft, Bus, Hw"
            )));
        }
        Ok(())
    }

    pub fn is_master(self) -> bool {
        self.contains(SyncRole::MASTER)
    }

    pub fn is_slave(self) -> bool {
        self.contains(SyncRole::SLAVE)
    }
}

/// One session's view onto the sync protocol: its camera, its role, and
/// (for the Master-soft-sync fan-out) the mutex guarding its shared state,
/// which the Master acquires around the cross-camera transmission-enable
/// call (spec §5 mutex discipline: "the session mutex protects ... the
/// transmission-enable/disable cross-camera operations inside sync-start/
/// stop"). `T` is whatever state that session's mutex actually guards;
/// the sync protocol itself never inspects it.
pub struct SyncPeer<'a, T> {
    pub camera: CameraId,
    pub role: SyncRole,
    pub mutex: &'a std::sync::Mutex<T>,
}

/// Runs the sync-aware transmission-enable sequence (spec §4.5 "Start
/// sequence") for `self_camera` with role `self_role`, given the other
/// sessions currently participating in sync (only consulted when
/// `self_role` is `Master|Soft`).
///
/// Setting `Slave|Hw` on a camera that lacks the external-trigger feature
/// fails silently (spec §4.4): the caller should not call this at all in
/// that case and should instead keep the prior role, which is why this
/// function takes `has_external_trigger` as a precondition check rather
/// than silently downgrading mid-sequence.
pub fn start_sequence<T>(
    surface: &dyn IidcSurface,
    self_camera: CameraId,
    self_role: SyncRole,
    peers: &[SyncPeer<'_, T>],
) -> Result<()> {
    self_role.validate()?;

    if self_role.contains(SyncRole::HW) {
        surface.set_external_trigger_power(self_camera, false)?;
        if self_role.is_slave() {
            surface.set_external_trigger_power(self_camera, true)?;
        }
    }

    if self_role.is_master() && self_role.contains(SyncRole::BUS) {
        surface.set_broadcast(self_camera, true)?;
    }

    let skip_self_enable = self_role.is_slave() && !self_role.contains(SyncRole::HW);
    if !skip_self_enable {
        surface.set_transmission(self_camera, Transmission::On)?;
    }

    if self_role.is_master() && self_role.contains(SyncRole::SOFT) {
        for peer in peers {
            if peer.role == SyncRole::SLAVE | SyncRole::SOFT {
                let _guard = peer.mutex.lock().unwrap_or_else(|e| e.into_inner());
                surface.set_transmission(peer.camera, Transmission::On)?;
            }
        }
    }

    if self_role.is_master() && self_role.contains(SyncRole::BUS) {
        surface.set_broadcast(self_camera, false)?;
    }

    Ok(())
}

/// Mirrors [`start_sequence`] for `stop` (spec §4.5 "Stop sequence").
pub fn stop_sequence<T>(
    surface: &dyn IidcSurface,
    self_camera: CameraId,
    self_role: SyncRole,
    peers: &[SyncPeer<'_, T>],
) -> Result<()> {
    if self_role.is_master() && self_role.contains(SyncRole::BUS) {
        surface.set_broadcast(self_camera, true)?;
    }

    surface.set_transmission(self_camera, Transmission::Off)?;

    if self_role.is_master() && self_role.contains(SyncRole::SOFT) {
        for peer in peers {
            if peer.role == SyncRole::SLAVE | SyncRole::SOFT {
                let _guard = peer.mutex.lock().unwrap_or_else(|e| e.into_inner());
                surface.set_transmission(peer.camera, Transmission::Off)?;
            }
        }
    }

    if self_role.contains(SyncRole::HW) {
        surface.set_external_trigger_power(self_camera, false)?;
    }

    if self_role.is_master() && self_role.contains(SyncRole::BUS) {
        surface.set_broadcast(self_camera, false)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iidc::fake::{two_mode_camera, FakeIidcSurface};
    use crate::iidc::CameraId;

    /// Property 9: every rejected combination in spec §4.4 is rejected;
    /// every legal one is accepted.
    #[test]
    fn sync_legality_table() {
        let legal = [
            SyncRole::empty(),
            SyncRole::MASTER | SyncRole::SOFT,
            SyncRole::SLAVE | SyncRole::SOFT,
            SyncRole::MASTER | SyncRole::BUS,
            SyncRole::SLAVE | SyncRole::BUS,
            SyncRole::MASTER | SyncRole::HW,
            SyncRole::SLAVE | SyncRole::HW,
        ];
        for role in legal {
            assert!(role.validate().is_ok(), "{role:?} should be legal");
        }

        let illegal = [
            SyncRole::MASTER | SyncRole::SLAVE,
            SyncRole::MASTER | SyncRole::SLAVE | SyncRole::SOFT,
            SyncRole::MASTER,
            SyncRole::SLAVE,
            SyncRole::SOFT,
            SyncRole::MASTER | SyncRole::SOFT | SyncRole::BUS,
        ];
        for role in illegal {
            assert!(role.validate().is_err(), "{role:?} should be illegal");
        }
    }

    /// E5 / property 10: starting a Master|Soft session transitions its
    /// Slave|Soft peers from not-transmitting to transmitting, and
    /// broadcast is only on between the enable and disable instants.
    #[test]
    fn soft_sync_master_starts_and_stops_slaves() {
        let surface = FakeIidcSurface::new();
        surface.add_camera(0, two_mode_camera());
        surface.add_camera(1, two_mode_camera());
        surface.add_camera(2, two_mode_camera());
        let master = CameraId(0);
        let slave_a = CameraId(1);
        let slave_b = CameraId(2);

        let mutex_a = std::sync::Mutex::new(());
        let mutex_b = std::sync::Mutex::new(());
        let peers = [
            SyncPeer {
                camera: slave_a,
                role: SyncRole::SLAVE | SyncRole::SOFT,
                mutex: &mutex_a,
            },
            SyncPeer {
                camera: slave_b,
                role: SyncRole::SLAVE | SyncRole::SOFT,
                mutex: &mutex_b,
            },
        ];

        assert!(!surface.is_transmitting(slave_a));
        assert!(!surface.is_transmitting(slave_b));

        start_sequence(
            &surface,
            master,
            SyncRole::MASTER | SyncRole::SOFT,
            &peers,
        )
        .unwrap();

        assert!(surface.is_transmitting(master));
        assert!(surface.is_transmitting(slave_a));
        assert!(surface.is_transmitting(slave_b));

        stop_sequence(&surface, master, SyncRole::MASTER | SyncRole::SOFT, &peers).unwrap();

        assert!(!surface.is_transmitting(master));
        assert!(!surface.is_transmitting(slave_a));
        assert!(!surface.is_transmitting(slave_b));
    }

    /// Property 10: in Bus mode, broadcast is enabled exactly across the
    /// transmission-enable/disable instants.
    #[test]
    fn bus_broadcast_bracketing() {
        let surface = FakeIidcSurface::new();
        surface.add_camera(0, two_mode_camera());
        let master = CameraId(0);

        assert!(!surface.is_broadcasting(master));
        start_sequence::<()>(&surface, master, SyncRole::MASTER | SyncRole::BUS, &[]).unwrap();
        // Broadcast is disabled again by the end of start() (spec §4.5 step 6).
        assert!(!surface.is_broadcasting(master));
        assert!(surface.is_transmitting(master));

        stop_sequence::<()>(&surface, master, SyncRole::MASTER | SyncRole::BUS, &[]).unwrap();
        assert!(!surface.is_broadcasting(master));
        assert!(!surface.is_transmitting(master));
    }

    #[test]
    fn slave_without_hw_skips_self_enable_until_master_drives_it() {
        let surface = FakeIidcSurface::new();
        surface.add_camera(0, two_mode_camera());
        let slave = CameraId(0);

        start_sequence::<()>(&surface, slave, SyncRole::SLAVE | SyncRole::SOFT, &[]).unwrap();
        assert!(!surface.is_transmitting(slave));
    }
}
