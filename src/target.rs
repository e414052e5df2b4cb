//! Boot-mode control of the target device.
//!
//! The boot straps are sampled while NRST rises, so both entry points run
//! the same power-cycle: drop the supply, set the straps, hold reset, then
//! re-apply power and release reset.

use std::time::Duration;

use log::debug;

use crate::probe::Probe;
use crate::Result;

/// Settle time after switching the supply and after releasing reset.
const POWER_SETTLE: Duration = Duration::from_millis(100);

/// Wait after releasing reset in system boot, long enough for the ST ROM to
/// initialize its auto-baud detector.
pub const DEFAULT_SYSTEM_STARTUP: Duration = Duration::from_millis(2700);

/// Wait after releasing reset when booting user flash.
pub const DEFAULT_FLASH_STARTUP: Duration = Duration::from_millis(100);

/// Power-cycle the target into system-memory boot (BOOT0=1, BOOT1=0).
pub fn enter_system_boot<P: Probe>(probe: &mut P, startup: Duration) -> Result<()> {
    debug!("resetting target into system memory boot");
    power_cycle(probe, true, startup)
}

/// Power-cycle the target into user-flash boot (BOOT0=0, BOOT1=0).
pub fn enter_user_boot<P: Probe>(probe: &mut P, startup: Duration) -> Result<()> {
    debug!("resetting target into user flash");
    power_cycle(probe, false, startup)
}

fn power_cycle<P: Probe>(probe: &mut P, boot0: bool, startup: Duration) -> Result<()> {
    probe.set_power(false)?;
    probe.set_boot0(boot0)?;
    probe.set_boot1(false)?;
    probe.set_nrst(false)?;
    probe.delay(POWER_SETTLE);
    probe.set_power(true)?;
    probe.delay(POWER_SETTLE);
    probe.set_nrst(true)?;
    probe.delay(startup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeProbe, ProbeOp};

    #[test]
    fn system_boot_sequences_power_straps_and_reset() {
        let mut probe = FakeProbe::new();
        enter_system_boot(&mut probe, Duration::from_millis(2700)).unwrap();

        assert_eq!(
            probe.ops,
            vec![
                ProbeOp::Power(false),
                ProbeOp::Boot0(true),
                ProbeOp::Boot1(false),
                ProbeOp::Nrst(false),
                ProbeOp::Delay(Duration::from_millis(100)),
                ProbeOp::Power(true),
                ProbeOp::Delay(Duration::from_millis(100)),
                ProbeOp::Nrst(true),
                ProbeOp::Delay(Duration::from_millis(2700)),
            ]
        );
    }

    #[test]
    fn user_boot_keeps_boot0_low() {
        let mut probe = FakeProbe::new();
        enter_user_boot(&mut probe, DEFAULT_FLASH_STARTUP).unwrap();

        assert!(probe.ops.contains(&ProbeOp::Boot0(false)));
        assert_eq!(*probe.ops.last().unwrap(), ProbeOp::Delay(Duration::from_millis(100)));
    }
}
