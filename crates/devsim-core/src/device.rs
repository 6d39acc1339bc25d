//! Device contract

use crate::error::DeviceError;
use crate::registry::Registry;

/// A simulated device
///
/// Implementors keep their state in typed fields and expose what protocol
/// front ends may touch through [`Device::members`]. The simulation calls
/// [`Device::process`] once per cycle with the simulated time step in seconds.
pub trait Device: Send + Sized + 'static {
    /// Member table used by command binding and the control plane
    fn members() -> Registry<Self>;

    /// Advance the device by `dt` seconds of simulated time
    fn process(&mut self, dt: f64) -> Result<(), DeviceError> {
        let _ = dt;
        Ok(())
    }
}
