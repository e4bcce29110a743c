/// Tunables for the energy-driven speech detector. `min_rms` is expressed
/// in the feature units produced by the gateway's acoustic front-end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Consecutive above-threshold frames required to confirm speech start.
    pub min_start: u32,
    /// Consecutive below-threshold frames required to confirm speech end.
    pub hangover: u32,
    /// RMS threshold separating speech from non-speech.
    pub min_rms: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_start: 2,
            hangover: 20,
            min_rms: 1200.0,
        }
    }
}
