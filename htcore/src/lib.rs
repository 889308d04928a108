// signal module
pub mod signal {
    pub mod fitness;
    pub mod interpolate;
    pub mod points;
    pub mod stability;
    pub mod waveform;
}
