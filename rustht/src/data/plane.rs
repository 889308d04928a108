use std::fmt::Display;

/// Measurement plane of a head-tail pickup signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Plane {
    Horizontal,
    Vertical,
}

impl Plane {
    pub const ALL: [Plane; 2] = [Plane::Horizontal, Plane::Vertical];

    pub fn to_str(&self) -> &'static str {
        match self {
            Plane::Horizontal => "horizontal",
            Plane::Vertical => "vertical",
        }
    }

    pub fn from_str(name: &str) -> Option<Plane> {
        match name {
            "horizontal" => Some(Plane::Horizontal),
            "vertical" => Some(Plane::Vertical),
            _ => None,
        }
    }
}

impl Display for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Signal kind recorded per plane. `sum` is accepted as an alias for the
/// sigma signal, acquisition front-ends label it either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    Delta,
    Sigma,
}

impl Signal {
    pub const ALL: [Signal; 2] = [Signal::Delta, Signal::Sigma];

    pub fn to_str(&self) -> &'static str {
        match self {
            Signal::Delta => "delta",
            Signal::Sigma => "sigma",
        }
    }

    /// Raw group names this signal may be stored under, in lookup order.
    pub fn raw_names(&self) -> &'static [&'static str] {
        match self {
            Signal::Delta => &["delta"],
            Signal::Sigma => &["sigma", "sum"],
        }
    }

    pub fn from_str(name: &str) -> Option<Signal> {
        match name {
            "delta" => Some(Signal::Delta),
            "sigma" | "sum" => Some(Signal::Sigma),
            _ => None,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}
