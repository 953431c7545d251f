//! Group descriptor parsing.
//!
//! A scalable group carries `"<min>:<max>"` in its free-text description.
//! Anything else pins the group to its current size, which keeps it out of
//! discovery. The fallback is silent towards the autoscaler and only
//! surfaces as a warning in the log.

use tracing::warn;

/// Scaling bounds of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: usize,
    pub max: usize,
}

impl Bounds {
    /// Degenerate bounds pinning a group to `size`.
    pub fn fixed(size: usize) -> Self {
        Self {
            min: size,
            max: size,
        }
    }

    /// Only groups with room between min and max are scalable.
    pub fn is_scalable(&self) -> bool {
        self.min < self.max
    }
}

/// Parse exactly two colon-separated integers with `min < max`.
pub fn parse_bounds(description: &str) -> Option<Bounds> {
    let (min, max) = description.split_once(':')?;
    if max.contains(':') {
        return None;
    }
    let bounds = Bounds {
        min: parse_count(min)?,
        max: parse_count(max)?,
    };
    bounds.is_scalable().then_some(bounds)
}

/// Plain decimal digits only: no sign, no surrounding whitespace.
fn parse_count(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Bounds for a group, falling back to its current size.
pub fn bounds_or_fixed(group_id: &str, description: &str, current_size: usize) -> Bounds {
    match parse_bounds(description) {
        Some(bounds) => bounds,
        None => {
            warn!(
                group = %group_id,
                %description,
                size = current_size,
                "descriptor is not a usable min:max pair; group pinned to its current size"
            );
            Bounds::fixed(current_size)
        }
    }
}
