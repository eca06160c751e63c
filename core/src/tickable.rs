use anyhow::Result;

/// Representation of X amount of ticks of the scheduler's
/// virtual-time clock.
pub type Ticks = u64;

pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
