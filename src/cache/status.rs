use std::fmt;

/// Counters accumulated over the life of a cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Handles served by `get` and `begin_update`.
    pub served: u64,
    /// Commits of modified entries.
    pub saved: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub evicted: u64,
    pub limit_doublings: u64,
}

/// Point-in-time view of the cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Entry slots allocated by the pool.
    pub allocated: usize,
    pub resident: usize,
    /// Known entries nobody holds a handle on.
    pub unlocked: usize,
    /// Entries that are referenced or checked out.
    pub locked: usize,
    /// Entries holding modifications not yet written back.
    pub dirty: usize,
    pub usage: usize,
    pub limit: usize,
    pub counters: Counters,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Object cache status")?;
        writeln!(f, "  allocated entries : {}", self.allocated)?;
        writeln!(f, "  resident          : {}", self.resident)?;
        writeln!(f, "  unlocked          : {}", self.unlocked)?;
        writeln!(f, "  locked or in use  : {}", self.locked)?;
        writeln!(f, "  modified          : {}", self.dirty)?;
        writeln!(f, "  usage / limit     : {} / {}", self.usage, self.limit)?;
        writeln!(f, "  limit doublings   : {}", self.counters.limit_doublings)?;
        writeln!(f, "  served / saved    : {} / {}", self.counters.served, self.counters.saved)?;
        writeln!(
            f,
            "  disk reads/writes : {} / {}",
            self.counters.disk_reads, self.counters.disk_writes
        )?;
        write!(f, "  evicted           : {}", self.counters.evicted)
    }
}
