use breakwatch_core::CommandMetrics;
use std::time::Duration;

/// Latest metrics per command name.
///
/// Entries expire a fixed time after their last write, so commands that
/// stop reporting drop out of the aggregate on their own.
pub struct CommandCache {
    entries: moka::sync::Cache<String, CommandMetrics>,
}

impl CommandCache {
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let entries = moka::sync::Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }

    /// Replace the entry for this command and restart its expiry
    pub fn upsert(&self, metrics: CommandMetrics) {
        self.entries.insert(metrics.name.clone(), metrics);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<CommandMetrics> {
        self.entries.get(name)
    }

    /// Live entries, ordered by command name
    #[must_use]
    pub fn snapshot(&self) -> Vec<CommandMetrics> {
        let mut commands: Vec<CommandMetrics> = self.entries.iter().map(|(_, metrics)| metrics).collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, success: u64) -> CommandMetrics {
        CommandMetrics {
            name: name.to_string(),
            success,
            reporting_hosts: 1,
            ..CommandMetrics::default()
        }
    }

    #[test]
    fn test_upsert_replaces_by_name() {
        let cache = CommandCache::new(Duration::from_secs(10), 100);
        cache.upsert(command("b", 1));
        cache.upsert(command("a", 1));
        cache.upsert(command("b", 7));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "a");
        assert_eq!(snapshot[1].name, "b");
        assert_eq!(snapshot[1].success, 7);
        assert_eq!(cache.get("b").map(|m| m.success), Some(7));
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = CommandCache::new(Duration::from_millis(100), 100);
        cache.upsert(command("a", 1));
        assert!(!cache.is_empty());

        std::thread::sleep(Duration::from_millis(250));
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
        assert!(cache.snapshot().is_empty());
    }
}
