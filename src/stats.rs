//! Statistics counters (§3, §4 overview): integer counters keyed by name,
//! modified with `INCRBY`/`DECRBY` under `stat:<name>`.

use crate::context::Context;
use crate::error::JobResult;

#[derive(Clone)]
pub struct Stats {
    ctx: Context,
}

impl Stats {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn increment(&self, name: &str) -> JobResult<i64> {
        self.ctx.incrby(&stat_key(name), 1).await
    }

    pub async fn increment_by(&self, name: &str, by: i64) -> JobResult<i64> {
        self.ctx.incrby(&stat_key(name), by).await
    }

    pub async fn decrement(&self, name: &str) -> JobResult<i64> {
        self.ctx.decrby(&stat_key(name), 1).await
    }

    pub async fn decrement_by(&self, name: &str, by: i64) -> JobResult<i64> {
        self.ctx.decrby(&stat_key(name), by).await
    }

    pub async fn get(&self, name: &str) -> JobResult<i64> {
        Ok(self
            .ctx
            .get(&stat_key(name))
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    pub async fn clear(&self, name: &str) -> JobResult<()> {
        self.ctx.del(&stat_key(name)).await
    }
}

fn stat_key(name: &str) -> String {
    format!("stat:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_key_format() {
        assert_eq!(stat_key("processed"), "stat:processed");
        assert_eq!(stat_key("failed:host:1:q"), "stat:failed:host:1:q");
    }
}
